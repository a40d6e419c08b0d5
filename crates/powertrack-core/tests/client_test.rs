// Lifecycle tests for `PowerTrackClient` against scripted and mock servers.
#![allow(clippy::unwrap_used)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use futures_util::{StreamExt, stream};
use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use powertrack_api::Error as ApiError;
use powertrack_core::{
    BackfillMinutes, ClientError, ConnectionState, FailurePhase, FixedLocator, HttpTransport,
    LineStream, PowerTrackClient, PowerTrackClientBuilder, Record, StreamFailure, StreamRequest,
    StreamResponse, Transport,
};

// ── Scripted transport ──────────────────────────────────────────────

const URL: &str = "https://stream.example.com/stream/powertrack/prod.json";
const WAIT: Duration = Duration::from_secs(5);

/// What the next `open()` does.
enum Scene {
    /// Fail before any response.
    Refuse,
    /// Answer with a status and a finite body.
    Respond(u16, Vec<&'static str>),
    /// 200, then these lines, then a read error.
    Break(Vec<&'static str>),
    /// 200, then records and keep-alives until dropped.
    Endless,
    /// 200, then nothing at all.
    Silent,
    /// Never answer.
    Hang,
}

#[derive(Clone, Default)]
struct Scripted {
    scenes: Arc<Mutex<VecDeque<Scene>>>,
    opened: Arc<Mutex<Vec<String>>>,
}

impl Scripted {
    fn new(scenes: impl IntoIterator<Item = Scene>) -> Self {
        Self {
            scenes: Arc::new(Mutex::new(scenes.into_iter().collect())),
            opened: Arc::default(),
        }
    }

    fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

fn body(lines: Vec<&'static str>) -> LineStream {
    stream::iter(lines.into_iter().map(|l| Ok(l.to_owned()))).boxed()
}

fn broken(lines: Vec<&'static str>) -> LineStream {
    let invalid = String::from_utf8(vec![0xff, 0xfe]).unwrap_err();
    stream::iter(lines.into_iter().map(|l| Ok(l.to_owned())))
        .chain(stream::iter([Err(ApiError::Decode(invalid))]))
        .boxed()
}

fn endless() -> LineStream {
    stream::unfold(0_u64, |n| async move {
        tokio::time::sleep(Duration::from_millis(2)).await;
        let line = if n % 3 == 0 {
            String::new()
        } else {
            format!("{{\"id\":{n}}}")
        };
        Some((Ok(line), n + 1))
    })
    .boxed()
}

impl Transport for Scripted {
    async fn open(&self, request: &StreamRequest) -> Result<StreamResponse, ApiError> {
        self.opened.lock().unwrap().push(request.url.clone());
        let scene = self.scenes.lock().unwrap().pop_front();
        match scene {
            None | Some(Scene::Refuse) => Err(ApiError::Tls("handshake failed".into())),
            Some(Scene::Respond(status, lines)) => Ok(StreamResponse::new(status, body(lines))),
            Some(Scene::Break(lines)) => Ok(StreamResponse::new(200, broken(lines))),
            Some(Scene::Endless) => Ok(StreamResponse::new(200, endless())),
            Some(Scene::Silent) => Ok(StreamResponse::new(
                200,
                stream::pending::<Result<String, ApiError>>().boxed(),
            )),
            Some(Scene::Hang) => std::future::pending().await,
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

#[derive(Clone, Default)]
struct Sink {
    records: Arc<Mutex<Vec<String>>>,
    failures: Arc<AtomicUsize>,
}

impl Sink {
    fn records(&self) -> Vec<String> {
        self.records.lock().unwrap().clone()
    }

    fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }
}

fn builder_with<F>(sink: &Sink, on_record: F) -> PowerTrackClientBuilder<HttpTransport>
where
    F: Fn(&Sink, Record) -> Result<(), powertrack_core::HandlerError> + Send + Sync + 'static,
{
    let records_sink = sink.clone();
    let failures = Arc::clone(&sink.failures);
    PowerTrackClient::builder(move |record| on_record(&records_sink, record))
        .on_error(move |_| {
            failures.fetch_add(1, Ordering::SeqCst);
        })
        .credentials("user", "pass")
        .url(URL)
        .locator(FixedLocator::none())
}

fn collect(sink: &Sink, record: Record) -> Result<(), powertrack_core::HandlerError> {
    sink.records.lock().unwrap().push(record.into_string());
    Ok(())
}

fn client(sink: &Sink, transport: &Scripted) -> PowerTrackClient<Scripted> {
    builder_with(sink, collect)
        .transport(transport.clone())
        .build()
        .unwrap()
}

async fn closed<T: Transport>(client: &PowerTrackClient<T>) {
    tokio::time::timeout(WAIT, client.closed())
        .await
        .expect("stream did not close in time");
}

async fn reach<T: Transport>(client: &PowerTrackClient<T>, state: ConnectionState) {
    let mut rx = client.state_changes();
    tokio::time::timeout(WAIT, rx.wait_for(|s| *s == state))
        .await
        .expect("state not reached in time")
        .unwrap();
}

// ── Construction ────────────────────────────────────────────────────

#[test]
fn test_settings_are_visible_after_build() {
    let client = client(&Sink::default(), &Scripted::default());

    assert_eq!(client.credentials().username(), "user");
    assert_eq!(client.url(), URL);
    assert_eq!(client.config_source(), None);
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(!client.connected());
    assert!(client.last_failure().is_none());
}

#[test]
fn test_build_without_credentials_fails() {
    let err = PowerTrackClient::builder(|_| Ok(()))
        .url(URL)
        .locator(FixedLocator::none())
        .build()
        .unwrap_err();

    assert!(matches!(err, ClientError::Configuration(_)), "{err:?}");
}

#[test]
fn test_connect_requires_a_runtime() {
    let transport = Scripted::default();
    let client = client(&Sink::default(), &transport);

    // Validation still comes first.
    assert!(matches!(
        client.connect(Some(9)),
        Err(ClientError::InvalidArgument(_))
    ));
    assert!(matches!(client.connect(None), Err(ClientError::NoRuntime)));
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(transport.opened().is_empty());
}

// ── Connect failures ────────────────────────────────────────────────

#[tokio::test]
async fn test_connect_failure_reports_once_and_never_connects() {
    let sink = Sink::default();
    let transport = Scripted::new([Scene::Refuse]);
    let client = client(&sink, &transport);

    client.connect(None).unwrap();
    closed(&client).await;

    assert_eq!(sink.failures(), 1);
    assert!(!client.connected());
    let failure = client.last_failure().unwrap();
    assert!(matches!(*failure, StreamFailure::Connect { .. }));
    assert_eq!(failure.phase(), FailurePhase::Connect);
    assert!(sink.records().is_empty());
}

#[tokio::test]
async fn test_rejected_status_is_a_connection_failure() {
    let sink = Sink::default();
    let transport = Scripted::new([Scene::Respond(503, vec!["", "Service Unavailable", "x"])]);
    let client = client(&sink, &transport);

    client.connect(None).unwrap();
    closed(&client).await;

    assert_eq!(sink.failures(), 1);
    assert!(sink.records().is_empty());
    let failure = client.last_failure().unwrap();
    assert!(failure.is_connection_failure());
    assert!(!failure.is_auth_failure());
    match &*failure {
        StreamFailure::Status { status, body } => {
            assert_eq!(*status, 503);
            assert_eq!(body.as_deref(), Some("Service Unavailable"));
        }
        other => panic!("unexpected failure: {other:?}"),
    }
}

#[tokio::test]
async fn test_unauthorized_is_an_auth_failure() {
    let sink = Sink::default();
    let transport = Scripted::new([Scene::Respond(401, vec!["Unauthorized"])]);
    let client = client(&sink, &transport);

    client.connect(None).unwrap();
    closed(&client).await;

    assert!(client.last_failure().unwrap().is_auth_failure());
}

// ── Backfill ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_invalid_backfill_fails_before_network() {
    let sink = Sink::default();
    let transport = Scripted::new([Scene::Endless]);
    let client = client(&sink, &transport);

    for minutes in [12, -1, 6] {
        assert!(matches!(
            client.connect(Some(minutes)),
            Err(ClientError::InvalidArgument(_))
        ));
    }

    assert!(transport.opened().is_empty());
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(sink.failures(), 0);
}

#[tokio::test]
async fn test_backfill_is_added_to_the_request_url() {
    let transport = Scripted::new([
        Scene::Respond(200, vec![]),
        Scene::Respond(200, vec![]),
        Scene::Respond(200, vec![]),
    ]);
    let client = client(&Sink::default(), &transport);

    client.connect(Some(3)).unwrap();
    closed(&client).await;
    client
        .connect_with(Some(BackfillMinutes::new(5).unwrap()))
        .unwrap();
    closed(&client).await;
    client.connect(None).unwrap();
    closed(&client).await;

    assert_eq!(
        transport.opened(),
        vec![
            format!("{URL}?backfillMinutes=3"),
            format!("{URL}?backfillMinutes=5"),
            URL.to_owned(),
        ]
    );
    // The configured URL itself never changes.
    assert_eq!(client.url(), URL);
}

// ── Streaming ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_endless_stream_connects_then_disconnects() {
    let sink = Sink::default();
    let transport = Scripted::new([Scene::Endless]);
    let client = client(&sink, &transport);

    client.connect(Some(5)).unwrap();
    reach(&client, ConnectionState::Connected).await;
    assert!(client.connected());

    tokio::time::timeout(WAIT, async {
        while sink.records().len() < 5 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    client.disconnect().await;

    assert!(!client.connected());
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(sink.failures(), 0);
    assert!(client.last_failure().is_none());

    let records = sink.records();
    assert!(records.iter().all(|r| !r.is_empty()));

    // Nothing arrives once disconnect() has returned.
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(sink.records().len(), records.len());
}

#[tokio::test]
async fn test_blank_lines_skipped_and_order_kept() {
    let sink = Sink::default();
    let transport = Scripted::new([Scene::Respond(
        200,
        vec!["", "{\"n\":1}", "  ", "{\"n\":2}", "\t", "{\"n\":3}", ""],
    )]);
    let client = client(&sink, &transport);

    client.connect(None).unwrap();
    closed(&client).await;

    assert_eq!(sink.records(), vec!["{\"n\":1}", "{\"n\":2}", "{\"n\":3}"]);
    // A natural end is not a failure.
    assert_eq!(sink.failures(), 0);
    assert!(client.last_failure().is_none());
}

#[tokio::test]
async fn test_handler_error_ends_the_stream() {
    let sink = Sink::default();
    let transport = Scripted::new([Scene::Respond(200, vec!["one", "two", "three"])]);
    let client = builder_with(&sink, |sink, record| {
        let stop = record.as_str() == "two";
        collect(sink, record)?;
        if stop {
            return Err("refusing record two".into());
        }
        Ok(())
    })
    .transport(transport.clone())
    .build()
    .unwrap();

    client.connect(None).unwrap();
    closed(&client).await;

    assert_eq!(sink.records(), vec!["one", "two"]);
    assert_eq!(sink.failures(), 1);
    let failure = client.last_failure().unwrap();
    assert_eq!(failure.phase(), FailurePhase::Read);
    assert!(failure.to_string().contains("refusing record two"));
}

#[tokio::test]
async fn test_handler_panic_is_contained() {
    let sink = Sink::default();
    let transport = Scripted::new([
        Scene::Respond(200, vec!["boom", "after"]),
        Scene::Respond(200, vec!["fine"]),
    ]);
    let client = builder_with(&sink, |sink, record| {
        assert_ne!(record.as_str(), "boom", "handler exploded");
        collect(sink, record)
    })
    .transport(transport.clone())
    .build()
    .unwrap();

    client.connect(None).unwrap();
    closed(&client).await;

    assert_eq!(sink.failures(), 1);
    assert!(matches!(
        *client.last_failure().unwrap(),
        StreamFailure::Handler { .. }
    ));

    // The client is still usable.
    client.connect(None).unwrap();
    closed(&client).await;
    assert_eq!(sink.records(), vec!["fine"]);
}

#[tokio::test]
async fn test_read_error_ends_the_stream() {
    let sink = Sink::default();
    let transport = Scripted::new([Scene::Break(vec!["{\"n\":1}", "", "{\"n\":2}"])]);
    let client = client(&sink, &transport);

    client.connect(None).unwrap();
    closed(&client).await;

    assert_eq!(sink.records(), vec!["{\"n\":1}", "{\"n\":2}"]);
    assert_eq!(sink.failures(), 1);
    assert!(!client.connected());
    let failure = client.last_failure().unwrap();
    assert!(matches!(*failure, StreamFailure::Read { .. }));
    assert_eq!(failure.phase(), FailurePhase::Read);
}

#[tokio::test]
async fn test_error_callback_sees_disconnected_and_can_reconnect() {
    let transport = Scripted::new([
        Scene::Break(vec!["{\"n\":1}"]),
        Scene::Respond(200, vec!["{\"n\":2}"]),
    ]);
    let sink = Sink::default();
    let slot: Arc<OnceLock<Weak<PowerTrackClient<Scripted>>>> = Arc::default();
    let seen: Arc<Mutex<Vec<(ConnectionState, bool)>>> = Arc::default();

    let client = {
        let slot = Arc::clone(&slot);
        let seen = Arc::clone(&seen);
        let records = sink.clone();
        PowerTrackClient::builder(move |record| collect(&records, record))
            .on_error(move |_| {
                let Some(client) = slot.get().and_then(Weak::upgrade) else {
                    return;
                };
                let reconnected = client.connect(None).is_ok();
                seen.lock().unwrap().push((client.state(), reconnected));
            })
            .credentials("user", "pass")
            .url(URL)
            .locator(FixedLocator::none())
            .transport(transport.clone())
            .build()
            .map(Arc::new)
            .unwrap()
    };
    slot.set(Arc::downgrade(&client)).unwrap();

    client.connect(None).unwrap();
    tokio::time::timeout(WAIT, async {
        while sink.records().len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    closed(&client).await;

    // The callback ran once, after the failed stream was already idle.
    assert_eq!(*seen.lock().unwrap(), vec![(ConnectionState::Connecting, true)]);
    assert_eq!(sink.records(), vec!["{\"n\":1}", "{\"n\":2}"]);
    assert_eq!(transport.opened().len(), 2);
}

#[tokio::test]
async fn test_silent_stream_stalls() {
    let sink = Sink::default();
    let transport = Scripted::new([Scene::Silent]);
    let client = builder_with(&sink, collect)
        .stall_timeout(Some(Duration::from_millis(50)))
        .transport(transport.clone())
        .build()
        .unwrap();

    client.connect(None).unwrap();
    closed(&client).await;

    assert_eq!(sink.failures(), 1);
    assert!(matches!(
        *client.last_failure().unwrap(),
        StreamFailure::Stalled { .. }
    ));
}

// ── Lifecycle ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_disconnect_when_idle_is_a_noop() {
    let client = client(&Sink::default(), &Scripted::default());

    client.disconnect().await;
    client.disconnect().await;

    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(client.last_failure().is_none());
}

#[tokio::test]
async fn test_second_connect_while_active_is_rejected() {
    let sink = Sink::default();
    let transport = Scripted::new([Scene::Hang]);
    let client = client(&sink, &transport);

    client.connect(None).unwrap();
    assert!(matches!(
        client.connect(None),
        Err(ClientError::AlreadyActive {
            state: ConnectionState::Connecting
        })
    ));

    // Cancellation reaches a request that never answers.
    tokio::time::timeout(WAIT, client.disconnect()).await.unwrap();
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(sink.failures(), 0);
    assert_eq!(transport.opened().len(), 1);
}

#[tokio::test]
async fn test_reconnect_after_self_termination() {
    let sink = Sink::default();
    let transport = Scripted::new([Scene::Refuse, Scene::Respond(200, vec!["{\"a\":1}"])]);
    let client = client(&sink, &transport);

    client.connect(None).unwrap();
    closed(&client).await;
    assert_eq!(sink.failures(), 1);

    client.connect(Some(1)).unwrap();
    closed(&client).await;

    assert_eq!(sink.records(), vec!["{\"a\":1}"]);
    assert_eq!(transport.opened().len(), 2);
    // The earlier failure is still the most recent one.
    assert_eq!(client.last_failure().unwrap().phase(), FailurePhase::Connect);
}

#[tokio::test]
async fn test_dropping_the_client_stops_the_worker() {
    let sink = Sink::default();
    let transport = Scripted::new([Scene::Endless]);
    let client = client(&sink, &transport);
    let mut states = client.state_changes();

    client.connect(None).unwrap();
    reach(&client, ConnectionState::Connected).await;
    drop(client);

    tokio::time::timeout(WAIT, async {
        while *states.borrow_and_update() != ConnectionState::Disconnected {
            if states.changed().await.is_err() {
                break;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(*states.borrow(), ConnectionState::Disconnected);
}

// ── Over HTTP ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_end_to_end_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stream.json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("{\"id\":1}\r\n\r\n{\"id\":2}\r\n"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let sink = Sink::default();
    let client = builder_with(&sink, collect)
        .url(format!("{}/stream.json", server.uri()))
        .build()
        .unwrap();

    client.connect(None).unwrap();
    closed(&client).await;

    assert_eq!(sink.records(), vec!["{\"id\":1}", "{\"id\":2}"]);
    assert_eq!(sink.failures(), 0);
    assert!(client.last_failure().is_none());
}

#[tokio::test]
async fn test_http_rejection_carries_the_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Invalid credentials\n"))
        .mount(&server)
        .await;

    let sink = Sink::default();
    let client = builder_with(&sink, collect)
        .url(format!("{}/stream.json", server.uri()))
        .build()
        .unwrap();

    client.connect(None).unwrap();
    closed(&client).await;

    let failure = client.last_failure().unwrap();
    assert!(failure.is_auth_failure());
    assert!(matches!(
        &*failure,
        StreamFailure::Status { body: Some(b), .. } if b == "Invalid credentials"
    ));
}
