// Integration tests for `HttpTransport` using wiremock.
#![allow(clippy::unwrap_used)]

use futures_util::StreamExt;
use pretty_assertions::assert_eq;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use powertrack_api::{
    Credentials, Error, HttpTransport, StreamRequest, Transport, TransportConfig, append_backfill,
};

// ── Helpers ─────────────────────────────────────────────────────────

const STREAM_PATH: &str = "/stream/powertrack/accounts/acme/publishers/twitter/prod.json";

fn request(url: String) -> StreamRequest {
    StreamRequest {
        url,
        credentials: Credentials::new("user", "pass".to_string()),
    }
}

fn transport() -> HttpTransport {
    HttpTransport::new(&TransportConfig::default()).unwrap()
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_sends_basic_auth_and_streams_lines() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(STREAM_PATH))
        // base64("user:pass")
        .and(header("authorization", "Basic dXNlcjpwYXNz"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("{\"id\":\"1\"}\r\n\r\n{\"id\":\"2\"}\r\n"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let response = transport()
        .open(&request(format!("{}{STREAM_PATH}", server.uri())))
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert!(response.is_success());

    let lines: Vec<String> = response.lines.map(Result::unwrap).collect().await;
    assert_eq!(lines, vec!["{\"id\":\"1\"}", "", "{\"id\":\"2\"}"]);
}

#[tokio::test]
async fn test_backfill_parameter_reaches_server() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(STREAM_PATH))
        .and(query_param("backfillMinutes", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok\n"))
        .expect(1)
        .mount(&server)
        .await;

    let url = append_backfill(&format!("{}{STREAM_PATH}", server.uri()), 3).unwrap();
    let response = transport().open(&request(url)).await.unwrap();
    assert_eq!(response.status, 200);
}

#[tokio::test]
async fn test_error_status_is_returned_not_raised() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_string("{\"error\":{\"message\":\"Invalid credentials\"}}"),
        )
        .mount(&server)
        .await;

    let response = transport()
        .open(&request(format!("{}{STREAM_PATH}", server.uri())))
        .await
        .unwrap();

    assert_eq!(response.status, 401);
    assert!(!response.is_success());

    let first = response.lines.into_future().await.0.unwrap().unwrap();
    assert!(first.contains("Invalid credentials"));
}

#[tokio::test]
async fn test_refused_connection_is_a_connect_error() {
    // Nothing listens on port 1 on the loopback interface.
    let err = transport()
        .open(&request("http://127.0.0.1:1/stream.json".into()))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Transport(_)), "unexpected error: {err:?}");
    assert!(err.is_connect());
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_invalid_url_fails_before_network() {
    let err = transport()
        .open(&request("not a url".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidUrl(_)));
}
