// ── PowerTrack client ──
//
// Owns resolved settings and at most one stream worker. `connect()` spawns
// the worker and returns immediately; records and failures are delivered
// through the callbacks given to the builder.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use secrecy::SecretString;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use powertrack_api::{
    BackfillMinutes, Credentials, HttpTransport, StreamRequest, Transport, TransportConfig,
    append_backfill,
};
use powertrack_config::{ConfigLocator, DefaultLocator, Overrides};

use crate::error::{ClientError, StreamFailure};
use crate::record::Record;
use crate::state::{ConnectionState, SharedStatus};
use crate::worker::{ErrorHandler, HandlerError, RecordHandler, StreamWorker};

/// PowerTrack sends a keep-alive newline roughly every 10 seconds.
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(30);

type TransportFactory<T> = Box<dyn FnOnce() -> Result<T, ClientError>>;

// ── Client ───────────────────────────────────────────────────────────

/// A long-lived client for one PowerTrack stream.
///
/// ```rust,ignore
/// let client = PowerTrackClient::builder(|record| {
///     println!("{record}");
///     Ok(())
/// })
/// .credentials("me@example.com", "secret")
/// .build()?;
///
/// client.connect(Some(5))?;
/// // ...
/// client.disconnect().await;
/// ```
pub struct PowerTrackClient<T = HttpTransport> {
    transport: Arc<T>,
    credentials: Credentials,
    url: String,
    config_source: Option<PathBuf>,
    on_record: RecordHandler,
    on_error: Option<ErrorHandler>,
    stall_timeout: Option<Duration>,
    status: Arc<SharedStatus>,
    worker: Mutex<Option<WorkerHandle>>,
}

struct WorkerHandle {
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PowerTrackClient<HttpTransport> {
    /// Start building a client that hands every record to `on_record`.
    ///
    /// Returning `Err` from the handler ends the stream and reports a
    /// [`StreamFailure::Handler`].
    pub fn builder<F>(on_record: F) -> PowerTrackClientBuilder<HttpTransport>
    where
        F: Fn(Record) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        PowerTrackClientBuilder {
            on_record: Arc::new(on_record),
            on_error: None,
            overrides: Overrides::default(),
            locator: None,
            transport: Box::new(|| {
                HttpTransport::new(&TransportConfig::default()).map_err(ClientError::Transport)
            }),
            stall_timeout: Some(DEFAULT_STALL_TIMEOUT),
        }
    }
}

impl<T: Transport> PowerTrackClient<T> {
    /// Effective credentials.
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Effective stream URL, without any backfill parameter.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Config file consulted during construction, if any.
    pub fn config_source(&self) -> Option<&Path> {
        self.config_source.as_deref()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Start streaming in the background.
    ///
    /// `backfill_minutes` must be within `0..=5`; it is checked before any
    /// network activity. Returns once the worker has been spawned. Must be
    /// called from within a tokio runtime.
    pub fn connect(&self, backfill_minutes: Option<i64>) -> Result<(), ClientError> {
        let backfill = backfill_minutes
            .map(BackfillMinutes::try_from)
            .transpose()?;
        self.connect_with(backfill)
    }

    /// Like [`connect`](Self::connect) with an already validated backfill.
    pub fn connect_with(&self, backfill: Option<BackfillMinutes>) -> Result<(), ClientError> {
        let url = match backfill {
            Some(minutes) => append_backfill(&self.url, minutes)
                .map_err(|e| ClientError::from_decorate(&self.url, e))?,
            None => self.url.clone(),
        };
        let runtime = Handle::try_current().map_err(|_| ClientError::NoRuntime)?;

        let mut slot = self.lock_worker();
        let generation = self.status.begin()?;

        // A previous worker that ended on its own may still be unwinding.
        if let Some(previous) = slot.take() {
            previous.cancel.cancel();
        }

        let cancel = CancellationToken::new();
        let worker = StreamWorker {
            transport: Arc::clone(&self.transport),
            request: StreamRequest {
                url,
                credentials: self.credentials.clone(),
            },
            on_record: Arc::clone(&self.on_record),
            on_error: self.on_error.clone(),
            status: Arc::clone(&self.status),
            generation,
            stall_timeout: self.stall_timeout,
            cancel: cancel.clone(),
        };
        let task = runtime.spawn(worker.run());

        *slot = Some(WorkerHandle {
            generation,
            cancel,
            task,
        });
        info!(
            generation,
            backfill = backfill.map(BackfillMinutes::get),
            "stream worker started"
        );
        Ok(())
    }

    /// Stop streaming and wait for the worker to finish.
    ///
    /// Idempotent: with no active stream this returns immediately.
    pub async fn disconnect(&self) {
        let Some(worker) = self.lock_worker().take() else {
            self.closed().await;
            return;
        };

        self.status
            .transition(worker.generation, ConnectionState::Disconnecting);
        worker.cancel.cancel();

        if let Err(e) = worker.task.await {
            if e.is_panic() {
                warn!(generation = worker.generation, "stream worker panicked");
            }
        }

        self.status
            .transition(worker.generation, ConnectionState::Disconnected);
        info!(generation = worker.generation, "disconnected");
    }

    /// Whether the stream is established right now.
    pub fn connected(&self) -> bool {
        self.status.current().is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.status.current()
    }

    /// Subscribe to state changes.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.status.subscribe()
    }

    /// Wait until no stream is active.
    ///
    /// A failed stream publishes `Disconnected` before its error callback
    /// runs, so the callback may still be in progress when this returns.
    pub async fn closed(&self) {
        let mut rx = self.status.subscribe();
        if rx
            .wait_for(|state| *state == ConnectionState::Disconnected)
            .await
            .is_err()
        {
            debug!("state channel closed");
        }
    }

    /// The most recent failure reported by any worker of this client.
    pub fn last_failure(&self) -> Option<Arc<StreamFailure>> {
        self.status.last_failure()
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<WorkerHandle>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Drop for PowerTrackClient<T> {
    fn drop(&mut self) {
        let slot = self.worker.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(worker) = slot.take() {
            worker.cancel.cancel();
        }
    }
}

impl<T> fmt::Debug for PowerTrackClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PowerTrackClient")
            .field("url", &self.url)
            .field("credentials", &self.credentials)
            .field("state", &self.status.current())
            .field("stall_timeout", &self.stall_timeout)
            .finish_non_exhaustive()
    }
}

// ── Builder ──────────────────────────────────────────────────────────

/// Configures a [`PowerTrackClient`].
///
/// Explicit credentials and URL win over the config file. The file is
/// found through the locator unless [`config_path`](Self::config_path)
/// names one.
pub struct PowerTrackClientBuilder<T> {
    on_record: RecordHandler,
    on_error: Option<ErrorHandler>,
    overrides: Overrides,
    locator: Option<Box<dyn ConfigLocator>>,
    transport: TransportFactory<T>,
    stall_timeout: Option<Duration>,
}

impl PowerTrackClientBuilder<HttpTransport> {
    /// TLS and timeout settings for the default HTTP transport.
    pub fn transport_config(mut self, config: TransportConfig) -> Self {
        self.transport =
            Box::new(move || HttpTransport::new(&config).map_err(ClientError::Transport));
        self
    }
}

impl<T: Transport> PowerTrackClientBuilder<T> {
    /// Called once for every asynchronous failure.
    pub fn on_error<F>(mut self, on_error: F) -> Self
    where
        F: Fn(&StreamFailure) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(on_error));
        self
    }

    pub fn credentials(self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username(username).password(password)
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.overrides.username = Some(username.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.overrides.password = Some(SecretString::from(password.into()));
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.overrides.url = Some(url.into());
        self
    }

    /// Read this config file instead of searching for one.
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.overrides.config_path = Some(path.into());
        self
    }

    pub fn locator(mut self, locator: impl ConfigLocator + 'static) -> Self {
        self.locator = Some(Box::new(locator));
        self
    }

    /// Maximum silence before the stream is considered dead. `None` waits forever.
    pub fn stall_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stall_timeout = timeout;
        self
    }

    /// Use a different transport.
    pub fn transport<U: Transport>(self, transport: U) -> PowerTrackClientBuilder<U> {
        PowerTrackClientBuilder {
            on_record: self.on_record,
            on_error: self.on_error,
            overrides: self.overrides,
            locator: self.locator,
            transport: Box::new(move || Ok(transport)),
            stall_timeout: self.stall_timeout,
        }
    }

    /// Resolve configuration and create the client. No network activity.
    pub fn build(self) -> Result<PowerTrackClient<T>, ClientError> {
        let locator = self
            .locator
            .unwrap_or_else(|| Box::new(DefaultLocator));
        let resolved = powertrack_config::resolve(&self.overrides, locator.as_ref())?;
        let transport = (self.transport)()?;

        debug!(
            url = %resolved.url,
            source = ?resolved.source,
            "client configured"
        );

        Ok(PowerTrackClient {
            transport: Arc::new(transport),
            credentials: resolved.credentials,
            url: resolved.url,
            config_source: resolved.source,
            on_record: self.on_record,
            on_error: self.on_error,
            stall_timeout: self.stall_timeout,
            status: Arc::new(SharedStatus::new()),
            worker: Mutex::new(None),
        })
    }
}

impl<T> fmt::Debug for PowerTrackClientBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PowerTrackClientBuilder")
            .field("url", &self.overrides.url)
            .field("config_path", &self.overrides.config_path)
            .field("stall_timeout", &self.stall_timeout)
            .finish_non_exhaustive()
    }
}
