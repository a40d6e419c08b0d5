// ── Stream worker ──
//
// One tokio task per connection: open the stream, check the status, then
// hand each record to the caller until the stream ends, fails, or the
// client cancels. Every await point races the cancellation token.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use powertrack_api::{LineStream, StreamRequest, Transport};

use crate::error::StreamFailure;
use crate::record::Record;
use crate::state::{ConnectionState, SharedStatus};

/// How long to wait for the first body line of a rejected response.
const STATUS_BODY_WAIT: Duration = Duration::from_secs(2);
/// Longest error body line kept in [`StreamFailure::Status`].
const STATUS_BODY_MAX_CHARS: usize = 512;

/// Error a record handler may return to stop the stream.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Receives every record, in order, on the worker task.
pub type RecordHandler = Arc<dyn Fn(Record) -> Result<(), HandlerError> + Send + Sync>;

/// Receives every asynchronous failure.
pub type ErrorHandler = Arc<dyn Fn(&StreamFailure) + Send + Sync>;

/// Why a stream ended without a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    Cancelled,
    Exhausted,
}

pub(crate) struct StreamWorker<T> {
    pub(crate) transport: Arc<T>,
    pub(crate) request: StreamRequest,
    pub(crate) on_record: RecordHandler,
    pub(crate) on_error: Option<ErrorHandler>,
    pub(crate) status: Arc<SharedStatus>,
    pub(crate) generation: u64,
    pub(crate) stall_timeout: Option<Duration>,
    pub(crate) cancel: CancellationToken,
}

impl<T: Transport> StreamWorker<T> {
    /// Drive the stream to completion. Always leaves this generation `Disconnected`.
    pub(crate) async fn run(self) {
        let failure = match self.stream().await {
            Ok(StreamEnd::Cancelled) => {
                debug!(generation = self.generation, "stream cancelled");
                None
            }
            Ok(StreamEnd::Exhausted) => {
                info!(url = %self.request.url, "stream ended by server");
                None
            }
            Err(failure) => Some(self.record(failure)),
        };

        // The error callback sees `Disconnected` and may call `connect()` again.
        self.status
            .transition(self.generation, ConnectionState::Disconnected);
        if let Some(failure) = failure {
            self.notify(&failure);
        }
        debug!(generation = self.generation, "stream worker exiting");
    }

    async fn stream(&self) -> Result<StreamEnd, StreamFailure> {
        info!(url = %self.request.url, "connecting to stream");

        let response = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Ok(StreamEnd::Cancelled),
            response = self.transport.open(&self.request) => {
                response.map_err(|source| StreamFailure::Connect {
                    url: self.request.url.clone(),
                    source,
                })?
            }
        };

        if !response.is_success() {
            let status = response.status;
            let body = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Ok(StreamEnd::Cancelled),
                body = first_body_line(response.lines) => body,
            };
            return Err(StreamFailure::Status { status, body });
        }

        if !self
            .status
            .transition(self.generation, ConnectionState::Connected)
        {
            // Superseded or already being disconnected.
            return Ok(StreamEnd::Cancelled);
        }
        info!(status = response.status, "stream connected");

        let mut lines = response.lines;
        let mut delivered: u64 = 0;
        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Ok(StreamEnd::Cancelled),
                next = next_line(&mut lines, self.stall_timeout) => next,
            };

            let Ok(next) = next else {
                return Err(StreamFailure::Stalled {
                    timeout_secs: self.stall_timeout.map_or(0, |d| d.as_secs()),
                });
            };

            match next {
                None => {
                    debug!(delivered, "end of stream body");
                    return Ok(StreamEnd::Exhausted);
                }
                Some(Err(source)) => return Err(StreamFailure::Read { source }),
                Some(Ok(line)) => {
                    if line.trim().is_empty() {
                        trace!("keep-alive");
                        continue;
                    }
                    self.deliver(Record::new(line))?;
                    delivered += 1;
                }
            }
        }
    }

    fn deliver(&self, record: Record) -> Result<(), StreamFailure> {
        trace!(bytes = record.as_str().len(), "record");
        let on_record = &self.on_record;
        match catch_unwind(AssertUnwindSafe(|| on_record(record))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(StreamFailure::Handler {
                message: e.to_string(),
            }),
            Err(panic) => Err(StreamFailure::Handler {
                message: format!("panicked: {}", panic_message(&*panic)),
            }),
        }
    }

    fn record(&self, failure: StreamFailure) -> Arc<StreamFailure> {
        warn!(
            error = %failure,
            phase = ?failure.phase(),
            generation = self.generation,
            "stream failed"
        );

        let failure = Arc::new(failure);
        self.status.record_failure(Arc::clone(&failure));
        failure
    }

    fn notify(&self, failure: &StreamFailure) {
        if let Some(on_error) = &self.on_error {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| on_error(failure))) {
                warn!(panic = panic_message(&*panic), "error handler panicked");
            }
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Next line, or `Err` if nothing arrived within `stall`.
async fn next_line(
    lines: &mut LineStream,
    stall: Option<Duration>,
) -> Result<Option<Result<String, powertrack_api::Error>>, tokio::time::error::Elapsed> {
    match stall {
        Some(window) => tokio::time::timeout(window, lines.next()).await,
        None => Ok(lines.next().await),
    }
}

/// First non-blank line of an error body, if the server sends one promptly.
async fn first_body_line(mut lines: LineStream) -> Option<String> {
    let read = async {
        while let Some(Ok(line)) = lines.next().await {
            let line = line.trim();
            if !line.is_empty() {
                return Some(line.chars().take(STATUS_BODY_MAX_CHARS).collect());
            }
        }
        None
    };
    tokio::time::timeout(STATUS_BODY_WAIT, read)
        .await
        .ok()
        .flatten()
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        *s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}
