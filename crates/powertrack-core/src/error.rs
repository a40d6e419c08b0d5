// ── Client error types ──
//
// `ClientError` is returned synchronously from construction and `connect()`;
// nothing in it involves the network. `StreamFailure` is what the
// background worker hands to the error callback once the stream is in
// flight.

use thiserror::Error;

use powertrack_api::BackfillError;
use powertrack_config::ConfigError;

use crate::state::ConnectionState;

/// Synchronous errors from building or driving a [`PowerTrackClient`](crate::PowerTrackClient).
#[derive(Debug, Error)]
pub enum ClientError {
    // ── Setup ────────────────────────────────────────────────────────
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(#[from] BackfillError),

    #[error("Invalid stream URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Could not build HTTP transport: {0}")]
    Transport(#[source] powertrack_api::Error),

    // ── Lifecycle ────────────────────────────────────────────────────
    #[error("A stream is already active (state: {state})")]
    AlreadyActive { state: ConnectionState },

    #[error("connect() must be called from within a tokio runtime")]
    NoRuntime,
}

impl ClientError {
    /// Split an error from URL decoration into argument vs URL problems.
    pub(crate) fn from_decorate(url: &str, err: powertrack_api::Error) -> Self {
        match err {
            powertrack_api::Error::Backfill(e) => Self::InvalidArgument(e),
            other => Self::InvalidUrl {
                url: url.to_owned(),
                reason: other.to_string(),
            },
        }
    }
}

/// Where in the lifecycle a stream failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePhase {
    /// Before the stream was established: nothing was delivered.
    Connect,
    /// After a successful connection, while reading records.
    Read,
}

/// Asynchronous failure reported through the error callback.
#[derive(Debug, Error)]
pub enum StreamFailure {
    /// DNS, TCP, TLS, or connect-timeout failure.
    #[error("Cannot connect to stream at {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: powertrack_api::Error,
    },

    /// The server answered with a non-2xx status.
    #[error("Stream rejected with HTTP {status}")]
    Status {
        status: u16,
        /// First non-empty line of the response body, if one arrived promptly.
        body: Option<String>,
    },

    /// I/O or framing error after the stream was established.
    #[error("Stream read failed: {source}")]
    Read {
        #[source]
        source: powertrack_api::Error,
    },

    /// No data, not even a keep-alive, within the stall window.
    #[error("Stream stalled: nothing received for {timeout_secs}s")]
    Stalled { timeout_secs: u64 },

    /// The record callback returned an error or panicked.
    #[error("Record handler failed: {message}")]
    Handler { message: String },
}

impl StreamFailure {
    pub fn phase(&self) -> FailurePhase {
        match self {
            Self::Connect { .. } | Self::Status { .. } => FailurePhase::Connect,
            Self::Read { .. } | Self::Stalled { .. } | Self::Handler { .. } => FailurePhase::Read,
        }
    }

    /// Failed to establish the stream (transport error or non-2xx status).
    pub fn is_connection_failure(&self) -> bool {
        self.phase() == FailurePhase::Connect
    }

    /// Returns `true` if the server rejected the credentials.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Status { status: 401 | 403, .. })
    }

    /// HTTP status of a rejected stream.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn phases() {
        let status = StreamFailure::Status {
            status: 503,
            body: None,
        };
        assert_eq!(status.phase(), FailurePhase::Connect);
        assert!(status.is_connection_failure());
        assert_eq!(status.status(), Some(503));
        assert!(!status.is_auth_failure());

        let stalled = StreamFailure::Stalled { timeout_secs: 30 };
        assert_eq!(stalled.phase(), FailurePhase::Read);
        assert!(!stalled.is_connection_failure());
        assert_eq!(stalled.status(), None);
    }

    #[test]
    fn auth_statuses() {
        for status in [401, 403] {
            assert!(StreamFailure::Status { status, body: None }.is_auth_failure());
        }
    }

    #[test]
    fn decorate_errors_split_by_kind() {
        let backfill = powertrack_api::Error::Backfill(BackfillError::OutOfRange { value: 9 });
        assert!(matches!(
            ClientError::from_decorate("http://x.com", backfill),
            ClientError::InvalidArgument(BackfillError::OutOfRange { value: 9 })
        ));

        let parse = powertrack_api::append_backfill("nope", 1).unwrap_err();
        assert!(matches!(
            ClientError::from_decorate("nope", parse),
            ClientError::InvalidUrl { .. }
        ));
    }
}
