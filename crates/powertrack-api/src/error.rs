use thiserror::Error;

use crate::backfill::BackfillError;

/// Top-level error type for the `powertrack-api` crate.
///
/// Covers request construction, connection establishment, and failures
/// while reading the streamed body. `powertrack-core` decides whether a
/// given error surfaces synchronously or through the error callback.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, TLS, timeout, reset).
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS configuration error (unreadable or invalid CA bundle).
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Arguments ───────────────────────────────────────────────────
    /// Backfill value failed type or range validation.
    #[error(transparent)]
    Backfill(#[from] BackfillError),

    // ── Body ────────────────────────────────────────────────────────
    /// A line in the body was not valid UTF-8.
    #[error("Stream line is not valid UTF-8: {0}")]
    Decode(#[from] std::string::FromUtf8Error),

    /// The server sent more than `limit` bytes without a line terminator.
    #[error("Stream line exceeded {limit} bytes without a newline")]
    LineTooLong { limit: usize },
}

impl Error {
    /// Returns `true` if the failure happened before any byte of the
    /// response was received (DNS, refused connection, TLS handshake).
    pub fn is_connect(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_connect(),
            Self::Tls(_) => true,
            _ => false,
        }
    }

    /// Returns `true` if retrying the same request might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_body(),
            _ => false,
        }
    }
}
