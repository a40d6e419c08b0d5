//! CLI error types with miette diagnostics.
//!
//! Maps client and stream errors into user-facing errors with actionable help text.

use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;

use powertrack_config::ConfigError;
use powertrack_core::{ClientError, StreamFailure};

/// Process exit codes.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to stream at {url}")]
    #[diagnostic(
        code(powertrack::connection_failed),
        help(
            "Check the stream URL and your network connection.\n\
             URL: {url}\n\
             Use --reconnect to keep retrying."
        )
    )]
    ConnectionFailed {
        url: String,
        #[source]
        source: Arc<StreamFailure>,
    },

    #[error("Stream rejected with HTTP {status}{}", detail(.body))]
    #[diagnostic(
        code(powertrack::rejected),
        help("The server refused the stream request. Check the account and stream URL.")
    )]
    Rejected { status: u16, body: Option<String> },

    #[error("Stream lost")]
    #[diagnostic(
        code(powertrack::stream_lost),
        help("Use --reconnect to resume automatically (add --backfill to replay missed activities).")
    )]
    StreamLost {
        #[source]
        source: Arc<StreamFailure>,
    },

    #[error("Giving up after {attempts} reconnect attempts")]
    #[diagnostic(code(powertrack::retries_exhausted))]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Arc<StreamFailure>,
    },

    // ── Authentication / configuration ───────────────────────────────
    #[error("Authentication failed (HTTP {status})")]
    #[diagnostic(
        code(powertrack::auth_failed),
        help(
            "Verify your username and password.\n\
             Run: powertrack config show"
        )
    )]
    AuthFailed { status: u16 },

    #[error("No {field} configured")]
    #[diagnostic(
        code(powertrack::missing_setting),
        help(
            "Pass --username and --password, set POWERTRACK_USERNAME / POWERTRACK_PASSWORD,\n\
             or create a config file with: powertrack config init"
        )
    )]
    MissingSetting { field: &'static str },

    #[error(transparent)]
    #[diagnostic(code(powertrack::config))]
    Config(ConfigError),

    #[error("Config file already exists at {path}")]
    #[diagnostic(
        code(powertrack::config_exists),
        help("Use --force to overwrite it.")
    )]
    ConfigExists { path: String },

    // ── Usage ────────────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(powertrack::validation))]
    Validation { field: String, reason: String },

    // ── Runtime ──────────────────────────────────────────────────────
    #[error("Record output failed")]
    #[diagnostic(code(powertrack::output))]
    Output {
        #[source]
        source: Arc<StreamFailure>,
    },

    #[error(transparent)]
    Client(ClientError),

    #[error("Prompt failed: {0}")]
    #[diagnostic(
        code(powertrack::prompt),
        help("Pass the values as flags when not running in a terminal.")
    )]
    Prompt(String),
}

#[allow(clippy::ref_option)]
fn detail(body: &Option<String>) -> String {
    body.as_deref().map(|b| format!(": {b}")).unwrap_or_default()
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. }
            | Self::Rejected { .. }
            | Self::StreamLost { .. }
            | Self::RetriesExhausted { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::MissingSetting { .. } | Self::Config(_) => {
                exit_code::CONFIG
            }
            Self::Validation { .. } | Self::ConfigExists { .. } => exit_code::USAGE,
            Self::Client(_) | Self::Output { .. } | Self::Prompt(_) => {
                exit_code::GENERAL
            }
        }
    }

    /// Turn a reported stream failure into the error the process exits with.
    pub fn from_failure(url: &str, failure: Arc<StreamFailure>) -> Self {
        match &*failure {
            StreamFailure::Status { status, .. } if failure.is_auth_failure() => {
                Self::AuthFailed { status: *status }
            }
            StreamFailure::Status { status, body } => Self::Rejected {
                status: *status,
                body: body.clone(),
            },
            StreamFailure::Connect { .. } => Self::ConnectionFailed {
                url: url.to_owned(),
                source: failure,
            },
            StreamFailure::Handler { .. } => Self::Output { source: failure },
            StreamFailure::Read { .. } | StreamFailure::Stalled { .. } => {
                Self::StreamLost { source: failure }
            }
        }
    }
}

// ── ClientError / ConfigError → CliError mapping ─────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::MissingField { field } => Self::MissingSetting { field },
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config(other),
        }
    }
}

impl From<ClientError> for CliError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Configuration(e) => e.into(),
            ClientError::InvalidArgument(e) => Self::Validation {
                field: "--backfill".into(),
                reason: e.to_string(),
            },
            ClientError::InvalidUrl { url, reason } => Self::Validation {
                field: "url".into(),
                reason: format!("{reason}: {url}"),
            },
            other => Self::Client(other),
        }
    }
}
