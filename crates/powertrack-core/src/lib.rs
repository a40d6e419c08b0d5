// powertrack-core: long-lived stream client with a connect/disconnect lifecycle.

pub mod client;
pub mod error;
pub mod record;
pub mod state;
pub mod worker;

// ── Primary re-exports ──────────────────────────────────────────────
pub use client::{DEFAULT_STALL_TIMEOUT, PowerTrackClient, PowerTrackClientBuilder};
pub use error::{ClientError, FailurePhase, StreamFailure};
pub use record::Record;
pub use state::ConnectionState;
pub use worker::{ErrorHandler, HandlerError, RecordHandler};

// Lower-layer types callers need to drive the client.
pub use powertrack_api::{
    BackfillMinutes, Credentials, HttpTransport, LineStream, StreamRequest, StreamResponse,
    TlsMode, Transport, TransportConfig,
};
pub use powertrack_config::{ConfigLocator, DefaultLocator, FixedLocator};
