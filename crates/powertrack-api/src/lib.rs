// powertrack-api: wire layer for PowerTrack streams (transport, framing, URL helpers)

pub mod backfill;
pub mod credentials;
pub mod error;
pub mod lines;
pub mod transport;

pub use backfill::{BackfillError, BackfillMinutes, append_backfill};
pub use credentials::Credentials;
pub use error::Error;
pub use transport::{
    HttpTransport, LineStream, StreamRequest, StreamResponse, TlsMode, Transport, TransportConfig,
};
