// HTTP transport for the streaming endpoint.
//
// `Transport` is the seam between the stream worker and the network: the
// worker only needs a status code and a lazy sequence of body lines.
// `HttpTransport` is the reqwest implementation used in production.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use reqwest::header::{ACCEPT_ENCODING, HeaderValue};

use crate::credentials::Credentials;
use crate::error::Error;
use crate::lines::ndjson_lines;

/// Lazy sequence of body lines, terminators stripped.
pub type LineStream = Pin<Box<dyn Stream<Item = Result<String, Error>> + Send>>;

/// One streaming GET: where to go and who we are.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub url: String,
    pub credentials: Credentials,
}

/// The part of an HTTP response the stream worker looks at.
///
/// Dropping it closes the underlying connection.
pub struct StreamResponse {
    pub status: u16,
    pub lines: LineStream,
}

impl StreamResponse {
    pub fn new(status: u16, lines: LineStream) -> Self {
        Self { status, lines }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl std::fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Opens streaming requests.
///
/// Implementations must return as soon as response headers are available
/// and leave the body unread; the worker pulls lines as it goes.
pub trait Transport: Send + Sync + 'static {
    fn open(
        &self,
        request: &StreamRequest,
    ) -> impl Future<Output = Result<StreamResponse, Error>> + Send;
}

// ── reqwest implementation ───────────────────────────────────────────

/// TLS verification mode.
#[derive(Debug, Clone, Default)]
pub enum TlsMode {
    /// Use the bundled web PKI roots.
    #[default]
    System,
    /// Trust an additional CA certificate from the given PEM file.
    CustomCa(PathBuf),
    /// Accept any certificate. Only for test endpoints.
    DangerAcceptInvalid,
}

/// Settings for building the reqwest client behind [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    /// Bound on DNS + TCP + TLS setup. The body itself has no deadline.
    pub connect_timeout: Duration,
    pub tcp_keepalive: Duration,
    /// Ask for a gzip-compressed body.
    pub gzip: bool,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::System,
            connect_timeout: Duration::from_secs(10),
            tcp_keepalive: Duration::from_secs(60),
            gzip: true,
            user_agent: concat!("powertrack/", env!("CARGO_PKG_VERSION")).to_owned(),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    ///
    /// No overall request timeout is set: a PowerTrack body never ends on
    /// its own, so a total deadline would cut every healthy stream.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .tcp_keepalive(self.tcp_keepalive)
            .tcp_nodelay(true)
            .gzip(self.gzip)
            .user_agent(&self.user_agent);

        match &self.tls {
            TlsMode::System => {}
            TlsMode::CustomCa(path) => {
                let cert_pem = std::fs::read(path)
                    .map_err(|e| Error::Tls(format!("failed to read CA cert: {e}")))?;
                let cert = reqwest::Certificate::from_pem(&cert_pem)
                    .map_err(|e| Error::Tls(format!("invalid CA cert: {e}")))?;
                builder = builder.add_root_certificate(cert);
            }
            TlsMode::DangerAcceptInvalid => {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        builder
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }
}

/// [`Transport`] backed by reqwest.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    gzip: bool,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            client: config.build_client()?,
            gzip: config.gzip,
        })
    }

    /// Wrap an existing client (tests, custom proxies).
    pub fn from_reqwest(client: reqwest::Client) -> Self {
        Self {
            client,
            gzip: false,
        }
    }
}

impl Transport for HttpTransport {
    async fn open(&self, request: &StreamRequest) -> Result<StreamResponse, Error> {
        let url = reqwest::Url::parse(&request.url)?;
        tracing::debug!(url = %url, "opening stream");

        let mut builder = request.credentials.authorize(self.client.get(url));
        if self.gzip {
            builder = builder.header(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        tracing::debug!(status, "stream response headers received");

        let lines = ndjson_lines(response.bytes_stream()).boxed();
        Ok(StreamResponse::new(status, lines))
    }
}
