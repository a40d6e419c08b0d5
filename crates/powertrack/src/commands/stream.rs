//! `powertrack stream`: print activities until interrupted.

use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, info};

use powertrack_core::{
    HandlerError, HttpTransport, PowerTrackClient, Record, StreamFailure, TlsMode, TransportConfig,
};

use crate::cli::{GlobalOpts, StreamArgs};
use crate::error::CliError;
use crate::reconnect::{ReconnectConfig, calculate_backoff};

/// How a single connection ended.
enum Ended {
    Interrupted,
    Finished,
    Failed(Arc<StreamFailure>),
}

/// What the record handler has seen since the last check.
#[derive(Default)]
struct Output {
    delivered: AtomicU64,
    pipe_closed: AtomicBool,
}

impl Output {
    /// Records printed since the previous call.
    fn take_delivered(&self) -> u64 {
        self.delivered.swap(0, Ordering::SeqCst)
    }

    fn pipe_closed(&self) -> bool {
        self.pipe_closed.load(Ordering::SeqCst)
    }
}

pub async fn handle(args: StreamArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let output = Arc::new(Output::default());
    let client = build_client(&args, global, Arc::clone(&output))?;
    info!(url = client.url(), "streaming");

    let policy = ReconnectConfig {
        max_retries: args.max_retries,
        ..ReconnectConfig::default()
    };
    let mut attempt: u32 = 0;

    loop {
        let ended = run_once(&client, args.backfill).await?;

        let failure = match ended {
            Ended::Interrupted => return Ok(()),
            Ended::Finished if !args.reconnect => return Ok(()),
            Ended::Finished => None,
            Ended::Failed(_) if output.pipe_closed() => return Ok(()),
            Ended::Failed(failure) if !args.reconnect || !is_retryable(&failure) => {
                return Err(CliError::from_failure(client.url(), failure));
            }
            Ended::Failed(failure) => Some(failure),
        };

        // Only a connection that delivered records starts the backoff over.
        if output.take_delivered() > 0 {
            attempt = 0;
        }
        if let Some(failure) = &failure {
            if policy.exhausted(attempt) {
                return Err(CliError::RetriesExhausted {
                    attempts: attempt,
                    source: Arc::clone(failure),
                });
            }
        }

        let delay = calculate_backoff(attempt, &policy);
        let reason = failure.map_or_else(
            || "Stream ended by server".to_owned(),
            |failure| failure.to_string(),
        );
        eprintln!(
            "{reason}; reconnecting in {:.1}s (attempt {})",
            delay.as_secs_f64(),
            attempt + 1
        );
        tokio::select! {
            biased;
            _ = tokio::signal::ctrl_c() => return Ok(()),
            () = tokio::time::sleep(delay) => {}
        }
        attempt = attempt.saturating_add(1);
    }
}

/// Connect once and wait for the stream to end or for Ctrl-C.
async fn run_once(
    client: &PowerTrackClient,
    backfill: Option<i64>,
) -> Result<Ended, CliError> {
    let previous = client.last_failure();
    client.connect(backfill)?;

    tokio::select! {
        biased;
        _ = tokio::signal::ctrl_c() => {
            debug!("interrupted");
            client.disconnect().await;
            return Ok(Ended::Interrupted);
        }
        () = client.closed() => {}
    }

    let failure = client
        .last_failure()
        .filter(|f| !previous.as_ref().is_some_and(|p| Arc::ptr_eq(p, f)));
    Ok(failure.map_or(Ended::Finished, Ended::Failed))
}

/// Bad credentials and a broken stdout will not fix themselves.
fn is_retryable(failure: &StreamFailure) -> bool {
    !failure.is_auth_failure() && !matches!(failure, StreamFailure::Handler { .. })
}

fn build_client(
    args: &StreamArgs,
    global: &GlobalOpts,
    output: Arc<Output>,
) -> Result<PowerTrackClient<HttpTransport>, CliError> {
    let pretty = args.pretty;
    let mut builder = PowerTrackClient::builder(move |record| {
        match print_record(&record, pretty) {
            Ok(()) => {
                output.delivered.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                if e.kind() == io::ErrorKind::BrokenPipe {
                    output.pipe_closed.store(true, Ordering::SeqCst);
                }
                Err(HandlerError::from(e))
            }
        }
    })
    .stall_timeout((!args.no_stall_timeout).then_some(Duration::from_secs(args.stall_timeout)));

    if let Some(url) = &args.url {
        builder = builder.url(url);
    }
    if let Some(username) = &args.username {
        builder = builder.username(username);
    }
    if let Some(password) = &args.password {
        builder = builder.password(password);
    }
    if let Some(path) = &global.config {
        builder = builder.config_path(path);
    }
    if args.insecure {
        builder = builder.transport_config(TransportConfig {
            tls: TlsMode::DangerAcceptInvalid,
            ..TransportConfig::default()
        });
    }

    Ok(builder.build()?)
}

/// Write one activity to stdout and flush so pipes see it immediately.
fn print_record(record: &Record, pretty: bool) -> io::Result<()> {
    let mut out = io::stdout().lock();
    if pretty {
        match record.parse::<serde_json::Value>() {
            Ok(value) => {
                serde_json::to_writer_pretty(&mut out, &value)?;
                writeln!(out)?;
            }
            Err(_) => writeln!(out, "{record}")?,
        }
    } else {
        writeln!(out, "{record}")?;
    }
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivered_count_resets_when_taken() {
        let output = Output::default();
        output.delivered.fetch_add(3, Ordering::SeqCst);
        assert_eq!(output.take_delivered(), 3);
        assert_eq!(output.take_delivered(), 0);
        assert!(!output.pipe_closed());
    }

    #[test]
    fn retry_decisions() {
        assert!(is_retryable(&StreamFailure::Stalled { timeout_secs: 30 }));
        assert!(is_retryable(&StreamFailure::Status {
            status: 503,
            body: None
        }));
        assert!(!is_retryable(&StreamFailure::Status {
            status: 401,
            body: None
        }));
        assert!(!is_retryable(&StreamFailure::Handler {
            message: "broken pipe".into()
        }));
    }
}
