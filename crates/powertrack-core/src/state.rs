// ── Connection state ──
//
// The status flag shared between a client and its stream workers. Every
// write goes through `watch::Sender::send_if_modified`, so the generation
// check and the state change happen under the same lock.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;

use crate::error::{ClientError, StreamFailure};

/// Lifecycle of a client's stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    /// A worker is running or about to run.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }

    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }

    /// Legal edges of the lifecycle. Self-loops are not transitions.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Disconnected, Self::Connecting)
                | (
                    Self::Connecting,
                    Self::Connected | Self::Disconnecting | Self::Disconnected
                )
                | (Self::Connected, Self::Disconnecting | Self::Disconnected)
                | (Self::Disconnecting, Self::Disconnected)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        })
    }
}

// ── Shared status ───────────────────────────────────────────────────

/// State, worker generation and last failure, shared by a client and its workers.
#[derive(Debug)]
pub(crate) struct SharedStatus {
    state: watch::Sender<ConnectionState>,
    /// Only written inside `send_if_modified`.
    generation: AtomicU64,
    last_failure: Mutex<Option<Arc<StreamFailure>>>,
}

impl SharedStatus {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            state,
            generation: AtomicU64::new(0),
            last_failure: Mutex::new(None),
        }
    }

    pub(crate) fn current(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Move `Disconnected -> Connecting` and claim a new generation.
    pub(crate) fn begin(&self) -> Result<u64, ClientError> {
        let mut outcome = Err(ClientError::AlreadyActive {
            state: ConnectionState::Disconnected,
        });
        self.state.send_if_modified(|state| {
            if *state != ConnectionState::Disconnected {
                outcome = Err(ClientError::AlreadyActive { state: *state });
                return false;
            }
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            outcome = Ok(generation);
            *state = ConnectionState::Connecting;
            true
        });
        outcome
    }

    /// Apply `next` if `generation` is still current and the edge is legal.
    pub(crate) fn transition(&self, generation: u64, next: ConnectionState) -> bool {
        self.state.send_if_modified(|state| {
            if self.generation.load(Ordering::SeqCst) != generation
                || !state.can_transition_to(next)
            {
                return false;
            }
            *state = next;
            true
        })
    }

    pub(crate) fn record_failure(&self, failure: Arc<StreamFailure>) {
        *self
            .last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(failure);
    }

    pub(crate) fn last_failure(&self) -> Option<Arc<StreamFailure>> {
        self.last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
