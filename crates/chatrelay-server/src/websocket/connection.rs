//! Per-client connection state shared between the registry, the hub and
//! the session that owns the socket.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use axum::extract::ws::Utf8Bytes;
use bytes::Bytes;
use chatrelay_core::ConnectionId;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant as TokioInstant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// A frame queued for the connection's writer task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// Serialized chat message.
    Text(Utf8Bytes),
    /// Keepalive probe.
    Ping(Bytes),
}

/// Lifecycle of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SessionState {
    /// Upgraded but not yet visible to the hub.
    Connecting = 0,
    /// Registered; receives broadcasts.
    Open = 1,
    /// Torn down; the socket is being closed.
    Closing = 2,
    /// Both halves have finished.
    Closed = 3,
}

impl SessionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Why a frame could not be queued.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum OfferError {
    #[error("outbound mailbox full")]
    Full,
    #[error("connection closed")]
    Closed,
}

/// A connected WebSocket client.
pub struct ClientConnection {
    pub id: ConnectionId,
    /// Mailbox drained by the connection's single writer task.
    tx: mpsc::Sender<Outbound>,
    pub connected_at: Instant,
    /// Start of the current read window: connect time, then the latest pong.
    last_pong: Mutex<TokioInstant>,
    state: AtomicU8,
    closed: CancellationToken,
}

impl ClientConnection {
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Outbound>) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            connected_at: now,
            last_pong: Mutex::new(TokioInstant::now()),
            state: AtomicU8::new(SessionState::Connecting as u8),
            closed: CancellationToken::new(),
        }
    }

    /// Queue a frame without waiting.
    pub fn offer(&self, frame: Outbound) -> Result<(), OfferError> {
        if self.is_closing() {
            return Err(OfferError::Closed);
        }
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => OfferError::Full,
            mpsc::error::TrySendError::Closed(_) => OfferError::Closed,
        })
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// `Connecting -> Open`. No effect in any other state.
    pub fn mark_open(&self) -> bool {
        self.state
            .compare_exchange(
                SessionState::Connecting as u8,
                SessionState::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Begin teardown and signal both halves to stop.
    ///
    /// Returns `true` only for the call that moved the connection into
    /// `Closing`.
    pub fn close(&self) -> bool {
        let first = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                (s < SessionState::Closing as u8).then_some(SessionState::Closing as u8)
            })
            .is_ok();
        self.closed.cancel();
        first
    }

    pub fn mark_closed(&self) {
        self.state.store(SessionState::Closed as u8, Ordering::Release);
        self.closed.cancel();
    }

    pub fn is_closing(&self) -> bool {
        self.state() >= SessionState::Closing
    }

    /// Resolves once [`close`](Self::close) or [`mark_closed`](Self::mark_closed) ran.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    /// Record a pong, which pushes the read deadline out.
    pub fn mark_pong(&self) {
        *self.last_pong.lock() = TokioInstant::now();
    }

    /// When the reader gives up if no further pong arrives.
    pub fn read_deadline(&self, read_timeout: Duration) -> TokioInstant {
        *self.last_pong.lock() + read_timeout
    }

    /// Time since the last pong, or since connect if none arrived.
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
