//! Fan-out of accepted messages to every live connection.
//!
//! Sessions submit into a bounded queue that never blocks; when it is full
//! the oldest entry is discarded. A single [`Dispatcher`] drains the queue,
//! serializes each message once and offers the frame to every connection's
//! mailbox. The same dispatcher drives keepalive pings on a fixed ticker.
//! A connection whose mailbox is full or closed is unregistered.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Utf8Bytes;
use bytes::Bytes;
use chatrelay_core::ChatMessage;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::connection::Outbound;
use super::registry::ConnectionRegistry;

/// Payload of keepalive pings.
pub const PING_PAYLOAD: &[u8] = b"ping";

/// Producer side of the broadcast queue.
pub struct Hub {
    registry: Arc<ConnectionRegistry>,
    queue: broadcast::Sender<ChatMessage>,
}

impl Hub {
    /// Create the hub and its dispatcher. The dispatcher must be run for
    /// anything to be delivered.
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        queue_capacity: usize,
        ping_interval: Duration,
    ) -> (Arc<Self>, Dispatcher) {
        let (queue, rx) = broadcast::channel(queue_capacity.max(1));
        let dispatcher = Dispatcher {
            rx,
            registry: Arc::clone(&registry),
            ping_interval,
        };
        (Arc::new(Self { registry, queue }), dispatcher)
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Enqueue a message for every connection. Never waits; if the queue is
    /// full the oldest pending message is discarded.
    pub fn submit(&self, message: ChatMessage) {
        if self.queue.send(message).is_err() {
            debug!("dispatcher not running, message dropped");
        }
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }
}

/// Single consumer of the broadcast queue.
pub struct Dispatcher {
    rx: broadcast::Receiver<ChatMessage>,
    registry: Arc<ConnectionRegistry>,
    ping_interval: Duration,
}

impl Dispatcher {
    /// Deliver queued messages and send pings until `cancel` fires or the
    /// hub is dropped. Pending messages are not drained on cancel.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = time::interval_at(Instant::now() + self.ping_interval, self.ping_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                received = self.rx.recv() => match received {
                    Ok(message) => {
                        let _ = self.fan_out(&message);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "broadcast queue full, oldest messages dropped");
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = ticker.tick() => {
                    let _ = self.ping_all();
                }
            }
        }
        info!("dispatcher stopped");
    }

    /// Offer one message to every registered connection. Returns how many
    /// mailboxes accepted it.
    pub fn fan_out(&self, message: &ChatMessage) -> usize {
        let json = match serde_json::to_string(message) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to serialize message");
                return 0;
            }
        };
        let recipients = self.offer_all(&Outbound::Text(Utf8Bytes::from(json)));
        debug!(recipients, "broadcast message");
        recipients
    }

    /// Offer a ping to every registered connection.
    pub fn ping_all(&self) -> usize {
        let recipients = self.offer_all(&Outbound::Ping(Bytes::from_static(PING_PAYLOAD)));
        trace!(recipients, "sent pings");
        recipients
    }

    fn offer_all(&self, frame: &Outbound) -> usize {
        let mut delivered = 0;
        for connection in self.registry.snapshot() {
            match connection.offer(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(conn_id = %connection.id, error = %e, "dropping unresponsive client");
                    let _ = self.registry.unregister(&connection.id);
                }
            }
        }
        delivered
    }
}
