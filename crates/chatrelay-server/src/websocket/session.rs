//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.
//!
//! Each session owns two halves. The writer task is the only code that
//! writes to the socket; it drains the connection's mailbox (broadcasts and
//! pings) with a deadline per frame. The reader runs on the calling task,
//! enforces the read deadline (renewed by pongs) and turns inbound frames
//! into accepted messages: decode, sanitize, persist, then publish. The
//! store runs on the blocking pool; the reader awaits each append before
//! taking the next frame, so a client's messages keep their order.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use chatrelay_core::{ChatMessage, Clock, ConnectionId, FieldLimits, IncomingMessage};
use chatrelay_store::MessageStore;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task;
use tokio::time;
use tracing::{debug, error, info, instrument, warn, Instrument};

use super::connection::{ClientConnection, Outbound};
use super::hub::Hub;
use super::registry::ConnectionRegistry;

/// Upper bound on sending the close frame once the writer stops.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Per-session timing and limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub mailbox_capacity: usize,
    pub limits: FieldLimits,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
            mailbox_capacity: 256,
            limits: FieldLimits::default(),
        }
    }
}

/// Everything a session needs besides its socket.
#[derive(Clone)]
pub struct SessionContext {
    pub hub: Arc<Hub>,
    pub store: Arc<dyn MessageStore>,
    pub clock: Arc<dyn Clock>,
    pub config: SessionConfig,
}

/// Why a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client sent a close frame.
    ClientClosed,
    /// The stream ended without a close frame.
    Disconnected,
    /// Nothing arrived before the read deadline.
    ReadTimeout,
    /// The transport reported an error.
    ReadError,
    /// A frame could not be decoded as a chat message.
    MalformedFrame,
    /// The hub or the writer tore the connection down.
    Unregistered,
}

/// Run a session over the two halves of a socket until it ends.
///
/// The connection is registered with the hub for the duration and is
/// always unregistered before this returns.
pub async fn run_session<Si, St, E>(sink: Si, stream: St, ctx: SessionContext) -> SessionEnd
where
    Si: Sink<Message> + Unpin + Send + 'static,
    Si::Error: Display + Send,
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let (tx, rx) = mpsc::channel(ctx.config.mailbox_capacity.max(1));
    let connection = Arc::new(ClientConnection::new(ConnectionId::new(), tx));
    serve(connection, rx, sink, stream, ctx).await
}

#[instrument(skip_all, fields(conn_id = %connection.id))]
async fn serve<Si, St, E>(
    connection: Arc<ClientConnection>,
    rx: mpsc::Receiver<Outbound>,
    sink: Si,
    stream: St,
    ctx: SessionContext,
) -> SessionEnd
where
    Si: Sink<Message> + Unpin + Send + 'static,
    Si::Error: Display + Send,
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let registry = Arc::clone(ctx.hub.registry());
    registry.register(Arc::clone(&connection));
    info!(connections = registry.len(), "client connected");

    let writer = tokio::spawn(
        write_loop(
            sink,
            rx,
            Arc::clone(&connection),
            Arc::clone(&registry),
            ctx.config.write_timeout,
        )
        .in_current_span(),
    );

    let end = read_loop(stream, &connection, &ctx).await;

    let _ = registry.unregister(&connection.id);
    if let Err(e) = writer.await {
        warn!(error = %e, "writer task failed");
    }
    connection.mark_closed();

    #[allow(clippy::cast_possible_truncation)]
    let age_ms = connection.age().as_millis() as u64;
    info!(reason = ?end, age_ms, "client disconnected");
    end
}

/// Sole writer for the socket.
async fn write_loop<Si>(
    mut sink: Si,
    mut rx: mpsc::Receiver<Outbound>,
    connection: Arc<ClientConnection>,
    registry: Arc<ConnectionRegistry>,
    write_timeout: Duration,
) where
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
{
    loop {
        let frame = tokio::select! {
            biased;
            () = connection.closed() => break,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        let message = match frame {
            Outbound::Text(text) => Message::Text(text),
            Outbound::Ping(payload) => Message::Ping(payload),
        };
        match time::timeout(write_timeout, sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(error = %e, "write failed");
                let _ = registry.unregister(&connection.id);
                break;
            }
            Err(_) => {
                warn!(timeout_secs = write_timeout.as_secs(), "write deadline exceeded");
                let _ = registry.unregister(&connection.id);
                break;
            }
        }
    }
    let _ = time::timeout(CLOSE_GRACE, sink.close()).await;
}

async fn read_loop<St, E>(
    mut stream: St,
    connection: &ClientConnection,
    ctx: &SessionContext,
) -> SessionEnd
where
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let read_timeout = ctx.config.read_timeout;

    loop {
        let deadline = connection.read_deadline(read_timeout);
        let next = tokio::select! {
            biased;
            () = connection.closed() => return SessionEnd::Unregistered,
            next = time::timeout_at(deadline, stream.next()) => next,
        };
        let frame = match next {
            Err(_) => {
                #[allow(clippy::cast_possible_truncation)]
                let since_pong_ms = connection.last_pong_elapsed().as_millis() as u64;
                warn!(
                    timeout_secs = read_timeout.as_secs(),
                    since_pong_ms, "read deadline exceeded"
                );
                return SessionEnd::ReadTimeout;
            }
            Ok(None) => {
                debug!("stream ended without close frame");
                return SessionEnd::Disconnected;
            }
            Ok(Some(Err(e))) => {
                warn!(error = %e, "read failed");
                return SessionEnd::ReadError;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => {
                if accept_frame(text.as_str(), ctx).await.is_err() {
                    return SessionEnd::MalformedFrame;
                }
            }
            Message::Binary(data) => {
                let Ok(text) = std::str::from_utf8(&data) else {
                    warn!(len = data.len(), "non-UTF-8 binary frame");
                    return SessionEnd::MalformedFrame;
                };
                if accept_frame(text, ctx).await.is_err() {
                    return SessionEnd::MalformedFrame;
                }
            }
            Message::Pong(_) => connection.mark_pong(),
            // The transport queues the pong reply itself.
            Message::Ping(_) => {}
            Message::Close(frame) => {
                debug!(?frame, "client sent close frame");
                return SessionEnd::ClientClosed;
            }
        }
    }
}

/// Decode, sanitize, persist and publish one inbound frame.
///
/// Returns the published message, `Ok(None)` when the frame was dropped
/// (empty after sanitizing, or the store refused it), or the decode error
/// for a malformed frame. Nothing is published unless the append
/// succeeded.
pub async fn accept_frame(
    raw: &str,
    ctx: &SessionContext,
) -> Result<Option<ChatMessage>, serde_json::Error> {
    let incoming: IncomingMessage = serde_json::from_str(raw).map_err(|e| {
        warn!(error = %e, "malformed frame");
        e
    })?;

    let Some(clean) = incoming.sanitize(ctx.config.limits) else {
        debug!("empty message dropped");
        return Ok(None);
    };

    let time = ctx.clock.now();
    let store = Arc::clone(&ctx.store);
    let persisted = task::spawn_blocking(move || {
        let result = store.append(&clean.name, &clean.message, time);
        (clean, result)
    })
    .await;
    let clean = match persisted {
        Ok((clean, Ok(()))) => clean,
        Ok((_, Err(e))) => {
            error!(error = %e, "failed to persist message, not broadcasting");
            return Ok(None);
        }
        Err(e) => {
            error!(error = %e, "store task failed, not broadcasting");
            return Ok(None);
        }
    };

    let message = clean.stamp(time);
    ctx.hub.submit(message.clone());
    Ok(Some(message))
}
