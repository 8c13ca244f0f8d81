//! Axum router, listener and background tasks.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, MethodRouter};
use axum::Router;
use chatrelay_core::{Clock, FieldLimits, MonotonicClock, SystemClock};
use chatrelay_store::MessageStore;
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::health;
use crate::history;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::hub::{Dispatcher, Hub};
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::session::{run_session, SessionConfig, SessionContext};

/// How long [`ServerHandle::shutdown`] waits for background tasks.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Hub, store and clock handed to each new session.
    pub session: SessionContext,
    pub start_time: Instant,
    pub history_limit: usize,
    pub max_message_size: usize,
    /// Empty admits any origin.
    pub allowed_origins: Arc<[String]>,
}

impl AppState {
    /// Build handler state and the hub's dispatcher, which the caller must run.
    pub fn new(
        config: &ServerConfig,
        store: Arc<dyn MessageStore>,
        clock: Arc<dyn Clock>,
    ) -> (Self, Dispatcher) {
        let registry = Arc::new(ConnectionRegistry::new());
        let (hub, dispatcher) = Hub::new(registry, config.queue_capacity, config.ping_interval());
        let session = SessionContext {
            hub,
            store,
            clock,
            config: SessionConfig {
                read_timeout: config.read_timeout(),
                write_timeout: config.write_timeout(),
                mailbox_capacity: config.mailbox_capacity,
                limits: FieldLimits::default(),
            },
        };
        let state = Self {
            session,
            start_time: Instant::now(),
            history_limit: config.history_limit,
            max_message_size: config.max_message_size,
            allowed_origins: config.allowed_origins.clone().into(),
        };
        (state, dispatcher)
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.session.hub
    }

    /// Whether an upgrade carrying this `Origin` header may proceed.
    pub fn origin_allowed(&self, origin: Option<&HeaderValue>) -> bool {
        if self.allowed_origins.is_empty() {
            return true;
        }
        origin
            .and_then(|v| v.to_str().ok())
            .is_some_and(|o| self.allowed_origins.iter().any(|allowed| allowed == o))
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/ws", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/api/history", history_route())
        .route("/history", history_route())
        .route("/api/health", get(health::health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn history_route() -> MethodRouter<AppState> {
    get(history::history_handler).fallback(history::method_not_allowed)
}

/// Start the relay with the wall clock. Returns a handle to shut it down.
pub async fn start(
    config: ServerConfig,
    store: Arc<dyn MessageStore>,
) -> Result<ServerHandle, ServerError> {
    start_with_clock(config, store, Arc::new(MonotonicClock::new(SystemClock))).await
}

/// Start the relay with an explicit clock for acceptance stamps.
pub async fn start_with_clock(
    config: ServerConfig,
    store: Arc<dyn MessageStore>,
    clock: Arc<dyn Clock>,
) -> Result<ServerHandle, ServerError> {
    config.validate()?;

    let listener = TcpListener::bind(config.listen_addr()).await?;
    let local_addr = listener.local_addr()?;

    let shutdown = Arc::new(ShutdownCoordinator::new());
    let (state, dispatcher) = AppState::new(&config, store, clock);
    let hub = Arc::clone(state.hub());
    let dispatcher_task = tokio::spawn(dispatcher.run(shutdown.token()));

    let router = build_router(state);
    let token = shutdown.token();
    let server_task = tokio::spawn(async move {
        let serve = axum::serve(listener, router)
            .with_graceful_shutdown(async move { token.cancelled().await });
        if let Err(e) = serve.await {
            error!(error = %e, "server error");
        }
    });

    info!(addr = %local_addr, "chat relay listening");

    Ok(ServerHandle {
        local_addr,
        hub,
        shutdown,
        tasks: vec![server_task, dispatcher_task],
    })
}

/// Handle returned by [`start`]; keeps the background tasks alive.
pub struct ServerHandle {
    local_addr: SocketAddr,
    hub: Arc<Hub>,
    shutdown: Arc<ShutdownCoordinator>,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    pub fn shutdown_coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Stop accepting connections, close every live session and stop the
    /// dispatcher. Messages still queued are discarded.
    pub async fn shutdown(self) {
        let closed = self.hub.registry().close_all();
        info!(closed, "closing client connections");
        self.shutdown
            .graceful_shutdown(self.tasks, Some(SHUTDOWN_TIMEOUT))
            .await;
    }
}

/// GET /api/ws (and legacy /ws): upgrade and run a session.
async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let origin = headers.get(header::ORIGIN);
    if !state.origin_allowed(origin) {
        warn!(?origin, "upgrade refused, origin not allowed");
        return (StatusCode::FORBIDDEN, "Origin not allowed").into_response();
    }

    let ctx = state.session.clone();
    ws.max_message_size(state.max_message_size)
        .max_frame_size(state.max_message_size)
        .on_failed_upgrade(|e| warn!(error = %e, "websocket upgrade failed"))
        .on_upgrade(move |socket| async move {
            let (sink, stream) = socket.split();
            let _ = run_session(sink, stream, ctx).await;
        })
}
