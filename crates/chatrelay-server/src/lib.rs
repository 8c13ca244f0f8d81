//! HTTP and WebSocket surface of the chat relay.
//!
//! Clients connect over `/api/ws`, send `{"name","message"}` frames and
//! receive every accepted message as `{"name","message","time"}`. Accepted
//! messages are persisted before they are broadcast; `/api/history`
//! returns the most recent ones.

pub mod config;
pub mod error;
pub mod health;
pub mod history;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::{ConfigError, ServerConfig};
pub use error::ServerError;
pub use server::{build_router, start, start_with_clock, AppState, ServerHandle};
pub use shutdown::ShutdownCoordinator;
