//! `GET /api/history`: the most recent accepted messages, oldest first.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chatrelay_core::ChatMessage;
use tokio::task;
use tracing::{debug, error};

use crate::error::ServerError;
use crate::server::AppState;

/// GET /api/history
///
/// 200 with a JSON array (possibly empty), or 500 with the error as plain
/// text.
pub async fn history_handler(State(state): State<AppState>) -> Response {
    match load_history(&state).await {
        Ok(messages) => {
            debug!(count = messages.len(), "history served");
            Json(messages).into_response()
        }
        Err(e) => {
            error!(error = %e, "history query failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Query the store off the async workers.
async fn load_history(state: &AppState) -> Result<Vec<ChatMessage>, ServerError> {
    let store = state.session.store.clone();
    let limit = state.history_limit;
    let messages = task::spawn_blocking(move || store.recent(limit)).await??;
    Ok(messages)
}

/// Any method other than GET or HEAD on the history routes.
pub async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, "GET, HEAD")],
        "Method not allowed",
    )
        .into_response()
}
