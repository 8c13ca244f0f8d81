//! `/api/health` endpoint.

use std::time::Instant;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::server::AppState;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the server is running.
    pub status: &'static str,
    /// Live WebSocket connections.
    pub connections: usize,
    pub uptime_secs: u64,
}

pub fn health_check(start_time: Instant, connections: usize) -> HealthResponse {
    HealthResponse {
        status: "ok",
        connections,
        uptime_secs: start_time.elapsed().as_secs(),
    }
}

/// GET /api/health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health_check(
        state.start_time,
        state.session.hub.connection_count(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn status_is_ok() {
        let resp = health_check(Instant::now(), 3);
        assert_eq!(resp.status, "ok");
        assert_eq!(resp.connections, 3);
        assert_eq!(resp.uptime_secs, 0);
    }

    #[test]
    fn uptime_counts_from_start() {
        let start = Instant::now()
            .checked_sub(Duration::from_secs(2))
            .unwrap();
        assert!(health_check(start, 0).uptime_secs >= 2);
    }

    #[test]
    fn serializes_expected_fields() {
        let v = serde_json::to_value(health_check(Instant::now(), 1)).unwrap();
        assert_eq!(v["status"], "ok");
        assert_eq!(v["connections"], 1);
        assert!(v["uptime_secs"].is_number());
    }
}
