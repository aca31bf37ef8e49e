//! `/health` endpoint.

use std::time::Instant;

use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the hub is running.
    pub status: String,
    /// Seconds since the hub started.
    pub uptime_secs: u64,
    /// Current connected peer count.
    pub peers: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, peers: usize) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        peers,
    }
}
