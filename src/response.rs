use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Body of every client-visible error: `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: &str) -> Self {
        Self {
            error: error.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub store_connected: bool,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
}

impl HealthResponse {
    pub fn new(store_connected: bool, uptime_seconds: u64) -> Self {
        // The gateway keeps serving without its store, so this is never "unhealthy".
        let status = if store_connected { "healthy" } else { "degraded" };

        Self {
            status: status.to_string(),
            store_connected,
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds,
        }
    }
}
