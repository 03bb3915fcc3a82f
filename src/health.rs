use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::gateway::Gateway;
use crate::response::HealthResponse;
use crate::store::CounterStore;

pub struct HealthChecker {
    store: Arc<dyn CounterStore>,
    timeout: Duration,
    started: Instant,
}

impl HealthChecker {
    pub fn new(store: Arc<dyn CounterStore>, timeout: Duration) -> Self {
        Self {
            store,
            timeout,
            started: Instant::now(),
        }
    }

    pub async fn check_health(&self) -> HealthResponse {
        let store_connected = self.check_store().await;
        HealthResponse::new(store_connected, self.started.elapsed().as_secs())
    }

    async fn check_store(&self) -> bool {
        match tokio::time::timeout(self.timeout, self.store.ping()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Counter store ping failed");
                false
            }
            Err(_) => {
                tracing::warn!(timeout = ?self.timeout, "Counter store ping timed out");
                false
            }
        }
    }
}

/// Health check endpoint
pub async fn health_check(State(gateway): State<Gateway>) -> impl IntoResponse {
    Json(gateway.health().check_health().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_health_tracks_store() {
        let store = Arc::new(MemoryStore::new(Arc::new(SystemClock)));
        let checker = HealthChecker::new(store.clone(), Duration::from_millis(100));

        let health = checker.check_health().await;
        assert_eq!(health.status, "healthy");
        assert!(health.store_connected);

        store.set_available(false);
        let health = checker.check_health().await;
        assert_eq!(health.status, "degraded");
        assert!(!health.store_connected);
    }
}
