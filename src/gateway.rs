use axum::http::StatusCode;
use std::sync::Arc;
use tokio_util::task::TaskTracker;

use crate::clock::Clock;
use crate::config::Config;
use crate::health::HealthChecker;
use crate::rate_limiter::RateLimiter;
use crate::store::CounterStore;
use crate::telemetry::{RequestOutcome, TelemetryRecorder};

/// Shared state for the middleware chain.
#[derive(Clone)]
pub struct Gateway {
    limiter: Arc<RateLimiter>,
    recorder: Arc<TelemetryRecorder>,
    health: Arc<HealthChecker>,
    tasks: TaskTracker,
}

impl Gateway {
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>, config: &Config) -> Self {
        Self {
            limiter: Arc::new(RateLimiter::new(store.clone(), clock.clone(), config)),
            recorder: Arc::new(TelemetryRecorder::new(store.clone(), clock, config)),
            health: Arc::new(HealthChecker::new(store, config.rate_limit_timeout())),
            tasks: TaskTracker::new(),
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn recorder(&self) -> &TelemetryRecorder {
        &self.recorder
    }

    pub fn health(&self) -> &HealthChecker {
        &self.health
    }

    /// Detached telemetry tasks still running.
    pub fn tasks(&self) -> &TaskTracker {
        &self.tasks
    }

    /// Record `outcome` in the background. The caller never waits on it.
    pub fn spawn_telemetry(&self, outcome: RequestOutcome) {
        let recorder = self.recorder.clone();

        self.tasks.spawn(async move {
            if outcome.status == StatusCode::INTERNAL_SERVER_ERROR {
                if let Err(e) = recorder.record_server_error(&outcome.path).await {
                    tracing::warn!(path = %outcome.path, error = %e, "Failed to record server error");
                }
            }

            let report = recorder.record(&outcome).await;
            tracing::debug!(
                path = %outcome.path,
                attempted = report.attempted,
                failed = report.failed,
                "Telemetry recorded"
            );
        });
    }

    /// Wait for every telemetry task spawned so far.
    pub async fn flush_telemetry(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }
}
