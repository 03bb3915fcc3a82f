//! Post-response telemetry.
//!
//! Every request produces up to five independent store writes. They are
//! issued together, each under its own soft timeout, and a failure in one
//! never stops the others or reaches the client.

use axum::http::StatusCode;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::Config;
use crate::error::StoreError;
use crate::identity::AccountId;
use crate::store::CounterStore;

pub const API_HITS: &str = "api_hits";
pub const VISITORS: &str = "visitors";
pub const TRACKED: &str = "tracked";
pub const LOAD_TIMES: &str = "load_times";
pub const SERVER_ERRORS: &str = "error_500";

/// One recorded metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryEvent {
    ApiHit {
        timestamp: u64,
        request_id: Uuid,
        path: String,
    },
    VisitorPing {
        timestamp: u64,
        account_id: AccountId,
    },
    TrackedMark {
        expiry_timestamp: u64,
        account_id: AccountId,
    },
    LoadSample {
        elapsed_ms: u64,
    },
    ServerError {
        timestamp: u64,
        request_id: Uuid,
        path: String,
    },
}

impl TelemetryEvent {
    pub fn collection(&self) -> &'static str {
        match self {
            TelemetryEvent::ApiHit { .. } => API_HITS,
            TelemetryEvent::VisitorPing { .. } => VISITORS,
            TelemetryEvent::TrackedMark { .. } => TRACKED,
            TelemetryEvent::LoadSample { .. } => LOAD_TIMES,
            TelemetryEvent::ServerError { .. } => SERVER_ERRORS,
        }
    }

    /// Stored member value.
    pub fn member(&self) -> String {
        match self {
            TelemetryEvent::ApiHit { request_id, path, .. }
            | TelemetryEvent::ServerError { request_id, path, .. } => {
                format!("{}{}", request_id, path)
            }
            TelemetryEvent::VisitorPing { account_id, .. }
            | TelemetryEvent::TrackedMark { account_id, .. } => account_id.to_string(),
            TelemetryEvent::LoadSample { elapsed_ms } => elapsed_ms.to_string(),
        }
    }

    /// Sorted-collection score; `None` for list entries.
    pub fn score(&self) -> Option<u64> {
        match self {
            TelemetryEvent::ApiHit { timestamp, .. }
            | TelemetryEvent::VisitorPing { timestamp, .. }
            | TelemetryEvent::ServerError { timestamp, .. } => Some(*timestamp),
            TelemetryEvent::TrackedMark { expiry_timestamp, .. } => Some(*expiry_timestamp),
            TelemetryEvent::LoadSample { .. } => None,
        }
    }
}

/// What the recorder needs to know about a finished request.
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    pub path: String,
    pub account: Option<AccountId>,
    pub elapsed: Duration,
    pub status: StatusCode,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryReport {
    pub attempted: usize,
    pub failed: usize,
}

pub struct TelemetryRecorder {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    api_prefix: String,
    tracked_retention: Duration,
    load_times_cap: u64,
    slow_threshold: Duration,
    verbose: bool,
    timeout: Duration,
}

impl TelemetryRecorder {
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>, config: &Config) -> Self {
        Self {
            store,
            clock,
            api_prefix: config.api_prefix.trim_end_matches('/').to_string(),
            tracked_retention: config.tracked_retention(),
            load_times_cap: config.load_times_cap,
            slow_threshold: config.slow_request_threshold(),
            verbose: config.environment.is_verbose(),
            timeout: config.telemetry_timeout(),
        }
    }

    pub fn is_api_path(&self, path: &str) -> bool {
        match path.strip_prefix(self.api_prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// Level of the latency diagnostic for `elapsed`, if one is due.
    pub fn latency_log_level(&self, elapsed: Duration) -> Option<Level> {
        if elapsed > self.slow_threshold {
            Some(Level::WARN)
        } else if self.verbose {
            Some(Level::INFO)
        } else {
            None
        }
    }

    /// Events the five recording operations would write for `outcome`.
    pub fn events(&self, outcome: &RequestOutcome) -> Vec<TelemetryEvent> {
        let now = self.clock.unix_secs();
        let mut events = Vec::with_capacity(4);

        if self.is_api_path(&outcome.path) {
            events.push(TelemetryEvent::ApiHit {
                timestamp: now,
                request_id: Uuid::new_v4(),
                path: outcome.path.clone(),
            });
        }

        if let Some(account_id) = &outcome.account {
            events.push(TelemetryEvent::VisitorPing {
                timestamp: now,
                account_id: account_id.clone(),
            });
            events.push(TelemetryEvent::TrackedMark {
                expiry_timestamp: now + self.tracked_retention.as_secs(),
                account_id: account_id.clone(),
            });
        }

        events.push(TelemetryEvent::LoadSample {
            elapsed_ms: outcome.elapsed.as_millis() as u64,
        });

        events
    }

    /// Record `outcome`. Never fails; store errors are logged and counted.
    pub async fn record(&self, outcome: &RequestOutcome) -> TelemetryReport {
        let elapsed_ms = outcome.elapsed.as_millis() as u64;
        if let Some(level) = self.latency_log_level(outcome.elapsed) {
            if level == Level::WARN {
                tracing::warn!(path = %outcome.path, elapsed_ms, "Slow request");
            } else {
                tracing::info!(path = %outcome.path, elapsed_ms, "Request timing");
            }
        }

        let mut api_hit = None;
        let mut visitor = None;
        let mut tracked = None;
        let mut load = None;
        for event in self.events(outcome) {
            match event {
                TelemetryEvent::ApiHit { .. } => api_hit = Some(event),
                TelemetryEvent::VisitorPing { .. } => visitor = Some(event),
                TelemetryEvent::TrackedMark { .. } => tracked = Some(event),
                TelemetryEvent::LoadSample { .. } => load = Some(event),
                TelemetryEvent::ServerError { .. } => {}
            }
        }

        let cap = self.load_times_cap as isize;
        let (hit, ping, mark, push, trim) = tokio::join!(
            self.write(api_hit.as_ref()),
            self.write(visitor.as_ref()),
            self.write(tracked.as_ref()),
            self.write(load.as_ref()),
            self.bounded(self.store.list_trim(LOAD_TIMES, 0, cap - 1)),
        );

        let results = [
            (API_HITS, hit),
            (VISITORS, ping),
            (TRACKED, mark),
            (LOAD_TIMES, push),
            ("load_times trim", Some(trim)),
        ];

        let mut report = TelemetryReport::default();
        for (operation, result) in results {
            let Some(result) = result else { continue };
            report.attempted += 1;
            if let Err(e) = result {
                report.failed += 1;
                tracing::warn!(
                    target: "request_gateway::telemetry",
                    operation,
                    path = %outcome.path,
                    error = %e,
                    "Failed to record telemetry"
                );
            }
        }

        report
    }

    /// Add an `error_500` entry for `path`.
    pub async fn record_server_error(&self, path: &str) -> Result<(), StoreError> {
        let event = TelemetryEvent::ServerError {
            timestamp: self.clock.unix_secs(),
            request_id: Uuid::new_v4(),
            path: path.to_string(),
        };
        self.write(Some(&event)).await.unwrap_or(Ok(()))
    }

    async fn write(&self, event: Option<&TelemetryEvent>) -> Option<Result<(), StoreError>> {
        let event = event?;
        let member = event.member();

        let result = match event.score() {
            Some(score) => {
                self.bounded(self.store.sorted_add(event.collection(), score, &member))
                    .await
            }
            None => {
                self.bounded(self.store.list_push_head(event.collection(), &member))
                    .await
            }
        };
        Some(result)
    }

    async fn bounded<F>(&self, op: F) -> Result<(), StoreError>
    where
        F: Future<Output = Result<(), StoreError>>,
    {
        tokio::time::timeout(self.timeout, op)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
    }
}
