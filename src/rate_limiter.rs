//! Fixed-window admission control.
//!
//! Windows are aligned to wall-clock multiples of the window length, so a
//! client's first window may be shorter than the full length and bursts of
//! up to twice the limit are possible across a boundary.

use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::config::Config;
use crate::error::StoreError;
use crate::identity::ClientIdentity;
use crate::store::CounterStore;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted { count: i64 },
    Rejected { count: i64, retry_after: Duration },
    /// The store failed; the request is let through.
    FailedOpen,
    /// Enforcement is switched off.
    Bypassed,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Admission::Rejected { .. })
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    limit: u64,
    window: Duration,
    timeout: Duration,
    enforce: bool,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>, config: &Config) -> Self {
        Self {
            store,
            clock,
            limit: config.rate_limit_max,
            window: config.rate_limit_window(),
            timeout: config.rate_limit_timeout(),
            enforce: config.environment.enforces_rate_limit(),
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Start of the next window at or after `now`, in Unix seconds.
    pub fn window_end(&self, now_secs: u64) -> u64 {
        let window = self.window.as_secs().max(1);
        (now_secs / window + 1) * window
    }

    /// Count this request against `identity`'s current window.
    pub async fn check(&self, identity: &ClientIdentity) -> Admission {
        if !self.enforce {
            return Admission::Bypassed;
        }

        let now = self.clock.unix_secs();
        let reset_at = self.window_end(now);
        let key = identity.rate_limit_key();

        let count = match self.increment(&key, reset_at).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(
                    target: "request_gateway::rate_limiter",
                    client_ip = %identity,
                    error = %e,
                    "Rate limit check failed, allowing request"
                );
                return Admission::FailedOpen;
            }
        };

        if count as u64 > self.limit {
            Admission::Rejected {
                count,
                retry_after: Duration::from_secs(reset_at - now),
            }
        } else {
            Admission::Admitted { count }
        }
    }

    async fn increment(&self, key: &str, reset_at: u64) -> Result<i64, StoreError> {
        tokio::time::timeout(self.timeout, self.store.incr_with_expiry(key, reset_at))
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
    }
}
