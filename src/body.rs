//! Response body that reports the request outcome once it has been sent.

use axum::body::{Body, Bytes};
use axum::http::StatusCode;
use http_body::{Body as HttpBody, Frame, SizeHint};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use crate::gateway::Gateway;
use crate::identity::AccountId;
use crate::telemetry::RequestOutcome;

/// Everything known about a request before its body finishes.
pub struct PendingOutcome {
    pub gateway: Gateway,
    pub path: String,
    pub account: Option<AccountId>,
    pub status: StatusCode,
    pub started: Instant,
}

impl PendingOutcome {
    fn complete(self) {
        if tokio::runtime::Handle::try_current().is_err() {
            tracing::warn!(path = %self.path, "No runtime to record telemetry on, dropping outcome");
            return;
        }

        let elapsed = self.started.elapsed();
        self.gateway.spawn_telemetry(RequestOutcome {
            path: self.path,
            account: self.account,
            elapsed,
            status: self.status,
        });
    }
}

/// Wraps a response body and hands its outcome to telemetry exactly once.
///
/// The outcome is emitted on the final frame, on a body error, or when the
/// body is dropped early (client went away, stream abandoned).
pub struct TelemetryBody {
    inner: Body,
    pending: Option<PendingOutcome>,
}

impl TelemetryBody {
    pub fn new(inner: Body, pending: PendingOutcome) -> Self {
        Self {
            inner,
            pending: Some(pending),
        }
    }

    fn complete(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.complete();
        }
    }
}

impl HttpBody for TelemetryBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let polled = Pin::new(&mut self.inner).poll_frame(cx);
        if let Poll::Ready(None) | Poll::Ready(Some(Err(_))) = polled {
            self.complete();
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for TelemetryBody {
    fn drop(&mut self) {
        self.complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::Config;
    use crate::store::MemoryStore;
    use crate::telemetry::LOAD_TIMES;
    use http_body_util::BodyExt;
    use std::sync::Arc;

    fn setup() -> (Arc<MemoryStore>, Gateway) {
        let clock = Arc::new(ManualClock::at_secs(1_700_000_000));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let gateway = Gateway::new(store.clone(), clock, &Config::default());
        (store, gateway)
    }

    fn pending(gateway: &Gateway) -> PendingOutcome {
        PendingOutcome {
            gateway: gateway.clone(),
            path: "/api/items".to_string(),
            account: None,
            status: StatusCode::OK,
            started: Instant::now(),
        }
    }

    #[tokio::test]
    async fn test_outcome_emitted_once_at_end_of_stream() {
        let (store, gateway) = setup();
        let mut body = TelemetryBody::new(Body::from("items"), pending(&gateway));

        let frame = body.frame().await.unwrap().unwrap();
        assert_eq!(frame.into_data().unwrap(), "items");
        gateway.flush_telemetry().await;
        assert!(store.list(LOAD_TIMES).is_empty());

        assert!(body.frame().await.is_none());
        drop(body);
        gateway.flush_telemetry().await;
        assert_eq!(store.list(LOAD_TIMES).len(), 1);
    }

    #[tokio::test]
    async fn test_outcome_emitted_when_dropped_unread() {
        let (store, gateway) = setup();
        let body = TelemetryBody::new(Body::from("items"), pending(&gateway));

        drop(body);
        gateway.flush_telemetry().await;
        assert_eq!(store.list(LOAD_TIMES).len(), 1);
    }
}
