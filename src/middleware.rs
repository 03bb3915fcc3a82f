//! The request pipeline: admission, then business routing, then telemetry.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::any::Any;
use std::time::{Duration, Instant};
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::body::{PendingOutcome, TelemetryBody};
use crate::error::ApiError;
use crate::gateway::Gateway;
use crate::identity::{AccountId, ClientIdentity};
use crate::rate_limiter::Admission;

const RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");

/// How much of a replaced 500 body is read back for the log.
const LOGGED_BODY_LIMIT: usize = 1024;
const LOGGED_BODY_TIMEOUT: Duration = Duration::from_millis(100);

/// Wrap `router` in the full middleware chain.
///
/// Outermost first: tracing span, telemetry timer, admission, 500 masking,
/// panic guard.
pub fn apply(router: Router, gateway: Gateway) -> Router {
    router.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn_with_state(gateway.clone(), telemetry_middleware))
            .layer(middleware::from_fn_with_state(gateway, admission_middleware))
            .layer(middleware::from_fn(mask_server_errors))
            .layer(CatchPanicLayer::custom(handle_panic)),
    )
}

/// Count the request against its client's window and reject over the limit.
pub async fn admission_middleware(
    State(gateway): State<Gateway>,
    request: Request,
    next: Next,
) -> Response {
    let identity = ClientIdentity::from_request(&request);
    let requester = AccountId::from_request(&request)
        .map(|account| account.0)
        .unwrap_or_else(|| "anonymous".to_string());

    info!(
        target: "request_gateway::middleware",
        requester = %requester,
        path = %request.uri().path(),
        client_ip = %identity,
        "Incoming request"
    );

    match gateway.limiter().check(&identity).await {
        Admission::Rejected { count, retry_after } => {
            tracing::debug!(client_ip = %identity, count, "Rate limit exceeded");
            rejection(gateway.limiter().limit(), retry_after)
        }
        _ => next.run(request).await,
    }
}

/// Time the request and hand the outcome to a detached telemetry task once
/// the response body has been sent or abandoned.
pub async fn telemetry_middleware(
    State(gateway): State<Gateway>,
    request: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let path = request.uri().path().to_string();
    let account = AccountId::from_request(&request);

    let response = next.run(request).await;

    let pending = PendingOutcome {
        gateway,
        path,
        account,
        status: response.status(),
        started,
    };
    response.map(|body| Body::new(TelemetryBody::new(body, pending)))
}

/// Replace any 500 body that did not come from [`ApiError`] with the generic one.
pub async fn mask_server_errors(request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let response = next.run(request).await;

    if response.status() != StatusCode::INTERNAL_SERVER_ERROR
        || response.extensions().get::<ApiError>().is_some()
    {
        return response;
    }

    let read = axum::body::to_bytes(response.into_body(), LOGGED_BODY_LIMIT);
    let original = match tokio::time::timeout(LOGGED_BODY_TIMEOUT, read).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(Err(_)) => "<body too large>".to_string(),
        Err(_) => "<body not ready>".to_string(),
    };
    tracing::error!(path = %path, body = %original, "Handler returned a 500, replacing body");

    ApiError::Internal.into_response()
}

fn rejection(limit: u64, retry_after: Duration) -> Response {
    let mut response = ApiError::RateLimitExceeded.into_response();
    let headers = response.headers_mut();
    headers.insert(RETRY_AFTER, HeaderValue::from(retry_after.as_secs()));
    headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(limit));
    response
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = %detail, "Handler panicked");

    ApiError::Internal.into_response()
}
