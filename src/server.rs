use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{GatewayError, Result};
use crate::gateway::Gateway;
use crate::health::health_check;
use crate::middleware;
use crate::response::ErrorResponse;
use crate::shutdown::{DrainOutcome, Shutdown};
use crate::store;

/// Mount `routes` behind the gateway chain, with `/health` and a JSON 404.
pub fn create_app(gateway: Gateway, routes: Router) -> Router {
    let app = Router::new()
        .route("/health", get(health_check))
        .with_state(gateway.clone())
        .merge(routes)
        .fallback(not_found);

    middleware::apply(app, gateway)
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(ErrorResponse::new("Not Found")))
}

pub struct Server {
    config: Config,
    gateway: Gateway,
    routes: Router,
}

impl Server {
    pub fn new(config: Config) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = store::from_url(&config.redis_url, clock.clone())?;
        let gateway = Gateway::new(store, clock, &config);

        Ok(Self {
            config,
            gateway,
            routes: Router::new(),
        })
    }

    /// Downstream routes served behind the gateway.
    pub fn with_routes(mut self, routes: Router) -> Self {
        self.routes = routes;
        self
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Bind the configured address and serve until a termination signal.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;

        let shutdown = Shutdown::new(self.config.shutdown_grace());
        tokio::spawn(shutdown.clone().listen_for_signals());

        self.serve(listener, shutdown).await
    }

    /// Serve on `listener` until `shutdown` is triggered and drained.
    pub async fn serve(self, listener: TcpListener, shutdown: Shutdown) -> Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!("Gateway listening on {}", addr);
        tracing::info!(
            environment = %self.config.environment,
            limit = self.config.rate_limit_max,
            window_secs = self.config.rate_limit_window_secs,
            "Admission control configured"
        );

        let tasks = self.gateway.tasks().clone();
        let app = create_app(self.gateway, self.routes);

        let draining = shutdown.clone();
        let serve = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(async move { draining.draining().await });

        let work = async move {
            serve.await?;
            tasks.close();
            tracing::info!(pending = tasks.len(), "Connections drained, flushing telemetry");
            tasks.wait().await;
            Ok::<(), std::io::Error>(())
        };

        match shutdown.run(work).await {
            DrainOutcome::Completed(result) => {
                result?;
                tracing::info!("Shutdown complete");
                Ok(())
            }
            DrainOutcome::TimedOut => Err(GatewayError::ShutdownTimeout(shutdown.grace())),
        }
    }
}
