use axum::routing::get;
use axum::Router;
use request_gateway::config::{Config, Environment};
use request_gateway::shutdown::{Shutdown, ShutdownState};
use request_gateway::{GatewayError, Server};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

fn config(grace_secs: u64) -> Config {
    Config {
        redis_url: "memory".to_string(),
        environment: Environment::Test,
        shutdown_grace_secs: grace_secs,
        ..Config::default()
    }
}

async fn start(
    config: Config,
    routes: Router,
) -> (SocketAddr, Shutdown, JoinHandle<request_gateway::Result<()>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new(config.shutdown_grace());
    let server = Server::new(config).unwrap().with_routes(routes);
    let handle = tokio::spawn(server.serve(listener, shutdown.clone()));

    (addr, shutdown, handle)
}

/// A route that signals `entered` and then takes `delay` (or forever).
fn slow_route(entered: Arc<Notify>, delay: Option<Duration>) -> Router {
    Router::new().route(
        "/api/slow",
        get(move || {
            let entered = entered.clone();
            async move {
                entered.notify_one();
                match delay {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => std::future::pending::<()>().await,
                }
                "done"
            }
        }),
    )
}

#[tokio::test]
async fn test_in_flight_request_finishes_and_server_exits_once() {
    let entered = Arc::new(Notify::new());
    let routes = slow_route(entered.clone(), Some(Duration::from_millis(300)));
    let (addr, shutdown, server) = start(config(10), routes).await;

    let client = tokio::spawn(async move {
        let response = reqwest::get(format!("http://{}/api/slow", addr)).await?;
        let status = response.status();
        let body = response.text().await?;
        Ok::<_, reqwest::Error>((status, body))
    });

    entered.notified().await;
    assert!(shutdown.trigger());
    assert!(!shutdown.trigger());
    assert_eq!(shutdown.state(), ShutdownState::Draining);

    let (status, body) = client.await.unwrap().unwrap();
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body, "done");

    let result = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server should exit after draining")
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(shutdown.state(), ShutdownState::Terminated);
}

#[tokio::test]
async fn test_stuck_connection_forces_exit_after_grace() {
    let entered = Arc::new(Notify::new());
    let routes = slow_route(entered.clone(), None);
    let (addr, shutdown, server) = start(config(1), routes).await;

    let client = tokio::spawn(async move {
        let _ = reqwest::get(format!("http://{}/api/slow", addr)).await;
    });

    entered.notified().await;
    let started = Instant::now();
    shutdown.trigger();

    let result = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("grace timer should end the server")
        .unwrap();

    assert!(matches!(result, Err(GatewayError::ShutdownTimeout(_))));
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(shutdown.state(), ShutdownState::Terminated);

    client.abort();
}
