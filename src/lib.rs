pub mod body;
pub mod clock;
pub mod config;
pub mod error;
pub mod gateway;
pub mod health;
pub mod identity;
pub mod logging;
pub mod middleware;
pub mod rate_limiter;
pub mod response;
pub mod server;
pub mod shutdown;
pub mod store;
pub mod telemetry;

pub use config::Config;
pub use error::{ApiError, GatewayError, Result, StoreError};
pub use gateway::Gateway;
pub use server::{create_app, Server};
