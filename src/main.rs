use anyhow::Result;
use clap::{Parser, Subcommand};
use request_gateway::config::Config;
use request_gateway::server::Server;
use request_gateway::GatewayError;
use std::net::SocketAddr;

#[derive(Parser)]
#[command(name = "request-gateway")]
#[command(about = "Admission control, telemetry and graceful shutdown in front of an HTTP API")]
#[command(version)]
struct Cli {
    /// Override BIND_ADDR
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Override REDIS_URL (`memory` for the in-process store)
    #[arg(long)]
    redis_url: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway (default)
    Run,
    /// Print the effective configuration and exit
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let mut config = Config::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    if let Some(redis_url) = cli.redis_url {
        config.redis_url = redis_url;
    }
    config
        .check()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    if let Some(Commands::Config) = cli.command {
        println!("{}", serde_json::to_string_pretty(&config.summary())?);
        return Ok(());
    }

    request_gateway::logging::init(&config);

    tracing::info!("Starting request gateway");
    tracing::info!(
        "Configuration: bind_addr={}, redis_url={}, environment={}",
        config.bind_addr,
        config.masked_redis_url(),
        config.environment
    );

    let server = Server::new(config)
        .map_err(|e| anyhow::anyhow!("Failed to create server: {}", e))?;

    match server.run().await {
        Ok(()) => Ok(()),
        Err(GatewayError::ShutdownTimeout(grace)) => {
            tracing::error!(grace = ?grace, "Forcing exit with connections still open");
            std::process::exit(1);
        }
        Err(e) => Err(anyhow::anyhow!("Server error: {}", e)),
    }
}
