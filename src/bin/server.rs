//! Process entry point: initializes structured logging, loads
//! `ServerConfig` from the environment, and runs the table server until
//! it receives a shutdown signal.

use kansas_table::server::run_server;
use kansas_table::ServerConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry().with(filter).with(fmt::layer()).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let config = ServerConfig::from_env()?;
    run_server(config).await
}
