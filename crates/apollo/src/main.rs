//! `apollod`: runs one Apollo server process.

use std::sync::Arc;

use apollo::{ApolloServerBuilder, Cli};
use apollo_session::MemoryStore;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn setup_logging(filter: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_target(false)).init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    setup_logging(&cli.log_filter, cli.log_json);
    let config = cli.into_config();

    let server = ApolloServerBuilder::new()
        .config(config)
        .build(Arc::new(MemoryStore::new()))
        .await?;

    tracing::info!(addr = %server.local_addr()?, "listening");
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "signal handler failed");
            }
        })
        .await?;
    Ok(())
}
