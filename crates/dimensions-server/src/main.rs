//! The `dimensions` proxy binary.
//!
//! Run with: `cargo run -p dimensions-server -- --port 7777`

use clap::Parser;
use dimensions_config::{CliArgs, Config, default_config_dir};
use dimensions_server::{ProxyServer, ServerError};
use tracing::info;

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    let config_dir = args.config.clone().unwrap_or_else(default_config_dir);

    let mut config = match Config::load_or_create(&config_dir) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_dir.display());
            std::process::exit(1);
        }
    };
    config.apply_cli_overrides(&args);

    dimensions_log::init_logging(
        Some(&config_dir.join("logs")),
        cfg!(debug_assertions),
        Some(&config),
    );

    if let Err(e) = run(&config).await {
        tracing::error!("{e}");
        eprintln!("dimensions: {e}");
        std::process::exit(1);
    }
}

async fn run(config: &Config) -> Result<(), ServerError> {
    let server = ProxyServer::from_config(config)?;
    info!(
        "Dimensions: {}",
        server.directory().names().collect::<Vec<_>>().join(", ")
    );

    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            server.shutdown();
            Ok(())
        }
    }
}
