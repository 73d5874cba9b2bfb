//! Volcano Gateway - bearer-protected volcano data API

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use volcano_gateway::{
    cli::{Cli, Command},
    config::Config,
    gateway::Gateway,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(Command::CheckConfig) => check_config(&config),
        Some(Command::Serve) | None => run_server(config).await,
    }
}

/// Load configuration and apply CLI overrides
fn load_config(cli: &Cli) -> volcano_gateway::Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref host) = cli.host {
        config.server.host = host.clone();
    }
    Ok(config)
}

/// Validate configuration and print the resolved form
fn check_config(config: &Config) -> ExitCode {
    if let Err(e) = config.validate() {
        eprintln!("❌ {e}");
        return ExitCode::FAILURE;
    }

    match serde_yaml::to_string(config) {
        Ok(yaml) => {
            println!("{yaml}");
            if let Some(issuer) = config.auth.resolved_issuer() {
                println!("# issuer:   {issuer}");
            }
            if let Some(audience) = config.auth.resolved_audience() {
                println!("# audience: {audience}");
            }
            println!("✅ Configuration is valid");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Failed to render configuration: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_server(config: Config) -> ExitCode {
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {e}");
        return ExitCode::FAILURE;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        store = ?config.store.backend,
        "Starting Volcano Gateway"
    );

    let gateway = match Gateway::new(config) {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}
