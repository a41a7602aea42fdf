//! Main binary entry point for the CRM Bridge Service
//!
//! Loads configuration from an optional file plus `BRIDGE__*` environment
//! variables, sets up logging and serves the webhook and management API.

use anyhow::Context;
use clap::Parser;
use crm_bridge::{BridgeConfig, BridgeService};
use std::process;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "crm-bridge-server", version, about = "Webhook-to-Bitrix24 bridge")]
struct Args {
    /// Path to a configuration file (TOML, YAML or JSON)
    #[arg(short, long, env = "BRIDGE_CONFIG_FILE")]
    config: Option<String>,

    /// Override the listen port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {:#}", e);
            process::exit(1);
        }
    };

    if let Err(e) = init_tracing(&config) {
        eprintln!("Failed to initialize tracing: {}", e);
        process::exit(1);
    }

    info!("Starting CRM Bridge Service v{}", crm_bridge::VERSION);
    log_settings(&config);

    let service = match BridgeService::new(config).await {
        Ok(service) => {
            info!("Bridge service initialized successfully");
            service
        }
        Err(e) => {
            error!("Failed to initialize service: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = service.start().await {
        error!("Service error: {}", e);
        process::exit(1);
    }

    info!("CRM Bridge Service shutdown complete");
}

fn load_config(args: &Args) -> anyhow::Result<BridgeConfig> {
    let mut config =
        BridgeConfig::load(args.config.as_deref()).context("reading configuration sources")?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    Ok(config)
}

/// Initialize tracing/logging
fn init_tracing(config: &BridgeConfig) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.observability.log_level))
        .or_else(|_| EnvFilter::try_new("info"))?;

    match config.observability.log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()?;
        }
        "pretty" | "text" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .pretty()
                        .with_file(true)
                        .with_line_number(true)
                        .with_target(false),
                )
                .try_init()?;
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().compact())
                .try_init()?;
        }
    }

    Ok(())
}

fn log_settings(config: &BridgeConfig) {
    if config.database.postgres_url.is_empty() {
        warn!("Database: in-memory store, data is lost on restart");
    } else {
        info!(
            max_connections = config.database.max_connections,
            "Database: PostgreSQL"
        );
    }

    match config.bitrix.sentinel_url {
        Some(ref url) => info!("Demo CRM URL: {}", url),
        None => info!("Demo CRM URL: disabled"),
    }

    if config.auth.bootstrap_admin_email.is_some() {
        info!("Bootstrap admin: configured");
    }

    if config.observability.metrics_enabled {
        info!("Metrics: enabled at /metrics");
    }
}
