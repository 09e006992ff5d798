use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use http_handler_plugin::commands;
use http_handler_plugin::config;
use http_handler_plugin::error::Result;
use http_handler_plugin::host::{HostServer, Pipeline};
use http_handler_plugin::metrics::Metrics;
use http_handler_plugin::plugin::PluginRegistry;
use http_handler_plugin::signal::shutdown_signal;

#[derive(Parser, Debug)]
#[command(name = "handler-plugin-host")]
#[command(about = "HTTP host that delegates requests to out-of-process handler plugins", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (YAML/JSON/TOML)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Run the HTTP host (default)
    Run,
    /// Check configuration and optionally start each plugin once
    Check {
        /// Start every plugin, complete the handshake, then stop it
        #[arg(long)]
        start: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    for directive in [
        format!("http_handler_plugin={log_level}"),
        format!("plugin={log_level}"),
    ] {
        match directive.parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("Ignoring log directive {directive}: {e}"),
        }
    }
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if args.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let config = match args.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            match config::load_from_path(&path).await {
                Ok(cfg) => {
                    info!("Configuration loaded successfully from {}", path.display());
                    cfg
                }
                Err(e) => {
                    error!(
                        "Failed to load configuration from {}: {}",
                        path.display(),
                        e
                    );
                    return Err(e);
                }
            }
        }
        None => {
            info!("Loading configuration from default locations");
            match config::load_from_env_or_file().await {
                Ok(cfg) => {
                    info!("Configuration loaded successfully");
                    cfg
                }
                Err(e) => {
                    error!("Failed to load configuration: {}", e);
                    return Err(e);
                }
            }
        }
    };

    if let Some(Command::Check { start }) = args.command {
        return commands::run_config_check(config, start).await;
    }

    info!("Starting handler plugin host");
    info!("Loaded {} plugin configurations", config.plugins.len());

    let metrics = match &config.server.metrics_path {
        Some(_) => match Metrics::new() {
            Ok(metrics) => Some(Arc::new(metrics)),
            Err(e) => {
                warn!("Metrics disabled, registry setup failed: {}", e);
                None
            }
        },
        None => None,
    };

    let registry = PluginRegistry::provision_all(&config.plugins).await?;
    let pipeline = Arc::new(Pipeline::from_registry(&registry, metrics.clone()));

    let listener = match TcpListener::bind(config.server.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", config.server.listen, e);
            registry.shutdown_all().await;
            return Err(e.into());
        }
    };

    let mut server = HostServer::new(pipeline, &config.server);
    if let Some(metrics) = metrics {
        server = server.with_metrics(metrics);
    }

    if let Err(e) = server.serve(listener, shutdown_signal()).await {
        error!("HTTP host error: {}", e);
    }

    info!("Shutting down handler plugin host");

    let shutdown_timeout = tokio::time::timeout(
        tokio::time::Duration::from_secs(30),
        registry.shutdown_all(),
    );
    match shutdown_timeout.await {
        Ok(()) => info!("Graceful shutdown completed"),
        Err(_) => warn!("Graceful shutdown timed out, remaining plugins are killed on exit"),
    }

    Ok(())
}
