use crate::config::Config;
use crate::error::{ConfigError, Result};
use crate::plugin::PluginRegistry;
use tracing::{error, info};

/// Validate the configuration and, with `start`, run every plugin through
/// the handshake and `SetConfig` before stopping it again.
pub async fn run_config_check(config: Config, start: bool) -> Result<()> {
    info!("Checking configuration...");

    crate::config::validate(&config)?;
    info!("✓ Configuration is valid");

    info!(
        "Listener: {} (max body {} bytes)",
        config.server.listen, config.server.max_body_bytes
    );
    if let Some(path) = &config.server.metrics_path {
        info!("Metrics exposed at {}", path);
    }

    info!("Checking {} plugin(s)...", config.plugins.len());
    let mut all_ok = true;

    for entry in &config.plugins {
        info!("\nChecking plugin: {}", entry.name);
        info!("  Path: {}", entry.path);
        info!("  Config keys: {:?}", entry.config.keys().collect::<Vec<_>>());
        info!(
            "  Timeouts: handshake {}ms, call {}ms, stop {}ms",
            entry.handshake_timeout_ms, entry.call_timeout_ms, entry.stop_timeout_ms
        );

        if !start {
            continue;
        }

        let mut registry = PluginRegistry::new();
        match registry.provision(entry).await {
            Ok(client) => info!("  ✓ Started (pid {:?}) and configured", client.pid()),
            Err(e) => {
                error!("  ✗ Start failed: {}", e);
                all_ok = false;
            }
        }
        registry.shutdown_all().await;
    }

    if all_ok {
        info!("\n✓ All checks passed");
        Ok(())
    } else {
        Err(ConfigError::Validation("One or more plugins failed checks".to_string()).into())
    }
}
