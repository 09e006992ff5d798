use super::client::HandlerClient;
use crate::config::PluginEntry;
use crate::error::{ConfigError, ProvisionError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Owns every supervised plugin of one host, keyed by configured name.
///
/// Built once at startup and handed to whatever needs a plugin. Dropping it
/// without calling [`PluginRegistry::shutdown_all`] still kills the children,
/// but does not wait for them to exit.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<HandlerClient>>,
    by_name: HashMap<String, usize>,
    shut_down: AtomicBool,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start every entry in order. If one fails, the ones already started
    /// are stopped before the error is returned.
    pub async fn provision_all(entries: &[PluginEntry]) -> Result<Self> {
        let mut registry = Self::new();
        for entry in entries {
            if let Err(e) = registry.provision(entry).await {
                error!(plugin = %entry.name, error = %e, "Plugin provisioning failed");
                registry.shutdown_all().await;
                return Err(e);
            }
        }
        Ok(registry)
    }

    /// Start one plugin and hand it its configuration.
    pub async fn provision(&mut self, entry: &PluginEntry) -> Result<Arc<HandlerClient>> {
        if self.by_name.contains_key(&entry.name) {
            return Err(ConfigError::Validation(format!(
                "plugin '{}' is already provisioned",
                entry.name
            ))
            .into());
        }
        if entry.path.is_empty() {
            return Err(ProvisionError::MissingPath.into());
        }

        let client = HandlerClient::start(
            &entry.name,
            &entry.executable(),
            &entry.handshake,
            &entry.timeouts(),
        )
        .await?;

        match client.set_config(&entry.config).await {
            Ok(true) => {}
            Ok(false) => warn!(
                plugin = %entry.name,
                "Plugin rejected its configuration, serving with defaults"
            ),
            Err(e) => {
                if let Err(stop_err) = client.stop().await {
                    warn!(plugin = %entry.name, error = %stop_err, "Failed to stop plugin after SetConfig failure");
                }
                return Err(e);
            }
        }

        info!(plugin = %entry.name, pid = client.pid(), "Plugin provisioned");
        let client = Arc::new(client);
        self.by_name.insert(entry.name.clone(), self.plugins.len());
        self.plugins.push(client.clone());
        Ok(client)
    }

    pub fn get(&self, name: &str) -> Option<Arc<HandlerClient>> {
        self.by_name.get(name).map(|&i| self.plugins[i].clone())
    }

    /// Plugins in provisioning order.
    pub fn plugins(&self) -> &[Arc<HandlerClient>] {
        &self.plugins
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Stop every plugin, last provisioned first. Only the first call does
    /// anything.
    pub async fn shutdown_all(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        for plugin in self.plugins.iter().rev() {
            if let Err(e) = plugin.stop().await {
                warn!(plugin = plugin.name(), error = %e, "Failed to stop plugin cleanly");
            }
        }
        info!(count = self.plugins.len(), "All plugins stopped");
    }
}
