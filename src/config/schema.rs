use crate::plugin::process::Timeouts;
use crate::protocol::{ConfigMap, HandshakeConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    /// Pipeline stages, in the order requests pass through them.
    #[serde(default)]
    pub plugins: Vec<PluginEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Request bodies are buffered in full before a plugin sees them.
    #[serde(default = "default_max_body_bytes", alias = "maxbodybytes")]
    pub max_body_bytes: usize,
    #[serde(default, alias = "metricspath")]
    pub metrics_path: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_body_bytes: default_max_body_bytes(),
            metrics_path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginEntry {
    pub name: String,
    /// Executable path, used verbatim.
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub config: ConfigMap,
    #[serde(default)]
    pub handshake: HandshakeConfig,
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_call_timeout")]
    pub call_timeout_ms: u64,
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_ms: u64,
}

impl PluginEntry {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            config: ConfigMap::new(),
            handshake: HandshakeConfig::default(),
            handshake_timeout_ms: default_handshake_timeout(),
            call_timeout_ms: default_call_timeout(),
            stop_timeout_ms: default_stop_timeout(),
        }
    }

    pub fn executable(&self) -> PathBuf {
        PathBuf::from(&self.path)
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            handshake: Duration::from_millis(self.handshake_timeout_ms),
            call: Duration::from_millis(self.call_timeout_ms),
            stop: Duration::from_millis(self.stop_timeout_ms),
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_handshake_timeout() -> u64 {
    10_000
}

fn default_call_timeout() -> u64 {
    30_000
}

fn default_stop_timeout() -> u64 {
    2_000
}
