use http::StatusCode;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Provisioning error: {0}")]
    Provision(#[from] ProvisionError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The plugin answered the call with an error object instead of a result.
    #[error("Plugin returned error [{code}]: {message}")]
    Remote { code: i64, message: String },

    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    /// The executable was started by hand rather than by a host.
    #[error("This binary is a plugin. These are not meant to be executed directly. Please execute the program that consumes these plugins, which will load any plugins automatically ({key} is not set)")]
    MissingMagicCookie { key: String },

    #[error("HTTP error: {0}")]
    Http(#[from] http::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Environment variable error: {0}")]
    EnvVar(String),
}

/// Failures while turning an executable path into a live RPC peer.
///
/// All of these are fatal to provisioning.
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("plugin path is required")]
    MissingPath,

    #[error("plugin executable not found: {}", path.display())]
    ExecutableNotFound { path: PathBuf },

    #[error("failed to spawn plugin {}: {reason}", path.display())]
    SpawnFailed { path: PathBuf, reason: String },

    #[error("plugin {} did not complete the handshake within {timeout_ms}ms", path.display())]
    HandshakeTimeout { path: PathBuf, timeout_ms: u64 },

    #[error("incompatible plugin {}: {reason}", path.display())]
    Incompatible { path: PathBuf, reason: String },

    #[error("plugin {} exited before completing the handshake ({status})", path.display())]
    ExitedBeforeHandshake { path: PathBuf, status: String },

    #[error("failed to connect to plugin at {address}: {reason}")]
    ConnectFailed { address: String, reason: String },
}

#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Transport closed")]
    Closed,

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

impl PluginError {
    /// True when the channel to the plugin process is broken or unresponsive.
    pub fn is_transport(&self) -> bool {
        matches!(self, PluginError::Transport(_))
    }

    /// Default status the host answers with when a plugin stage fails.
    pub fn status_code(&self) -> StatusCode {
        match self {
            PluginError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            PluginError::Transport(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type Result<T> = std::result::Result<T, PluginError>;
