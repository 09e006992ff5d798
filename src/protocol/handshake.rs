use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Version of the line format itself, independent of the app protocol.
pub const CORE_PROTOCOL_VERSION: u32 = 1;
pub const NETWORK_TCP: &str = "tcp";
pub const PROTOCOL_JSONRPC: &str = "jsonrpc";

/// Capability check agreed between host and plugin.
///
/// The magic cookie is a sanity check that the executable really is a
/// plugin. It is not a credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeConfig {
    pub protocol_version: u32,
    pub magic_cookie_key: String,
    pub magic_cookie_value: String,
}

impl HandshakeConfig {
    pub fn new(
        protocol_version: u32,
        magic_cookie_key: impl Into<String>,
        magic_cookie_value: impl Into<String>,
    ) -> Self {
        Self {
            protocol_version,
            magic_cookie_key: magic_cookie_key.into(),
            magic_cookie_value: magic_cookie_value.into(),
        }
    }

    /// Whether the cookie the host exports is present in this process.
    pub fn cookie_in_env(&self) -> bool {
        std::env::var(&self.magic_cookie_key)
            .map(|value| value == self.magic_cookie_value)
            .unwrap_or(false)
    }

    /// The line a plugin listening on `address` prints to stdout.
    pub fn line_for(&self, address: impl Into<String>) -> HandshakeLine {
        HandshakeLine {
            core_version: CORE_PROTOCOL_VERSION,
            app_version: self.protocol_version,
            cookie_key: self.magic_cookie_key.clone(),
            cookie_value: self.magic_cookie_value.clone(),
            network: NETWORK_TCP.to_string(),
            address: address.into(),
            protocol: PROTOCOL_JSONRPC.to_string(),
        }
    }
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self::new(1, "STATIC_PLUGIN", "static-website-content")
    }
}

/// `CORE|APP|KEY=VALUE|NETWORK|ADDRESS|PROTOCOL`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeLine {
    pub core_version: u32,
    pub app_version: u32,
    pub cookie_key: String,
    pub cookie_value: String,
    pub network: String,
    pub address: String,
    pub protocol: String,
}

impl HandshakeLine {
    /// Check the line against what the host expects, naming the first mismatch.
    pub fn verify(&self, expected: &HandshakeConfig) -> Result<(), String> {
        if self.core_version != CORE_PROTOCOL_VERSION {
            return Err(format!(
                "core protocol version {} is not supported (expected {})",
                self.core_version, CORE_PROTOCOL_VERSION
            ));
        }
        if self.app_version != expected.protocol_version {
            return Err(format!(
                "plugin speaks protocol version {}, host expects {}",
                self.app_version, expected.protocol_version
            ));
        }
        if self.cookie_key != expected.magic_cookie_key
            || self.cookie_value != expected.magic_cookie_value
        {
            return Err("magic cookie mismatch".to_string());
        }
        if self.network != NETWORK_TCP {
            return Err(format!("unsupported network type '{}'", self.network));
        }
        if self.protocol != PROTOCOL_JSONRPC {
            return Err(format!("unsupported RPC protocol '{}'", self.protocol));
        }
        Ok(())
    }
}

impl fmt::Display for HandshakeLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}={}|{}|{}|{}",
            self.core_version,
            self.app_version,
            self.cookie_key,
            self.cookie_value,
            self.network,
            self.address,
            self.protocol
        )
    }
}

impl FromStr for HandshakeLine {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let parts: Vec<&str> = line.split('|').collect();
        if parts.len() != 6 {
            return Err(format!("unrecognized handshake line: {line:?}"));
        }

        let core_version = parts[0]
            .parse()
            .map_err(|_| format!("invalid core protocol version {:?}", parts[0]))?;
        let app_version = parts[1]
            .parse()
            .map_err(|_| format!("invalid app protocol version {:?}", parts[1]))?;
        let (cookie_key, cookie_value) = parts[2]
            .split_once('=')
            .ok_or_else(|| format!("malformed magic cookie {:?}", parts[2]))?;

        Ok(Self {
            core_version,
            app_version,
            cookie_key: cookie_key.to_string(),
            cookie_value: cookie_value.to_string(),
            network: parts[3].to_string(),
            address: parts[4].to_string(),
            protocol: parts[5].to_string(),
        })
    }
}

/// Timing of the startup exchange, for diagnostics.
#[derive(Debug, Clone)]
pub struct HandshakeTracker {
    pub started_at: Instant,
    pub line_received_at: Option<Instant>,
    pub connected_at: Option<Instant>,
    pub timeout: Duration,
}

impl HandshakeTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            started_at: Instant::now(),
            line_received_at: None,
            connected_at: None,
            timeout,
        }
    }

    pub fn mark_line_received(&mut self) {
        self.line_received_at = Some(Instant::now());
    }

    pub fn mark_connected(&mut self) {
        self.connected_at = Some(Instant::now());
    }

    pub fn is_timed_out(&self) -> bool {
        self.started_at.elapsed() > self.timeout
    }

    /// Time left before the handshake deadline.
    pub fn remaining(&self) -> Duration {
        self.timeout.saturating_sub(self.started_at.elapsed())
    }

    pub fn total_duration(&self) -> Option<Duration> {
        self.connected_at
            .map(|end| end.duration_since(self.started_at))
    }
}
