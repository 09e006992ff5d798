use super::process::{PluginProcess, Timeouts};
use crate::error::Result;
use crate::protocol::{ConfigMap, HandshakeConfig, PluginQuery, PluginReply};
use crate::rpc::RpcClient;
use std::path::Path;
use tracing::debug;

/// Typed handle to a live plugin: its process plus the RPC channel to it.
///
/// Shared by every request routed to the plugin. All methods take `&self`.
pub struct HandlerClient {
    process: PluginProcess,
    rpc: RpcClient,
}

impl HandlerClient {
    /// Spawn `path`, complete the handshake and connect the RPC channel.
    pub async fn start(
        name: &str,
        path: &Path,
        handshake: &HandshakeConfig,
        timeouts: &Timeouts,
    ) -> Result<Self> {
        let (process, stream) = PluginProcess::spawn(name, path, handshake, timeouts).await?;
        let rpc = RpcClient::new(stream, timeouts.call);
        Ok(Self { process, rpc })
    }

    pub fn name(&self) -> &str {
        self.process.name()
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    pub fn process(&self) -> &PluginProcess {
        &self.process
    }

    /// True once the channel to the plugin has failed or been closed.
    pub fn is_closed(&self) -> bool {
        self.rpc.is_closed()
    }

    pub async fn serve(&self, query: &PluginQuery) -> Result<PluginReply> {
        self.rpc.serve(query).await
    }

    pub async fn set_config(&self, config: &ConfigMap) -> Result<bool> {
        self.rpc.set_config(config).await
    }

    /// Close the channel and terminate the process. Safe to call repeatedly.
    pub async fn stop(&self) -> Result<()> {
        debug!(plugin = self.name(), "Stopping plugin");
        self.rpc.close();
        self.process.stop().await
    }
}
