//! Plugin-side capability set.

use crate::protocol::{ConfigMap, PluginQuery, PluginReply};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use std::sync::Arc;

/// Logic a plugin executable exposes to the host.
///
/// `set_config` runs once at provisioning, before any `serve` call. A plugin
/// that has nothing to configure still implements it and returns `true`.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn serve(&self, query: PluginQuery) -> anyhow::Result<PluginReply>;

    async fn set_config(&self, config: ConfigMap) -> anyhow::Result<bool>;
}

/// Declines every request and remembers the last configuration it was given.
#[derive(Default)]
pub struct PassThroughHandler {
    config: ArcSwap<ConfigMap>,
}

impl PassThroughHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(&self) -> Arc<ConfigMap> {
        self.config.load_full()
    }
}

#[async_trait]
impl Handler for PassThroughHandler {
    async fn serve(&self, _query: PluginQuery) -> anyhow::Result<PluginReply> {
        Ok(PluginReply::not_handled())
    }

    async fn set_config(&self, config: ConfigMap) -> anyhow::Result<bool> {
        self.config.store(Arc::new(config));
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RequestUrl;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_pass_through_declines_and_keeps_config() {
        let handler = PassThroughHandler::new();
        let mut config = ConfigMap::new();
        config.insert("pass_next".to_string(), vec![]);

        assert!(handler.set_config(config).await.unwrap());
        assert!(handler.config().contains_key("pass_next"));

        let query = PluginQuery {
            method: "GET".to_string(),
            url: RequestUrl {
                path: "/".to_string(),
                raw_query: None,
            },
            proto: "HTTP/1.1".to_string(),
            host: "localhost".to_string(),
            header: Default::default(),
            body: Bytes::new(),
            remote_addr: String::new(),
            transfer_encoding: vec![],
            request_uri: "/".to_string(),
        };
        assert_eq!(handler.serve(query).await.unwrap(), PluginReply::NotHandled);
    }
}
