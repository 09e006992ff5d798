use super::Body;
use crate::error::{Result, TransportError};
use crate::metrics::{CallOutcome, Metrics};
use crate::plugin::HandlerClient;
use crate::protocol::{HandledReply, PluginQuery, PluginReply};
use async_trait::async_trait;
use http::header::{HeaderName, HeaderValue};
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Continuation invoked when a stage declines a request.
#[async_trait]
pub trait NextHandler: Send + Sync {
    async fn call(&self, req: Request<Body>) -> Result<Response<Body>>;
}

/// Whatever answers `Serve` for a stage. Implemented by the live plugin
/// handle; tests substitute their own.
#[async_trait]
pub trait PluginService: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn serve(&self, query: &PluginQuery) -> Result<PluginReply>;
}

#[async_trait]
impl PluginService for HandlerClient {
    fn name(&self) -> &str {
        HandlerClient::name(self)
    }

    async fn serve(&self, query: &PluginQuery) -> Result<PluginReply> {
        HandlerClient::serve(self, query).await
    }
}

/// Middleware stage bridging one HTTP request to one plugin call.
#[derive(Clone)]
pub struct HostAdapter {
    plugin: Arc<dyn PluginService>,
    metrics: Option<Arc<Metrics>>,
}

impl HostAdapter {
    pub fn new(plugin: Arc<dyn PluginService>) -> Self {
        Self {
            plugin,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn plugin_name(&self) -> &str {
        self.plugin.name()
    }

    /// Hand the request to the plugin, then either replay its reply or call
    /// `next` with the request exactly as it arrived.
    ///
    /// Nothing is written for a declined request. The plugin call runs on
    /// its own task, so dropping this future leaves the call to finish and
    /// its reply is discarded.
    pub async fn serve_http(
        &self,
        req: Request<Body>,
        remote_addr: Option<SocketAddr>,
        next: &dyn NextHandler,
    ) -> Result<Response<Body>> {
        let (parts, body) = req.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(never) => match never {},
        };
        let query = PluginQuery::from_parts(&parts, body.clone(), remote_addr);

        let started = Instant::now();
        let plugin = self.plugin.clone();
        let outcome = tokio::spawn(async move { plugin.serve(&query).await })
            .await
            .unwrap_or_else(|e| Err(TransportError::ReceiveFailed(e.to_string()).into()));
        self.record(&outcome, started);

        match outcome {
            Ok(PluginReply::NotHandled) => {
                debug!(plugin = self.plugin_name(), path = %parts.uri.path(), "Plugin passed request on");
                next.call(Request::from_parts(parts, Full::new(body))).await
            }
            Ok(PluginReply::Handled(reply)) => replay(reply),
            Err(e) => {
                warn!(plugin = self.plugin_name(), error = %e, "Plugin call failed");
                Err(e)
            }
        }
    }

    fn record(&self, outcome: &Result<PluginReply>, started: Instant) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        let label = match outcome {
            Ok(PluginReply::Handled(_)) => CallOutcome::Handled,
            Ok(PluginReply::NotHandled) => CallOutcome::NotHandled,
            Err(_) => CallOutcome::Error,
        };
        metrics.record_call(self.plugin_name(), label, started.elapsed());
    }
}

/// Turn a handled reply into a response. The first value of each header
/// replaces, later ones append.
pub fn replay(reply: HandledReply) -> Result<Response<Body>> {
    let status = reply.effective_status();
    let mut response = Response::new(Full::new(reply.body));

    if let Some(code) = status {
        *response.status_mut() = StatusCode::from_u16(code).map_err(http::Error::from)?;
    }

    let headers = response.headers_mut();
    for (name, values) in reply.headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(http::Error::from)?;
        for (i, value) in values.iter().enumerate() {
            let value = HeaderValue::from_bytes(value.as_bytes()).map_err(http::Error::from)?;
            if i == 0 {
                headers.insert(name.clone(), value);
            } else {
                headers.append(name.clone(), value);
            }
        }
    }

    Ok(response)
}
