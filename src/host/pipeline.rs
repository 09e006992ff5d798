use super::adapter::{HostAdapter, NextHandler, PluginService};
use super::Body;
use crate::error::Result;
use crate::metrics::Metrics;
use crate::plugin::PluginRegistry;
use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::Full;
use std::net::SocketAddr;
use std::sync::Arc;

/// Plugin stages in order, ending in a terminal handler.
pub struct Pipeline {
    stages: Vec<HostAdapter>,
    terminal: Arc<dyn NextHandler>,
}

impl Pipeline {
    pub fn new(stages: Vec<HostAdapter>, terminal: Arc<dyn NextHandler>) -> Self {
        Self { stages, terminal }
    }

    /// One stage per provisioned plugin, in provisioning order, ending in 404.
    pub fn from_registry(registry: &PluginRegistry, metrics: Option<Arc<Metrics>>) -> Self {
        let stages = registry
            .plugins()
            .iter()
            .map(|plugin| {
                let adapter = HostAdapter::new(plugin.clone() as Arc<dyn PluginService>);
                match &metrics {
                    Some(metrics) => adapter.with_metrics(metrics.clone()),
                    None => adapter,
                }
            })
            .collect();
        Self::new(stages, Arc::new(NotFound))
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub async fn handle(
        &self,
        req: Request<Body>,
        remote_addr: Option<SocketAddr>,
    ) -> Result<Response<Body>> {
        self.run(0, req, remote_addr).await
    }

    async fn run(
        &self,
        index: usize,
        req: Request<Body>,
        remote_addr: Option<SocketAddr>,
    ) -> Result<Response<Body>> {
        match self.stages.get(index) {
            Some(stage) => {
                let rest = Rest {
                    pipeline: self,
                    index: index + 1,
                    remote_addr,
                };
                stage.serve_http(req, remote_addr, &rest).await
            }
            None => self.terminal.call(req).await,
        }
    }
}

/// The stages after the current one.
struct Rest<'a> {
    pipeline: &'a Pipeline,
    index: usize,
    remote_addr: Option<SocketAddr>,
}

#[async_trait]
impl NextHandler for Rest<'_> {
    async fn call(&self, req: Request<Body>) -> Result<Response<Body>> {
        self.pipeline.run(self.index, req, self.remote_addr).await
    }
}

/// Answers every request with a plain 404.
pub struct NotFound;

#[async_trait]
impl NextHandler for NotFound {
    async fn call(&self, _req: Request<Body>) -> Result<Response<Body>> {
        let mut response = Response::new(Full::new(Bytes::from_static(b"Not Found")));
        *response.status_mut() = StatusCode::NOT_FOUND;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{HandledReply, PluginQuery, PluginReply};
    use http_body_util::BodyExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Handles exactly one path, declines everything else.
    struct Claims {
        name: &'static str,
        path: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PluginService for Claims {
        fn name(&self) -> &str {
            self.name
        }

        async fn serve(&self, query: &PluginQuery) -> Result<PluginReply> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if query.url.path == self.path {
                Ok(PluginReply::handled(HandledReply::new().with_body(self.name)))
            } else {
                Ok(PluginReply::not_handled())
            }
        }
    }

    fn claims(name: &'static str, path: &'static str) -> Arc<Claims> {
        Arc::new(Claims {
            name,
            path,
            calls: AtomicUsize::new(0),
        })
    }

    fn get(path: &str) -> Request<Body> {
        Request::builder()
            .uri(path)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_stages_run_in_order_until_one_handles() {
        let first = claims("first", "/a");
        let second = claims("second", "/b");
        let pipeline = Pipeline::new(
            vec![
                HostAdapter::new(first.clone()),
                HostAdapter::new(second.clone()),
            ],
            Arc::new(NotFound),
        );

        let response = pipeline.handle(get("/a"), None).await.unwrap();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, "first");
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);

        let response = pipeline.handle(get("/b"), None).await.unwrap();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, "second");
        assert_eq!(first.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unclaimed_request_falls_through_to_404() {
        let pipeline = Pipeline::new(
            vec![HostAdapter::new(claims("only", "/x"))],
            Arc::new(NotFound),
        );
        let response = pipeline.handle(get("/elsewhere"), None).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_empty_pipeline() {
        let pipeline = Pipeline::from_registry(&PluginRegistry::new(), None);
        assert!(pipeline.is_empty());
        let response = pipeline.handle(get("/"), None).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
