use super::pipeline::Pipeline;
use super::{error_response, Body};
use crate::config::ServerConfig;
use crate::error::PluginError;
use crate::metrics::Metrics;
use bytes::Bytes;
use http::{header, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, trace};

/// Demo HTTP front end driving a plugin pipeline.
pub struct HostServer {
    pipeline: Arc<Pipeline>,
    max_body_bytes: usize,
    metrics_path: Option<String>,
    metrics: Option<Arc<Metrics>>,
}

impl HostServer {
    pub fn new(pipeline: Arc<Pipeline>, config: &ServerConfig) -> Self {
        Self {
            pipeline,
            max_body_bytes: config.max_body_bytes,
            metrics_path: config.metrics_path.clone(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Accept connections until `shutdown` resolves.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()>,
    {
        let server = Arc::new(self);
        info!(address = %listener.local_addr()?, stages = server.pipeline.len(), "HTTP host listening");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            trace!("Accepted connection from {}", addr);
                            let server = server.clone();

                            tokio::spawn(async move {
                                let service = hyper::service::service_fn(move |req| {
                                    let server = server.clone();
                                    async move { Ok::<_, Infallible>(server.handle(req, addr).await) }
                                });

                                let io = hyper_util::rt::TokioIo::new(stream);
                                if let Err(e) = hyper::server::conn::http1::Builder::new()
                                    .serve_connection(io, service)
                                    .await
                                {
                                    debug!("HTTP connection error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = &mut shutdown => {
                    info!("Shutdown signal received, no longer accepting connections");
                    break;
                }
            }
        }

        Ok(())
    }

    async fn handle(&self, req: Request<Incoming>, remote_addr: SocketAddr) -> Response<Body> {
        if let (Some(path), Some(metrics)) = (&self.metrics_path, &self.metrics) {
            if req.uri().path() == path {
                return text(StatusCode::OK, metrics.gather());
            }
        }

        let (parts, body) = req.into_parts();
        let body = match Limited::new(body, self.max_body_bytes).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                return error_response(&PluginError::PayloadTooLarge {
                    limit: self.max_body_bytes,
                });
            }
            Err(e) => {
                debug!(error = %e, "Failed to read request body");
                return text(StatusCode::BAD_REQUEST, "Bad Request".to_string());
            }
        };

        let req = Request::from_parts(parts, Full::new(body));
        match self.pipeline.handle(req, Some(remote_addr)).await {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "Request handling failed");
                error_response(&e)
            }
        }
    }
}

fn text(status: StatusCode, body: String) -> Response<Body> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
