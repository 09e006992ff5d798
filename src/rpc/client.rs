use crate::error::{PluginError, Result, TransportError};
use crate::protocol::{
    ConfigMap, JsonRpcRequest, JsonRpcResponse, PluginQuery, PluginReply, SERVE_METHOD,
    SET_CONFIG_METHOD,
};
use dashmap::DashMap;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, warn};

type CallResult = std::result::Result<Value, PluginError>;
type Pending = Arc<DashMap<u64, oneshot::Sender<CallResult>>>;

/// Client stub shared by every in-flight request for one plugin.
pub struct RpcClient {
    writer_tx: mpsc::UnboundedSender<String>,
    pending: Pending,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    call_timeout: Duration,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
}

impl RpcClient {
    pub fn new<S>(stream: S, call_timeout: Duration) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (sink, frames) = Framed::new(stream, super::codec()).split();
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let pending: Pending = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));

        let writer_handle = tokio::spawn(writer_loop(
            sink,
            writer_rx,
            pending.clone(),
            closed.clone(),
        ));
        let reader_handle = tokio::spawn(reader_loop(frames, pending.clone(), closed.clone()));

        Self {
            writer_tx,
            pending,
            next_id: AtomicU64::new(1),
            closed,
            call_timeout,
            reader_handle,
            writer_handle,
        }
    }

    pub async fn serve(&self, query: &PluginQuery) -> Result<PluginReply> {
        let result = self
            .call(SERVE_METHOD, serde_json::to_value(query)?)
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn set_config(&self, config: &ConfigMap) -> Result<bool> {
        let result = self
            .call(SET_CONFIG_METHOD, serde_json::to_value(config)?)
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Send one request and wait for the response carrying the same id.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        if self.is_closed() {
            return Err(TransportError::Closed.into());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;
        let (tx, rx) = oneshot::channel();

        self.pending.insert(id, tx);
        // The reader flips `closed` before draining, so this catches an insert
        // that raced past the drain.
        if self.is_closed() || self.writer_tx.send(frame).is_err() {
            self.pending.remove(&id);
            return Err(TransportError::Closed.into());
        }

        debug!(call_id = id, method, "RPC call sent");

        match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::Closed.into()),
            Err(_) => {
                self.pending.remove(&id);
                let timeout_ms = self.call_timeout.as_millis() as u64;
                warn!(call_id = id, method, timeout_ms, "RPC call timed out");
                Err(TransportError::Timeout { timeout_ms }.into())
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Stop both I/O tasks and fail every outstanding call.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.reader_handle.abort();
        self.writer_handle.abort();
        fail_all(&self.pending);
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.reader_handle.abort();
        self.writer_handle.abort();
    }
}

async fn writer_loop<S>(
    mut sink: SplitSink<Framed<S, LinesCodec>, String>,
    mut rx: mpsc::UnboundedReceiver<String>,
    pending: Pending,
    closed: Arc<AtomicBool>,
) where
    S: AsyncRead + AsyncWrite,
{
    while let Some(frame) = rx.recv().await {
        if let Err(e) = sink.send(frame).await {
            warn!(error = %e, "RPC channel write failed");
            break;
        }
    }
    closed.store(true, Ordering::SeqCst);
    fail_all(&pending);
}

async fn reader_loop<S>(
    mut frames: SplitStream<Framed<S, LinesCodec>>,
    pending: Pending,
    closed: Arc<AtomicBool>,
) where
    S: AsyncRead + AsyncWrite,
{
    while let Some(frame) = frames.next().await {
        let line = match frame {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "RPC channel read failed");
                break;
            }
        };

        let response: JsonRpcResponse = match serde_json::from_str(&line) {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Discarding malformed RPC frame");
                continue;
            }
        };

        match pending.remove(&response.id) {
            Some((_, tx)) => {
                let _ = tx.send(into_result(response));
            }
            None => debug!(call_id = response.id, "Dropping reply for abandoned call"),
        }
    }

    debug!("RPC channel closed by peer");
    closed.store(true, Ordering::SeqCst);
    fail_all(&pending);
}

fn into_result(response: JsonRpcResponse) -> CallResult {
    match (response.error, response.result) {
        (Some(error), _) => Err(PluginError::Remote {
            code: error.code,
            message: error.message,
        }),
        (None, Some(result)) => Ok(result),
        (None, None) => Err(TransportError::InvalidFrame(format!(
            "response {} carries neither result nor error",
            response.id
        ))
        .into()),
    }
}

fn fail_all(pending: &Pending) {
    let ids: Vec<u64> = pending.iter().map(|entry| *entry.key()).collect();
    for id in ids {
        if let Some((_, tx)) = pending.remove(&id) {
            let _ = tx.send(Err(TransportError::Closed.into()));
        }
    }
}
