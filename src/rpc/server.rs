use crate::error::{PluginError, Result};
use crate::plugin::handler::Handler;
use crate::protocol::{
    ConfigMap, HandshakeConfig, JsonRpcRequest, JsonRpcResponse, PluginQuery, HANDLER_ERROR,
    INVALID_PARAMS, METHOD_NOT_FOUND, PARSE_ERROR, SERVE_METHOD, SET_CONFIG_METHOD,
};
use crate::signal::shutdown_signal;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

/// Route one decoded request to the handler and build its response.
pub async fn dispatch<H>(handler: &H, request: JsonRpcRequest) -> JsonRpcResponse
where
    H: Handler + ?Sized,
{
    let id = request.id;
    match request.method.as_str() {
        SERVE_METHOD => {
            let query: PluginQuery = match serde_json::from_value(request.params) {
                Ok(query) => query,
                Err(e) => return JsonRpcResponse::failure(id, INVALID_PARAMS, e.to_string()),
            };
            match handler.serve(query).await {
                Ok(reply) => to_response(id, &reply),
                Err(e) => JsonRpcResponse::failure(id, HANDLER_ERROR, format!("{e:#}")),
            }
        }
        SET_CONFIG_METHOD => {
            let config: ConfigMap = if request.params.is_null() {
                ConfigMap::new()
            } else {
                match serde_json::from_value(request.params) {
                    Ok(config) => config,
                    Err(e) => {
                        return JsonRpcResponse::failure(id, INVALID_PARAMS, e.to_string())
                    }
                }
            };
            match handler.set_config(config).await {
                Ok(accepted) => JsonRpcResponse::success(id, Value::Bool(accepted)),
                Err(e) => JsonRpcResponse::failure(id, HANDLER_ERROR, format!("{e:#}")),
            }
        }
        other => JsonRpcResponse::failure(id, METHOD_NOT_FOUND, format!("unknown method '{other}'")),
    }
}

fn to_response<T: serde::Serialize>(id: u64, value: &T) -> JsonRpcResponse {
    match serde_json::to_value(value) {
        Ok(result) => JsonRpcResponse::success(id, result),
        Err(e) => JsonRpcResponse::failure(id, HANDLER_ERROR, e.to_string()),
    }
}

/// Serve calls from one host connection until it closes.
///
/// Every request runs on its own task, so a slow call never holds up the
/// replies to calls that arrived after it.
pub async fn serve_connection<S, H>(stream: S, handler: Arc<H>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    H: Handler + ?Sized,
{
    let (mut sink, mut frames) = Framed::new(stream, super::codec()).split();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<JsonRpcResponse>();

    let writer = tokio::spawn(async move {
        while let Some(response) = reply_rx.recv().await {
            let frame = match serde_json::to_string(&response) {
                Ok(frame) => frame,
                Err(e) => {
                    error!(call_id = response.id, error = %e, "Failed to encode reply");
                    continue;
                }
            };
            if let Err(e) = sink.send(frame).await {
                warn!(error = %e, "Failed to write reply to host");
                break;
            }
        }
    });

    while let Some(frame) = frames.next().await {
        let line = match frame {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to read from host connection");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let request: JsonRpcRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                // Answer if the frame still names an id we can reply to.
                let id = serde_json::from_str::<Value>(&line)
                    .ok()
                    .and_then(|v| v.get("id").and_then(Value::as_u64));
                match id {
                    Some(id) => {
                        let _ = reply_tx.send(JsonRpcResponse::failure(
                            id,
                            PARSE_ERROR,
                            e.to_string(),
                        ));
                    }
                    None => warn!(error = %e, "Discarding unparseable request frame"),
                }
                continue;
            }
        };

        debug!(call_id = request.id, method = %request.method, "RPC call received");
        let handler = handler.clone();
        let reply_tx = reply_tx.clone();
        tokio::spawn(async move {
            let response = dispatch(handler.as_ref(), request).await;
            let _ = reply_tx.send(response);
        });
    }

    debug!("Host connection closed");
    // The writer drains replies still owed by in-flight calls, then stops.
    drop(reply_tx);
    let _ = writer.await;
    Ok(())
}

/// Run a plugin executable's side of the protocol.
///
/// Binds a loopback listener, announces it with the handshake line on stdout,
/// then serves the single host connection. Returns when that connection
/// closes or the process is asked to terminate.
pub async fn serve_plugin<H>(handler: H, handshake: &HandshakeConfig) -> Result<()>
where
    H: Handler,
{
    if !handshake.cookie_in_env() {
        return Err(PluginError::MissingMagicCookie {
            key: handshake.magic_cookie_key.clone(),
        });
    }

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let address = listener.local_addr()?;
    let line = handshake.line_for(address.to_string());

    let mut stdout = tokio::io::stdout();
    stdout.write_all(format!("{line}\n").as_bytes()).await?;
    stdout.flush().await?;
    info!(%address, "Plugin listening");

    let (stream, peer) = tokio::select! {
        accepted = listener.accept() => accepted?,
        _ = shutdown_signal() => {
            info!("Shutting down plugin before host connected");
            return Ok(());
        }
    };
    // One host per process: stop listening once it has connected.
    drop(listener);
    stream.set_nodelay(true)?;
    debug!(%peer, "Host connected");

    tokio::select! {
        result = serve_connection(stream, Arc::new(handler)) => result?,
        _ = shutdown_signal() => info!("Shutting down plugin"),
    }

    Ok(())
}
