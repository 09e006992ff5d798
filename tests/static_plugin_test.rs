//! Drives the real `static-plugin` executable through the host side.

use bytes::Bytes;
use http::Request;
use http_body_util::{BodyExt, Full};
use http_handler_plugin::config::{PluginEntry, ServerConfig};
use http_handler_plugin::error::{PluginError, ProvisionError};
use http_handler_plugin::host::{HostServer, Pipeline};
use http_handler_plugin::plugin::{HandlerClient, PluginRegistry};
use http_handler_plugin::protocol::{PluginQuery, PluginReply};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const PLUGIN: &str = env!("CARGO_BIN_EXE_static-plugin");

fn site() -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("hello.txt"), "hello, world\n").unwrap();
    std::fs::write(dir.path().join("index.html"), "<h1>home</h1>").unwrap();
    std::fs::create_dir(dir.path().join("docs")).unwrap();
    std::fs::write(dir.path().join("docs/index.html"), "<h1>docs</h1>").unwrap();
    dir
}

fn entry(name: &str, root: &Path) -> PluginEntry {
    let mut entry = PluginEntry::new(name, PLUGIN);
    entry.config.insert(
        "root".to_string(),
        vec![root.to_string_lossy().into_owned()],
    );
    entry
}

fn query(method: &str, uri: &str) -> PluginQuery {
    let (parts, _) = Request::builder()
        .method(method)
        .uri(uri)
        .header("Host", "localhost")
        .body(())
        .unwrap()
        .into_parts();
    PluginQuery::from_parts(&parts, Bytes::new(), None)
}

async fn provision(name: &str, root: &Path) -> (PluginRegistry, Arc<HandlerClient>) {
    let mut registry = PluginRegistry::new();
    let client = registry.provision(&entry(name, root)).await.unwrap();
    (registry, client)
}

#[tokio::test]
async fn test_handshake_and_provisioning() {
    let dir = site();
    let (registry, client) = provision("static", dir.path()).await;

    assert!(client.pid().is_some());
    assert!(client.process().address().ip().is_loopback());
    assert!(client.process().is_running().await);
    assert!(registry.get("static").is_some());

    registry.shutdown_all().await;
    assert!(!client.process().is_running().await);
}

#[tokio::test]
async fn test_serve_file_and_decline() {
    let dir = site();
    let (registry, client) = provision("static", dir.path()).await;

    let reply = client.serve(&query("GET", "/hello.txt")).await.unwrap();
    let PluginReply::Handled(reply) = reply else {
        panic!("expected a handled reply");
    };
    assert_eq!(reply.body, "hello, world\n");
    assert_eq!(reply.headers["X-Served-By"], vec!["Static-Plugin"]);
    assert_eq!(reply.headers["Content-Type"], vec!["text/plain"]);

    let reply = client.serve(&query("GET", "/docs")).await.unwrap();
    let PluginReply::Handled(reply) = reply else {
        panic!("expected a redirect");
    };
    assert_eq!(reply.status, Some(301));
    assert_eq!(reply.headers["Location"], vec!["/docs/"]);

    registry.shutdown_all().await;
}

#[tokio::test]
async fn test_pass_next_declines_missing_files() {
    let dir = site();
    let mut entry = entry("static", dir.path());
    entry.config.insert("pass_next".to_string(), vec![]);

    let mut registry = PluginRegistry::new();
    let client = registry.provision(&entry).await.unwrap();

    let reply = client.serve(&query("GET", "/missing")).await.unwrap();
    assert_eq!(reply, PluginReply::NotHandled);

    registry.shutdown_all().await;
}

#[tokio::test]
async fn test_concurrent_calls_share_one_process() {
    let dir = site();
    let (registry, client) = provision("static", dir.path()).await;

    let mut calls = Vec::new();
    for i in 0..32 {
        let client = client.clone();
        let path = if i % 2 == 0 { "/hello.txt" } else { "/docs/" };
        calls.push(tokio::spawn(async move {
            (path, client.serve(&query("GET", path)).await)
        }));
    }

    for call in calls {
        let (path, reply) = call.await.unwrap();
        let PluginReply::Handled(reply) = reply.unwrap() else {
            panic!("expected {path} to be handled");
        };
        let expected: &[u8] = if path == "/hello.txt" {
            b"hello, world\n"
        } else {
            b"<h1>docs</h1>"
        };
        assert_eq!(reply.body, expected);
    }

    registry.shutdown_all().await;
}

#[tokio::test]
async fn test_end_to_end_over_http() {
    let dir = site();
    let registry = PluginRegistry::provision_all(&[entry("static", dir.path())])
        .await
        .unwrap();
    let pipeline = Arc::new(Pipeline::from_registry(&registry, None));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(HostServer::new(pipeline, &ServerConfig::default()).serve(
        listener,
        async move {
            let _ = stop_rx.await;
        },
    ));

    let mut stream = TcpStream::connect(address).await.unwrap();
    stream
        .write_all(b"GET /hello.txt HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
    assert!(response.to_ascii_lowercase().contains("x-served-by: static-plugin"));
    assert!(response.ends_with("hello, world\n"));

    let _ = stop_tx.send(());
    server.await.unwrap().unwrap();
    registry.shutdown_all().await;
}

#[tokio::test]
async fn test_pipeline_falls_through_to_404() {
    let dir = site();
    let mut entry = entry("static", dir.path());
    entry.config.insert("pass_next".to_string(), vec![]);
    let registry = PluginRegistry::provision_all(&[entry]).await.unwrap();
    let pipeline = Pipeline::from_registry(&registry, None);

    let req = Request::builder()
        .uri("/nope")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let response = pipeline.handle(req, None).await.unwrap();
    assert_eq!(response.status(), http::StatusCode::NOT_FOUND);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body, "Not Found");

    registry.shutdown_all().await;
}

#[tokio::test]
async fn test_bad_root_keeps_defaults() {
    let mut entry = PluginEntry::new("static", PLUGIN);
    entry.config.insert(
        "root".to_string(),
        vec!["/definitely/not/a/dir".to_string()],
    );

    // A rejected configuration is a warning, not a provisioning failure.
    let registry = PluginRegistry::provision_all(&[entry]).await.unwrap();
    assert_eq!(registry.len(), 1);
    registry.shutdown_all().await;
}

#[tokio::test]
async fn test_missing_executable() {
    let registry = PluginRegistry::provision_all(&[PluginEntry::new(
        "ghost",
        "/no/such/plugin-binary",
    )])
    .await;
    assert!(matches!(
        registry,
        Err(PluginError::Provision(ProvisionError::ExecutableNotFound { .. }))
    ));
}

#[cfg(unix)]
#[tokio::test]
async fn test_incompatible_executable() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let script = dir.path().join("not-a-plugin");
    std::fs::write(&script, "#!/bin/sh\necho 'Usage: not-a-plugin [options]'\nsleep 5\n").unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let entry = PluginEntry::new("impostor", script.to_string_lossy());
    let err = PluginRegistry::provision_all(&[entry]).await.err().unwrap();
    assert!(matches!(
        err,
        PluginError::Provision(ProvisionError::Incompatible { .. })
    ));
    assert!(err.to_string().contains("incompatible plugin"));
}

#[tokio::test]
async fn test_running_by_hand_explains_and_exits() {
    let output = tokio::process::Command::new(PLUGIN)
        .env_remove("STATIC_PLUGIN")
        .output()
        .await
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("This binary is a plugin"), "{stderr}");
}

#[cfg(unix)]
#[tokio::test]
async fn test_dead_plugin_fails_fast() {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let dir = site();
    let (registry, client) = provision("static", dir.path()).await;

    let pid = client.pid().unwrap() as i32;
    kill(Pid::from_raw(pid), Signal::SIGKILL).unwrap();

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        client.serve(&query("GET", "/hello.txt")),
    )
    .await
    .expect("a dead plugin must not hang the request");
    assert!(result.unwrap_err().is_transport());

    registry.shutdown_all().await;
}
