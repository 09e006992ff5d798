//! Plugin process spawning, handshake, and teardown.

use crate::error::{ProvisionError, Result};
use crate::protocol::{HandshakeConfig, HandshakeLine, HandshakeTracker};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Bounded waits applied while a plugin starts and stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub handshake: Duration,
    pub call: Duration,
    pub stop: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(10),
            call: Duration::from_secs(30),
            stop: Duration::from_secs(2),
        }
    }
}

/// One supervised plugin executable.
pub struct PluginProcess {
    name: String,
    path: PathBuf,
    pid: Option<u32>,
    address: SocketAddr,
    child: Mutex<Option<Child>>,
    stop_timeout: Duration,
}

impl PluginProcess {
    /// Spawn the executable, wait for its handshake line and connect to the
    /// address it announced.
    pub async fn spawn(
        name: &str,
        path: &Path,
        handshake: &HandshakeConfig,
        timeouts: &Timeouts,
    ) -> std::result::Result<(Self, TcpStream), ProvisionError> {
        if path.as_os_str().is_empty() {
            return Err(ProvisionError::MissingPath);
        }

        let mut tracker = HandshakeTracker::new(timeouts.handshake);
        let mut cmd = Command::new(path);
        cmd.env(&handshake.magic_cookie_key, &handshake.magic_cookie_value)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ProvisionError::ExecutableNotFound {
                path: path.to_path_buf(),
            },
            _ => ProvisionError::SpawnFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            },
        })?;
        let pid = child.id();
        debug!(plugin = name, pid, path = %path.display(), "Plugin process spawned");

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(
                name.to_string(),
                "stderr",
                BufReader::new(stderr).lines(),
            ));
        }
        let mut stdout = match child.stdout.take() {
            Some(stdout) => BufReader::new(stdout).lines(),
            None => {
                return Err(fail(child, ProvisionError::SpawnFailed {
                    path: path.to_path_buf(),
                    reason: "stdout was not captured".to_string(),
                })
                .await)
            }
        };

        let line = match timeout(tracker.remaining(), stdout.next_line()).await {
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => {
                let status = exit_status(&mut child).await;
                return Err(ProvisionError::ExitedBeforeHandshake {
                    path: path.to_path_buf(),
                    status,
                });
            }
            Ok(Err(e)) => {
                return Err(fail(child, ProvisionError::Incompatible {
                    path: path.to_path_buf(),
                    reason: format!("unreadable handshake output: {e}"),
                })
                .await)
            }
            Err(_) => {
                return Err(fail(child, ProvisionError::HandshakeTimeout {
                    path: path.to_path_buf(),
                    timeout_ms: timeouts.handshake.as_millis() as u64,
                })
                .await)
            }
        };
        tracker.mark_line_received();
        debug!(plugin = name, line = %line.trim(), "Handshake line received");

        let address = match parse_handshake(&line, handshake) {
            Ok(address) => address,
            Err(reason) => {
                return Err(fail(child, ProvisionError::Incompatible {
                    path: path.to_path_buf(),
                    reason,
                })
                .await)
            }
        };

        tokio::spawn(forward_output(name.to_string(), "stdout", stdout));

        let stream = match timeout(tracker.remaining(), TcpStream::connect(address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(fail(child, ProvisionError::ConnectFailed {
                    address: address.to_string(),
                    reason: e.to_string(),
                })
                .await)
            }
            Err(_) => {
                return Err(fail(child, ProvisionError::HandshakeTimeout {
                    path: path.to_path_buf(),
                    timeout_ms: timeouts.handshake.as_millis() as u64,
                })
                .await)
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(plugin = name, error = %e, "Could not disable Nagle on plugin stream");
        }
        tracker.mark_connected();

        info!(
            plugin = name,
            pid,
            %address,
            duration_ms = tracker.total_duration().map(|d| d.as_millis() as u64),
            "Plugin started"
        );

        Ok((
            Self {
                name: name.to_string(),
                path: path.to_path_buf(),
                pid,
                address,
                child: Mutex::new(Some(child)),
                stop_timeout: timeouts.stop,
            },
            stream,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Whether the child is still alive and has not been stopped.
    pub async fn is_running(&self) -> bool {
        match self.child.lock().await.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Terminate and reap the child.
    ///
    /// Sends SIGTERM, waits up to the stop timeout, then force-kills. Calling
    /// it again after the first time is a no-op.
    pub async fn stop(&self) -> Result<()> {
        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };

        if let Ok(Some(status)) = child.try_wait() {
            info!(plugin = %self.name, %status, "Plugin had already exited");
            return Ok(());
        }

        terminate(&mut child);

        match timeout(self.stop_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                info!(plugin = %self.name, %status, "Plugin stopped");
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                warn!(
                    plugin = %self.name,
                    timeout_ms = self.stop_timeout.as_millis() as u64,
                    "Plugin ignored termination request, killing"
                );
                child.kill().await?;
                Ok(())
            }
        }
    }
}

fn parse_handshake(
    line: &str,
    expected: &HandshakeConfig,
) -> std::result::Result<SocketAddr, String> {
    let line: HandshakeLine = line.parse()?;
    line.verify(expected)?;

    let address: SocketAddr = line
        .address
        .parse()
        .map_err(|_| format!("invalid plugin address '{}'", line.address))?;
    if !address.ip().is_loopback() {
        return Err(format!("plugin address {address} is not on loopback"));
    }
    Ok(address)
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            debug!(pid, error = %e, "SIGTERM delivery failed");
        }
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.start_kill();
}

/// Kill and reap a child that failed provisioning, passing the error through.
async fn fail(mut child: Child, err: ProvisionError) -> ProvisionError {
    if let Err(e) = child.kill().await {
        debug!(error = %e, "Failed to kill rejected plugin");
    }
    err
}

async fn exit_status(child: &mut Child) -> String {
    match timeout(Duration::from_secs(1), child.wait()).await {
        Ok(Ok(status)) => describe(status),
        Ok(Err(e)) => format!("status unavailable: {e}"),
        Err(_) => {
            let _ = child.kill().await;
            "closed stdout without exiting".to_string()
        }
    }
}

fn describe(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit status {code}"),
        None => status.to_string(),
    }
}

async fn forward_output<R>(plugin: String, stream: &'static str, mut lines: Lines<BufReader<R>>)
where
    R: AsyncRead + Unpin,
{
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(target: "plugin", plugin = %plugin, stream, "{}", line),
            Ok(None) => break,
            Err(e) => {
                debug!(target: "plugin", plugin = %plugin, stream, error = %e, "Output closed");
                break;
            }
        }
    }
}
