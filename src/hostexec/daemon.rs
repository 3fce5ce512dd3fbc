//! Host Executor Daemon core — runs on the host, outside any container,
//! and is the only component in this crate allowed to spawn arbitrary
//! processes. Owns a Unix socket (mode 0600) and a shared secret;
//! every request must present the secret or is rejected before any
//! command ever runs.

use crate::hostexec::protocol::{DaemonRequest, DaemonResponse, ExecStatus, ExecuteResponse};
use anyhow::{Context, Result};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::process::Command;
use tokio::sync::Mutex;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);
/// Grace period between SIGTERM and the SIGKILL fallback on a timed-out command.
const KILL_GRACE: Duration = Duration::from_secs(5);

pub struct ExecutorDaemon {
    socket_path: std::path::PathBuf,
    secret: String,
}

impl ExecutorDaemon {
    pub fn new(socket_path: impl AsRef<Path>, secret: String) -> Self {
        Self { socket_path: socket_path.as_ref().to_path_buf(), secret }
    }

    pub async fn serve(self: Arc<Self>) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        let listener = UnixListener::bind(&self.socket_path)
            .with_context(|| format!("failed to bind executor socket: {}", self.socket_path.display()))?;
        set_socket_permissions(&self.socket_path)?;

        tracing::info!(path = %self.socket_path.display(), "host executor daemon listening");

        loop {
            let (stream, _addr) = listener.accept().await?;
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(err) = this.handle_connection(stream).await {
                    tracing::debug!(error = %err, "executor connection failed");
                }
            });
        }
    }

    async fn handle_connection(&self, stream: UnixStream) -> Result<()> {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }

        let response = match serde_json::from_str::<DaemonRequest>(line.trim()) {
            Ok(req) if req.secret == self.secret => {
                let result = run_command(req.request).await;
                DaemonResponse::ok(result)
            }
            Ok(_) => DaemonResponse::unauthorized(),
            Err(err) => DaemonResponse::failure(format!("bad request: {err}")),
        };

        let payload = serde_json::to_string(&response)?;
        write_half.write_all(payload.as_bytes()).await?;
        write_half.write_all(b"\n").await?;
        Ok(())
    }
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// Run a single command, enforcing the timeout and capturing whatever
/// output was produced before a timeout or crash.
async fn run_command(req: crate::hostexec::protocol::ExecuteRequest) -> ExecuteResponse {
    let workdir = std::path::Path::new(&req.workdir);
    if !workdir.is_dir() {
        return ExecuteResponse {
            status: ExecStatus::Error,
            exit_code: -1,
            stdout: String::new(),
            stderr: String::new(),
            error: Some(format!("working directory does not exist: {}", req.workdir)),
        };
    }

    let mut command = Command::new(&req.command);
    command
        .args(&req.args)
        .current_dir(workdir)
        .envs(&req.env)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match command.spawn() {
        Ok(c) => c,
        Err(err) => {
            return ExecuteResponse {
                status: ExecStatus::Error,
                exit_code: -1,
                stdout: String::new(),
                stderr: String::new(),
                error: Some(format!("failed to spawn {}: {err}", req.command)),
            };
        }
    };

    let stdout_buf = Arc::new(Mutex::new(Vec::new()));
    let stderr_buf = Arc::new(Mutex::new(Vec::new()));

    let stdout_task = child.stdout.take().map(|s| spawn_reader(s, stdout_buf.clone()));
    let stderr_task = child.stderr.take().map(|s| spawn_reader(s, stderr_buf.clone()));

    let timeout = req
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_TIMEOUT);

    let wait_result = tokio::time::timeout(timeout, child.wait()).await;

    if let Some(t) = stdout_task {
        let _ = t.await;
    }
    if let Some(t) = stderr_task {
        let _ = t.await;
    }

    let stdout = String::from_utf8_lossy(&stdout_buf.lock().await).to_string();
    let stderr = String::from_utf8_lossy(&stderr_buf.lock().await).to_string();

    match wait_result {
        Ok(Ok(status)) => ExecuteResponse {
            status: ExecStatus::Completed,
            exit_code: status.code().unwrap_or(-1),
            stdout,
            stderr,
            error: None,
        },
        Ok(Err(err)) => ExecuteResponse {
            status: ExecStatus::Error,
            exit_code: -1,
            stdout,
            stderr,
            error: Some(err.to_string()),
        },
        Err(_elapsed) => {
            send_sigterm(&child);
            match tokio::time::timeout(KILL_GRACE, child.wait()).await {
                Ok(_) => {}
                Err(_) => {
                    tracing::warn!(command = %req.command, "command did not exit after SIGTERM, sending SIGKILL");
                    let _ = child.start_kill();
                }
            }
            ExecuteResponse {
                status: ExecStatus::Timeout,
                exit_code: -1,
                stdout,
                stderr,
                error: None,
            }
        }
    }
}

/// Send SIGTERM to a running child, best-effort (no-op if it already exited).
#[cfg(unix)]
fn send_sigterm(child: &tokio::process::Child) {
    if let Some(pid) = child.id() {
        let _ = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), nix::sys::signal::Signal::SIGTERM);
    }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &tokio::process::Child) {}

fn spawn_reader<R>(mut reader: R, buf: Arc<Mutex<Vec<u8>>>) -> tokio::task::JoinHandle<()>
where
    R: AsyncReadExt + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 4096];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => buf.lock().await.extend_from_slice(&chunk[..n]),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hostexec::protocol::ExecuteRequest;

    #[tokio::test]
    async fn test_run_command_completes() {
        let dir = tempfile::tempdir().unwrap();
        let req = ExecuteRequest {
            command: "echo".to_string(),
            args: vec!["hi".to_string()],
            workdir: dir.path().to_string_lossy().to_string(),
            env: Default::default(),
            timeout_ms: Some(5_000),
        };
        let resp = run_command(req).await;
        assert_eq!(resp.status, ExecStatus::Completed);
        assert_eq!(resp.exit_code, 0);
        assert!(resp.stdout.contains("hi"));
    }

    #[tokio::test]
    async fn test_run_command_missing_workdir() {
        let req = ExecuteRequest {
            command: "echo".to_string(),
            args: vec![],
            workdir: "/definitely/not/a/real/path".to_string(),
            env: Default::default(),
            timeout_ms: None,
        };
        let resp = run_command(req).await;
        assert_eq!(resp.status, ExecStatus::Error);
        assert!(resp.error.is_some());
    }

    #[tokio::test]
    async fn test_run_command_nonzero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let req = ExecuteRequest {
            command: "false".to_string(),
            args: vec![],
            workdir: dir.path().to_string_lossy().to_string(),
            env: Default::default(),
            timeout_ms: Some(5_000),
        };
        let resp = run_command(req).await;
        assert_eq!(resp.status, ExecStatus::Completed);
        assert_eq!(resp.exit_code, 1);
    }

    #[tokio::test]
    async fn test_run_command_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let req = ExecuteRequest {
            command: "sleep".to_string(),
            args: vec!["5".to_string()],
            workdir: dir.path().to_string_lossy().to_string(),
            env: Default::default(),
            timeout_ms: Some(50),
        };
        let resp = run_command(req).await;
        assert_eq!(resp.status, ExecStatus::Timeout);
        assert_eq!(resp.exit_code, -1);
    }
}
