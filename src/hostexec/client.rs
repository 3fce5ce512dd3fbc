//! Host-Exec Service's client to the Host Executor Daemon.
//!
//! One connection per request, mirroring the gateway client's "open,
//! send a line, read a line, close" style — the daemon is low-volume
//! and long-lived connections buy nothing here.

use crate::hostexec::protocol::{DaemonRequest, DaemonResponse, ExecuteRequest};
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

pub struct DaemonClient {
    socket_path: PathBuf,
    secret: String,
}

impl DaemonClient {
    pub fn new(socket_path: impl AsRef<Path>, secret: String) -> Self {
        Self { socket_path: socket_path.as_ref().to_path_buf(), secret }
    }

    pub async fn execute(&self, request: ExecuteRequest) -> Result<DaemonResponse> {
        let mut stream = UnixStream::connect(&self.socket_path)
            .await
            .with_context(|| format!("failed to connect to executor at {}", self.socket_path.display()))?;

        let payload = DaemonRequest { secret: self.secret.clone(), request };
        let line = serde_json::to_string(&payload)?;
        stream.write_all(line.as_bytes()).await?;
        stream.write_all(b"\n").await?;

        let (read_half, _write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut response_line = String::new();
        if reader.read_line(&mut response_line).await? == 0 {
            bail!("executor closed connection without responding");
        }

        let response: DaemonResponse = serde_json::from_str(response_line.trim())
            .context("failed to parse executor response")?;
        Ok(response)
    }
}
