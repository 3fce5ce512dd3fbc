//! Host-Exec wire types: the container-facing HTTP body and the
//! daemon-facing Unix-socket RPC envelope.
//!
//! The two are deliberately distinct structs even though they overlap —
//! the HTTP body is untrusted input from inside a container, the RPC
//! envelope carries the daemon's shared secret and is only ever
//! constructed host-side.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Body of `POST /exec`, as sent by a container.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecRequest {
    pub argv: Vec<String>,
    pub cwd: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub timeout_ms: Option<u64>,
}

/// Response returned to the container for `POST /exec`.
#[derive(Debug, Clone, Serialize)]
pub struct ExecResponse {
    pub status: ExecStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecStatus {
    Completed,
    Timeout,
    Error,
    Denied,
}

impl ExecResponse {
    pub fn denied(error: impl Into<String>) -> Self {
        Self { status: ExecStatus::Denied, exit_code: None, stdout: None, stderr: None, error: Some(error.into()) }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self { status: ExecStatus::Error, exit_code: None, stdout: None, stderr: None, error: Some(error.into()) }
    }
}

/// The command the daemon actually executes, as forwarded by the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub command: String,
    pub args: Vec<String>,
    pub workdir: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub status: ExecStatus,
    pub exit_code: i32,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One line sent over the daemon's Unix socket: the shared secret plus
/// the command to run. The daemon never trusts anything else about the
/// caller's identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonRequest {
    pub secret: String,
    pub request: ExecuteRequest,
}

/// One line returned by the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<ExecuteResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonResponse {
    pub fn unauthorized() -> Self {
        Self { success: false, response: None, error: Some("unauthorized".to_string()) }
    }

    pub fn ok(response: ExecuteResponse) -> Self {
        Self { success: true, response: Some(response), error: None }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self { success: false, response: None, error: Some(error.into()) }
    }
}

/// Persisted daemon state, used by CLIs to address a running instance
/// without a service registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonState {
    pub pid: u32,
    pub secret: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_api_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_port: Option<u16>,
    pub socket_path: String,
}
