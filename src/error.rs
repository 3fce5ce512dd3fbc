//! Typed error kinds for Guardian call sites that must branch on failure kind.
//!
//! Most plumbing in this crate propagates through `anyhow::Result` with
//! `.context(...)` at each boundary. `GuardianError` exists only for the
//! handful of kinds whose handling differs by kind (HTTP status, retry-once,
//! audit tag) per the error handling design.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GuardianError {
    #[error("credentials not found — re-run login")]
    CredentialsNotFound,

    #[error("bad token: {token_prefix}...")]
    BadToken { token_prefix: String },

    #[error("policy denies request: {reason}")]
    PolicyDeny { reason: String },

    #[error("approval timed out")]
    ApprovalTimeout,

    #[error("host executor unavailable")]
    DaemonUnavailable,

    #[error("decision file write conflict: {path}")]
    DecisionWriteConflict { path: PathBuf },

    #[error("queue closed, Guardian is shutting down")]
    QueueClosed,
}

impl GuardianError {
    /// Short machine-readable tag, used in audit `reason=` fields.
    pub fn reason_tag(&self) -> &'static str {
        match self {
            GuardianError::CredentialsNotFound => "credentials_not_found",
            GuardianError::BadToken { .. } => "bad_token",
            GuardianError::PolicyDeny { .. } => "rule",
            GuardianError::ApprovalTimeout => "timeout",
            GuardianError::DaemonUnavailable => "executor_offline",
            GuardianError::DecisionWriteConflict { .. } => "write_conflict",
            GuardianError::QueueClosed => "queue_closed",
        }
    }
}
