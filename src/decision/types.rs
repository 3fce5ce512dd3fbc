//! Core types for the Decision Store and Decision Cache.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scope a decision is persisted at, increasing in persistence and breadth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Unblocks the single in-flight approval only; never persisted.
    Once,
    /// Lives in the in-memory session list for the calling token.
    Session,
    /// Persisted to `projects/<project>.yaml`.
    Project,
    /// Persisted to `global.yaml`.
    Global,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Once => write!(f, "once"),
            Scope::Session => write!(f, "session"),
            Scope::Project => write!(f, "project"),
            Scope::Global => write!(f, "global"),
        }
    }
}

/// Whether a host matched an exact domain or a `*.suffix` pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Exact,
    Pattern,
}

/// Kind of rule: permits or blocks the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Allow,
    Deny,
}

/// The verdict the Decision Cache returns for a `(project, host)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny,
    /// No rule matched at any tier — caller must enqueue an approval.
    Unknown,
}

/// A resolved decision as it arrives from the Approval Server, ready to be
/// applied to the cache (and persisted, unless scope is `once`/`session`).
#[derive(Debug, Clone)]
pub struct Decision {
    pub kind: Kind,
    pub host: String,
    pub scope: Scope,
    /// When true, the host is converted to its `*.suffix` pattern before
    /// being applied/persisted (see `wildcard_suffix_of`).
    pub wildcard: bool,
}
