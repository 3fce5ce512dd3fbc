//! Types for the approval flow: the two pending-request shapes the queue
//! holds, and the scope/wildcard a resolution carries.

use crate::decision::Scope;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    Domain,
    Command,
}

/// A pending request, published to UI subscribers and resolved by exactly
/// one operator POST.
#[derive(Debug, Clone, Serialize)]
pub struct PendingRequest {
    pub id: String,
    pub kind: Kind,
    pub project: String,
    pub container: String,
    /// The host (domain requests) or shell-quoted command line (command requests).
    pub target: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Body of `POST /approve-domain/{id}` and `/deny-domain/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct DomainResolution {
    pub scope: Scope,
    #[serde(default)]
    pub wildcard: bool,
}

/// Body of `POST /approve-command/{id}` and `/deny-command/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandResolution {
    #[serde(default)]
    pub user: Option<String>,
}

/// What gets delivered to the waiter on the one-shot response channel.
#[derive(Debug, Clone)]
pub enum Resolution {
    Approved {
        scope: Scope,
        wildcard: bool,
        user: Option<String>,
    },
    Denied {
        reason: Option<String>,
        /// `Some` when the operator chose to persist the denial at a scope
        /// (mirrors `Approved`'s fields); `None` for a once-only denial.
        scope: Option<Scope>,
        wildcard: bool,
    },
    TimedOut,
}
