//! Types for a parsed audit line, used by the reader/CLI.

use chrono::{DateTime, Utc};

/// A component tag: the proxy or the host-exec service wrote the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Proxy,
    Hostexec,
}

/// Event type, matching the wire format's `<TYPE>` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Request,
    AutoApprove,
    Approve,
    Deny,
    Complete,
    Timeout,
}

/// One parsed line from an audit sink, with the fixed fields broken out
/// and the remainder kept as free-form key=value pairs.
#[derive(Debug, Clone)]
pub struct AuditLine {
    pub timestamp: DateTime<Utc>,
    pub component: Component,
    pub event: EventType,
    pub fields: Vec<(String, String)>,
}

impl AuditLine {
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}

/// Summary statistics over a slice of parsed audit lines.
#[derive(Debug, Clone, Default)]
pub struct AuditSummary {
    pub total: usize,
    pub auto_approved: usize,
    pub approved: usize,
    pub denied: usize,
    pub timed_out: usize,
    pub completed: usize,
}

impl AuditSummary {
    pub fn one_line(&self) -> String {
        format!(
            "{} events | {} auto-approved | {} approved | {} denied | {} timed out | {} completed",
            self.total, self.auto_approved, self.approved, self.denied, self.timed_out, self.completed
        )
    }
}
