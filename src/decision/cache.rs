//! Decision Cache — the evaluator.
//!
//! Layers the persisted Decision Store with in-memory session allow/deny
//! lists and a compile-time static allowlist, and answers `evaluate`
//! queries with exactly one of `{Allow, Deny, Unknown}`.
//!
//! Evaluation order (deny always wins, at the same tier and across tiers,
//! because denials are checked first):
//!   1. static deny exact    4. static allow exact
//!   2. static deny pattern  5. static allow pattern
//!   3. session deny         6. session allow
//!                           7. otherwise -> Unknown

use crate::decision::store::{DecisionStore, DecisionsFile};
use crate::decision::types::{Decision, Kind, Scope, Verdict};
use crate::utils::paths::{host_matches_suffix, wildcard_suffix_of};
use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// Per-token session allow/deny sets, cleared on token revocation.
#[derive(Default)]
struct SessionLists {
    allow: HashMap<String, HashSet<String>>,
    deny: HashMap<String, HashSet<String>>,
}

pub struct DecisionCache {
    store: DecisionStore,
    static_allow: Vec<String>,
    sessions: RwLock<SessionLists>,
}

impl DecisionCache {
    pub fn new(store: DecisionStore, static_allow: Vec<String>) -> Self {
        Self {
            store,
            static_allow,
            sessions: RwLock::new(SessionLists::default()),
        }
    }

    /// Evaluate `(project, host)` against all tiers. Re-reads the backing
    /// decisions files on every miss evaluation, satisfying the hot-reload
    /// requirement without a separate file-watch subsystem.
    pub fn evaluate(&self, project: &str, host: &str, token: &str) -> Result<Verdict> {
        let global = self.store.load_global()?;
        let proj = self.store.load_project(project)?;

        // 1. static denial (exact)
        if global.denied_domains.iter().any(|d| host_eq(d, host))
            || proj.denied_domains.iter().any(|d| host_eq(d, host))
        {
            return Ok(Verdict::Deny);
        }

        // 2. static denial (pattern)
        if matches_any_pattern(&global.denied_patterns, host)
            || matches_any_pattern(&proj.denied_patterns, host)
        {
            return Ok(Verdict::Deny);
        }

        // 3. session denial
        if self.session_contains(&self.sessions.read().unwrap().deny, token, host) {
            return Ok(Verdict::Deny);
        }

        // 4. static allow (exact)
        if self.static_allow.iter().any(|d| host_eq(d, host))
            || global.domains.iter().any(|d| host_eq(d, host))
            || proj.domains.iter().any(|d| host_eq(d, host))
        {
            return Ok(Verdict::Allow);
        }

        // 5. static allow (pattern)
        if matches_any_pattern(&global.patterns, host) || matches_any_pattern(&proj.patterns, host) {
            return Ok(Verdict::Allow);
        }

        // 6. session allow
        if self.session_contains(&self.sessions.read().unwrap().allow, token, host) {
            return Ok(Verdict::Allow);
        }

        // 7. otherwise
        Ok(Verdict::Unknown)
    }

    fn session_contains(&self, map: &HashMap<String, HashSet<String>>, token: &str, host: &str) -> bool {
        map.get(token).map(|set| set.contains(host)).unwrap_or(false)
    }

    /// Apply a resolved decision: insert into the session list, or
    /// load-mutate-writeback the project/global decisions file under one
    /// lock acquisition. `once` never touches any cache state — it only
    /// unblocks the in-flight approval, which the caller handles directly.
    ///
    /// If persistence keeps failing after the store's own retry, the
    /// decision is still applied as an in-memory session entry so the
    /// caller can unblock the in-flight request; the write failure is
    /// still returned to the caller to surface to the operator.
    pub fn apply(&self, project: &str, token: &str, decision: Decision) -> Result<()> {
        let value = if decision.wildcard {
            wildcard_suffix_of(&decision.host).unwrap_or_else(|| decision.host.clone())
        } else {
            decision.host.clone()
        };
        let is_pattern = decision.wildcard;
        let kind = decision.kind;

        match decision.scope {
            Scope::Once => Ok(()),
            Scope::Session => {
                self.insert_session(token, kind, &decision.host);
                Ok(())
            }
            Scope::Project => {
                let result = self
                    .store
                    .update_project(project, |file| insert_decision(file, kind, is_pattern, value));
                self.fallback_on_failure(&result, token, kind, &decision.host);
                result.map(|_| ())
            }
            Scope::Global => {
                let result = self
                    .store
                    .update_global(|file| insert_decision(file, kind, is_pattern, value));
                self.fallback_on_failure(&result, token, kind, &decision.host);
                result.map(|_| ())
            }
        }
    }

    fn insert_session(&self, token: &str, kind: Kind, host: &str) {
        let mut sessions = self.sessions.write().unwrap();
        let map = match kind {
            Kind::Allow => &mut sessions.allow,
            Kind::Deny => &mut sessions.deny,
        };
        map.entry(token.to_string()).or_default().insert(host.to_string());
    }

    /// On a persistent write failure, fall back to a session-scoped entry
    /// so the caller can still unblock the in-flight request.
    fn fallback_on_failure<T>(&self, result: &Result<T>, token: &str, kind: Kind, host: &str) {
        if result.is_err() {
            self.insert_session(token, kind, host);
        }
    }

    /// Clear a token's session allow/deny entries, called on `Revoke`.
    pub fn clear_session(&self, token: &str) {
        let mut sessions = self.sessions.write().unwrap();
        sessions.allow.remove(token);
        sessions.deny.remove(token);
    }
}

fn insert_decision(file: &mut DecisionsFile, kind: Kind, is_pattern: bool, value: String) {
    let pattern = if is_pattern { format!("*.{value}") } else { value };
    let list = match (kind, is_pattern) {
        (Kind::Allow, false) => &mut file.domains,
        (Kind::Allow, true) => &mut file.patterns,
        (Kind::Deny, false) => &mut file.denied_domains,
        (Kind::Deny, true) => &mut file.denied_patterns,
    };
    if !list.contains(&pattern) {
        list.push(pattern);
    }
}

fn host_eq(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

fn matches_any_pattern(patterns: &[String], host: &str) -> bool {
    patterns.iter().any(|p| {
        p.strip_prefix("*.")
            .map(|suffix| host_matches_suffix(host, suffix))
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn cache(dir: &std::path::Path) -> DecisionCache {
        DecisionCache::new(DecisionStore::new(dir), vec![])
    }

    #[test]
    fn test_deny_beats_allow_across_tiers() {
        let dir = tempdir().unwrap();
        let c = cache(dir.path());
        c.store.write_global(&DecisionsFile {
            domains: vec!["corp.example.com".into()],
            ..Default::default()
        }).unwrap();
        c.store.write_project("acme", &DecisionsFile {
            denied_patterns: vec!["*.example.com".into()],
            ..Default::default()
        }).unwrap();

        assert_eq!(c.evaluate("acme", "corp.example.com", "tok").unwrap(), Verdict::Deny);
    }

    #[test]
    fn test_unknown_when_no_rule() {
        let dir = tempdir().unwrap();
        let c = cache(dir.path());
        assert_eq!(c.evaluate("acme", "example.com", "tok").unwrap(), Verdict::Unknown);
    }

    #[test]
    fn test_session_allow_then_cleared_on_revoke() {
        let dir = tempdir().unwrap();
        let c = cache(dir.path());
        c.apply("acme", "tok", Decision {
            kind: Kind::Allow,
            host: "example.com".into(),
            scope: Scope::Session,
            wildcard: false,
        }).unwrap();
        assert_eq!(c.evaluate("acme", "example.com", "tok").unwrap(), Verdict::Allow);

        c.clear_session("tok");
        assert_eq!(c.evaluate("acme", "example.com", "tok").unwrap(), Verdict::Unknown);
    }

    #[test]
    fn test_wildcard_persistence() {
        let dir = tempdir().unwrap();
        let c = cache(dir.path());
        c.apply("acme", "tok", Decision {
            kind: Kind::Deny,
            host: "x.api.example.com".into(),
            scope: Scope::Global,
            wildcard: true,
        }).unwrap();

        let global = c.store.load_global().unwrap();
        assert_eq!(global.denied_patterns, vec!["*.api.example.com".to_string()]);
        assert_eq!(
            c.evaluate("acme", "y.api.example.com", "tok").unwrap(),
            Verdict::Deny
        );
    }

    #[test]
    fn test_once_does_not_persist() {
        let dir = tempdir().unwrap();
        let c = cache(dir.path());
        c.apply("acme", "tok", Decision {
            kind: Kind::Allow,
            host: "example.com".into(),
            scope: Scope::Once,
            wildcard: false,
        }).unwrap();
        assert_eq!(c.evaluate("acme", "example.com", "tok").unwrap(), Verdict::Unknown);
    }
}
