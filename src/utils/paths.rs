//! Pattern matching utilities shared by the Decision Cache and the
//! host-exec auto-approve matcher.
//!
//! Two distinct pattern languages are compiled here: `*.suffix` host
//! patterns (decision cache evaluation) and shell-style command globs
//! (host-exec auto-approve). They are kept as separate matchers since
//! their syntax differs, but both compile once at load time rather than
//! per-request.

use globset::{Glob, GlobMatcher};

/// A pre-compiled set of glob patterns for fast matching against full
/// command strings (host-exec auto-approve patterns).
#[derive(Debug, Clone)]
pub struct CompiledMatcher {
    patterns: Vec<(String, GlobMatcher)>,
}

impl CompiledMatcher {
    pub fn new(patterns: &[String]) -> Result<Self, globset::Error> {
        let compiled = patterns
            .iter()
            .map(|p| {
                let glob = Glob::new(p)?;
                Ok((p.clone(), glob.compile_matcher()))
            })
            .collect::<Result<Vec<_>, globset::Error>>()?;
        Ok(Self { patterns: compiled })
    }

    pub fn matches(&self, text: &str) -> bool {
        self.patterns
            .iter()
            .any(|(_, matcher)| matcher.is_match(text))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Match a host against a `*.suffix` pattern: matches when the host equals
/// the suffix or ends with `.suffix`, case-insensitively. The leading `*`
/// is mandatory and is the only wildcard form accepted — callers strip it
/// before calling, passing the bare suffix.
pub fn host_matches_suffix(host: &str, suffix: &str) -> bool {
    let host = host.to_ascii_lowercase();
    let suffix = suffix.to_ascii_lowercase();
    host == suffix || host.ends_with(&format!(".{suffix}"))
}

/// Turn `a.b.c` into the wildcard suffix `b.c` (the pattern `*.b.c` with the
/// leading `*.` stripped): a wildcard decision on `a.b.c` persists as `*.b.c`.
pub fn wildcard_suffix_of(host: &str) -> Option<String> {
    let mut parts = host.splitn(2, '.');
    let _first = parts.next()?;
    parts.next().map(|rest| rest.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compiled_matcher_commands() {
        let matcher = CompiledMatcher::new(&["git status*".to_string()]).unwrap();
        assert!(matcher.matches("git status"));
        assert!(matcher.matches("git status --short"));
        assert!(!matcher.matches("git push"));
    }

    #[test]
    fn test_host_matches_suffix() {
        assert!(host_matches_suffix("api.example.com", "example.com"));
        assert!(host_matches_suffix("example.com", "example.com"));
        assert!(host_matches_suffix("API.Example.COM", "example.com"));
        assert!(!host_matches_suffix("notexample.com", "example.com"));
        assert!(!host_matches_suffix("example.com.evil.com", "example.com"));
    }

    #[test]
    fn test_wildcard_suffix_of() {
        assert_eq!(
            wildcard_suffix_of("x.api.example.com"),
            Some("api.example.com".to_string())
        );
        assert_eq!(wildcard_suffix_of("example.com"), Some("com".to_string()));
        assert_eq!(wildcard_suffix_of("com"), None);
    }
}
