//! Audit Logger — append-only line-oriented sink.
//!
//! One line per event, serialized by an internal mutex so lines never
//! interleave, flushed immediately for crash safety. This is a product
//! contract with a fixed wire format — distinct from the `tracing`
//! diagnostics emitted elsewhere in the crate, which carry no such
//! guarantee and are never parsed by a test.

use crate::decision::Scope;
use anyhow::{Context, Result};
use chrono::Utc;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

enum Sink {
    File(Mutex<File>),
    Null,
}

pub struct AuditLogger {
    sink: Sink,
}

impl AuditLogger {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create audit dir: {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open audit sink: {}", path.display()))?;
        Ok(Self { sink: Sink::File(Mutex::new(file)) })
    }

    /// A logger with a nil sink is a no-op, matching the design's
    /// "nil sink -> no-op" clause (used in tests that don't care about audit).
    pub fn null() -> Self {
        Self { sink: Sink::Null }
    }

    fn write_line(&self, line: &str) {
        if let Sink::File(file) = &self.sink {
            let mut file = file.lock().unwrap();
            let _ = writeln!(file, "{line}");
            let _ = file.flush();
        }
    }

    // -- PROXY events --

    pub fn proxy_auto_approve(&self, project: &str, domain: &str) {
        self.write_line(&format!(
            "{} PROXY AUTO_APPROVE project={project} domain={domain}",
            rfc3339_now()
        ));
    }

    pub fn proxy_approve(&self, project: &str, domain: &str, scope: Scope) {
        self.write_line(&format!(
            "{} PROXY APPROVE project={project} domain={domain} scope={scope}",
            rfc3339_now()
        ));
    }

    pub fn proxy_deny(&self, project: &str, domain: &str, reason: &str, pattern: Option<&str>) {
        let pattern_field = pattern.map(|p| format!(" pattern=\"{p}\"")).unwrap_or_default();
        self.write_line(&format!(
            "{} PROXY DENY project={project} domain={domain} reason={reason}{pattern_field}",
            rfc3339_now()
        ));
    }

    pub fn proxy_timeout(&self, project: &str, domain: &str) {
        self.write_line(&format!(
            "{} PROXY TIMEOUT project={project} domain={domain}",
            rfc3339_now()
        ));
    }

    pub fn proxy_complete(&self, project: &str, domain: &str, duration: Duration) {
        self.write_line(&format!(
            "{} PROXY COMPLETE project={project} domain={domain} duration={}",
            rfc3339_now(),
            format_duration(duration)
        ));
    }

    // -- HOSTEXEC events --

    #[allow(clippy::too_many_arguments)]
    pub fn hostexec_request(&self, project: &str, branch: &str, cloister: &str, cmd: &str) {
        self.write_line(&format!(
            "{} HOSTEXEC REQUEST project={project} branch={branch} cloister={cloister} cmd=\"{cmd}\"",
            rfc3339_now()
        ));
    }

    pub fn hostexec_auto_approve(
        &self,
        project: &str,
        branch: &str,
        cloister: &str,
        cmd: &str,
        pattern: &str,
    ) {
        self.write_line(&format!(
            "{} HOSTEXEC AUTO_APPROVE project={project} branch={branch} cloister={cloister} cmd=\"{cmd}\" pattern=\"{pattern}\"",
            rfc3339_now()
        ));
    }

    pub fn hostexec_approve(&self, project: &str, branch: &str, cloister: &str, cmd: &str, user: &str) {
        self.write_line(&format!(
            "{} HOSTEXEC APPROVE project={project} branch={branch} cloister={cloister} cmd=\"{cmd}\" user=\"{user}\"",
            rfc3339_now()
        ));
    }

    pub fn hostexec_deny(&self, project: &str, branch: &str, cloister: &str, cmd: &str, reason: &str) {
        self.write_line(&format!(
            "{} HOSTEXEC DENY project={project} branch={branch} cloister={cloister} cmd=\"{cmd}\" reason=\"{reason}\"",
            rfc3339_now()
        ));
    }

    pub fn hostexec_timeout(&self, project: &str, branch: &str, cloister: &str, cmd: &str) {
        self.write_line(&format!(
            "{} HOSTEXEC TIMEOUT project={project} branch={branch} cloister={cloister} cmd=\"{cmd}\"",
            rfc3339_now()
        ));
    }

    pub fn hostexec_complete(
        &self,
        project: &str,
        branch: &str,
        cloister: &str,
        cmd: &str,
        exit: i32,
        duration: Duration,
    ) {
        self.write_line(&format!(
            "{} HOSTEXEC COMPLETE project={project} branch={branch} cloister={cloister} cmd=\"{cmd}\" exit={exit} duration={}",
            rfc3339_now(),
            format_duration(duration)
        ));
    }
}

fn rfc3339_now() -> String {
    Utc::now().to_rfc3339()
}

/// `<1s -> "N.Nms"`, `<1m -> "N.Ns"`, otherwise rounded to whole seconds.
fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 1.0 {
        format!("{:.1}ms", d.as_secs_f64() * 1000.0)
    } else if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{}s", secs.round() as u64)
    }
}

/// Default audit sink path under `data_dir/audit/`.
pub fn default_audit_path(data_dir: &Path) -> PathBuf {
    data_dir.join("audit").join("guardian.log")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_and_read_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let logger = AuditLogger::open(&path).unwrap();

        logger.proxy_auto_approve("acme", "api.anthropic.com");
        logger.proxy_deny("acme", "evil.com", "rule", Some("*.evil.com"));

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("PROXY AUTO_APPROVE project=acme domain=api.anthropic.com"));
        assert!(lines[1].contains("PROXY DENY project=acme domain=evil.com reason=rule pattern=\"*.evil.com\""));
    }

    #[test]
    fn test_append_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let logger = AuditLogger::open(&path).unwrap();
        for i in 0..3 {
            logger.proxy_auto_approve("acme", &format!("host{i}.com"));
        }
        drop(logger);
        let logger2 = AuditLogger::open(&path).unwrap();
        logger2.proxy_auto_approve("acme", "host3.com");

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 4);
    }

    #[test]
    fn test_null_sink_is_noop() {
        let logger = AuditLogger::null();
        logger.proxy_auto_approve("acme", "example.com");
        // no panic, nothing to assert beyond not crashing
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(5)), "5.0ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_secs(90)), "90s");
    }
}
