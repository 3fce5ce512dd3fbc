//! Audit log reader — parse, filter, and display Guardian audit lines.
//!
//! Reads the fixed-format text lines written by `AuditLogger` and provides
//! filtering, summarization, and pretty-printing for `cloister-ctl log`.

use crate::audit::types::{AuditLine, AuditSummary, Component, EventType};
use anyhow::{Context, Result};
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};

pub struct AuditReader {
    path: PathBuf,
}

impl AuditReader {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    pub fn read_all(&self) -> Result<Vec<AuditLine>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read audit log: {}", self.path.display()))?;

        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(parse_line)
            .collect())
    }

    pub fn filter_component(lines: &[AuditLine], component: Component) -> Vec<AuditLine> {
        lines.iter().filter(|l| l.component == component).cloned().collect()
    }

    pub fn filter_project<'a>(lines: &'a [AuditLine], project: &str) -> Vec<&'a AuditLine> {
        lines.iter().filter(|l| l.field("project") == Some(project)).collect()
    }

    pub fn summarize(lines: &[AuditLine]) -> AuditSummary {
        let mut summary = AuditSummary { total: lines.len(), ..Default::default() };
        for line in lines {
            match line.event {
                EventType::AutoApprove => summary.auto_approved += 1,
                EventType::Approve => summary.approved += 1,
                EventType::Deny => summary.denied += 1,
                EventType::Timeout => summary.timed_out += 1,
                EventType::Complete => summary.completed += 1,
                EventType::Request => {}
            }
        }
        summary
    }

    /// Pretty-print a line for terminal display.
    pub fn format_line(line: &AuditLine) -> String {
        let timestamp = line.timestamp.format("%H:%M:%S").to_string();
        let event_str = match line.event {
            EventType::Request => "REQUEST".normal().to_string(),
            EventType::AutoApprove => "AUTO_APPROVE".green().to_string(),
            EventType::Approve => "APPROVE".green().to_string(),
            EventType::Deny => "DENY".red().to_string(),
            EventType::Complete => "COMPLETE".blue().to_string(),
            EventType::Timeout => "TIMEOUT".yellow().to_string(),
        };
        let component_str = match line.component {
            Component::Proxy => "PROXY",
            Component::Hostexec => "HOSTEXEC",
        };
        let target = line.field("domain").or_else(|| line.field("cmd")).unwrap_or("-");

        format!("[{}] {} {} {}", timestamp.dimmed(), component_str.bold(), event_str, target)
    }
}

fn parse_line(line: &str) -> Option<AuditLine> {
    let mut parts = line.splitn(4, ' ');
    let timestamp = chrono::DateTime::parse_from_rfc3339(parts.next()?)
        .ok()?
        .with_timezone(&chrono::Utc);
    let component = match parts.next()? {
        "PROXY" => Component::Proxy,
        "HOSTEXEC" => Component::Hostexec,
        _ => return None,
    };
    let event = match parts.next()? {
        "REQUEST" => EventType::Request,
        "AUTO_APPROVE" => EventType::AutoApprove,
        "APPROVE" => EventType::Approve,
        "DENY" => EventType::Deny,
        "COMPLETE" => EventType::Complete,
        "TIMEOUT" => EventType::Timeout,
        _ => return None,
    };
    let fields = parse_fields(parts.next().unwrap_or(""));

    Some(AuditLine { timestamp, component, event, fields })
}

/// Parse `key=value` and `key="quoted value"` pairs separated by spaces.
fn parse_fields(rest: &str) -> Vec<(String, String)> {
    let mut fields = Vec::new();
    let mut pos = 0;

    while pos < rest.len() {
        let remaining = &rest[pos..];
        let Some(eq) = remaining.find('=') else { break };
        let key = remaining[..eq].trim().to_string();
        let value_start = eq + 1;

        if remaining[value_start..].starts_with('"') {
            let body = &remaining[value_start + 1..];
            let Some(close) = body.find('"') else { break };
            fields.push((key, body[..close].to_string()));
            pos += value_start + 1 + close + 1;
        } else {
            let body = &remaining[value_start..];
            let end = body.find(' ').unwrap_or(body.len());
            fields.push((key, body[..end].to_string()));
            pos += value_start + end;
        }

        while rest[pos..].starts_with(' ') {
            pos += 1;
        }
    }

    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_proxy_auto_approve() {
        let line = "2026-08-01T00:00:00+00:00 PROXY AUTO_APPROVE project=acme domain=api.anthropic.com";
        let parsed = parse_line(line).unwrap();
        assert_eq!(parsed.component, Component::Proxy);
        assert_eq!(parsed.event, EventType::AutoApprove);
        assert_eq!(parsed.field("project"), Some("acme"));
        assert_eq!(parsed.field("domain"), Some("api.anthropic.com"));
    }

    #[test]
    fn test_parse_quoted_fields() {
        let line = "2026-08-01T00:00:00+00:00 HOSTEXEC DENY project=acme branch=main cloister=c1 cmd=\"git push --force\" reason=\"dangerous\"";
        let parsed = parse_line(line).unwrap();
        assert_eq!(parsed.field("cmd"), Some("git push --force"));
        assert_eq!(parsed.field("reason"), Some("dangerous"));
    }

    #[test]
    fn test_read_all_and_summarize() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        fs::write(
            &path,
            "2026-08-01T00:00:00+00:00 PROXY AUTO_APPROVE project=acme domain=a.com\n\
             2026-08-01T00:00:01+00:00 PROXY DENY project=acme domain=b.com reason=rule\n",
        )
        .unwrap();

        let reader = AuditReader::new(&path);
        let lines = reader.read_all().unwrap();
        assert_eq!(lines.len(), 2);

        let summary = AuditReader::summarize(&lines);
        assert_eq!(summary.auto_approved, 1);
        assert_eq!(summary.denied, 1);
    }

    #[test]
    fn test_missing_file_returns_empty() {
        let reader = AuditReader::new("/nonexistent/path/audit.log");
        assert_eq!(reader.read_all().unwrap().len(), 0);
    }
}
