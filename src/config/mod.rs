//! Configuration loading — YAML file with compiled-in defaults, overridable
//! by environment variables and finally by CLI flags at the call site.
//!
//! Mirrors the decisions-file loading discipline (`serde`/`serde_yaml`,
//! tolerant of a missing or empty file) rather than introducing a separate
//! config-parsing crate.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

fn default_proxy_listen() -> SocketAddr {
    "127.0.0.1:8443".parse().unwrap()
}
fn default_allowed_port() -> u16 {
    443
}
fn default_proxy_timeout() -> u64 {
    300
}
fn default_hostexec_listen() -> SocketAddr {
    "127.0.0.1:8444".parse().unwrap()
}
fn default_hostexec_timeout() -> u64 {
    600
}
fn default_approval_listen() -> SocketAddr {
    "127.0.0.1:8445".parse().unwrap()
}
fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySection {
    pub listen_addr: SocketAddr,
    pub allowed_port: u16,
    pub allow: Vec<String>,
    pub approval_timeout_secs: u64,
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            listen_addr: default_proxy_listen(),
            allowed_port: default_allowed_port(),
            allow: Vec::new(),
            approval_timeout_secs: default_proxy_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostexecSection {
    pub listen_addr: SocketAddr,
    pub approval_timeout_secs: u64,
    /// Per-project auto-approve command globs.
    pub auto_approve: std::collections::HashMap<String, Vec<String>>,
}

impl Default for HostexecSection {
    fn default() -> Self {
        Self {
            listen_addr: default_hostexec_listen(),
            approval_timeout_secs: default_hostexec_timeout(),
            auto_approve: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalServerSection {
    pub listen_addr: SocketAddr,
}

impl Default for ApprovalServerSection {
    fn default() -> Self {
        Self { listen_addr: default_approval_listen() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSection {
    pub socket_path: PathBuf,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self { socket_path: default_data_dir().join("executor.sock") }
    }
}

fn default_config_dir() -> PathBuf {
    dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join("cloister")
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")).join("cloister")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardianConfig {
    pub proxy: ProxySection,
    pub hostexec: HostexecSection,
    pub approval_server: ApprovalServerSection,
    pub executor: ExecutorSection,
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub log_level: String,
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            proxy: ProxySection::default(),
            hostexec: HostexecSection::default(),
            approval_server: ApprovalServerSection::default(),
            executor: ExecutorSection::default(),
            config_dir: default_config_dir(),
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

impl GuardianConfig {
    /// Default config file location, `<home>/.config/cloister/config.yaml`
    /// (or the platform equivalent via `dirs`).
    pub fn default_path() -> PathBuf {
        default_config_dir().join("config.yaml")
    }

    /// Load from `path` if present, else fall back to the compiled default.
    /// An empty file is valid and yields all defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Resolve the config path from an explicit override, `CLOISTER_CONFIG`,
    /// or the compiled default, in that precedence order.
    pub fn resolve_path(cli_override: Option<PathBuf>) -> PathBuf {
        cli_override
            .or_else(|| std::env::var("CLOISTER_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(Self::default_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_yields_default() {
        let cfg = GuardianConfig::load(Path::new("/nonexistent/config.yaml")).unwrap();
        assert_eq!(cfg.proxy.allowed_port, 443);
    }

    #[test]
    fn test_empty_file_yields_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "").unwrap();
        let cfg = GuardianConfig::load(&path).unwrap();
        assert_eq!(cfg.proxy.listen_addr.port(), 8443);
    }

    #[test]
    fn test_partial_file_overrides_only_given_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "log_level: debug\nproxy:\n  allowed_port: 8443\n").unwrap();
        let cfg = GuardianConfig::load(&path).unwrap();
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.proxy.allowed_port, 8443);
        assert_eq!(cfg.hostexec.approval_timeout_secs, 600);
    }

    #[test]
    fn test_resolve_path_prefers_cli_override() {
        let resolved = GuardianConfig::resolve_path(Some(PathBuf::from("/tmp/x.yaml")));
        assert_eq!(resolved, PathBuf::from("/tmp/x.yaml"));
    }
}
