//! Credential-injection interface consumed by the container runtime driver.
//!
//! This crate defines the interface only. The driver process that copies
//! the produced bundle into a container, and host keychain access on
//! macOS, remain external collaborators.

use crate::error::GuardianError;
use anyhow::Result;
use std::collections::HashMap;
use std::path::PathBuf;

/// Environment variables and file contents the container driver carries
/// into a fresh container. Keys in `files` are absolute paths inside the
/// container's filesystem.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InjectionConfig {
    pub env: HashMap<String, String>,
    pub files: HashMap<PathBuf, String>,
}

impl InjectionConfig {
    fn with_env(key: &str, value: impl Into<String>) -> Self {
        let mut env = HashMap::new();
        env.insert(key.to_string(), value.into());
        Self { env, files: HashMap::new() }
    }
}

/// A source of credentials for a new container. `HostCredentials` is the
/// production path; test code substitutes `FixedCredentials` instead of
/// touching the filesystem or a real host keychain.
pub trait CredentialSource {
    fn resolve(&self) -> Result<InjectionConfig>;
}

/// The three variants named in the external interface.
pub enum CredentialStrategy {
    Token(String),
    ApiKey(String),
    Existing,
}

/// Production `CredentialSource`. `Existing` reads the Linux credentials
/// file; macOS keychain access is out of scope and surfaces as
/// `CredentialsNotFound` so the caller gets an actionable message instead
/// of a silent failure.
pub struct HostCredentials {
    pub strategy: CredentialStrategy,
    pub credentials_path: Option<PathBuf>,
}

impl HostCredentials {
    pub fn new(strategy: CredentialStrategy) -> Self {
        Self { strategy, credentials_path: None }
    }

    fn default_credentials_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".claude").join(".credentials.json"))
    }
}

impl CredentialSource for HostCredentials {
    fn resolve(&self) -> Result<InjectionConfig> {
        match &self.strategy {
            CredentialStrategy::Token(token) => {
                Ok(InjectionConfig::with_env("CLAUDE_CODE_OAUTH_TOKEN", token.clone()))
            }
            CredentialStrategy::ApiKey(key) => {
                Ok(InjectionConfig::with_env("ANTHROPIC_API_KEY", key.clone()))
            }
            CredentialStrategy::Existing => {
                let path = self
                    .credentials_path
                    .clone()
                    .or_else(Self::default_credentials_path)
                    .ok_or(GuardianError::CredentialsNotFound)?;
                let blob = std::fs::read_to_string(&path)
                    .map_err(|_| GuardianError::CredentialsNotFound)?;
                let mut files = HashMap::new();
                files.insert(PathBuf::from("/home/cloister/.claude/.credentials.json"), blob);
                Ok(InjectionConfig { env: HashMap::new(), files })
            }
        }
    }
}

/// Test fake: returns a fixed `InjectionConfig` regardless of strategy.
pub struct FixedCredentials(pub InjectionConfig);

impl CredentialSource for FixedCredentials {
    fn resolve(&self) -> Result<InjectionConfig> {
        Ok(self.0.clone())
    }
}
