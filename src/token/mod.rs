//! Token Registry — process-wide map `token -> (containerName, projectName)`.
//!
//! Mirrored to disk after every `register`/`revoke` so a Guardian restart
//! can rehydrate the map; generation uses a cryptographically secure RNG
//! and yields >=128 bits of entropy encoded as URL-safe text.

use anyhow::{Context, Result};
use rand::RngCore;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

#[derive(Debug, Clone)]
pub struct TokenBinding {
    pub container: String,
    pub project: String,
}

pub struct TokenRegistry {
    token_dir: PathBuf,
    // token -> binding
    by_token: RwLock<HashMap<String, TokenBinding>>,
    // container -> token, so Register(container) overwrites the prior token
    by_container: RwLock<HashMap<String, String>>,
}

impl TokenRegistry {
    pub fn new(token_dir: impl Into<PathBuf>) -> Self {
        Self {
            token_dir: token_dir.into(),
            by_token: RwLock::new(HashMap::new()),
            by_container: RwLock::new(HashMap::new()),
        }
    }

    /// Rehydrate the map from the on-disk mirror, skipping unreadable or
    /// empty files. Each file's name is the container name; the binding's
    /// project is unknown after a crash, so it is rehydrated as the
    /// container name itself (the caller `Register`s the real binding
    /// again once the container reports in, overwriting this placeholder).
    pub fn rehydrate(&self) -> Result<usize> {
        if !self.token_dir.exists() {
            return Ok(0);
        }
        let mut count = 0;
        for entry in fs::read_dir(&self.token_dir)
            .with_context(|| format!("failed to read token dir: {}", self.token_dir.display()))?
        {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let container = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };
            let value = match fs::read_to_string(&path) {
                Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
                _ => continue,
            };
            self.insert(value, container.clone(), container);
            count += 1;
        }
        Ok(count)
    }

    /// Generate a new token: 128 bits from a CSPRNG, URL-safe base64 encoded.
    pub fn generate() -> String {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        base64_url_encode(&bytes)
    }

    /// Register `token` for `container`/`project`, overwriting any prior
    /// binding for that container (and mirroring the new binding to disk).
    pub fn register(&self, token: &str, container: &str, project: &str) -> Result<()> {
        self.insert(token.to_string(), container.to_string(), project.to_string());
        self.persist(container, token)
    }

    fn insert(&self, token: String, container: String, project: String) {
        let mut by_container = self.by_container.write().unwrap();
        if let Some(prior) = by_container.insert(container.clone(), token.clone()) {
            if prior != token {
                self.by_token.write().unwrap().remove(&prior);
            }
        }
        self.by_token
            .write()
            .unwrap()
            .insert(token, TokenBinding { container, project });
    }

    pub fn lookup(&self, token: &str) -> Option<TokenBinding> {
        self.by_token.read().unwrap().get(token).cloned()
    }

    pub fn validate(&self, token: &str) -> bool {
        self.by_token.read().unwrap().contains_key(token)
    }

    /// Idempotent: returns true the first time a live token is revoked,
    /// false if it was already gone (or never registered).
    pub fn revoke(&self, token: &str) -> bool {
        let removed = self.by_token.write().unwrap().remove(token);
        match removed {
            Some(binding) => {
                self.by_container.write().unwrap().remove(&binding.container);
                let _ = fs::remove_file(self.token_path(&binding.container));
                true
            }
            None => false,
        }
    }

    pub fn count(&self) -> usize {
        self.by_token.read().unwrap().len()
    }

    fn token_path(&self, container: &str) -> PathBuf {
        self.token_dir.join(container)
    }

    fn persist(&self, container: &str, token: &str) -> Result<()> {
        fs::create_dir_all(&self.token_dir)
            .with_context(|| format!("failed to create token dir: {}", self.token_dir.display()))?;
        let path = self.token_path(container);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, token)
            .with_context(|| format!("failed to write token file: {}", tmp.display()))?;
        set_owner_only(&tmp)?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("failed to rename token file into place: {}", path.display()))?;
        Ok(())
    }
}

#[cfg(unix)]
fn set_owner_only(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = fs::Permissions::from_mode(0o600);
    fs::set_permissions(path, perms)
        .with_context(|| format!("failed to set permissions: {}", path.display()))
}

#[cfg(not(unix))]
fn set_owner_only(_path: &Path) -> Result<()> {
    Ok(())
}

fn base64_url_encode(bytes: &[u8]) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";
    let mut out = String::with_capacity((bytes.len() * 4).div_ceil(3));
    for chunk in bytes.chunks(3) {
        let b0 = chunk[0] as u32;
        let b1 = *chunk.get(1).unwrap_or(&0) as u32;
        let b2 = *chunk.get(2).unwrap_or(&0) as u32;
        let n = (b0 << 16) | (b1 << 8) | b2;
        out.push(ALPHABET[((n >> 18) & 0x3f) as usize] as char);
        out.push(ALPHABET[((n >> 12) & 0x3f) as usize] as char);
        if chunk.len() > 1 {
            out.push(ALPHABET[((n >> 6) & 0x3f) as usize] as char);
        }
        if chunk.len() > 2 {
            out.push(ALPHABET[(n & 0x3f) as usize] as char);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_register_lookup_revoke() {
        let dir = tempdir().unwrap();
        let reg = TokenRegistry::new(dir.path());
        reg.register("tok1", "container-a", "acme").unwrap();

        let binding = reg.lookup("tok1").unwrap();
        assert_eq!(binding.container, "container-a");
        assert_eq!(binding.project, "acme");
        assert!(reg.validate("tok1"));

        assert!(reg.revoke("tok1"));
        assert!(!reg.revoke("tok1"));
        assert!(!reg.validate("tok1"));
    }

    #[test]
    fn test_register_overwrites_prior_container_binding() {
        let dir = tempdir().unwrap();
        let reg = TokenRegistry::new(dir.path());
        reg.register("tok1", "container-a", "acme").unwrap();
        reg.register("tok2", "container-a", "acme").unwrap();

        assert!(!reg.validate("tok1"));
        assert!(reg.validate("tok2"));
        assert_eq!(reg.count(), 1);
    }

    #[test]
    fn test_rehydrate_from_disk() {
        let dir = tempdir().unwrap();
        {
            let reg = TokenRegistry::new(dir.path());
            reg.register("tok1", "container-a", "acme").unwrap();
        }
        let reg2 = TokenRegistry::new(dir.path());
        let n = reg2.rehydrate().unwrap();
        assert_eq!(n, 1);
        assert!(reg2.validate("tok1"));
    }

    #[test]
    fn test_generate_unique_and_long_enough() {
        let a = TokenRegistry::generate();
        let b = TokenRegistry::generate();
        assert_ne!(a, b);
        assert!(a.len() >= 20);
    }
}
