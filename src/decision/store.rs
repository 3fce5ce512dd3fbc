//! Decision Store — YAML-backed per-scope allow/deny lists.
//!
//! Each scope (`global`, or one `projects/<project>.yaml`) is an
//! independent file holding four ordered, deduplicated lists. Writes are
//! atomic (write-to-temp-then-rename) and protected by an advisory file
//! lock held only for the duration of a load-modify-store.

use crate::error::GuardianError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;

/// On-disk shape of a scope's decisions file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecisionsFile {
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub denied_domains: Vec<String>,
    #[serde(default)]
    pub denied_patterns: Vec<String>,
}

impl DecisionsFile {
    fn dedup(&mut self) {
        dedup_preserve_order(&mut self.domains);
        dedup_preserve_order(&mut self.patterns);
        dedup_preserve_order(&mut self.denied_domains);
        dedup_preserve_order(&mut self.denied_patterns);
    }
}

fn dedup_preserve_order(v: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    v.retain(|item| seen.insert(item.clone()));
}

/// Owns decisions-file I/O for one Guardian instance's config directory.
pub struct DecisionStore {
    config_dir: PathBuf,
}

impl DecisionStore {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    /// Migration probe: if a legacy `approvals/` directory exists where
    /// `decisions/` would be, and `decisions/` does not exist, rename it.
    pub fn migrate_legacy_dir(&self) -> Result<()> {
        let legacy = self.config_dir.join("approvals");
        let current = self.config_dir.join("decisions");
        if legacy.exists() && !current.exists() {
            fs::rename(&legacy, &current).with_context(|| {
                format!(
                    "failed to migrate legacy approvals dir {} to {}",
                    legacy.display(),
                    current.display()
                )
            })?;
        }
        Ok(())
    }

    fn decisions_dir(&self) -> PathBuf {
        self.config_dir.join("decisions")
    }

    fn global_path(&self) -> PathBuf {
        self.decisions_dir().join("global.yaml")
    }

    fn project_path(&self, project: &str) -> PathBuf {
        self.decisions_dir().join("projects").join(format!("{project}.yaml"))
    }

    pub fn load_global(&self) -> Result<DecisionsFile> {
        Self::load(&self.global_path())
    }

    pub fn load_project(&self, project: &str) -> Result<DecisionsFile> {
        Self::load(&self.project_path(project))
    }

    pub fn write_global(&self, decisions: &DecisionsFile) -> Result<()> {
        Self::write_locked(&self.global_path(), decisions)
    }

    pub fn write_project(&self, project: &str, decisions: &DecisionsFile) -> Result<()> {
        Self::write_locked(&self.project_path(project), decisions)
    }

    /// Load, mutate, and write back the global decisions file as a single
    /// read-modify-write under one lock acquisition, so two concurrent
    /// callers can never both load stale data and clobber each other's
    /// write. Retries the write once on failure before surfacing
    /// `GuardianError::DecisionWriteConflict`.
    pub fn update_global<F>(&self, mutate: F) -> Result<DecisionsFile>
    where
        F: FnOnce(&mut DecisionsFile),
    {
        Self::update_locked(&self.global_path(), mutate)
    }

    /// Project-scoped counterpart to `update_global`.
    pub fn update_project<F>(&self, project: &str, mutate: F) -> Result<DecisionsFile>
    where
        F: FnOnce(&mut DecisionsFile),
    {
        Self::update_locked(&self.project_path(project), mutate)
    }

    fn load(path: &Path) -> Result<DecisionsFile> {
        if !path.exists() {
            return Ok(DecisionsFile::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read decisions file: {}", path.display()))?;
        let mut parsed: DecisionsFile = serde_yaml::from_str(&content)
            .with_context(|| format!("invalid decisions YAML: {}", path.display()))?;
        parsed.dedup();
        Ok(parsed)
    }

    /// Atomic write-to-temp-then-rename, under an advisory exclusive lock
    /// held for the whole read-modify-write the caller performs. The lock
    /// file itself is a sibling `.lock` file so the rename target is never
    /// the locked file.
    fn write_locked(path: &Path, decisions: &DecisionsFile) -> Result<()> {
        let lock_file = Self::acquire_lock(path)?;
        let mut to_write = decisions.clone();
        to_write.dedup();
        let result = Self::try_write(path, &to_write);
        FileExt::unlock(&lock_file).ok();
        result
    }

    /// Load, mutate under `mutate`, and write back, all under a single lock
    /// acquisition so no other caller can observe or clobber an
    /// intermediate state. Retries the write once before giving up.
    fn update_locked<F>(path: &Path, mutate: F) -> Result<DecisionsFile>
    where
        F: FnOnce(&mut DecisionsFile),
    {
        let lock_file = Self::acquire_lock(path)?;

        let mut file = Self::load(path)?;
        mutate(&mut file);
        file.dedup();

        let result = Self::try_write(path, &file).or_else(|first_err| {
            tracing::warn!(error = %first_err, path = %path.display(), "decisions write failed, retrying once");
            Self::try_write(path, &file)
        });

        FileExt::unlock(&lock_file).ok();

        match result {
            Ok(()) => Ok(file),
            Err(err) => Err(GuardianError::DecisionWriteConflict { path: path.to_path_buf() })
                .with_context(|| format!("retry also failed: {err}")),
        }
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create decisions dir: {}", parent.display()))?;
        }
        let lock_path = path.with_extension("lock");
        let lock_file = File::create(&lock_path)
            .with_context(|| format!("failed to open lock file: {}", lock_path.display()))?;
        lock_file
            .lock_exclusive()
            .with_context(|| format!("failed to acquire lock: {}", lock_path.display()))?;
        Ok(lock_file)
    }

    fn try_write(path: &Path, decisions: &DecisionsFile) -> Result<()> {
        let yaml = serde_yaml::to_string(decisions).context("failed to serialize decisions")?;
        let tmp_path = path.with_extension("yaml.tmp");
        {
            let mut tmp = File::create(&tmp_path)
                .with_context(|| format!("failed to create temp file: {}", tmp_path.display()))?;
            tmp.write_all(yaml.as_bytes())?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename into place: {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_round_trip_global() {
        let dir = tempdir().unwrap();
        let store = DecisionStore::new(dir.path());
        let decisions = DecisionsFile {
            domains: vec!["api.anthropic.com".into(), "api.anthropic.com".into()],
            patterns: vec!["*.github.com".into()],
            denied_domains: vec![],
            denied_patterns: vec![],
        };
        store.write_global(&decisions).unwrap();
        let loaded = store.load_global().unwrap();
        assert_eq!(loaded.domains, vec!["api.anthropic.com".to_string()]);
        assert_eq!(loaded.patterns, vec!["*.github.com".to_string()]);
    }

    #[test]
    fn test_load_missing_returns_default() {
        let dir = tempdir().unwrap();
        let store = DecisionStore::new(dir.path());
        let loaded = store.load_project("acme").unwrap();
        assert!(loaded.domains.is_empty());
    }

    #[test]
    fn test_migrate_legacy_dir() {
        let dir = tempdir().unwrap();
        let legacy = dir.path().join("approvals");
        fs::create_dir_all(&legacy).unwrap();
        fs::write(legacy.join("global.yaml"), "domains: [a.com]\n").unwrap();

        let store = DecisionStore::new(dir.path());
        store.migrate_legacy_dir().unwrap();

        assert!(!legacy.exists());
        assert!(dir.path().join("decisions").join("global.yaml").exists());
    }

    #[test]
    fn test_update_global_sees_prior_mutation_under_one_lock() {
        let dir = tempdir().unwrap();
        let store = DecisionStore::new(dir.path());

        store.update_global(|f| f.domains.push("a.com".into())).unwrap();
        store.update_global(|f| f.domains.push("b.com".into())).unwrap();

        let loaded = store.load_global().unwrap();
        assert_eq!(loaded.domains, vec!["a.com".to_string(), "b.com".to_string()]);
    }

    #[test]
    fn test_update_project_returns_mutated_file() {
        let dir = tempdir().unwrap();
        let store = DecisionStore::new(dir.path());
        let file = store
            .update_project("acme", |f| f.denied_domains.push("evil.com".into()))
            .unwrap();
        assert_eq!(file.denied_domains, vec!["evil.com".to_string()]);
    }
}
