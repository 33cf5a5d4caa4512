//! Bare repositories on disk

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::command::{CommandError, GitBinary};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid repository name: {0:?}")]
    InvalidName(String),

    #[error("repo with name already exists")]
    AlreadyExists,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Git(#[from] CommandError),
}

/// Repository names are limited to ASCII letters, digits, `-` and `_`, so a
/// name can never escape the repositories directory.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Maps repository names to bare repositories under one base directory
#[derive(Debug, Clone)]
pub struct RepositoryStore {
    base_dir: PathBuf,
    git: GitBinary,
}

impl RepositoryStore {
    pub fn new(base_dir: impl Into<PathBuf>, git: GitBinary) -> Self {
        Self {
            base_dir: base_dir.into(),
            git,
        }
    }

    /// Absolute directory of `name`. Callers validate the name first.
    pub fn resolve_path(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        is_valid_name(name) && self.resolve_path(name).is_dir()
    }

    /// Create an empty bare repository. The directory is removed again if
    /// `git init` fails.
    pub async fn create(&self, name: &str) -> Result<PathBuf, StoreError> {
        if !is_valid_name(name) {
            return Err(StoreError::InvalidName(name.to_string()));
        }

        let path = self.resolve_path(name);
        if tokio::fs::try_exists(&path).await? {
            return Err(StoreError::AlreadyExists);
        }

        create_private_dir(&path).await?;

        if let Err(e) = self.git.output(&path, None, ["init", "--bare"]).await {
            warn!(repo = name, "git init failed: {}", e);
            self.remove(name).await?;
            return Err(e.into());
        }

        info!(repo = name, path = %path.display(), "created repository");
        Ok(path)
    }

    pub async fn remove(&self, name: &str) -> Result<(), StoreError> {
        if !is_valid_name(name) {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        tokio::fs::remove_dir_all(self.resolve_path(name)).await?;
        Ok(())
    }
}

async fn create_private_dir(path: &Path) -> std::io::Result<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);
    builder.create(path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn git_available() -> bool {
        std::process::Command::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[test]
    fn test_valid_names() {
        for name in ["demo", "my-repo", "repo_2", "A", "0-_"] {
            assert!(is_valid_name(name), "{} should be valid", name);
        }
        for name in ["", "..", "a/b", "repo.git", "sp ace", "ünï", "a\0b"] {
            assert!(!is_valid_name(name), "{:?} should be invalid", name);
        }
    }

    #[test]
    fn test_invalid_name_never_exists() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join("inner")).unwrap();
        let store = RepositoryStore::new(temp_dir.path().join("inner"), GitBinary::default());
        assert!(!store.exists(".."));
        assert!(!store.exists(""));
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_name() {
        let temp_dir = TempDir::new().unwrap();
        let store = RepositoryStore::new(temp_dir.path(), GitBinary::default());
        assert!(matches!(
            store.create("../escape").await,
            Err(StoreError::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn test_create_and_remove() {
        if !git_available() {
            eprintln!("Skipping test: git not available");
            return;
        }

        let temp_dir = TempDir::new().unwrap();
        let store = RepositoryStore::new(temp_dir.path().join("repos"), GitBinary::default());

        let path = store.create("demo").await.unwrap();
        assert!(path.join("HEAD").exists());
        assert!(store.exists("demo"));
        assert!(matches!(store.create("demo").await, Err(StoreError::AlreadyExists)));

        store.remove("demo").await.unwrap();
        assert!(!store.exists("demo"));
    }

    #[tokio::test]
    async fn test_failed_init_cleans_up() {
        let temp_dir = TempDir::new().unwrap();
        let store = RepositoryStore::new(
            temp_dir.path(),
            GitBinary::new(temp_dir.path().join("no-such-git")),
        );

        assert!(matches!(store.create("demo").await, Err(StoreError::Git(_))));
        assert!(!temp_dir.path().join("demo").exists());
    }
}
