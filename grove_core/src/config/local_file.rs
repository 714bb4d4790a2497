//! Local file configuration handler, the default config backend.
//!
//! Documents are `*.json` files anywhere under the directory named by
//! `GROVE_CONFIG_LOCAL_FILE_PATH`; the document identifier is the file path.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::config::ConfigSource;
use crate::error::{Error, Result};

/// Environment variable naming the configuration directory.
pub const ENV_PATH: &str = "GROVE_CONFIG_LOCAL_FILE_PATH";

/// A configuration handler reading documents from local files.
pub struct LocalFileConfig {
    root: PathBuf,
}

impl LocalFileConfig {
    /// Creates the handler from its environment configuration.
    pub fn from_env() -> Result<Self> {
        let root = std::env::var(ENV_PATH)
            .map_err(|_| Error::Configuration(format!("{ENV_PATH} must be set")))?;
        Ok(Self::new(PathBuf::from(root)))
    }

    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn collect_documents(dir: &Path, found: &mut Vec<String>) -> Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();

            if path.is_dir() {
                Self::collect_documents(&path, found)?;
            } else if path.extension().is_some_and(|ext| ext == "json") {
                found.push(path.to_string_lossy().into_owned());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ConfigSource for LocalFileConfig {
    async fn list(&self) -> Result<Vec<String>> {
        let mut found = Vec::new();
        Self::collect_documents(&self.root, &mut found)
            .map_err(|err| Error::Access(format!("unable to list {}: {err}", self.root.display())))?;

        // Sorted for a stable listing between calls.
        found.sort();
        Ok(found)
    }

    async fn get(&self, id: &str) -> Result<Vec<u8>> {
        std::fs::read(id).map_err(|err| Error::Access(format!("unable to read {id}: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lists_nested_json_documents() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("team-a")).unwrap();
        std::fs::write(dir.path().join("one.json"), b"{}").unwrap();
        std::fs::write(dir.path().join("team-a/two.json"), b"{}").unwrap();
        std::fs::write(dir.path().join("README.md"), b"ignored").unwrap();

        let source = LocalFileConfig::new(dir.path().to_path_buf());
        let ids = source.list().await.unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.iter().any(|id| id.ends_with("one.json")));
        assert!(ids.iter().any(|id| id.ends_with("two.json")));
    }

    #[tokio::test]
    async fn test_listing_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.json"), b"{}").unwrap();
        std::fs::write(dir.path().join("a.json"), b"{}").unwrap();

        let source = LocalFileConfig::new(dir.path().to_path_buf());
        assert_eq!(source.list().await.unwrap(), source.list().await.unwrap());
    }

    #[tokio::test]
    async fn test_get_returns_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, br#"{"name": "x"}"#).unwrap();

        let source = LocalFileConfig::new(dir.path().to_path_buf());
        let raw = source.get(&path.to_string_lossy()).await.unwrap();
        assert_eq!(raw, br#"{"name": "x"}"#);
    }

    #[tokio::test]
    async fn test_missing_directory_is_access_error() {
        let source = LocalFileConfig::new(PathBuf::from("/nonexistent/grove-configs"));
        let err = source.list().await.unwrap_err();
        assert!(matches!(err, Error::Access(_)));
    }
}
