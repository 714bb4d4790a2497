//! Local file output handler.
//!
//! Artifacts are written under the directory named by
//! `GROVE_OUTPUT_LOCAL_FILE_PATH`, preserving the artifact key as the
//! relative path. Files are flushed to disk before the write is
//! acknowledged, so a checkpointed pointer always has its artifact on disk.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::output::Output;

/// Environment variable naming the output directory.
pub const ENV_PATH: &str = "GROVE_OUTPUT_LOCAL_FILE_PATH";

/// An output handler writing artifacts into a local directory tree.
pub struct LocalFileOutput {
    root: PathBuf,
}

impl LocalFileOutput {
    /// Creates the handler from its environment configuration.
    pub fn from_env() -> Result<Self> {
        let root = std::env::var(ENV_PATH)
            .map_err(|_| Error::Configuration(format!("{ENV_PATH} must be set")))?;
        Ok(Self::new(PathBuf::from(root)))
    }

    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl Output for LocalFileOutput {
    async fn write(&self, key: &str, data: Vec<u8>, _metadata: &HashMap<String, String>) -> Result<()> {
        let path = self.root.join(key);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| Error::Access(format!("unable to create {}: {err}", parent.display())))?;
        }

        let mut file = std::fs::File::create(&path)
            .map_err(|err| Error::Access(format!("unable to create {}: {err}", path.display())))?;
        file.write_all(&data)
            .and_then(|_| file.sync_all())
            .map_err(|err| Error::Access(format!("unable to write {}: {err}", path.display())))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_creates_key_path() {
        let dir = tempfile::tempdir().unwrap();
        let output = LocalFileOutput::new(dir.path().to_path_buf());

        output
            .write(
                "logs/hb/local/2020/12/08/all-2020-12-08T10:23:54Z.0.json",
                b"{\"a\":1}".to_vec(),
                &HashMap::new(),
            )
            .await
            .unwrap();

        let written = dir
            .path()
            .join("logs/hb/local/2020/12/08/all-2020-12-08T10:23:54Z.0.json");
        assert_eq!(std::fs::read(written).unwrap(), b"{\"a\":1}");
    }

    #[tokio::test]
    async fn test_unwritable_root_is_access_error() {
        let output = LocalFileOutput::new(PathBuf::from("/proc/grove-denied"));
        let err = output
            .write("logs/x.json", b"{}".to_vec(), &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Access(_)));
    }
}
