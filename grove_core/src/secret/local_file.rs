//! Local file secret handler.
//!
//! Secret paths resolve to files under `GROVE_SECRET_LOCAL_FILE_PATH`; the
//! file content, with trailing whitespace trimmed, is the secret. Useful for
//! development and for mounting secrets as files in containerized
//! deployments.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::secret::SecretStore;

/// Environment variable naming the secrets directory.
pub const ENV_PATH: &str = "GROVE_SECRET_LOCAL_FILE_PATH";

/// A secret handler reading credentials from local files.
pub struct LocalFileSecrets {
    root: PathBuf,
}

impl LocalFileSecrets {
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
impl SecretStore for LocalFileSecrets {
    async fn fetch(&self, path: &str) -> Result<String> {
        let full = self.root.join(path);

        let content = std::fs::read_to_string(&full)
            .map_err(|err| Error::Access(format!("unable to read secret {path}: {err}")))?;
        Ok(content.trim_end().to_string())
    }
}
