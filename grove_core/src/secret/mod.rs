//! Secret backends — credential storage for connector instances.
//!
//! Secrets are fetched fresh on every connector run and never cached, so
//! dynamic-secret engines and rotation work without notification. The secret
//! backend is optional; without one, all credentials must be inline in the
//! configuration documents.

use async_trait::async_trait;

use crate::error::Result;

pub mod local_file;

pub use local_file::LocalFileSecrets;

/// A store of secret material addressed by backend-specific paths.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetches the plain-text secret at the given path.
    async fn fetch(&self, path: &str) -> Result<String>;
}
