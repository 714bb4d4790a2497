//! Configuration backends — storage for connector configuration documents.
//!
//! The backend only lists and fetches raw documents; parsing and validation
//! happen in the engine. Listing must be idempotent and stable, so that a
//! repeated call returns the same set modulo genuine changes.

use async_trait::async_trait;

use crate::error::Result;

pub mod local_file;

pub use local_file::LocalFileConfig;

/// A store of raw connector configuration documents.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Lists the identifiers of all available configuration documents.
    async fn list(&self) -> Result<Vec<String>>;

    /// Fetches the raw bytes of one configuration document.
    async fn get(&self, id: &str) -> Result<Vec<u8>>;
}
