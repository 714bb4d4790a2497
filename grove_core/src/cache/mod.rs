//! Cache backends — pointer, running-marker, and deduplication storage.
//!
//! Values are addressed by a partition key and a sort key. Backends which do
//! not differentiate the two combine them in an appropriate way. Conditional
//! writes via [`Constraint`] are the primitive the pipeline uses to guarantee
//! at-most-one concurrent run per instance.

use async_trait::async_trait;

use crate::error::Result;

pub mod local_file;
pub mod local_memory;

pub use local_file::LocalFileCache;
pub use local_memory::LocalMemoryCache;

/// Precondition for a conditional cache write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    /// Write unconditionally.
    Unconditional,
    /// The key must not already hold a value.
    Absent,
    /// The current value must equal the expected string.
    Equals(String),
}

/// A small key-value store with optimistic concurrency.
///
/// Implementations must apply each operation atomically and provide
/// read-your-writes within a single process. Cross-process linearizability is
/// not required.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Gets the value for the given key.
    ///
    /// Returns [`Error::NotFound`](crate::Error::NotFound) when no value is
    /// stored.
    async fn get(&self, pk: &str, sk: &str) -> Result<String>;

    /// Stores a value, subject to the given constraint.
    ///
    /// Returns [`Error::Conflict`](crate::Error::Conflict) when the
    /// constraint does not hold.
    async fn set(&self, pk: &str, sk: &str, value: &str, constraint: Constraint) -> Result<()>;

    /// Deletes a value. When a constraint value is provided, the currently
    /// stored value must match for the delete to take effect.
    async fn delete(&self, pk: &str, sk: &str, constraint: Option<&str>) -> Result<()>;
}
