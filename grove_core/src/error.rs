//! Error types shared across the Grove engine.
//!
//! All engine errors funnel into [`Error`] so that callers can branch on the
//! failure class (configuration vs. transient backend access vs. conflict)
//! rather than on backend-specific error types.

/// Errors produced by the Grove engine and its backends.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A configuration document or handler parameter is invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The requested entity does not exist in the backend.
    #[error("not found: {0}")]
    NotFound(String),

    /// A conditional cache write was rejected because the constraint did not
    /// hold. Used by the running-marker to detect concurrent collection.
    #[error("constraint not satisfied: {0}")]
    Conflict(String),

    /// Another runtime appears to hold the instance's running-marker.
    #[error("concurrent execution detected: {0}")]
    Concurrency(String),

    /// A backend could not be reached or refused the operation.
    #[error("backend access error: {0}")]
    Access(String),

    /// Collected data could not be parsed or serialized.
    #[error("data format error: {0}")]
    Format(String),

    /// A processor rejected a batch. The batch is dropped and the pointer is
    /// not advanced.
    #[error("processor '{name}' failed: {message}")]
    Processor { name: String, message: String },

    /// No handler is registered under the requested name.
    #[error("unknown {role} handler '{name}'")]
    UnknownHandler { role: &'static str, name: String },

    /// The run was asked to stop at a batch boundary.
    #[error("run cancelled at batch boundary")]
    Cancelled,

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Connector bodies report failures as `anyhow` errors; anything they do
    /// not classify lands here.
    #[error(transparent)]
    Collection(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether retrying on the next scheduling tick could succeed without
    /// operator action.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Access(_) | Error::Conflict(_) | Error::Concurrency(_) | Error::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context() {
        let err = Error::UnknownHandler {
            role: "cache",
            name: "dynamodb".to_string(),
        };
        assert_eq!(err.to_string(), "unknown cache handler 'dynamodb'");

        let err = Error::Processor {
            name: "split_path".to_string(),
            message: "source is required".to_string(),
        };
        assert!(err.to_string().contains("split_path"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::Access("timeout".into()).is_transient());
        assert!(!Error::Configuration("bad document".into()).is_transient());
        assert!(!Error::Cancelled.is_transient());
    }
}
