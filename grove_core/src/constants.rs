//! Constants used throughout the Grove engine.

/// Cache namespace prefixes. Each combines with the connector name and the
/// md5 of the instance identity to form a partition key, with the operation
/// as the sort key.
pub const CACHE_KEY_POINTER: &str = "pointer";
pub const CACHE_KEY_LOCK: &str = "lock";
pub const CACHE_KEY_SEEN: &str = "seen";

/// The default operation name where a connector has only one sub-API.
pub const OPERATION_DEFAULT: &str = "all";

/// The datestamp format used for all emitted timestamps (ISO-8601, UTC).
pub const DATESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Reserved top-level field holding provenance on every emitted record.
pub const GROVE_METADATA_KEY: &str = "_grove";

/// Environment variables used to select handlers and tune the runtime.
pub const ENV_GROVE_CONFIG_HANDLER: &str = "GROVE_CONFIG_HANDLER";
pub const ENV_GROVE_CACHE_HANDLER: &str = "GROVE_CACHE_HANDLER";
pub const ENV_GROVE_OUTPUT_HANDLER: &str = "GROVE_OUTPUT_HANDLER";
pub const ENV_GROVE_SECRET_HANDLER: &str = "GROVE_SECRET_HANDLER";
pub const ENV_GROVE_CONFIG_REFRESH: &str = "GROVE_CONFIG_REFRESH";
pub const ENV_GROVE_WORKER_COUNT: &str = "GROVE_WORKER_COUNT";
pub const ENV_GROVE_LOCK_DURATION: &str = "GROVE_LOCK_DURATION";

/// Default handler names for unset environment variables.
pub const DEFAULT_CONFIG_HANDLER: &str = "local_file";
pub const DEFAULT_CACHE_HANDLER: &str = "local_memory";
pub const DEFAULT_OUTPUT_HANDLER: &str = "local_stdout";

/// Seconds between configuration refreshes in daemon mode.
pub const DEFAULT_CONFIG_REFRESH: u64 = 300;

/// Maximum number of connector instances collecting concurrently.
pub const DEFAULT_WORKER_COUNT: usize = 50;

/// Seconds a running-marker remains valid before another process may claim
/// the instance. Refreshed on every emitted batch.
pub const DEFAULT_LOCK_DURATION: u64 = 300;

/// Margin subtracted from an instance's frequency to form the per-run
/// deadline in daemon mode.
pub const RUN_DEADLINE_MARGIN_SECS: u64 = 5;

/// Seconds to wait for in-flight runs to reach a batch boundary on shutdown.
pub const SHUTDOWN_GRACE_SECS: u64 = 30;

/// Builds the cache partition key for a namespace prefix and instance.
///
/// The identity is hashed so that long or opaque identities (email addresses,
/// URLs, distinguished names) fit length- and alphabet-restricted key-value
/// stores.
pub fn cache_key(prefix: &str, connector: &str, identity: &str) -> String {
    format!("{}.{}.{:x}", prefix, connector, md5::compute(identity))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_layout() {
        let key = cache_key(CACHE_KEY_POINTER, "github_audit_log", "hashicorp");
        let parts: Vec<&str> = key.splitn(3, '.').collect();
        assert_eq!(parts[0], "pointer");
        assert_eq!(parts[1], "github_audit_log");
        assert_eq!(parts[2].len(), 32);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_cache_key_is_stable() {
        let a = cache_key(CACHE_KEY_LOCK, "slack_audit", "T012345");
        let b = cache_key(CACHE_KEY_LOCK, "slack_audit", "T012345");
        assert_eq!(a, b);

        let c = cache_key(CACHE_KEY_LOCK, "slack_audit", "T999999");
        assert_ne!(a, c);
    }
}
