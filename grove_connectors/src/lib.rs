//! # Grove Connectors
//!
//! Bundled connector bodies for the Grove collection engine.
//!
//! Each connector implements [`Connector`](grove_core::Connector) to fetch
//! records from one upstream service and is registered by name so that
//! configuration documents can reference it.
//!
//! # Modules
//!
//! - [`heartbeat`]: synthetic records for end-to-end smoke tests
//! - [`github`]: GitHub audit log collection

use std::sync::Arc;

use grove_core::Registry;

pub mod github;
pub mod heartbeat;

pub use github::GitHubAuditLogConnector;
pub use heartbeat::HeartbeatConnector;

/// Registers every bundled connector. Called once at process startup.
pub fn register(registry: &mut Registry) {
    registry.register_connector("local_heartbeat", || Arc::new(HeartbeatConnector::new()));
    registry.register_connector("github_audit_log", || {
        Arc::new(GitHubAuditLogConnector::new())
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_makes_connectors_resolvable() {
        let mut registry = Registry::with_builtins();
        register(&mut registry);

        assert!(registry.connector("local_heartbeat").is_ok());
        assert!(registry.connector("github_audit_log").is_ok());
        assert!(registry.connector("okta_system_log").is_err());
    }

    #[test]
    fn test_registered_names_match_declarations() {
        let mut registry = Registry::with_builtins();
        register(&mut registry);

        let heartbeat = registry.connector("local_heartbeat").unwrap();
        assert_eq!(heartbeat.name(), "local_heartbeat");

        let github = registry.connector("github_audit_log").unwrap();
        assert_eq!(github.name(), "github_audit_log");
    }
}
