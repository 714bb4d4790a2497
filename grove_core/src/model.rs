//! Configuration documents and related data models.
//!
//! A [`ConnectorConfig`] describes one collection instance: which connector
//! body runs it, the identity it collects for, how its credentials are
//! resolved, and how its output is framed. Documents carry arbitrary extra
//! fields which ride through to the connector body untouched.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::constants::OPERATION_DEFAULT;
use crate::error::{Error, Result};

/// Output artifact framing, selectable per instance via the `encoding` field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputEncoding {
    /// Gzip-compressed newline-delimited JSON (the default).
    #[default]
    Gzip,
    /// Plain newline-delimited JSON.
    Json,
}

impl OutputEncoding {
    /// File extension for artifacts written with this framing.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputEncoding::Gzip => "json.gz",
            OutputEncoding::Json => "json",
        }
    }
}

/// Configuration for a single processor in an instance's processor chain.
///
/// Processors define their own required fields, which arrive through the
/// flattened `options` mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Operator-chosen label, used in logs and errors.
    pub name: String,
    /// The registered processor to run. Must match a registry entry.
    pub processor: String,
    /// Processor-specific options (e.g. `source`, `key`, `values`).
    #[serde(flatten)]
    pub options: HashMap<String, serde_json::Value>,
}

impl ProcessorConfig {
    /// Returns a required string option, or a configuration error naming the
    /// processor that is missing it.
    pub fn require_str(&self, option: &str) -> Result<String> {
        self.options
            .get(option)
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "processor '{}' requires a string '{}' option",
                    self.name, option
                ))
            })
    }

    /// Returns a string-list option, or an empty list when absent.
    pub fn str_list(&self, option: &str) -> Vec<String> {
        self.options
            .get(option)
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// An immutable description of one collection instance.
///
/// The triple (`connector`, `identity`, `operation`) uniquely identifies a
/// collection stream; the scheduler rejects duplicates. Unknown fields are
/// preserved in `extra` and handed to the connector body unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Operator-chosen name, unique within the document set.
    pub name: String,
    /// Tenant or account handle used to scope pointers and for provenance.
    pub identity: String,
    /// Which connector body implements this instance.
    pub connector: String,
    /// Credential literal. May instead arrive via the `secrets` mapping.
    #[serde(default)]
    pub key: String,
    /// Sub-API selector when a connector serves several.
    #[serde(default = "default_operation")]
    pub operation: String,
    /// Seconds between runs in daemon mode. The connector supplies a default
    /// when absent.
    #[serde(default)]
    pub frequency: Option<u64>,
    /// Output artifact framing for this instance.
    #[serde(default)]
    pub encoding: OutputEncoding,
    /// Excluded from scheduling when set.
    #[serde(default)]
    pub disabled: bool,
    /// Logical field name to backend-specific lookup path. Resolved fresh on
    /// every run, overwriting inline values.
    #[serde(default)]
    pub secrets: HashMap<String, String>,
    /// Ordered transformations applied to each batch before emit.
    #[serde(default)]
    pub processors: Vec<ProcessorConfig>,
    /// Connector-specific fields, forwarded untouched.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

fn default_operation() -> String {
    OPERATION_DEFAULT.to_string()
}

impl ConnectorConfig {
    /// Parses a raw configuration document.
    pub fn from_slice(raw: &[u8]) -> Result<Self> {
        let config: ConnectorConfig = serde_json::from_slice(raw)?;
        Ok(config)
    }

    /// The instance identifier: the (`connector`, `identity`, `operation`)
    /// triple that names a collection stream.
    pub fn reference(&self) -> String {
        format!("{}.{}.{}", self.connector, self.identity, self.operation)
    }

    /// Returns a connector-specific string field from the open mapping.
    pub fn extra_str(&self, field: &str) -> Option<&str> {
        self.extra.get(field).and_then(|v| v.as_str())
    }

    /// Returns a connector-specific integer field from the open mapping.
    ///
    /// Accepts both JSON numbers and numeric strings, as operators routinely
    /// quote numbers in hand-written documents.
    pub fn extra_u64(&self, field: &str) -> Option<u64> {
        match self.extra.get(field)? {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

/// Computes the identifying hash of a raw configuration document.
///
/// Used by the daemon's refresh loop to detect changed documents: a replaced
/// document keeps its reference but changes its hash.
pub fn document_hash(raw: &[u8]) -> String {
    format!("{:x}", md5::compute(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_document() -> &'static str {
        r#"{
            "name": "hc-github-audit",
            "identity": "hashicorp",
            "connector": "github_audit_log",
            "key": "ghp_example",
            "operation": "web",
            "frequency": 600,
            "scope": "orgs",
            "delay": 20
        }"#
    }

    #[test]
    fn test_parse_with_extra_fields() {
        let config = ConnectorConfig::from_slice(sample_document().as_bytes()).unwrap();
        assert_eq!(config.name, "hc-github-audit");
        assert_eq!(config.operation, "web");
        assert_eq!(config.frequency, Some(600));
        assert_eq!(config.extra_str("scope"), Some("orgs"));
        assert_eq!(config.extra_u64("delay"), Some(20));
        assert!(!config.disabled);
    }

    #[test]
    fn test_defaults_applied() {
        let config = ConnectorConfig::from_slice(
            br#"{"name": "hb", "identity": "local", "connector": "local_heartbeat"}"#,
        )
        .unwrap();
        assert_eq!(config.operation, "all");
        assert_eq!(config.encoding, OutputEncoding::Gzip);
        assert!(config.key.is_empty());
        assert!(config.frequency.is_none());
        assert!(config.processors.is_empty());
    }

    #[test]
    fn test_missing_required_field_rejected() {
        let result = ConnectorConfig::from_slice(br#"{"name": "incomplete"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_reference_triple() {
        let config = ConnectorConfig::from_slice(sample_document().as_bytes()).unwrap();
        assert_eq!(config.reference(), "github_audit_log.hashicorp.web");
    }

    #[test]
    fn test_encoding_selection() {
        let config = ConnectorConfig::from_slice(
            br#"{"name": "hb", "identity": "l", "connector": "c", "encoding": "json"}"#,
        )
        .unwrap();
        assert_eq!(config.encoding, OutputEncoding::Json);
        assert_eq!(config.encoding.extension(), "json");
    }

    #[test]
    fn test_extra_u64_accepts_quoted_numbers() {
        let config = ConnectorConfig::from_slice(
            br#"{"name": "hb", "identity": "l", "connector": "c", "count": "12"}"#,
        )
        .unwrap();
        assert_eq!(config.extra_u64("count"), Some(12));
    }

    #[test]
    fn test_processor_config_options() {
        let config: ProcessorConfig = serde_json::from_str(
            r#"{"name": "fan out", "processor": "split_path", "source": "events"}"#,
        )
        .unwrap();
        assert_eq!(config.require_str("source").unwrap(), "events");
        assert!(config.require_str("missing").is_err());
        assert!(config.str_list("values").is_empty());
    }

    #[test]
    fn test_document_hash_changes_with_content() {
        let a = document_hash(b"{\"name\": \"a\"}");
        let b = document_hash(b"{\"name\": \"b\"}");
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_roundtrip_preserves_extra() {
        let config = ConnectorConfig::from_slice(sample_document().as_bytes()).unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let back = ConnectorConfig::from_slice(json.as_bytes()).unwrap();
        assert_eq!(back.extra_str("scope"), Some("orgs"));
        assert_eq!(back.reference(), config.reference());
    }
}
