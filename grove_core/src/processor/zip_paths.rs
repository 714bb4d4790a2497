//! Processor zipping a key/value sequence into a mapping.
//!
//! Many audit APIs express attributes as lists of key/value pairs:
//!
//! ```json
//! "parameters": [
//!     {"name": "owner", "value": "a-user@example.org"},
//!     {"name": "visibility", "value": "private"}
//! ]
//! ```
//!
//! which is awkward to index and search downstream. This processor flattens
//! such a sequence into a mapping keyed by the extracted key field:
//!
//! ```json
//! "parameters": {
//!     "owner": "a-user@example.org",
//!     "visibility": "private"
//! }
//! ```

use serde_json::{Map, Value};

use crate::error::Result;
use crate::model::ProcessorConfig;
use crate::paths;
use crate::processor::Processor;

/// Replaces the sequence at `source` with a mapping built from each
/// element's `key` field and the first non-absent field among `values`.
pub struct ZipPaths {
    source: String,
    key: String,
    values: Vec<String>,
}

impl ZipPaths {
    /// Builds the processor from its configuration. Requires `source` and
    /// `key` options; `values` lists candidate value paths in priority
    /// order. The key and value paths are relative to the source elements.
    pub fn from_config(config: &ProcessorConfig) -> Result<Box<dyn Processor>> {
        Ok(Box::new(Self {
            source: config.require_str("source")?,
            key: config.require_str("key")?,
            values: config.str_list("values"),
        }))
    }
}

impl Processor for ZipPaths {
    fn process(&self, entry: Value) -> Result<Vec<Value>> {
        let children = match paths::search(&entry, &self.source) {
            Some(Value::Array(children)) => children.clone(),
            // A lone object is treated as a single-element sequence.
            Some(child @ Value::Object(_)) => vec![child.clone()],
            _ => return Ok(vec![entry]),
        };

        let mut zipped = Map::new();
        for child in &children {
            let Some(key) = paths::search(child, &self.key) else {
                continue;
            };
            let Some(key) = key.as_str().map(String::from) else {
                continue;
            };

            // The first non-absent value path wins; entries with no value at
            // all are skipped. On duplicate keys the later entry wins.
            let value = self
                .values
                .iter()
                .find_map(|path| paths::search(child, path));
            if let Some(value) = value {
                zipped.insert(key, value.clone());
            }
        }

        Ok(vec![paths::update(
            &entry,
            &self.source,
            Value::Object(zipped),
        )])
    }
}
