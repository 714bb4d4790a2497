//! Processor splitting one record into N records by a dotted path.
//!
//! Useful for fanning out a record which bundles several related operations
//! into one record per operation. Given:
//!
//! ```json
//! {"events": [{"name": "first"}, {"name": "second"}]}
//! ```
//!
//! splitting on `events` produces two records:
//!
//! ```json
//! {"events": {"name": "first"}}
//! {"events": {"name": "second"}}
//! ```
//!
//! Sibling fields are cloned onto every produced record. A record where the
//! path is absent or not a sequence passes through unchanged.

use serde_json::Value;

use crate::error::Result;
use crate::model::ProcessorConfig;
use crate::paths;
use crate::processor::Processor;

/// Splits a record into one record per element of the sequence at `source`.
pub struct SplitPath {
    source: String,
}

impl SplitPath {
    /// Builds the processor from its configuration. Requires a `source`
    /// option naming the dotted path to split on.
    pub fn from_config(config: &ProcessorConfig) -> Result<Box<dyn Processor>> {
        Ok(Box::new(Self {
            source: config.require_str("source")?,
        }))
    }
}

impl Processor for SplitPath {
    fn process(&self, entry: Value) -> Result<Vec<Value>> {
        let children = match paths::search(&entry, &self.source) {
            Some(Value::Array(children)) if !children.is_empty() => children.clone(),
            _ => return Ok(vec![entry]),
        };

        Ok(children
            .into_iter()
            .map(|child| paths::update(&entry, &self.source, child))
            .collect())
    }
}
