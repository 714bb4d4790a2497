//! Processors — ordered transformations applied to each batch before emit.
//!
//! A processor is pure relative to the batch: no external state, no
//! blocking. Each entry maps to zero or more output entries, so processors
//! can drop records or fan one record out into several. A processor failure
//! fails the whole batch; the pointer is not advanced.

use serde_json::Value;

use crate::error::{Error, Result};
use crate::model::ProcessorConfig;

pub mod split_path;
pub mod zip_paths;

pub use split_path::SplitPath;
pub use zip_paths::ZipPaths;

/// A single batch transformation stage.
pub trait Processor: Send + Sync {
    /// Transforms one record into zero or more records.
    fn process(&self, entry: Value) -> Result<Vec<Value>>;
}

/// Constructor signature for registered processors.
pub type ProcessorCtor = fn(&ProcessorConfig) -> Result<Box<dyn Processor>>;

/// An instance's processors, applied in declaration order.
pub struct ProcessorChain {
    stages: Vec<(String, Box<dyn Processor>)>,
}

impl ProcessorChain {
    /// An empty chain, which passes batches through untouched.
    pub fn empty() -> Self {
        Self { stages: Vec::new() }
    }

    /// Builds a chain from configured stages and their constructors.
    pub fn new(stages: Vec<(String, Box<dyn Processor>)>) -> Self {
        Self { stages }
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Applies every stage to the batch in order.
    ///
    /// Record order is preserved: within a stage, the outputs of one input
    /// record are emitted in sequence, ahead of the next input record's
    /// outputs.
    pub fn apply(&self, batch: Vec<Value>) -> Result<Vec<Value>> {
        let mut current = batch;

        for (name, stage) in &self.stages {
            let mut next = Vec::with_capacity(current.len());
            for entry in current {
                let produced = stage.process(entry).map_err(|err| Error::Processor {
                    name: name.clone(),
                    message: err.to_string(),
                })?;
                next.extend(produced);
            }
            current = next;
        }

        Ok(current)
    }
}
