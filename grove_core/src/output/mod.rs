//! Output backends — destinations for collected log artifacts.
//!
//! The engine serializes each batch as newline-delimited JSON (optionally
//! gzip-compressed), forms the artifact key, and hands both to the backend.
//! A backend must make the artifact durable before returning, as the caller
//! checkpoints the pointer immediately afterwards.

use std::collections::HashMap;
use std::io::Write;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;

use crate::constants::DATESTAMP_FORMAT;
use crate::error::{Error, Result};
use crate::model::OutputEncoding;

pub mod local_file;
pub mod local_stdout;

pub use local_file::LocalFileOutput;
pub use local_stdout::LocalStdoutOutput;

/// A destination for collected log artifacts.
#[async_trait]
pub trait Output: Send + Sync {
    /// Writes one artifact. The backend may prefix or suffix the key to suit
    /// its own addressing; the metadata mapping is best-effort (object tags,
    /// headers, or simply dropped).
    async fn write(&self, key: &str, data: Vec<u8>, metadata: &HashMap<String, String>) -> Result<()>;
}

/// Serializes a batch of records using the instance's output framing.
///
/// Records are rendered compactly, one per line. A record which cannot be
/// serialized fails the whole batch rather than silently dropping entries —
/// the failed batch is retried on the next run.
pub fn serialize(entries: &[Value], encoding: OutputEncoding) -> Result<Vec<u8>> {
    let mut lines = Vec::with_capacity(entries.len());
    for entry in entries {
        lines.push(serde_json::to_string(entry)?);
    }
    let ndjson = lines.join("\n");

    match encoding {
        OutputEncoding::Json => Ok(ndjson.into_bytes()),
        OutputEncoding::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder
                .write_all(ndjson.as_bytes())
                .and_then(|_| encoder.finish())
                .map_err(|err| Error::Format(format!("unable to compress batch: {err}")))
        }
    }
}

/// Builds the artifact key for one emitted batch.
///
/// The layout partitions artifacts by connector, identity, and date, with the
/// run start time and batch sequence disambiguating parts of the same run:
/// `logs/<connector>/<identity>/<YYYY>/<MM>/<DD>/<operation>-<stamp>.<part>.<ext>`.
pub fn artifact_key(
    connector: &str,
    identity: &str,
    operation: &str,
    started: DateTime<Utc>,
    part: u32,
    encoding: OutputEncoding,
) -> String {
    format!(
        "logs/{connector}/{identity}/{year:04}/{month:02}/{day:02}/{operation}-{stamp}.{part}.{ext}",
        year = started.year(),
        month = started.month(),
        day = started.day(),
        stamp = started.format(DATESTAMP_FORMAT),
        ext = encoding.extension(),
    )
}
