//! Standard output handler, the default output backend.
//!
//! Each artifact is printed as a single-line JSON envelope carrying the key,
//! the best-effort metadata, and the decoded records. Gzip artifacts are
//! decompressed before printing so the envelope is always readable.

use std::collections::HashMap;
use std::io::Read;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::output::Output;

/// An output handler printing artifacts to standard output.
#[derive(Default)]
pub struct LocalStdoutOutput;

impl LocalStdoutOutput {
    pub fn new() -> Self {
        Self
    }

    fn decode(key: &str, data: &[u8]) -> Result<Vec<Value>> {
        let text = if key.ends_with(".gz") {
            let mut decoder = GzDecoder::new(data);
            let mut text = String::new();
            decoder
                .read_to_string(&mut text)
                .map_err(|err| Error::Format(format!("unable to decompress artifact: {err}")))?;
            text
        } else {
            String::from_utf8(data.to_vec())
                .map_err(|err| Error::Format(format!("artifact is not UTF-8: {err}")))?
        };

        let mut records = Vec::new();
        for line in text.lines() {
            if line.is_empty() {
                continue;
            }
            records.push(serde_json::from_str(line)?);
        }
        Ok(records)
    }
}

#[async_trait]
impl Output for LocalStdoutOutput {
    async fn write(&self, key: &str, data: Vec<u8>, metadata: &HashMap<String, String>) -> Result<()> {
        let envelope = json!({
            "key": key,
            "metadata": metadata,
            "records": Self::decode(key, &data)?,
        });

        println!("{envelope}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OutputEncoding;
    use crate::output::serialize;
    use serde_json::json;

    #[test]
    fn test_decode_plain_ndjson() {
        let data = serialize(&[json!({"a": 1}), json!({"b": 2})], OutputEncoding::Json).unwrap();
        let records = LocalStdoutOutput::decode("logs/x.0.json", &data).unwrap();
        assert_eq!(records, vec![json!({"a": 1}), json!({"b": 2})]);
    }

    #[test]
    fn test_decode_gzip() {
        let data = serialize(&[json!({"a": 1})], OutputEncoding::Gzip).unwrap();
        let records = LocalStdoutOutput::decode("logs/x.0.json.gz", &data).unwrap();
        assert_eq!(records, vec![json!({"a": 1})]);
    }

    #[tokio::test]
    async fn test_write_succeeds() {
        let output = LocalStdoutOutput::new();
        let data = serialize(&[json!({"a": 1})], OutputEncoding::Json).unwrap();
        output
            .write("logs/x.0.json", data, &HashMap::new())
            .await
            .unwrap();
    }
}
