//! Heartbeat connector — emits synthetic records on an interval.
//!
//! Useful for smoke-testing a deployment end to end: scheduling, the record
//! pipeline, and the configured backends all run without talking to any
//! upstream service. Configure `count` (records per run) and `interval`
//! (seconds between records) in the configuration document.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use grove_core::connector::{Connector, InitialPointer};
use grove_core::constants::DATESTAMP_FORMAT;
use grove_core::pipeline::Run;

/// A test connector generating heartbeat records locally.
#[derive(Debug, Default)]
pub struct HeartbeatConnector;

impl HeartbeatConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for HeartbeatConnector {
    fn name(&self) -> &'static str {
        "local_heartbeat"
    }

    fn pointer_path(&self) -> &'static str {
        "timestamp"
    }

    fn default_frequency(&self) -> u64 {
        60
    }

    fn initial_pointer(&self) -> InitialPointer {
        InitialPointer::DaysAgo(7)
    }

    async fn collect(&self, run: &mut Run) -> anyhow::Result<()> {
        let count = run.config().extra_u64("count").unwrap_or(5);
        let interval = run.config().extra_u64("interval").unwrap_or(1);

        for remaining in (0..count).rev() {
            if run.cancelled() {
                break;
            }

            run.emit(vec![json!({
                "type": "heartbeat",
                "timestamp": Utc::now().format(DATESTAMP_FORMAT).to_string(),
            })])
            .await?;

            if remaining > 0 {
                tokio::time::sleep(std::time::Duration::from_secs(interval)).await;
            }
        }

        Ok(())
    }
}
