//! The connector contract.
//!
//! A connector body knows how to fetch records from one upstream service.
//! Given the instance configuration, resolved credentials, and the current
//! pointer, it fetches one run's worth of records and delivers them through
//! the run's emit helper — never by accumulating the full history in memory,
//! which bounds memory use and enables incremental checkpointing.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::constants::DATESTAMP_FORMAT;
use crate::pipeline::Run;

/// Strategy for the pointer value used on an instance's first ever run.
#[derive(Debug, Clone)]
pub enum InitialPointer {
    /// A fixed pointer literal.
    Literal(String),
    /// An ISO-8601 timestamp the given number of days in the past.
    DaysAgo(i64),
    /// Milliseconds since the epoch, the given number of days in the past.
    /// Used by APIs which filter on epoch-millisecond timestamps.
    EpochMillisDaysAgo(i64),
}

impl InitialPointer {
    /// Resolves the strategy against a point in time.
    pub fn resolve(&self, now: DateTime<Utc>) -> String {
        match self {
            InitialPointer::Literal(value) => value.clone(),
            InitialPointer::DaysAgo(days) => {
                (now - Duration::days(*days)).format(DATESTAMP_FORMAT).to_string()
            }
            InitialPointer::EpochMillisDaysAgo(days) => {
                (now - Duration::days(*days)).timestamp_millis().to_string()
            }
        }
    }
}

/// A body of code which fetches records from one upstream service.
///
/// Implementations are stateless; per-run state lives in the [`Run`] passed
/// to [`collect`](Connector::collect). Connector bodies may retry transient
/// upstream failures internally with backoff; once they give up, the run
/// fails and the next scheduling tick retries from the last checkpoint.
#[async_trait]
pub trait Connector: Send + Sync + std::fmt::Debug {
    /// The stable name referenced by configuration documents.
    fn name(&self) -> &'static str;

    /// Dotted path deriving the next pointer from a record. Quote segments
    /// containing special characters (e.g. `"@timestamp"`).
    fn pointer_path(&self) -> &'static str;

    /// Default seconds between runs where the configuration does not set a
    /// frequency.
    fn default_frequency(&self) -> u64 {
        600
    }

    /// Pointer value for an instance's first ever run.
    fn initial_pointer(&self) -> InitialPointer {
        InitialPointer::DaysAgo(7)
    }

    /// Fetches one run's worth of records, delivering batches through
    /// [`Run::emit`]. Each emitted batch is processed, stamped, written, and
    /// checkpointed before the call returns.
    async fn collect(&self, run: &mut Run) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_literal_resolves_verbatim() {
        let now = Utc.with_ymd_and_hms(2020, 12, 8, 0, 0, 0).unwrap();
        let pointer = InitialPointer::Literal("cursor-0".to_string());
        assert_eq!(pointer.resolve(now), "cursor-0");
    }

    #[test]
    fn test_days_ago_formats_datestamp() {
        let now = Utc.with_ymd_and_hms(2020, 12, 8, 10, 23, 54).unwrap();
        let pointer = InitialPointer::DaysAgo(7);
        assert_eq!(pointer.resolve(now), "2020-12-01T10:23:54Z");
    }

    #[test]
    fn test_epoch_millis_days_ago() {
        let now = Utc.with_ymd_and_hms(2020, 12, 8, 0, 0, 0).unwrap();
        let pointer = InitialPointer::EpochMillisDaysAgo(7);
        let expected = (now - Duration::days(7)).timestamp_millis().to_string();
        assert_eq!(pointer.resolve(now), expected);
    }
}
