//! The record pipeline — one run of one connector instance.
//!
//! A run walks through: acquire the running-marker, resolve secrets, load
//! the pointer, invoke the connector body, and for every batch the body
//! emits: deduplicate, process, stamp provenance, write to the output
//! backend, and only then checkpoint the new pointer. Pointer advancement is
//! strictly ordered after output acknowledgement, so failures yield
//! duplicates on the next run, never loss.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;

use crate::cache::{Cache, Constraint};
use crate::connector::Connector;
use crate::constants::{
    cache_key, CACHE_KEY_LOCK, CACHE_KEY_POINTER, CACHE_KEY_SEEN, DATESTAMP_FORMAT,
    DEFAULT_LOCK_DURATION, ENV_GROVE_LOCK_DURATION, GROVE_METADATA_KEY,
};
use crate::error::{Error, Result};
use crate::model::ConnectorConfig;
use crate::output::{self, Output};
use crate::paths;
use crate::processor::ProcessorChain;
use crate::registry::Registry;
use crate::secret::SecretStore;

/// The backend set shared by every instance in a process.
#[derive(Clone)]
pub struct Backends {
    pub cache: Arc<dyn Cache>,
    pub output: Arc<dyn Output>,
    /// Optional; without one, all credentials must be inline.
    pub secrets: Option<Arc<dyn SecretStore>>,
}

/// Outcome of one run of one instance.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Records emitted across all batches.
    pub saved: u64,
    /// Batches written to the output backend.
    pub parts: u32,
    /// The run was skipped because another process holds the instance.
    pub skipped: bool,
    /// The run stopped at a batch boundary due to cancellation or deadline.
    pub interrupted: bool,
}

impl RunSummary {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// The running-marker value: who holds the instance and until when. Another
/// process may claim the instance once the deadline has elapsed.
#[derive(Debug, Serialize, Deserialize)]
struct LockMarker {
    owner: String,
    expires: DateTime<Utc>,
}

/// Conditional-write based mutual exclusion for one instance.
struct InstanceLock {
    owner: String,
    duration: Duration,
    pk: String,
    sk: String,
    /// The raw marker value we last wrote, used as the constraint for
    /// re-locks and release.
    held: Option<String>,
}

impl InstanceLock {
    fn new(owner: String, pk: String, sk: String) -> Self {
        let seconds = std::env::var(ENV_GROVE_LOCK_DURATION)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_LOCK_DURATION);

        Self {
            owner,
            duration: Duration::seconds(seconds as i64),
            pk,
            sk,
            held: None,
        }
    }

    /// Acquires or refreshes the marker. Refusal to take a valid foreign
    /// marker and the conditional write together guarantee at-most-one
    /// concurrent run per instance.
    async fn acquire(&mut self, cache: &Arc<dyn Cache>) -> Result<()> {
        let now = Utc::now();
        let marker = LockMarker {
            owner: self.owner.clone(),
            expires: now + self.duration,
        };
        let value = serde_json::to_string(&marker)?;

        let constraint = match &self.held {
            // Re-locking our own marker: the stored value must still be ours.
            Some(raw) => Constraint::Equals(raw.clone()),
            None => match cache.get(&self.pk, &self.sk).await {
                Ok(existing) => {
                    if let Ok(current) = serde_json::from_str::<LockMarker>(&existing) {
                        if current.expires >= now && current.owner != self.owner {
                            return Err(Error::Concurrency(format!(
                                "lock held by '{}' until {}",
                                current.owner, current.expires
                            )));
                        }
                    }
                    // Expired, ours, or unparseable: claimable, constrained
                    // on the exact value we observed.
                    Constraint::Equals(existing)
                }
                Err(Error::NotFound(_)) => Constraint::Absent,
                Err(err) => return Err(err),
            },
        };

        match cache.set(&self.pk, &self.sk, &value, constraint).await {
            Ok(()) => {
                self.held = Some(value);
                Ok(())
            }
            Err(Error::Conflict(_)) => Err(Error::Concurrency(
                "could not acquire lock, a valid lock already exists".to_string(),
            )),
            Err(err) => Err(err),
        }
    }

    /// Best-effort conditional release.
    async fn release(&mut self, cache: &Arc<dyn Cache>) {
        if let Some(raw) = self.held.take() {
            if let Err(err) = cache.delete(&self.pk, &self.sk, Some(&raw)).await {
                tracing::warn!("Failed to release lock for {}: {}", self.pk, err);
            }
        }
    }
}

/// Per-run state handed to the connector body.
///
/// The body reads the pointer, fetches upstream pages, and delivers each
/// batch through [`emit`](Run::emit). Everything downstream of the fetch —
/// deduplication, the processor chain, provenance stamping, output writes,
/// and pointer checkpoints — happens inside `emit`.
pub struct Run {
    config: ConnectorConfig,
    connector: String,
    pointer_path: String,
    cache: Arc<dyn Cache>,
    output: Arc<dyn Output>,
    chain: ProcessorChain,
    runtime: HashMap<String, String>,
    shutdown: watch::Receiver<bool>,
    lock: InstanceLock,
    started: DateTime<Utc>,
    pointer: String,
    previous_pointer: String,
    /// Hashes of recently seen records, keyed by their pointer value.
    seen: HashMap<String, HashSet<String>>,
    part: u32,
    saved: u64,
    /// Set when an emit failed; later batches are refused to prevent
    /// pointer skew.
    poisoned: Option<String>,
}

impl Run {
    /// The current pointer — the resume position this run started from,
    /// advancing as batches are checkpointed.
    pub fn pointer(&self) -> &str {
        &self.pointer
    }

    /// The instance configuration, with secrets resolved.
    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// Whether the run has been asked to stop at the next batch boundary.
    pub fn cancelled(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Delivers one batch of records: deduplicate, process, stamp, write,
    /// checkpoint. Returns [`Error::Cancelled`] at a batch boundary when
    /// shutdown has been requested; the connector body should propagate it.
    pub async fn emit(&mut self, batch: Vec<Value>) -> Result<()> {
        if let Some(reason) = &self.poisoned {
            return Err(Error::Access(format!(
                "run already failed, refusing further batches: {reason}"
            )));
        }
        if self.cancelled() {
            return Err(Error::Cancelled);
        }

        let (entries, new_hashes) = self.deduplicate(batch);
        let Some(last) = entries.last() else {
            tracing::debug!(
                connector = %self.connector,
                identity = %self.config.identity,
                "No log entries passed to emit, skipping"
            );
            return Ok(());
        };

        // Derive the candidate pointer from the raw batch before processors
        // may restructure it.
        let candidate = paths::search(last, &self.pointer_path)
            .map(paths::pointer_string)
            .ok_or_else(|| {
                Error::Format(format!(
                    "pointer path '{}' was not found in returned logs",
                    self.pointer_path
                ))
            })?;

        // Refresh our lock for every batch so it cannot expire under a long
        // collection.
        self.lock.acquire(&self.cache).await?;

        let processed = self.chain.apply(entries)?;
        let stamped = self.stamp(processed, &candidate)?;

        let data = output::serialize(&stamped, self.config.encoding)?;
        let key = output::artifact_key(
            &self.connector,
            &self.config.identity,
            &self.config.operation,
            self.started,
            self.part,
            self.config.encoding,
        );
        let metadata = HashMap::from([
            ("connector".to_string(), self.connector.clone()),
            ("identity".to_string(), self.config.identity.clone()),
            ("operation".to_string(), self.config.operation.clone()),
            ("part".to_string(), self.part.to_string()),
        ]);

        if let Err(err) = self.output.write(&key, data, &metadata).await {
            self.poisoned = Some(err.to_string());
            tracing::error!(
                connector = %self.connector,
                identity = %self.config.identity,
                operation = %self.config.operation,
                "Failed to write logs to output, cannot continue: {}",
                err
            );
            return Err(err);
        }
        tracing::info!(
            connector = %self.connector,
            identity = %self.config.identity,
            part = self.part,
            "Log batch submitted successfully to output"
        );

        // Checkpoint strictly after the write was acknowledged. A failure
        // here leaves the pointer behind the emitted window, so the next run
        // re-emits it: duplicates, not loss.
        if let Err(err) = self
            .cache
            .set(
                &cache_key(CACHE_KEY_POINTER, &self.connector, &self.config.identity),
                &self.config.operation,
                &candidate,
                Constraint::Unconditional,
            )
            .await
        {
            self.poisoned = Some(err.to_string());
            tracing::error!(
                connector = %self.connector,
                identity = %self.config.identity,
                "Failed to save pointer to cache, cannot continue: {}",
                err
            );
            return Err(err);
        }

        let emitted = stamped.len() as u64;
        self.pointer = candidate;
        self.part += 1;
        self.saved += emitted;
        for (pointer, hashes) in new_hashes {
            self.seen.entry(pointer).or_default().extend(hashes);
        }
        Ok(())
    }

    /// Drops records already seen under the same pointer value.
    ///
    /// Only hashes whose pointer matches the most recently saved values are
    /// kept, bounding the amount of hash state carried between runs.
    fn deduplicate(&self, batch: Vec<Value>) -> (Vec<Value>, HashMap<String, HashSet<String>>) {
        let mut kept = Vec::with_capacity(batch.len());
        let mut new_hashes: HashMap<String, HashSet<String>> = HashMap::new();

        for candidate in batch {
            let Some(pointer) = paths::search(&candidate, &self.pointer_path)
                .map(paths::pointer_string)
            else {
                // No pointer to key the window by; keep the record untracked.
                kept.push(candidate);
                continue;
            };

            let hash = hash_entry(&candidate);
            if self
                .seen
                .get(&pointer)
                .is_some_and(|hashes| hashes.contains(&hash))
            {
                continue;
            }

            new_hashes.entry(pointer).or_default().insert(hash);
            kept.push(candidate);
        }

        (kept, new_hashes)
    }

    /// Attaches the reserved provenance object to every record.
    fn stamp(&self, entries: Vec<Value>, candidate_pointer: &str) -> Result<Vec<Value>> {
        let metadata = serde_json::json!({
            "connector": self.connector,
            "identity": self.config.identity,
            "operation": self.config.operation,
            "pointer": candidate_pointer,
            "previous_pointer": self.previous_pointer,
            "collection_time": self.started.format(DATESTAMP_FORMAT).to_string(),
            "runtime": self.runtime,
            "version": env!("CARGO_PKG_VERSION"),
        });

        entries
            .into_iter()
            .map(|entry| match entry {
                Value::Object(mut map) => {
                    map.insert(GROVE_METADATA_KEY.to_string(), metadata.clone());
                    Ok(Value::Object(map))
                }
                other => Err(Error::Format(format!(
                    "collected record is not an object: {other}"
                ))),
            })
            .collect()
    }

    /// Persists the deduplication hashes for the final pointer value.
    async fn save_seen(&self) {
        let Some(hashes) = self.seen.get(&self.pointer) else {
            return;
        };
        let mut ordered: Vec<&String> = hashes.iter().collect();
        ordered.sort();

        let serialized = match serde_json::to_string(&ordered) {
            Ok(serialized) => serialized,
            Err(err) => {
                tracing::warn!("Unable to serialize deduplication hashes: {}", err);
                return;
            }
        };

        if let Err(err) = self
            .cache
            .set(
                &cache_key(CACHE_KEY_SEEN, &self.connector, &self.config.identity),
                &self.config.operation,
                &serialized,
                Constraint::Unconditional,
            )
            .await
        {
            tracing::warn!("Failed to save deduplication hashes to cache: {}", err);
        }
    }
}

/// Hashes a record for the deduplication window.
fn hash_entry(entry: &Value) -> String {
    format!("{:x}", md5::compute(entry.to_string()))
}

/// Resolves the instance's secrets into its credential set, overwriting
/// inline values. Called fresh for every run so rotation needs no
/// notification.
async fn resolve_secrets(
    config: &mut ConnectorConfig,
    secrets: &Option<Arc<dyn SecretStore>>,
) -> Result<()> {
    if config.secrets.is_empty() {
        return Ok(());
    }

    let Some(store) = secrets else {
        return Err(Error::Configuration(format!(
            "instance '{}' references secrets but no secret handler is configured",
            config.name
        )));
    };

    for (field, path) in config.secrets.clone() {
        let value = store.fetch(&path).await?;
        if field == "key" {
            config.key = value;
        } else {
            config.extra.insert(field, Value::String(value));
        }
    }
    Ok(())
}

/// Executes one run of one instance.
///
/// Runs the full pipeline around the connector body. A lock conflict skips
/// the run (another process is collecting); cancellation at a batch boundary
/// ends the run with its last checkpoint intact; any other failure releases
/// the lock and surfaces as the run's outcome.
pub async fn run_instance(
    connector: &Arc<dyn Connector>,
    config: &ConnectorConfig,
    registry: &Registry,
    backends: &Backends,
    runtime: &HashMap<String, String>,
    shutdown: watch::Receiver<bool>,
) -> Result<RunSummary> {
    let started = Utc::now();

    // Build the processor chain up front; a bad chain is a configuration
    // error and the run never starts.
    let mut stages = Vec::with_capacity(config.processors.len());
    for processor_config in &config.processors {
        let ctor = registry.processor(&processor_config.processor)?;
        stages.push((processor_config.name.clone(), ctor(processor_config)?));
    }

    let mut config = config.clone();
    resolve_secrets(&mut config, &backends.secrets).await?;

    let owner = runtime
        .get("runtime_id")
        .cloned()
        .unwrap_or_else(|| std::process::id().to_string());
    let mut lock = InstanceLock::new(
        owner,
        cache_key(CACHE_KEY_LOCK, connector.name(), &config.identity),
        config.operation.clone(),
    );

    match lock.acquire(&backends.cache).await {
        Ok(()) => {}
        Err(Error::Concurrency(reason)) => {
            tracing::warn!(
                connector = %connector.name(),
                identity = %config.identity,
                operation = %config.operation,
                "Connector may already be running in another location: {}",
                reason
            );
            return Ok(RunSummary::skipped());
        }
        Err(err) => return Err(err),
    }

    // Load the pointer; absent means first run, which starts from the
    // connector's initial pointer and an empty previous pointer.
    let pointer_pk = cache_key(CACHE_KEY_POINTER, connector.name(), &config.identity);
    let (pointer, previous_pointer) =
        match backends.cache.get(&pointer_pk, &config.operation).await {
            Ok(stored) => (stored.clone(), stored),
            Err(Error::NotFound(_)) => {
                (connector.initial_pointer().resolve(started), String::new())
            }
            Err(err) => {
                lock.release(&backends.cache).await;
                return Err(err);
            }
        };

    // Recently seen record hashes, for the deduplication window. Malformed
    // cache content is ignored rather than failing collection.
    let seen_pk = cache_key(CACHE_KEY_SEEN, connector.name(), &config.identity);
    let mut seen: HashMap<String, HashSet<String>> = HashMap::new();
    match backends.cache.get(&seen_pk, &config.operation).await {
        Ok(raw) => match serde_json::from_str::<Vec<String>>(&raw) {
            Ok(hashes) => {
                seen.insert(pointer.clone(), hashes.into_iter().collect());
            }
            Err(err) => {
                tracing::warn!(
                    "Deduplication hashes in the cache appear to be malformed, ignoring: {}",
                    err
                );
            }
        },
        Err(Error::NotFound(_)) => {}
        Err(err) => {
            tracing::warn!("Unable to load deduplication hashes from cache: {}", err);
        }
    }

    let mut run = Run {
        connector: connector.name().to_string(),
        pointer_path: connector.pointer_path().to_string(),
        config,
        cache: backends.cache.clone(),
        output: backends.output.clone(),
        chain: ProcessorChain::new(stages),
        runtime: runtime.clone(),
        shutdown,
        lock,
        started,
        pointer,
        previous_pointer,
        seen,
        part: 0,
        saved: 0,
        poisoned: None,
    };

    let outcome = connector.collect(&mut run).await;

    let summary = match outcome {
        Ok(()) => {
            run.save_seen().await;
            Ok(RunSummary {
                saved: run.saved,
                parts: run.part,
                skipped: false,
                interrupted: false,
            })
        }
        Err(err) if is_cancellation(&err) => {
            tracing::info!(
                connector = %run.connector,
                identity = %run.config.identity,
                "Run stopped at a batch boundary, pointer retains last checkpoint"
            );
            Ok(RunSummary {
                saved: run.saved,
                parts: run.part,
                skipped: false,
                interrupted: true,
            })
        }
        Err(err) => {
            tracing::error!(
                connector = %run.connector,
                identity = %run.config.identity,
                operation = %run.config.operation,
                previous_pointer = %run.previous_pointer,
                "Connector was unable to collect logs: {:#}",
                err
            );
            Err(Error::Collection(err))
        }
    };

    let cache = run.cache.clone();
    run.lock.release(&cache).await;
    summary
}

fn is_cancellation(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<Error>(), Some(Error::Cancelled))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hash_entry_stable_and_distinct() {
        let a = hash_entry(&json!({"id": 1}));
        let b = hash_entry(&json!({"id": 1}));
        let c = hash_entry(&json!({"id": 2}));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_lock_marker_roundtrip() {
        let marker = LockMarker {
            owner: "runtime-1".to_string(),
            expires: Utc::now(),
        };
        let raw = serde_json::to_string(&marker).unwrap();
        let back: LockMarker = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.owner, "runtime-1");
    }

    #[tokio::test]
    async fn test_resolve_secrets_without_handler_fails() {
        let mut config = ConnectorConfig::from_slice(
            br#"{
                "name": "x", "identity": "i", "connector": "c",
                "secrets": {"key": "prod/token"}
            }"#,
        )
        .unwrap();

        let err = resolve_secrets(&mut config, &None).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[tokio::test]
    async fn test_resolve_secrets_without_references_is_noop() {
        let mut config = ConnectorConfig::from_slice(
            br#"{"name": "x", "identity": "i", "connector": "c", "key": "inline"}"#,
        )
        .unwrap();

        resolve_secrets(&mut config, &None).await.unwrap();
        assert_eq!(config.key, "inline");
    }
}
