//! Scheduling of connector instances.
//!
//! The scheduler owns the set of connector instances built from the
//! configuration backend and runs each concurrently, bounded by a worker
//! semaphore. Two modes exist: one-shot (run every instance once, report
//! fatal failures) and daemon (a long-running loop which refreshes
//! configuration periodically and dispatches instances on their own
//! cadences). A slow or failing instance never delays the others.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::ConfigSource;
use crate::connector::Connector;
use crate::constants::{
    DEFAULT_CONFIG_REFRESH, DEFAULT_WORKER_COUNT, ENV_GROVE_CONFIG_REFRESH,
    ENV_GROVE_WORKER_COUNT, RUN_DEADLINE_MARGIN_SECS, SHUTDOWN_GRACE_SECS,
};
use crate::error::{Error, Result};
use crate::model::{document_hash, ConnectorConfig};
use crate::pipeline::{run_instance, Backends};
use crate::registry::Registry;

/// A configuration document bound to its connector body.
pub struct Instance {
    pub config: ConnectorConfig,
    pub connector: Arc<dyn Connector>,
    /// Hash of the raw document, used to detect replacements on refresh.
    pub document_hash: String,
    /// Seconds between runs in daemon mode.
    pub frequency: u64,
}

/// Builds instances from every document the config backend lists.
///
/// Invalid documents, unknown connectors, and duplicate instance references
/// are logged and skipped; the remaining instances continue. An error
/// listing or reaching the backend itself is fatal.
pub async fn load_instances(
    source: &Arc<dyn ConfigSource>,
    registry: &Registry,
) -> Result<Vec<Instance>> {
    let mut instances = Vec::new();
    let mut references = HashSet::new();

    for id in source.list().await? {
        let raw = match source.get(&id).await {
            Ok(raw) => raw,
            Err(err) => {
                tracing::error!("Unable to read configuration document {}: {}", id, err);
                continue;
            }
        };

        let config = match ConnectorConfig::from_slice(&raw) {
            Ok(config) => config,
            Err(err) => {
                tracing::error!("Unable to load connector configuration {}: {}", id, err);
                continue;
            }
        };

        if config.disabled {
            tracing::debug!("Skipping disabled configuration: {}", config.name);
            continue;
        }

        let connector = match registry.connector(&config.connector) {
            Ok(connector) => connector,
            Err(err) => {
                tracing::error!("Configuration '{}' is not usable: {}", config.name, err);
                continue;
            }
        };

        let reference = config.reference();
        if !references.insert(reference.clone()) {
            tracing::error!(
                "Duplicate instance {} from configuration '{}', skipping",
                reference,
                config.name
            );
            continue;
        }

        let frequency = config.frequency.unwrap_or_else(|| connector.default_frequency());
        instances.push(Instance {
            document_hash: document_hash(&raw),
            frequency,
            config,
            connector,
        });
    }

    Ok(instances)
}

/// Result of a one-shot execution.
#[derive(Debug)]
pub struct OneShotReport {
    /// Instances the scheduler attempted to run.
    pub instances: usize,
    /// Instances whose run ended in a fatal error.
    pub fatal: usize,
}

/// Per-instance daemon state: the instance, when it last started, and its
/// in-flight worker if one is running.
struct InstanceState {
    instance: Arc<Instance>,
    last: Option<Instant>,
    handle: Option<JoinHandle<bool>>,
}

/// Counts from one configuration refresh, for logging and tests.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RefreshDelta {
    pub added: usize,
    pub removed: usize,
    pub replaced: usize,
}

/// Runs connector instances in one-shot or daemon mode.
#[derive(Clone)]
pub struct Scheduler {
    registry: Arc<Registry>,
    backends: Backends,
    runtime: HashMap<String, String>,
}

impl Scheduler {
    pub fn new(
        registry: Arc<Registry>,
        backends: Backends,
        runtime: HashMap<String, String>,
    ) -> Self {
        Self {
            registry,
            backends,
            runtime,
        }
    }

    /// Runs every instance once, concurrently, and waits for all of them.
    pub async fn one_shot(&self, source: &Arc<dyn ConfigSource>) -> Result<OneShotReport> {
        let instances = load_instances(source, &self.registry).await?;
        let total = instances.len();

        let workers = worker_count()?;
        tracing::info!("Spawning workers for connectors: {} permitted", workers);
        let semaphore = Arc::new(Semaphore::new(workers));

        // One-shot runs are never cancelled; the sender is simply held open
        // until all workers finish.
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut handles = Vec::with_capacity(total);
        for instance in instances {
            handles.push(self.spawn_run(
                Arc::new(instance),
                semaphore.clone(),
                shutdown_rx.clone(),
                None,
            ));
        }

        let mut fatal = 0;
        for handle in handles {
            match handle.await {
                Ok(true) => {}
                Ok(false) => fatal += 1,
                Err(err) => {
                    tracing::error!("Connector worker panicked: {}", err);
                    fatal += 1;
                }
            }
        }

        tracing::info!("All connectors have exited");
        Ok(OneShotReport {
            instances: total,
            fatal,
        })
    }

    /// The long-running daemon loop.
    ///
    /// Dispatches due instances once per second, refreshes the instance set
    /// from the configuration backend every `GROVE_CONFIG_REFRESH` seconds,
    /// and drains in-flight runs when `stop` fires. A failure to refresh
    /// configuration is fatal; the surrounding runtime is expected to
    /// restart the process.
    pub async fn daemon(
        &self,
        source: Arc<dyn ConfigSource>,
        mut stop: watch::Receiver<bool>,
    ) -> Result<()> {
        let refresh_frequency = config_refresh()?;
        let workers = worker_count()?;
        tracing::info!(
            "Configuration will be reloaded every {} seconds, {} workers permitted",
            refresh_frequency,
            workers
        );
        let semaphore = Arc::new(Semaphore::new(workers));

        // Workers observe this channel at batch boundaries.
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut states: HashMap<String, InstanceState> = HashMap::new();
        let mut draining: Vec<JoinHandle<bool>> = Vec::new();
        let mut last_refresh: Option<Instant> = None;
        let mut ticker = tokio::time::interval(Duration::from_secs(1));

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop.changed() => {
                    tracing::info!("Shutdown requested, draining in-flight runs");
                    break;
                }
            }

            // (Re)load the configuration from the backend if due.
            let refresh_due = last_refresh
                .map_or(true, |at| at.elapsed().as_secs() >= refresh_frequency);
            if refresh_due {
                let fresh = match load_instances(&source, &self.registry).await {
                    Ok(fresh) => fresh,
                    Err(err) => {
                        tracing::error!("Failed to load configuration from backend: {}", err);
                        return Err(err);
                    }
                };
                let delta = apply_refresh(&mut states, fresh, &mut draining);
                last_refresh = Some(Instant::now());
                tracing::info!(
                    "Configuration refreshed: {} added, {} removed, {} replaced",
                    delta.added,
                    delta.removed,
                    delta.replaced
                );
            }

            // Reap finished workers so instances become dispatchable again.
            for state in states.values_mut() {
                if state.handle.as_ref().is_some_and(|handle| handle.is_finished()) {
                    state.handle = None;
                }
            }
            draining.retain(|handle| !handle.is_finished());

            // Start a worker for every idle instance whose cadence has come
            // around.
            for state in states.values_mut() {
                if state.handle.is_some() {
                    continue;
                }
                let due = state
                    .last
                    .map_or(true, |at| at.elapsed().as_secs() >= state.instance.frequency);
                if !due {
                    continue;
                }

                state.last = Some(Instant::now());
                state.handle = Some(self.spawn_run(
                    state.instance.clone(),
                    semaphore.clone(),
                    shutdown_rx.clone(),
                    Some(run_deadline(state.instance.frequency)),
                ));
            }
        }

        // Signal batch-boundary cancellation and wait out the grace period.
        let _ = shutdown_tx.send(true);
        let mut remaining: Vec<JoinHandle<bool>> = states
            .into_values()
            .filter_map(|state| state.handle)
            .chain(draining)
            .collect();

        let grace = Duration::from_secs(SHUTDOWN_GRACE_SECS);
        let drained = tokio::time::timeout(grace, async {
            for handle in &mut remaining {
                let _ = handle.await;
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                "In-flight runs did not stop within {}s, exiting anyway",
                SHUTDOWN_GRACE_SECS
            );
            for handle in &remaining {
                handle.abort();
            }
        }

        tracing::info!("Scheduler stopped");
        Ok(())
    }

    /// Spawns one worker for one run of one instance. The returned handle
    /// resolves to false when the run ended in a fatal error.
    fn spawn_run(
        &self,
        instance: Arc<Instance>,
        semaphore: Arc<Semaphore>,
        shutdown: watch::Receiver<bool>,
        deadline: Option<Duration>,
    ) -> JoinHandle<bool> {
        let scheduler = self.clone();

        tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return true;
            };

            let run = run_instance(
                &instance.connector,
                &instance.config,
                &scheduler.registry,
                &scheduler.backends,
                &scheduler.runtime,
                shutdown,
            );

            let outcome = match deadline {
                Some(deadline) => match tokio::time::timeout(deadline, run).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        tracing::warn!(
                            connector = %instance.config.connector,
                            identity = %instance.config.identity,
                            "Run deadline expired, pointer retains last checkpoint"
                        );
                        return true;
                    }
                },
                None => run.await,
            };

            match outcome {
                Ok(summary) if summary.skipped => {
                    tracing::info!(
                        configuration = %instance.config.name,
                        connector = %instance.config.connector,
                        "Run skipped, another process is collecting"
                    );
                    true
                }
                Ok(summary) => {
                    tracing::info!(
                        configuration = %instance.config.name,
                        connector = %instance.config.connector,
                        saved = summary.saved,
                        parts = summary.parts,
                        "Connector has exited"
                    );
                    true
                }
                Err(err) => {
                    tracing::error!(
                        configuration = %instance.config.name,
                        connector = %instance.config.connector,
                        "Connector exited abnormally: {}",
                        err
                    );
                    false
                }
            }
        })
    }
}

/// Applies a refreshed instance set to the daemon state.
///
/// New instances are inserted, disappeared instances are dropped (any
/// in-flight run moves to the draining list and completes), and changed
/// documents replace their instance while keeping the last-run timestamp so
/// an edit does not trigger an immediate run.
fn apply_refresh(
    states: &mut HashMap<String, InstanceState>,
    fresh: Vec<Instance>,
    draining: &mut Vec<JoinHandle<bool>>,
) -> RefreshDelta {
    let mut delta = RefreshDelta::default();
    let mut incoming: HashMap<String, Instance> = fresh
        .into_iter()
        .map(|instance| (instance.config.reference(), instance))
        .collect();

    states.retain(|reference, state| {
        if incoming.contains_key(reference) {
            return true;
        }
        delta.removed += 1;
        if let Some(handle) = state.handle.take() {
            draining.push(handle);
        }
        false
    });

    for (reference, instance) in incoming.drain() {
        match states.get_mut(&reference) {
            Some(state) if state.instance.document_hash == instance.document_hash => {}
            Some(state) => {
                state.instance = Arc::new(instance);
                delta.replaced += 1;
            }
            None => {
                states.insert(
                    reference,
                    InstanceState {
                        instance: Arc::new(instance),
                        last: None,
                        handle: None,
                    },
                );
                delta.added += 1;
            }
        }
    }

    delta
}

/// Per-run deadline in daemon mode: the instance's frequency minus a small
/// margin, so a hung run cannot overlap its successor.
fn run_deadline(frequency: u64) -> Duration {
    Duration::from_secs(frequency.saturating_sub(RUN_DEADLINE_MARGIN_SECS).max(1))
}

fn worker_count() -> Result<usize> {
    match std::env::var(ENV_GROVE_WORKER_COUNT) {
        Err(_) => Ok(DEFAULT_WORKER_COUNT),
        Ok(raw) => raw.parse().map_err(|_| {
            Error::Configuration(format!("{ENV_GROVE_WORKER_COUNT} must be a number"))
        }),
    }
}

fn config_refresh() -> Result<u64> {
    match std::env::var(ENV_GROVE_CONFIG_REFRESH) {
        Err(_) => Ok(DEFAULT_CONFIG_REFRESH),
        Ok(raw) => raw.parse().map_err(|_| {
            Error::Configuration(format!("{ENV_GROVE_CONFIG_REFRESH} must be a number"))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::InitialPointer;
    use crate::pipeline::Run;
    use async_trait::async_trait;

    #[derive(Debug)]
    struct NullConnector;

    #[async_trait]
    impl Connector for NullConnector {
        fn name(&self) -> &'static str {
            "null"
        }
        fn pointer_path(&self) -> &'static str {
            "timestamp"
        }
        fn initial_pointer(&self) -> InitialPointer {
            InitialPointer::Literal("0".to_string())
        }
        async fn collect(&self, _run: &mut Run) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn registry_with_null() -> Registry {
        let mut registry = Registry::with_builtins();
        registry.register_connector("null", || Arc::new(NullConnector));
        registry
    }

    fn instance(name: &str, identity: &str, hash: &str, frequency: u64) -> Instance {
        let config = ConnectorConfig::from_slice(
            format!(
                r#"{{"name": "{name}", "identity": "{identity}", "connector": "null"}}"#
            )
            .as_bytes(),
        )
        .unwrap();
        Instance {
            config,
            connector: Arc::new(NullConnector),
            document_hash: hash.to_string(),
            frequency,
        }
    }

    #[tokio::test]
    async fn test_load_instances_skips_bad_documents() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("good.json"),
            br#"{"name": "a", "identity": "i", "connector": "null"}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.json"), b"{not json").unwrap();
        std::fs::write(
            dir.path().join("unknown.json"),
            br#"{"name": "b", "identity": "i", "connector": "missing"}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("disabled.json"),
            br#"{"name": "c", "identity": "i2", "connector": "null", "disabled": true}"#,
        )
        .unwrap();

        let source: Arc<dyn ConfigSource> = Arc::new(
            crate::config::LocalFileConfig::new(dir.path().to_path_buf()),
        );
        let instances = load_instances(&source, &registry_with_null()).await.unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].config.name, "a");
    }

    #[tokio::test]
    async fn test_load_instances_rejects_duplicate_reference() {
        let dir = tempfile::tempdir().unwrap();
        // Same (connector, identity, operation) triple under two names.
        std::fs::write(
            dir.path().join("a.json"),
            br#"{"name": "first", "identity": "i", "connector": "null"}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("b.json"),
            br#"{"name": "second", "identity": "i", "connector": "null"}"#,
        )
        .unwrap();

        let source: Arc<dyn ConfigSource> = Arc::new(
            crate::config::LocalFileConfig::new(dir.path().to_path_buf()),
        );
        let instances = load_instances(&source, &registry_with_null()).await.unwrap();
        assert_eq!(instances.len(), 1);
    }

    #[tokio::test]
    async fn test_load_instances_uses_connector_default_frequency() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.json"),
            br#"{"name": "a", "identity": "i", "connector": "null"}"#,
        )
        .unwrap();

        let source: Arc<dyn ConfigSource> = Arc::new(
            crate::config::LocalFileConfig::new(dir.path().to_path_buf()),
        );
        let instances = load_instances(&source, &registry_with_null()).await.unwrap();
        assert_eq!(instances[0].frequency, 600);
    }

    #[test]
    fn test_apply_refresh_adds_and_removes() {
        let mut states = HashMap::new();
        let mut draining = Vec::new();

        let delta = apply_refresh(
            &mut states,
            vec![instance("a", "one", "h1", 60), instance("b", "two", "h2", 60)],
            &mut draining,
        );
        assert_eq!(delta, RefreshDelta { added: 2, removed: 0, replaced: 0 });

        // Second refresh: "one" disappeared, "three" appeared.
        let delta = apply_refresh(
            &mut states,
            vec![instance("b", "two", "h2", 60), instance("c", "three", "h3", 60)],
            &mut draining,
        );
        assert_eq!(delta, RefreshDelta { added: 1, removed: 1, replaced: 0 });
        assert_eq!(states.len(), 2);
        assert!(!states.contains_key("null.one.all"));
    }

    #[test]
    fn test_apply_refresh_replaces_changed_documents() {
        let mut states = HashMap::new();
        let mut draining = Vec::new();

        apply_refresh(&mut states, vec![instance("a", "one", "h1", 60)], &mut draining);
        states.get_mut("null.one.all").unwrap().last = Some(Instant::now());

        let delta = apply_refresh(
            &mut states,
            vec![instance("a", "one", "h1-edited", 120)],
            &mut draining,
        );
        assert_eq!(delta, RefreshDelta { added: 0, removed: 0, replaced: 1 });

        let state = &states["null.one.all"];
        assert_eq!(state.instance.frequency, 120);
        // A config edit keeps the last-run timestamp: no immediate re-run.
        assert!(state.last.is_some());
    }

    #[test]
    fn test_apply_refresh_unchanged_document_untouched() {
        let mut states = HashMap::new();
        let mut draining = Vec::new();

        apply_refresh(&mut states, vec![instance("a", "one", "h1", 60)], &mut draining);
        let before = Arc::as_ptr(&states["null.one.all"].instance);

        let delta = apply_refresh(&mut states, vec![instance("a", "one", "h1", 60)], &mut draining);
        assert_eq!(delta, RefreshDelta::default());
        assert_eq!(before, Arc::as_ptr(&states["null.one.all"].instance));
    }

    #[test]
    fn test_run_deadline_floors_at_one_second() {
        assert_eq!(run_deadline(600), Duration::from_secs(595));
        assert_eq!(run_deadline(4), Duration::from_secs(1));
    }
}
