//! Shared plumbing for the Grove entrypoints.
//!
//! Both binaries — `grove` (one-shot) and `groved` (daemon) — configure the
//! process identically: tracing from `GROVE_LOG_LEVEL`/`GROVE_LOG_FORMAT`,
//! handlers from the `GROVE_*_HANDLER` environment variables, and a runtime
//! context stamped onto every collected record. All configuration is
//! environmental; the binaries take no flags beyond `--help`/`--version`.

use std::collections::HashMap;
use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use grove_core::config::ConfigSource;
use grove_core::pipeline::Backends;
use grove_core::scheduler::Scheduler;
use grove_core::{Error, Registry};

/// Exit codes shared by both entrypoints.
pub const EXIT_SUCCESS: i32 = 0;
/// At least one instance fatally failed.
pub const EXIT_INSTANCE_FAILED: i32 = 1;
/// Configuration invalid at startup; no instances loaded.
pub const EXIT_NO_INSTANCES: i32 = 2;
/// A backend handler was not found or failed to initialize.
pub const EXIT_BACKEND: i32 = 3;

/// Initializes tracing for the process.
///
/// `GROVE_LOG_LEVEL` holds an `EnvFilter` directive (default `info`);
/// `GROVE_LOG_FORMAT=json` switches to structured JSON output.
pub fn init_logging() {
    let filter = EnvFilter::try_from_env("GROVE_LOG_LEVEL")
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var("GROVE_LOG_FORMAT").is_ok_and(|format| format == "json");
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Contextual information about the current runtime, stamped onto every
/// record's provenance and used as the lock owner identifier.
pub fn runtime_information(entrypoint: &str) -> HashMap<String, String> {
    let mut runtime = HashMap::from([
        ("runtime".to_string(), entrypoint.to_string()),
        ("runtime_id".to_string(), std::process::id().to_string()),
    ]);

    if let Ok(host) = hostname::get() {
        runtime.insert(
            "runtime_host".to_string(),
            host.to_string_lossy().into_owned(),
        );
    }

    runtime
}

/// The initialized scheduler and its configuration source.
pub struct Bootstrap {
    pub scheduler: Scheduler,
    pub source: Arc<dyn ConfigSource>,
}

/// Builds the registry, backends, and scheduler from the environment.
pub fn bootstrap(entrypoint: &str) -> grove_core::Result<Bootstrap> {
    let mut registry = Registry::with_builtins();
    grove_connectors::register(&mut registry);
    let registry = Arc::new(registry);

    let backends = Backends {
        cache: registry.cache_from_env()?,
        output: registry.output_from_env()?,
        secrets: registry.secret_from_env()?,
    };
    let source = registry.config_from_env()?;

    Ok(Bootstrap {
        scheduler: Scheduler::new(registry, backends, runtime_information(entrypoint)),
        source,
    })
}

/// Maps a startup error onto the documented exit codes.
pub fn exit_code_for(err: &Error) -> i32 {
    match err {
        Error::Configuration(_) => EXIT_NO_INSTANCES,
        _ => EXIT_BACKEND,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_information_contents() {
        let runtime = runtime_information("grove");
        assert_eq!(runtime.get("runtime").map(String::as_str), Some("grove"));
        assert!(runtime.contains_key("runtime_id"));
        assert!(runtime["runtime_id"].parse::<u32>().is_ok());
    }

    #[test]
    fn test_exit_code_mapping() {
        assert_eq!(
            exit_code_for(&Error::Configuration("bad".into())),
            EXIT_NO_INSTANCES
        );
        assert_eq!(
            exit_code_for(&Error::UnknownHandler {
                role: "cache",
                name: "dynamo".into()
            }),
            EXIT_BACKEND
        );
        assert_eq!(exit_code_for(&Error::Access("down".into())), EXIT_BACKEND);
    }
}
