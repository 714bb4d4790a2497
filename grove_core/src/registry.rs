//! Handler registry — name to constructor, populated at process startup.
//!
//! Connectors and backends are referenced by string name from configuration
//! documents and environment variables. Each linked-in module registers its
//! constructors here during startup; lookups happen when instances are built
//! or backends are initialized.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::{Cache, LocalFileCache, LocalMemoryCache};
use crate::config::{ConfigSource, LocalFileConfig};
use crate::connector::Connector;
use crate::constants::{
    DEFAULT_CACHE_HANDLER, DEFAULT_CONFIG_HANDLER, DEFAULT_OUTPUT_HANDLER,
    ENV_GROVE_CACHE_HANDLER, ENV_GROVE_CONFIG_HANDLER, ENV_GROVE_OUTPUT_HANDLER,
    ENV_GROVE_SECRET_HANDLER,
};
use crate::error::{Error, Result};
use crate::output::{LocalFileOutput, LocalStdoutOutput, Output};
use crate::processor::{ProcessorCtor, SplitPath, ZipPaths};
use crate::secret::{LocalFileSecrets, SecretStore};

pub type ConnectorCtor = fn() -> Arc<dyn Connector>;
pub type CacheCtor = fn() -> Result<Arc<dyn Cache>>;
pub type ConfigCtor = fn() -> Result<Arc<dyn ConfigSource>>;
pub type OutputCtor = fn() -> Result<Arc<dyn Output>>;
pub type SecretCtor = fn() -> Result<Arc<dyn SecretStore>>;

/// Maps handler names to constructors for every extension point.
#[derive(Default)]
pub struct Registry {
    connectors: HashMap<&'static str, ConnectorCtor>,
    caches: HashMap<&'static str, CacheCtor>,
    configs: HashMap<&'static str, ConfigCtor>,
    outputs: HashMap<&'static str, OutputCtor>,
    secrets: HashMap<&'static str, SecretCtor>,
    processors: HashMap<&'static str, ProcessorCtor>,
}

impl Registry {
    /// An empty registry with no handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in backends and processors.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        registry.register_cache("local_memory", || Ok(Arc::new(LocalMemoryCache::new())));
        registry.register_cache("local_file", || Ok(Arc::new(LocalFileCache::from_env()?)));
        registry.register_config("local_file", || Ok(Arc::new(LocalFileConfig::from_env()?)));
        registry.register_output("local_stdout", || Ok(Arc::new(LocalStdoutOutput::new())));
        registry.register_output("local_file", || Ok(Arc::new(LocalFileOutput::from_env()?)));
        registry.register_secret("local_file", || Ok(Arc::new(LocalFileSecrets::from_env()?)));
        registry.register_processor("split_path", SplitPath::from_config);
        registry.register_processor("zip_paths", ZipPaths::from_config);

        registry
    }

    pub fn register_connector(&mut self, name: &'static str, ctor: ConnectorCtor) {
        self.connectors.insert(name, ctor);
    }

    pub fn register_cache(&mut self, name: &'static str, ctor: CacheCtor) {
        self.caches.insert(name, ctor);
    }

    pub fn register_config(&mut self, name: &'static str, ctor: ConfigCtor) {
        self.configs.insert(name, ctor);
    }

    pub fn register_output(&mut self, name: &'static str, ctor: OutputCtor) {
        self.outputs.insert(name, ctor);
    }

    pub fn register_secret(&mut self, name: &'static str, ctor: SecretCtor) {
        self.secrets.insert(name, ctor);
    }

    pub fn register_processor(&mut self, name: &'static str, ctor: ProcessorCtor) {
        self.processors.insert(name, ctor);
    }

    /// Builds the connector body registered under the given name.
    pub fn connector(&self, name: &str) -> Result<Arc<dyn Connector>> {
        self.connectors
            .get(name)
            .map(|ctor| ctor())
            .ok_or_else(|| Error::UnknownHandler {
                role: "connector",
                name: name.to_string(),
            })
    }

    /// Looks up a processor constructor by name.
    pub fn processor(&self, name: &str) -> Result<ProcessorCtor> {
        self.processors
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownHandler {
                role: "processor",
                name: name.to_string(),
            })
    }

    /// Builds the cache backend selected by `GROVE_CACHE_HANDLER`.
    pub fn cache_from_env(&self) -> Result<Arc<dyn Cache>> {
        let name = env_or(ENV_GROVE_CACHE_HANDLER, DEFAULT_CACHE_HANDLER);
        let ctor = self.caches.get(name.as_str()).ok_or(Error::UnknownHandler {
            role: "cache",
            name: name.clone(),
        })?;
        ctor()
    }

    /// Builds the config backend selected by `GROVE_CONFIG_HANDLER`.
    pub fn config_from_env(&self) -> Result<Arc<dyn ConfigSource>> {
        let name = env_or(ENV_GROVE_CONFIG_HANDLER, DEFAULT_CONFIG_HANDLER);
        let ctor = self.configs.get(name.as_str()).ok_or(Error::UnknownHandler {
            role: "config",
            name: name.clone(),
        })?;
        ctor()
    }

    /// Builds the output backend selected by `GROVE_OUTPUT_HANDLER`.
    pub fn output_from_env(&self) -> Result<Arc<dyn Output>> {
        let name = env_or(ENV_GROVE_OUTPUT_HANDLER, DEFAULT_OUTPUT_HANDLER);
        let ctor = self.outputs.get(name.as_str()).ok_or(Error::UnknownHandler {
            role: "output",
            name: name.clone(),
        })?;
        ctor()
    }

    /// Builds the secret backend selected by `GROVE_SECRET_HANDLER`, or
    /// `None` when the variable is unset — secret backends are optional.
    pub fn secret_from_env(&self) -> Result<Option<Arc<dyn SecretStore>>> {
        let Ok(name) = std::env::var(ENV_GROVE_SECRET_HANDLER) else {
            return Ok(None);
        };
        let ctor = self.secrets.get(name.as_str()).ok_or(Error::UnknownHandler {
            role: "secret",
            name: name.clone(),
        })?;
        Ok(Some(ctor()?))
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let registry = Registry::with_builtins();
        assert!(registry.processor("split_path").is_ok());
        assert!(registry.processor("zip_paths").is_ok());
        assert!(registry.caches.contains_key("local_memory"));
        assert!(registry.outputs.contains_key("local_stdout"));
        assert!(registry.configs.contains_key("local_file"));
    }

    #[test]
    fn test_unknown_connector_named_in_error() {
        let registry = Registry::with_builtins();
        let err = registry.connector("does_not_exist").unwrap_err();
        assert_eq!(err.to_string(), "unknown connector handler 'does_not_exist'");
    }

    #[test]
    fn test_unknown_processor_rejected() {
        let registry = Registry::with_builtins();
        assert!(registry.processor("reverse_paths").is_err());
    }
}
