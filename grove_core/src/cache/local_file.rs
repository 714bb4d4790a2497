//! File-backed cache handler.
//!
//! Persists the whole cache as a single JSON document so that pointers
//! survive restarts of a single-host deployment. Set
//! `GROVE_CACHE_LOCAL_FILE_PATH` to the backing file. All operations are
//! serialized through one mutex; the file is rewritten and flushed on every
//! mutation so a checkpointed pointer is durable before the call returns.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::cache::{Cache, Constraint};
use crate::error::{Error, Result};

/// Environment variable naming the backing file.
pub const ENV_PATH: &str = "GROVE_CACHE_LOCAL_FILE_PATH";

type Partitions = HashMap<String, HashMap<String, String>>;

/// A cache handler persisting to a local JSON file.
#[derive(Debug)]
pub struct LocalFileCache {
    path: PathBuf,
    data: Mutex<Partitions>,
}

impl LocalFileCache {
    /// Creates the handler from its environment configuration.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var(ENV_PATH)
            .map_err(|_| Error::Configuration(format!("{ENV_PATH} must be set")))?;
        Self::new(PathBuf::from(path))
    }

    /// Creates the handler against an explicit path, loading any existing
    /// content.
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = match std::fs::read(&path) {
            Ok(raw) => serde_json::from_slice(&raw)
                .map_err(|err| Error::Format(format!("cache file is not valid JSON: {err}")))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Partitions::new(),
            Err(err) => return Err(err.into()),
        };

        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    fn persist(&self, data: &Partitions) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = std::fs::File::create(&self.path)?;
        file.write_all(&serde_json::to_vec(data)?)?;
        file.sync_all()?;
        Ok(())
    }
}

fn check_constraint(current: Option<&String>, constraint: &Constraint) -> Result<()> {
    match constraint {
        Constraint::Unconditional => Ok(()),
        Constraint::Absent if current.is_none() => Ok(()),
        Constraint::Absent => Err(Error::Conflict("value already present".to_string())),
        Constraint::Equals(expected) => match current {
            Some(existing) if existing == expected => Ok(()),
            _ => Err(Error::Conflict(format!("expected '{expected}'"))),
        },
    }
}

#[async_trait]
impl Cache for LocalFileCache {
    async fn get(&self, pk: &str, sk: &str) -> Result<String> {
        let data = self.data.lock().map_err(|_| poisoned())?;

        data.get(pk)
            .and_then(|partition| partition.get(sk))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no value for {pk}/{sk}")))
    }

    async fn set(&self, pk: &str, sk: &str, value: &str, constraint: Constraint) -> Result<()> {
        let mut data = self.data.lock().map_err(|_| poisoned())?;

        let current = data.get(pk).and_then(|partition| partition.get(sk));
        check_constraint(current, &constraint)?;

        data.entry(pk.to_string())
            .or_default()
            .insert(sk.to_string(), value.to_string());
        self.persist(&data)
    }

    async fn delete(&self, pk: &str, sk: &str, constraint: Option<&str>) -> Result<()> {
        let mut data = self.data.lock().map_err(|_| poisoned())?;

        if let Some(expected) = constraint {
            let current = data.get(pk).and_then(|partition| partition.get(sk));
            check_constraint(current, &Constraint::Equals(expected.to_string()))?;
        }

        if let Some(partition) = data.get_mut(pk) {
            partition.remove(sk);
            if partition.is_empty() {
                data.remove(pk);
            }
        }
        self.persist(&data)
    }
}

fn poisoned() -> Error {
    Error::Access("cache mutex poisoned".to_string())
}
