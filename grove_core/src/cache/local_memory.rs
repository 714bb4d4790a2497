//! Volatile in-memory cache, the default cache handler.
//!
//! Suitable for one-shot runs and for daemon deployments where duplicate
//! collection after a restart is acceptable — an empty cache means every
//! instance starts from its initial pointer again.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::cache::{Cache, Constraint};
use crate::error::{Error, Result};

/// A volatile in-memory cache for pointers and other engine state.
#[derive(Default)]
pub struct LocalMemoryCache {
    data: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl LocalMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_constraint(current: Option<&String>, constraint: &Constraint) -> Result<()> {
    match constraint {
        Constraint::Unconditional => Ok(()),
        Constraint::Absent => match current {
            None => Ok(()),
            Some(existing) => Err(Error::Conflict(format!(
                "value already present: {existing}"
            ))),
        },
        Constraint::Equals(expected) => match current {
            Some(existing) if existing == expected => Ok(()),
            Some(existing) => Err(Error::Conflict(format!(
                "expected '{expected}', found '{existing}'"
            ))),
            None => Err(Error::Conflict(format!(
                "expected '{expected}', found nothing"
            ))),
        },
    }
}

#[async_trait]
impl Cache for LocalMemoryCache {
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
        Ok(())
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
        Ok(())
    }
}

fn poisoned() -> Error {
    Error::Access("cache mutex poisoned".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let cache = LocalMemoryCache::new();
        let err = cache.get("pointer.a.b", "all").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let cache = LocalMemoryCache::new();
        cache
            .set("pointer.a.b", "all", "1607425434", Constraint::Unconditional)
            .await
            .unwrap();
        assert_eq!(cache.get("pointer.a.b", "all").await.unwrap(), "1607425434");
    }

    #[tokio::test]
    async fn test_absent_constraint_conflicts_when_present() {
        let cache = LocalMemoryCache::new();
        cache
            .set("lock.a.b", "all", "one", Constraint::Absent)
            .await
            .unwrap();

        let err = cache
            .set("lock.a.b", "all", "two", Constraint::Absent)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        // The original value survives the failed write.
        assert_eq!(cache.get("lock.a.b", "all").await.unwrap(), "one");
    }

    #[tokio::test]
    async fn test_equals_constraint() {
        let cache = LocalMemoryCache::new();
        cache
            .set("lock.a.b", "all", "one", Constraint::Unconditional)
            .await
            .unwrap();

        // Wrong expectation rejected.
        let err = cache
            .set("lock.a.b", "all", "two", Constraint::Equals("zero".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        // Correct expectation accepted.
        cache
            .set("lock.a.b", "all", "two", Constraint::Equals("one".into()))
            .await
            .unwrap();
        assert_eq!(cache.get("lock.a.b", "all").await.unwrap(), "two");
    }

    #[tokio::test]
    async fn test_equals_constraint_on_missing_value() {
        let cache = LocalMemoryCache::new();
        let err = cache
            .set("lock.a.b", "all", "v", Constraint::Equals("one".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_conditional_delete() {
        let cache = LocalMemoryCache::new();
        cache
            .set("lock.a.b", "all", "mine", Constraint::Unconditional)
            .await
            .unwrap();

        let err = cache.delete("lock.a.b", "all", Some("theirs")).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        cache.delete("lock.a.b", "all", Some("mine")).await.unwrap();
        assert!(cache.get("lock.a.b", "all").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let cache = LocalMemoryCache::new();
        cache.delete("pointer.a.b", "all", None).await.unwrap();
    }

    #[tokio::test]
    async fn test_sort_keys_are_independent() {
        let cache = LocalMemoryCache::new();
        cache
            .set("pointer.a.b", "audit", "1", Constraint::Unconditional)
            .await
            .unwrap();
        cache
            .set("pointer.a.b", "login", "2", Constraint::Unconditional)
            .await
            .unwrap();
        assert_eq!(cache.get("pointer.a.b", "audit").await.unwrap(), "1");
        assert_eq!(cache.get("pointer.a.b", "login").await.unwrap(), "2");
    }
}
