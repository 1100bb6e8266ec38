// src/cache.rs

//! Key/value cache holding bootstrapped test content and exam timers.
//!
//! Every operation is atomic per key; callers build their protocols
//! (single bootstrap, set-once timer) out of these primitives only.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::AppError;

mod redis_store;

pub use redis_store::RedisCache;

/// Ordered item ids of a test.
pub fn order_key(test_id: i64) -> String {
    format!("{}:order", test_id)
}

/// Item payloads of a test, keyed by item id.
pub fn data_key(test_id: i64) -> String {
    format!("{}:data", test_id)
}

/// Exam countdown of one candidate.
pub fn expire_key(test_id: i64, user_id: i64) -> String {
    format!("{}:expire:{}", test_id, user_id)
}

/// Held while one request bootstraps a test's content.
pub fn bootstrap_key(test_id: i64) -> String {
    format!("{}:bootstrap", test_id)
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AppError>;

    /// Sets `key` only if absent. Returns whether this call created it.
    async fn set_nx_with_ttl(&self, key: &str, value: &str, ttl: Duration)
    -> Result<bool, AppError>;

    async fn exists(&self, key: &str) -> Result<bool, AppError>;

    async fn delete(&self, key: &str) -> Result<bool, AppError>;

    /// Appends all `values` in one step. Returns the new list length.
    async fn list_push(&self, key: &str, values: &[String]) -> Result<usize, AppError>;

    /// Up to `len` elements starting at `start`.
    async fn list_range(&self, key: &str, start: usize, len: usize)
    -> Result<Vec<String>, AppError>;

    async fn list_len(&self, key: &str) -> Result<usize, AppError>;

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), AppError>;

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, AppError>;

    /// Remaining time to live; `None` when the key is missing or never expires.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, AppError>;
}

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    List(Vec<String>),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-process cache store for tests and single-process runs.
///
/// Expiry follows `tokio::time`, so paused-clock tests can fast-forward timers.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the map and drops `key` if it already expired.
    fn locked(&self, key: &str) -> Result<MutexGuard<'_, HashMap<String, Entry>>, AppError> {
        let mut map = self
            .entries
            .lock()
            .map_err(|_| AppError::InternalServerError("cache lock poisoned".to_string()))?;
        let now = Instant::now();
        if map.get(key).is_some_and(|e| !e.live(now)) {
            map.remove(key);
        }
        Ok(map)
    }
}

fn wrong_type(key: &str) -> AppError {
    AppError::InternalServerError(format!("cache key {} holds the wrong kind of value", key))
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AppError> {
        let mut map = self.locked(key)?;
        map.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn set_nx_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, AppError> {
        let mut map = self.locked(key)?;
        if map.contains_key(key) {
            return Ok(false);
        }
        map.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn exists(&self, key: &str) -> Result<bool, AppError> {
        Ok(self.locked(key)?.contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<bool, AppError> {
        Ok(self.locked(key)?.remove(key).is_some())
    }

    async fn list_push(&self, key: &str, values: &[String]) -> Result<usize, AppError> {
        let mut map = self.locked(key)?;
        if values.is_empty() {
            return match map.get(key).map(|e| &e.value) {
                Some(Value::List(list)) => Ok(list.len()),
                Some(_) => Err(wrong_type(key)),
                None => Ok(0),
            };
        }
        let entry = map.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::List(Vec::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::List(list) => {
                list.extend(values.iter().cloned());
                Ok(list.len())
            }
            _ => Err(wrong_type(key)),
        }
    }

    async fn list_range(
        &self,
        key: &str,
        start: usize,
        len: usize,
    ) -> Result<Vec<String>, AppError> {
        let map = self.locked(key)?;
        match map.get(key).map(|e| &e.value) {
            Some(Value::List(list)) => Ok(list.iter().skip(start).take(len).cloned().collect()),
            Some(_) => Err(wrong_type(key)),
            None => Ok(Vec::new()),
        }
    }

    async fn list_len(&self, key: &str) -> Result<usize, AppError> {
        let map = self.locked(key)?;
        match map.get(key).map(|e| &e.value) {
            Some(Value::List(list)) => Ok(list.len()),
            Some(_) => Err(wrong_type(key)),
            None => Ok(0),
        }
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), AppError> {
        let mut map = self.locked(key)?;
        let entry = map.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Hash(HashMap::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::Hash(hash) => {
                hash.insert(field.to_string(), value.to_string());
                Ok(())
            }
            _ => Err(wrong_type(key)),
        }
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, AppError> {
        let map = self.locked(key)?;
        match map.get(key).map(|e| &e.value) {
            Some(Value::Hash(hash)) => Ok(hash.get(field).cloned()),
            Some(_) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, AppError> {
        let map = self.locked(key)?;
        let now = Instant::now();
        Ok(map
            .get(key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_nx_only_creates_once() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);
        assert!(cache.set_nx_with_ttl("k", "1", ttl).await.unwrap());
        assert!(!cache.set_nx_with_ttl("k", "2", ttl).await.unwrap());
        assert!(cache.exists("k").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn keys_expire_after_ttl() {
        let cache = MemoryCache::new();
        cache
            .set_with_ttl("timer", "1", Duration::from_secs(10))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        let remaining = cache.ttl("timer").await.unwrap().unwrap();
        assert_eq!(remaining, Duration::from_secs(6));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!cache.exists("timer").await.unwrap());
        assert_eq!(cache.ttl("timer").await.unwrap(), None);
        // An expired key can be claimed again.
        assert!(
            cache
                .set_nx_with_ttl("timer", "2", Duration::from_secs(1))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn list_push_appends_in_order() {
        let cache = MemoryCache::new();
        let ids: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        assert_eq!(cache.list_push("l", &ids).await.unwrap(), 3);
        assert_eq!(cache.list_len("l").await.unwrap(), 3);
        assert_eq!(cache.list_range("l", 1, 10).await.unwrap(), vec!["b", "c"]);
        assert_eq!(cache.ttl("l").await.unwrap(), None);
    }

    #[tokio::test]
    async fn wrong_kind_is_an_error() {
        let cache = MemoryCache::new();
        cache.hash_set("h", "f", "v").await.unwrap();
        assert_eq!(cache.hash_get("h", "f").await.unwrap().as_deref(), Some("v"));
        assert!(cache.list_push("h", &["x".to_string()]).await.is_err());
    }
}
