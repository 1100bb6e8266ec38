// src/cache/redis_store.rs

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use crate::{cache::CacheStore, error::AppError};

/// Cache store backed by Redis; timers and cached content outlive process restarts.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self, AppError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

/// Redis rejects a zero expiry.
fn expiry_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Inclusive LRANGE bounds for `len` elements from `start`.
fn range_bounds(start: usize, len: usize) -> Option<(isize, isize)> {
    if len == 0 {
        return None;
    }
    let stop = start.saturating_add(len - 1);
    Some((
        isize::try_from(start).unwrap_or(isize::MAX),
        isize::try_from(stop).unwrap_or(isize::MAX),
    ))
}

/// PTTL answers -2 for a missing key and -1 for a key without expiry.
fn remaining(pttl: i64) -> Option<Duration> {
    u64::try_from(pttl).ok().map(Duration::from_millis)
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(expiry_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_nx_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, AppError> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(expiry_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, AppError> {
        let mut conn = self.conn.clone();
        let count: i64 = redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?;
        Ok(count > 0)
    }

    async fn delete(&self, key: &str) -> Result<bool, AppError> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn list_push(&self, key: &str, values: &[String]) -> Result<usize, AppError> {
        if values.is_empty() {
            return self.list_len(key).await;
        }
        let mut conn = self.conn.clone();
        let len: usize = redis::cmd("RPUSH")
            .arg(key)
            .arg(values)
            .query_async(&mut conn)
            .await?;
        Ok(len)
    }

    async fn list_range(
        &self,
        key: &str,
        start: usize,
        len: usize,
    ) -> Result<Vec<String>, AppError> {
        let Some((first, last)) = range_bounds(start, len) else {
            return Ok(Vec::new());
        };
        let mut conn = self.conn.clone();
        let items: Vec<String> = redis::cmd("LRANGE")
            .arg(key)
            .arg(first)
            .arg(last)
            .query_async(&mut conn)
            .await?;
        Ok(items)
    }

    async fn list_len(&self, key: &str) -> Result<usize, AppError> {
        let mut conn = self.conn.clone();
        let len: usize = redis::cmd("LLEN").arg(key).query_async(&mut conn).await?;
        Ok(len)
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("HSET")
            .arg(key)
            .arg(field)
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, AppError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, AppError> {
        let mut conn = self.conn.clone();
        let pttl: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await?;
        Ok(remaining(pttl))
    }
}
