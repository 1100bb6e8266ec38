// src/services/timer.rs

use std::{sync::Arc, time::Duration};

use chrono::Utc;

use crate::{
    cache::{CacheStore, expire_key},
    error::AppError,
};

/// Converts a test's configured duration into the countdown length.
pub fn exam_duration(minutes: i64) -> Result<Duration, AppError> {
    if minutes <= 0 {
        return Err(AppError::PreconditionFailed(format!(
            "test duration must be positive, got {} minutes",
            minutes
        )));
    }
    let secs = u64::try_from(minutes)
        .ok()
        .and_then(|m| m.checked_mul(60))
        .ok_or_else(|| {
            AppError::PreconditionFailed(format!("test duration of {} minutes is too long", minutes))
        })?;
    Ok(Duration::from_secs(secs))
}

/// Exam countdown per (test, candidate), kept as an expiring cache key.
///
/// The key is created once and never refreshed; its absence after the
/// session started means time is up.
#[derive(Clone)]
pub struct SessionTimer {
    cache: Arc<dyn CacheStore>,
}

impl SessionTimer {
    pub fn new(cache: Arc<dyn CacheStore>) -> Self {
        Self { cache }
    }

    /// Starts the countdown unless it already exists. Returns whether this call started it.
    pub async fn start(
        &self,
        test_id: i64,
        user_id: i64,
        duration: Duration,
    ) -> Result<bool, AppError> {
        let started = self
            .cache
            .set_nx_with_ttl(
                &expire_key(test_id, user_id),
                &Utc::now().to_rfc3339(),
                duration,
            )
            .await?;
        if started {
            tracing::info!(test_id, user_id, secs = duration.as_secs(), "Exam timer started");
        }
        Ok(started)
    }

    pub async fn remaining(&self, test_id: i64, user_id: i64) -> Result<Option<Duration>, AppError> {
        self.cache.ttl(&expire_key(test_id, user_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    #[test]
    fn duration_rejects_non_positive_minutes() {
        assert_eq!(exam_duration(30).unwrap(), Duration::from_secs(1800));
        assert!(matches!(
            exam_duration(0),
            Err(AppError::PreconditionFailed(_))
        ));
    }

    #[test]
    fn duration_rejects_overflowing_minutes() {
        assert!(matches!(
            exam_duration(i64::MAX),
            Err(AppError::PreconditionFailed(_))
        ));
        assert!(exam_duration(i64::MAX / 60).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn timer_is_set_once_and_never_extended() {
        let timer = SessionTimer::new(Arc::new(MemoryCache::new()));
        assert!(timer.start(1, 2, Duration::from_secs(600)).await.unwrap());

        tokio::time::advance(Duration::from_secs(100)).await;
        let before = timer.remaining(1, 2).await.unwrap().unwrap();
        assert!(!timer.start(1, 2, Duration::from_secs(600)).await.unwrap());
        let after = timer.remaining(1, 2).await.unwrap().unwrap();

        assert_eq!(before, Duration::from_secs(500));
        assert!(after <= before);

        tokio::time::advance(Duration::from_secs(500)).await;
        assert_eq!(timer.remaining(1, 2).await.unwrap(), None);
    }
}
