// src/services/content.rs

//! Test content cache: one provider fetch per test, then every question is
//! served from the cache store.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use tokio::time::Instant;

use crate::{
    cache::{CacheStore, bootstrap_key, data_key, order_key},
    clients::forms::{FormProvider, FormView},
    error::AppError,
    models::form::{FormItem, MediaPayload},
};

const BOOTSTRAP_POLL: Duration = Duration::from_millis(100);

/// Ordered item ids of a cached test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedForm {
    pub test_id: i64,
    pub order: Vec<String>,
}

impl CachedForm {
    pub fn first_id(&self) -> Option<&str> {
        self.order.first().map(String::as_str)
    }

    pub fn position(&self, item_id: &str) -> Option<usize> {
        self.order.iter().position(|id| id == item_id)
    }

    /// Previous and next ids around `index`.
    pub fn neighbours(&self, index: usize) -> (Option<String>, Option<String>) {
        let prev = index
            .checked_sub(1)
            .and_then(|i| self.order.get(i))
            .cloned();
        let next = self.order.get(index + 1).cloned();
        (prev, next)
    }
}

#[derive(Clone)]
pub struct FormContentLoader {
    cache: Arc<dyn CacheStore>,
    provider: Arc<dyn FormProvider>,
    bootstrap_wait: Duration,
}

impl FormContentLoader {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        provider: Arc<dyn FormProvider>,
        bootstrap_wait: Duration,
    ) -> Self {
        Self {
            cache,
            provider,
            bootstrap_wait,
        }
    }

    /// Returns the cached content of a test, bootstrapping it from the form
    /// provider on the first request.
    pub async fn load_or_get(&self, test_id: i64, form_id: &str) -> Result<CachedForm, AppError> {
        if let Some(form) = self.cached(test_id).await? {
            return Ok(form);
        }

        let marker = bootstrap_key(test_id);
        if !self
            .cache
            .set_nx_with_ttl(&marker, form_id, self.bootstrap_wait)
            .await?
        {
            return self.wait_for_bootstrap(test_id).await;
        }

        // Another request may have finished between the miss and the marker.
        let result = match self.cached(test_id).await {
            Ok(Some(form)) => Ok(form),
            Ok(None) => self.bootstrap(test_id, form_id).await,
            Err(e) => Err(e),
        };
        if let Err(e) = self.cache.delete(&marker).await {
            tracing::warn!(test_id, "Failed to release bootstrap marker: {}", e);
        }
        result
    }

    pub async fn order(&self, test_id: i64) -> Result<Vec<String>, AppError> {
        Ok(self
            .cached(test_id)
            .await?
            .map(|form| form.order)
            .unwrap_or_default())
    }

    pub async fn item(&self, test_id: i64, item_id: &str) -> Result<Option<FormItem>, AppError> {
        let Some(raw) = self.cache.hash_get(&data_key(test_id), item_id).await? else {
            return Ok(None);
        };
        let item = serde_json::from_str(&raw).map_err(|e| {
            tracing::error!(test_id, item_id, "Corrupt cached item: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;
        Ok(Some(item))
    }

    pub async fn is_cached(&self, test_id: i64) -> Result<bool, AppError> {
        self.cache.exists(&order_key(test_id)).await
    }

    /// Drops the cached content; the next request bootstraps it again.
    pub async fn evict(&self, test_id: i64) -> Result<bool, AppError> {
        // The order list marks presence, so it goes first.
        let had_order = self.cache.delete(&order_key(test_id)).await?;
        let had_data = self.cache.delete(&data_key(test_id)).await?;
        Ok(had_order || had_data)
    }

    async fn cached(&self, test_id: i64) -> Result<Option<CachedForm>, AppError> {
        let key = order_key(test_id);
        let len = self.cache.list_len(&key).await?;
        if len == 0 {
            return Ok(None);
        }
        let order = self.cache.list_range(&key, 0, len).await?;
        Ok(Some(CachedForm { test_id, order }))
    }

    async fn bootstrap(&self, test_id: i64, form_id: &str) -> Result<CachedForm, AppError> {
        tracing::info!(test_id, form_id, "Bootstrapping test content");
        let items = self.provider.fetch_form(form_id, FormView::Candidate).await?;

        let mut seen = HashSet::new();
        let mut media: HashMap<String, MediaPayload> = HashMap::new();
        let mut order = Vec::with_capacity(items.len());
        let mut payloads = Vec::with_capacity(items.len());

        for mut item in items {
            let item_id = item.id().to_string();
            if !seen.insert(item_id.clone()) {
                tracing::warn!(test_id, item_id = %item_id, "Duplicate item id in form, skipping");
                continue;
            }

            item.strip_grading();
            item.sanitize_text();
            for slot in item.media_mut() {
                let Some(uri) = slot.remote_uri().map(str::to_string) else {
                    continue;
                };
                let payload = match media.get(&uri) {
                    Some(payload) => payload.clone(),
                    None => {
                        let payload = self.provider.fetch_media(&uri).await?;
                        media.insert(uri, payload.clone());
                        payload
                    }
                };
                slot.embed(&payload);
            }

            let raw = serde_json::to_string(&item)
                .map_err(|e| AppError::InternalServerError(e.to_string()))?;
            order.push(item_id.clone());
            payloads.push((item_id, raw));
        }

        if order.is_empty() {
            return Err(AppError::NotFound(format!("form {} has no items", form_id)));
        }

        if let Err(e) = self.store(test_id, &order, &payloads).await {
            tracing::error!(test_id, "Failed to cache test content: {:?}", e);
            if let Err(cleanup) = self.evict(test_id).await {
                tracing::warn!(test_id, "Failed to clean up partial content: {}", cleanup);
            }
            return Err(e);
        }

        tracing::info!(test_id, items = order.len(), media = media.len(), "Test content cached");
        Ok(CachedForm { test_id, order })
    }

    async fn store(
        &self,
        test_id: i64,
        order: &[String],
        payloads: &[(String, String)],
    ) -> Result<(), AppError> {
        let data = data_key(test_id);
        for (item_id, raw) in payloads {
            self.cache.hash_set(&data, item_id, raw).await?;
        }
        self.cache.list_push(&order_key(test_id), order).await?;
        Ok(())
    }

    async fn wait_for_bootstrap(&self, test_id: i64) -> Result<CachedForm, AppError> {
        let marker = bootstrap_key(test_id);
        let deadline = Instant::now() + self.bootstrap_wait;
        loop {
            tokio::time::sleep(BOOTSTRAP_POLL).await;
            // Read the marker before the content: the winner writes content, then releases.
            let in_flight = self.cache.exists(&marker).await?;
            if let Some(form) = self.cached(test_id).await? {
                return Ok(form);
            }
            if !in_flight {
                return Err(AppError::InternalServerError(format!(
                    "bootstrap of test {} failed, retry later",
                    test_id
                )));
            }
            if Instant::now() >= deadline {
                return Err(AppError::InternalServerError(format!(
                    "timed out waiting for test {} content",
                    test_id
                )));
            }
        }
    }
}
