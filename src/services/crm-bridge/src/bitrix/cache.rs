//! Short-lived cache of CRM field descriptors

use super::{CrmClient, FieldDescriptor};
use crate::error::BridgeResult;
use crate::models::CrmEntity;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::debug;

type CacheKey = (String, CrmEntity);

/// Field lists keyed by CRM base URL and entity
pub struct FieldCache {
    entries: DashMap<CacheKey, (Instant, Vec<FieldDescriptor>)>,
    ttl: Duration,
}

impl FieldCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    fn key(base_url: &str, entity: CrmEntity) -> CacheKey {
        (base_url.trim().trim_end_matches('/').to_string(), entity)
    }

    /// Cached fields, if present and fresh
    pub fn get(&self, base_url: &str, entity: CrmEntity) -> Option<Vec<FieldDescriptor>> {
        let key = Self::key(base_url, entity);
        let entry = self.entries.get(&key)?;
        let (stored_at, fields) = entry.value();
        if stored_at.elapsed() < self.ttl {
            Some(fields.clone())
        } else {
            drop(entry);
            self.entries.remove(&key);
            None
        }
    }

    /// Store `fields`, sweeping out whatever has already expired
    pub fn insert(&self, base_url: &str, entity: CrmEntity, fields: Vec<FieldDescriptor>) {
        let ttl = self.ttl;
        self.entries
            .retain(|_, (stored_at, _)| stored_at.elapsed() < ttl);
        self.entries
            .insert(Self::key(base_url, entity), (Instant::now(), fields));
    }

    /// Serve from cache or fetch through `client` and remember the answer
    pub async fn get_or_fetch(
        &self,
        client: &dyn CrmClient,
        base_url: &str,
        entity: CrmEntity,
    ) -> BridgeResult<Vec<FieldDescriptor>> {
        if let Some(fields) = self.get(base_url, entity) {
            debug!(entity = ?entity, "Field list served from cache");
            return Ok(fields);
        }

        let fields = client.entity_fields(base_url, entity).await?;
        self.insert(base_url, entity, fields.clone());
        Ok(fields)
    }

    /// Drop every entry for `base_url`
    pub fn invalidate(&self, base_url: &str) {
        let base = base_url.trim().trim_end_matches('/');
        self.entries.retain(|(url, _), _| url != base);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
