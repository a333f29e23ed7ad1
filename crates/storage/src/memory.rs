//! In-memory storage implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use formkeep_core::{FormProgress, FormType, ProgressKey, UserId};
use tokio::sync::RwLock;

use super::{ProgressStore, Result};

/// Volatile store backed by a hash map. Useful for embedding and tests.
#[derive(Default)]
pub struct MemoryStorage {
    records: RwLock<HashMap<ProgressKey, FormProgress>>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// True when nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl ProgressStore for MemoryStorage {
    async fn load(&self, user_id: &UserId, form_type: &FormType) -> Result<Option<FormProgress>> {
        let key = ProgressKey::new(user_id.clone(), form_type.clone());
        Ok(self.records.read().await.get(&key).cloned())
    }

    async fn upsert(&self, record: &FormProgress) -> Result<FormProgress> {
        let mut stored = record.clone();
        stored.updated_at = chrono::Utc::now();
        self.records.write().await.insert(stored.key(), stored.clone());
        Ok(stored)
    }

    async fn delete(&self, user_id: &UserId, form_type: &FormType) -> Result<()> {
        let key = ProgressKey::new(user_id.clone(), form_type.clone());
        self.records.write().await.remove(&key);
        Ok(())
    }

    async fn list(&self, user_id: &UserId) -> Result<Vec<FormProgress>> {
        let mut records: Vec<FormProgress> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| &r.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(records)
    }
}
