//! In-memory finding store (non-persistent).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{FindingRecord, FindingStore, StoreError};

#[derive(Clone, Default)]
pub struct InMemoryFindingStore {
    records: Arc<RwLock<Vec<FindingRecord>>>,
}

impl InMemoryFindingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FindingStore for InMemoryFindingStore {
    fn is_persistent(&self) -> bool {
        false
    }

    async fn insert(&self, record: FindingRecord) -> Result<i64, StoreError> {
        let mut records = self.records.write().await;
        records.push(record);
        Ok(records.len() as i64)
    }

    async fn list_for_review(&self, review_id: &str) -> Result<Vec<FindingRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|r| r.review_id == review_id)
            .cloned()
            .collect())
    }
}
