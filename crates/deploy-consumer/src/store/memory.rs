//! In-memory store
//!
//! Same semantics as the Redis backend behind a process-local mutex, so
//! the whole pipeline can run in tests and embedders without a Redis.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use deployer_common::Result;
use serde_json::Value;
use tokio::sync::Mutex;

use super::{matches_fields, Store};

/// Cloning shares the underlying collections, so a test can hand a handle
/// to a consumer and keep another for assertions.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<HashMap<String, VecDeque<Value>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn enqueue(&self, queue: &str, payload: Value) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.entry(queue.to_string()).or_default().push_back(payload);
        Ok(())
    }

    async fn dequeue(&self, queue: &str) -> Result<Option<Value>> {
        let mut inner = self.inner.lock().await;
        Ok(inner.get_mut(queue).and_then(VecDeque::pop_front))
    }

    async fn size(&self, queue: &str) -> Result<usize> {
        let inner = self.inner.lock().await;
        Ok(inner.get(queue).map_or(0, VecDeque::len))
    }

    async fn put(&self, collection: &str, record: Value) -> Result<()> {
        self.enqueue(collection, record).await
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<Value>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .get(collection)
            .map(|records| records.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn count_matching(&self, collection: &str, fields: &[(&str, &str)]) -> Result<usize> {
        let inner = self.inner.lock().await;
        Ok(inner.get(collection).map_or(0, |records| {
            records
                .iter()
                .filter(|record| matches_fields(record, fields))
                .count()
        }))
    }

    async fn consume_matching(
        &self,
        collection: &str,
        fields: &[(&str, &str)],
        limit: usize,
    ) -> Result<Vec<Value>> {
        let mut inner = self.inner.lock().await;
        let Some(records) = inner.get_mut(collection) else {
            return Ok(Vec::new());
        };

        let mut taken = Vec::new();
        let mut kept = VecDeque::with_capacity(records.len());
        while let Some(record) = records.pop_front() {
            let want_more = limit == 0 || taken.len() < limit;
            if want_more && matches_fields(&record, fields) {
                taken.push(record);
            } else {
                kept.push_back(record);
            }
        }
        *records = kept;

        Ok(taken)
    }
}
