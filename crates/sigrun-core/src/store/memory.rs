//! In-memory chain store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{check_position, position_taken, ChainReader, ChainStore};
use crate::error::TrustResult;
use crate::trust::TrustConfig;

/// Chain held in memory. Records every archival lookup, which makes the
/// order of a chain walk observable.
#[derive(Debug, Default)]
pub struct MemoryChainStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    records: BTreeMap<i64, TrustConfig>,
    current: Option<TrustConfig>,
    fetch_log: Vec<i64>,
}

impl MemoryChainStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place `record` at its position without any checks, replacing what is there.
    pub async fn insert_record(&self, record: TrustConfig) {
        let mut inner = self.inner.lock().await;
        inner.records.insert(record.chain_no(), record);
    }

    /// Replace the current pointer without touching the archive.
    pub async fn set_current(&self, record: TrustConfig) {
        self.inner.lock().await.current = Some(record);
    }

    /// Positions requested through [`ChainReader::get`], in order.
    pub async fn fetch_log(&self) -> Vec<i64> {
        self.inner.lock().await.fetch_log.clone()
    }

    pub async fn clear_fetch_log(&self) {
        self.inner.lock().await.fetch_log.clear();
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.records.is_empty()
    }
}

#[async_trait]
impl ChainReader for MemoryChainStore {
    async fn get(&self, position: i64) -> TrustResult<Option<TrustConfig>> {
        check_position(position)?;
        let mut inner = self.inner.lock().await;
        inner.fetch_log.push(position);
        Ok(inner.records.get(&position).cloned())
    }

    async fn current(&self) -> TrustResult<Option<TrustConfig>> {
        Ok(self.inner.lock().await.current.clone())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

#[async_trait]
impl ChainStore for MemoryChainStore {
    async fn put(&self, record: &TrustConfig) -> TrustResult<()> {
        let position = record.chain_no();
        check_position(position)?;

        // One lock for both writes: the pair is applied together or not at all
        let mut inner = self.inner.lock().await;
        if inner.records.contains_key(&position) {
            return Err(position_taken(position, "memory"));
        }
        inner
            .records
            .insert(position, record.without_private_key());
        inner.current = Some(record.clone());
        Ok(())
    }

    async fn holds_records(&self) -> TrustResult<bool> {
        let inner = self.inner.lock().await;
        Ok(!inner.records.is_empty() || inner.current.is_some())
    }
}
