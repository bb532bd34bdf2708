use crate::{RecordStore, StoreResult};
use async_trait::async_trait;
use dashmap::DashMap;
use scan_core::{NaturalKey, ScanRecord};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Process-local store keyed by natural key. Clones share the same rows.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    rows: Arc<DashMap<NaturalKey, String>>,
    upserts: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &NaturalKey) -> Option<String> {
        self.rows.get(key).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of upsert calls received, including overwrites.
    pub fn upsert_calls(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn connect(&mut self) -> StoreResult<()> {
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn upsert(&self, record: &ScanRecord) -> StoreResult<()> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.rows.insert(record.key(), record.response.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn record(response: &str) -> ScanRecord {
        ScanRecord {
            ip: "1.1.1.1".into(),
            port: 80,
            service: "HTTP".into(),
            timestamp: OffsetDateTime::UNIX_EPOCH,
            response: response.into(),
        }
    }

    #[tokio::test]
    async fn repeated_upserts_keep_one_row() {
        let store = MemoryStore::new();
        store.upsert(&record("hello world")).await.unwrap();
        store.upsert(&record("hello world")).await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.upsert_calls(), 2);
        assert_eq!(store.get(&record("").key()).as_deref(), Some("hello world"));
    }

    #[tokio::test]
    async fn last_write_wins() {
        let store = MemoryStore::new();
        store.upsert(&record("first")).await.unwrap();
        store.upsert(&record("second")).await.unwrap();
        assert_eq!(store.get(&record("").key()).as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn concurrent_upserts_on_one_key() {
        let store = MemoryStore::new();
        let mut handles = Vec::new();
        for i in 0..32 {
            let s = store.clone();
            handles.push(tokio::spawn(async move { s.upsert(&record(&format!("r{i}"))).await }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(store.len(), 1);
        assert_eq!(store.upsert_calls(), 32);
    }
}
