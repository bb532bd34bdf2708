use results_store::{RecordStore, StoreError};
use scan_core::{ScanEnvelope, ScanRecord};
use scan_transform::{transform, TransformError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

/// Why a single message could not be processed.
///
/// The message always ends up negatively acknowledged; `kind` and
/// `is_retryable` only shape the log line.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to unmarshal scan data: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("failed to transform scan data to the data store representation: {0}")]
    Transform(#[from] TransformError),
    #[error("failed to update scan data: {0}")]
    Persist(#[from] StoreError),
}

impl ProcessError {
    /// Stable label for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessError::Decode(_) => "decode",
            ProcessError::Transform(TransformError::UnsupportedVersion(_)) => "unsupported_version",
            ProcessError::Transform(TransformError::MalformedPayload { .. }) => "malformed_payload",
            ProcessError::Transform(TransformError::InvalidTimestamp(_)) => "invalid_timestamp",
            ProcessError::Persist(_) => "persistence",
        }
    }

    /// Whether a redelivery of the same message could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProcessError::Persist(err) => err.is_transient(),
            _ => false,
        }
    }
}

/// Decode, transform and persist one raw message.
///
/// Holds no per-message state, so one instance is shared by every worker.
pub struct Processor {
    store: Arc<dyn RecordStore>,
    persist_timeout: Option<Duration>,
}

impl Processor {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Processor { store, persist_timeout: None }
    }

    /// Bound each store call; `None` leaves it to the backend.
    pub fn with_persist_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.persist_timeout = timeout;
        self
    }

    #[instrument(skip_all, fields(bytes = raw.len()))]
    pub async fn process(&self, raw: &[u8]) -> Result<(), ProcessError> {
        let envelope = ScanEnvelope::from_slice(raw).map_err(ProcessError::Decode)?;
        let record = transform(envelope)?;
        self.persist(&record).await?;
        debug!(ip = %record.ip, port = record.port, service = %record.service, "scan processed");
        Ok(())
    }

    async fn persist(&self, record: &ScanRecord) -> Result<(), StoreError> {
        match self.persist_timeout {
            Some(limit) => tokio::time::timeout(limit, self.store.upsert(record))
                .await
                .map_err(|_| StoreError::Timeout(limit))?,
            None => self.store.upsert(record).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use results_store::{MemoryStore, MockRecordStore};
    use scan_core::NaturalKey;
    use time::OffsetDateTime;

    fn key(ts: i64) -> NaturalKey {
        NaturalKey {
            ip: "1.1.1.1".into(),
            port: 80,
            service: "HTTP".into(),
            timestamp: OffsetDateTime::from_unix_timestamp(ts).unwrap(),
        }
    }

    fn rejecting_store() -> Arc<dyn RecordStore> {
        let mut store = MockRecordStore::new();
        store.expect_upsert().never();
        Arc::new(store)
    }

    const V1_HELLO: &[u8] = br#"{"ip":"1.1.1.1","port":80,"service":"HTTP","timestamp":0,"data_version":1,"data":{"response_bytes_utf8":"aGVsbG8gd29ybGQ="}}"#;
    const V2_HELLO: &[u8] = br#"{"ip":"1.1.1.1","port":80,"service":"HTTP","timestamp":0,"data_version":2,"data":{"response_str":"hello world"}}"#;

    #[tokio::test]
    async fn v1_message_is_persisted() {
        let store = MemoryStore::new();
        let processor = Processor::new(Arc::new(store.clone()));
        processor.process(V1_HELLO).await.unwrap();
        assert_eq!(store.get(&key(0)).as_deref(), Some("hello world"));
    }

    #[tokio::test]
    async fn v1_and_v2_with_same_text_converge() {
        let store = MemoryStore::new();
        let processor = Processor::new(Arc::new(store.clone()));
        processor.process(V1_HELLO).await.unwrap();
        processor.process(V2_HELLO).await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.upsert_calls(), 2);
        assert_eq!(store.get(&key(0)).as_deref(), Some("hello world"));
    }

    #[tokio::test]
    async fn redelivery_is_idempotent() {
        let store = MemoryStore::new();
        let processor = Processor::new(Arc::new(store.clone()));
        for _ in 0..3 {
            processor.process(V2_HELLO).await.unwrap();
        }
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn unsupported_version_never_reaches_store() {
        let processor = Processor::new(rejecting_store());
        let raw = br#"{"ip":"1.1.1.1","port":80,"service":"HTTP","timestamp":0,"data_version":3,"data":{}}"#;
        let err = processor.process(raw).await.unwrap_err();
        assert!(matches!(err, ProcessError::Transform(TransformError::UnsupportedVersion(3))));
        assert_eq!(err.kind(), "unsupported_version");
        assert!(!err.is_retryable());
        assert!(err.to_string().starts_with("failed to transform scan data to the data store representation"));
    }

    #[tokio::test]
    async fn undecodable_message_never_reaches_store() {
        let processor = Processor::new(rejecting_store());
        let err = processor.process(b"invalid").await.unwrap_err();
        assert_eq!(err.kind(), "decode");
        assert!(err.to_string().starts_with("failed to unmarshal scan data"));
    }

    #[tokio::test]
    async fn malformed_payload_never_reaches_store() {
        let processor = Processor::new(rejecting_store());
        let raw = br#"{"ip":"1.1.1.1","port":80,"service":"HTTP","timestamp":0,"data_version":1,"data":{"response_bytes_utf8":"!!"}}"#;
        let err = processor.process(raw).await.unwrap_err();
        assert_eq!(err.kind(), "malformed_payload");
    }

    #[tokio::test]
    async fn unencodable_timestamp_never_reaches_store() {
        let processor = Processor::new(rejecting_store());
        let raw = br#"{"ip":"1.1.1.1","port":80,"service":"HTTP","timestamp":-100000000000,"data_version":2,"data":{"response_str":"hello world"}}"#;
        let err = processor.process(raw).await.unwrap_err();
        assert!(matches!(err, ProcessError::Transform(TransformError::InvalidTimestamp(-100_000_000_000))));
        assert_eq!(err.kind(), "invalid_timestamp");
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn store_failure_is_reported() {
        let mut store = MockRecordStore::new();
        store
            .expect_upsert()
            .times(1)
            .returning(|_| Err(StoreError::write("connection reset by peer", true)));
        let processor = Processor::new(Arc::new(store));
        let err = processor.process(V2_HELLO).await.unwrap_err();
        assert_eq!(err.kind(), "persistence");
        assert!(err.is_retryable());
        assert!(err.to_string().starts_with("failed to update scan data"));
    }

    #[tokio::test]
    async fn slow_store_hits_persist_timeout() {
        struct Stalled;

        #[async_trait::async_trait]
        impl RecordStore for Stalled {
            fn kind(&self) -> &'static str {
                "stalled"
            }
            async fn connect(&mut self) -> results_store::StoreResult<()> {
                Ok(())
            }
            async fn close(&self) -> results_store::StoreResult<()> {
                Ok(())
            }
            async fn upsert(&self, _: &ScanRecord) -> results_store::StoreResult<()> {
                std::future::pending().await
            }
        }

        let processor =
            Processor::new(Arc::new(Stalled)).with_persist_timeout(Some(Duration::from_millis(20)));
        let err = processor.process(V2_HELLO).await.unwrap_err();
        assert!(matches!(err, ProcessError::Persist(StoreError::Timeout(_))));
        assert!(err.is_retryable());
    }
}
