use crate::{RecordStore, StoreResult};
use async_trait::async_trait;
use scan_core::backoff::Backoff;
use scan_core::ScanRecord;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt; 0 disables retrying.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy { max_retries: 3, base_delay_ms: 100, max_delay_ms: 5000 }
    }
}

impl RetryPolicy {
    pub fn backoff(&self) -> Backoff {
        Backoff::new(Duration::from_millis(self.base_delay_ms), Duration::from_millis(self.max_delay_ms))
    }
}

/// Wraps a store and retries transient upsert failures with backoff.
///
/// Terminal failures are returned on the first attempt.
pub struct RetryingStore {
    inner: Box<dyn RecordStore>,
    policy: RetryPolicy,
    backoff: Backoff,
}

impl RetryingStore {
    pub fn new(inner: Box<dyn RecordStore>, policy: RetryPolicy) -> Self {
        RetryingStore { inner, backoff: policy.backoff(), policy }
    }
}

#[async_trait]
impl RecordStore for RetryingStore {
    fn kind(&self) -> &'static str {
        self.inner.kind()
    }

    async fn connect(&mut self) -> StoreResult<()> {
        self.inner.connect().await
    }

    async fn close(&self) -> StoreResult<()> {
        self.inner.close().await
    }

    async fn upsert(&self, record: &ScanRecord) -> StoreResult<()> {
        let mut attempt = 0;
        loop {
            match self.inner.upsert(record).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transient() && attempt < self.policy.max_retries => {
                    let delay = self.backoff.delay(attempt);
                    attempt += 1;
                    warn!(
                        error = %err,
                        attempt,
                        max_retries = self.policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "transient write failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
