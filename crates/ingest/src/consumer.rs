use crate::processor::Processor;
use crate::source::{Delivery, MessageSource};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Upper bound on messages received but not yet settled.
    pub max_outstanding: usize,
    /// Pause after a failed receive before trying again.
    pub receive_error_backoff: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        ConsumerConfig { max_outstanding: 10, receive_error_backoff: Duration::from_secs(1) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// The shutdown token fired.
    Cancelled,
    /// The source reported that it will deliver nothing more.
    SourceClosed,
}

/// Settlement counters shared by the consumer and its tasks.
#[derive(Debug, Default)]
pub struct ConsumerStats {
    received: AtomicU64,
    acked: AtomicU64,
    nacked: AtomicU64,
    settle_failures: AtomicU64,
}

impl ConsumerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            nacked: self.nacked.load(Ordering::Relaxed),
            settle_failures: self.settle_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub acked: u64,
    pub nacked: u64,
    /// Acks or nacks the queue rejected; the broker redelivers those.
    pub settle_failures: u64,
}

/// Pulls deliveries from a source and processes each on its own task.
///
/// A semaphore permit is taken before every receive and released when the
/// message is settled, so at most `max_outstanding` messages are in flight.
/// Every task is tracked so shutdown can wait for them.
pub struct Consumer {
    processor: Arc<Processor>,
    receive_error_backoff: Duration,
    slots: Arc<Semaphore>,
    tracker: TaskTracker,
    stats: Arc<ConsumerStats>,
}

impl Consumer {
    pub fn new(processor: Arc<Processor>, config: ConsumerConfig) -> Self {
        Consumer {
            processor,
            receive_error_backoff: config.receive_error_backoff,
            slots: Arc::new(Semaphore::new(config.max_outstanding.max(1))),
            tracker: TaskTracker::new(),
            stats: Arc::new(ConsumerStats::default()),
        }
    }

    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Receive until `shutdown` fires or the source closes.
    ///
    /// Returns once no new message will be admitted; work already dispatched
    /// keeps running on the tracker.
    pub async fn run<S>(&self, source: &mut S, shutdown: CancellationToken) -> RunExit
    where
        S: MessageSource + ?Sized,
    {
        info!(max_outstanding = self.slots.available_permits(), "consumer started");
        loop {
            let permit = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break RunExit::Cancelled,
                permit = Arc::clone(&self.slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break RunExit::Cancelled,
                },
            };

            let received = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break RunExit::Cancelled,
                received = source.receive() => received,
            };

            match received {
                Ok(Some(delivery)) => {
                    self.stats.received.fetch_add(1, Ordering::Relaxed);
                    let processor = Arc::clone(&self.processor);
                    let stats = Arc::clone(&self.stats);
                    self.tracker.spawn(async move {
                        settle(&processor, delivery, &stats).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    info!("message source closed");
                    break RunExit::SourceClosed;
                }
                Err(err) => {
                    drop(permit);
                    error!(error = %err, "receive failed");
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => break RunExit::Cancelled,
                        _ = tokio::time::sleep(self.receive_error_backoff) => {}
                    }
                }
            }
        }
    }
}

async fn settle(processor: &Processor, delivery: Box<dyn Delivery>, stats: &ConsumerStats) {
    let attempt = delivery.attempt();
    let outcome = processor.process(delivery.payload()).await;
    match outcome {
        Ok(()) => match delivery.ack().await {
            Ok(()) => {
                stats.acked.fetch_add(1, Ordering::Relaxed);
                debug!("message acked");
            }
            Err(err) => {
                stats.settle_failures.fetch_add(1, Ordering::Relaxed);
                error!(error = %err, "ack failed");
            }
        },
        Err(err) => {
            warn!(
                error = %err,
                kind = err.kind(),
                retryable = err.is_retryable(),
                attempt = ?attempt,
                "message processing failed"
            );
            match delivery.nack().await {
                Ok(()) => {
                    stats.nacked.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    stats.settle_failures.fetch_add(1, Ordering::Relaxed);
                    error!(error = %err, "nack failed");
                }
            }
        }
    }
}
