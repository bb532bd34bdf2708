use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to connect to queue: {0}")]
    Connect(String),
    #[error("failed to receive message: {0}")]
    Receive(String),
    #[error("failed to publish message: {0}")]
    Publish(String),
    #[error("failed to ack message: {0}")]
    Ack(String),
    #[error("failed to nack message: {0}")]
    Nack(String),
}

/// One received message awaiting settlement.
///
/// Settling consumes the delivery, so each message is acked or nacked at most
/// once.
#[async_trait]
pub trait Delivery: Send + Sync {
    fn payload(&self) -> &[u8];

    /// Delivery count reported by the broker, when it tracks one.
    fn attempt(&self) -> Option<u64> {
        None
    }

    async fn ack(self: Box<Self>) -> Result<(), QueueError>;

    async fn nack(self: Box<Self>) -> Result<(), QueueError>;
}

/// At-least-once message feed.
///
/// `Ok(None)` means the source is closed and will yield nothing more.
#[async_trait]
pub trait MessageSource: Send {
    async fn receive(&mut self) -> Result<Option<Box<dyn Delivery>>, QueueError>;
}

/// Outcome reported by a [`ChannelSource`] delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Acked(Vec<u8>),
    Nacked(Vec<u8>),
}

/// In-process queue: messages published on one side, settlements observed on
/// the other. Used for replaying captured traffic and in tests.
pub fn channel(capacity: usize) -> (ChannelPublisher, ChannelSource, mpsc::UnboundedReceiver<Settlement>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let (settled_tx, settled_rx) = mpsc::unbounded_channel();
    (ChannelPublisher { tx }, ChannelSource { rx, settlements: settled_tx }, settled_rx)
}

#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    tx: mpsc::Sender<Vec<u8>>,
}

impl ChannelPublisher {
    pub async fn publish(&self, payload: impl Into<Vec<u8>>) -> Result<(), QueueError> {
        self.tx
            .send(payload.into())
            .await
            .map_err(|_| QueueError::Publish("channel source dropped".into()))
    }
}

/// Closes once every [`ChannelPublisher`] is dropped and the buffer is empty.
#[derive(Debug)]
pub struct ChannelSource {
    rx: mpsc::Receiver<Vec<u8>>,
    settlements: mpsc::UnboundedSender<Settlement>,
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn receive(&mut self) -> Result<Option<Box<dyn Delivery>>, QueueError> {
        Ok(self.rx.recv().await.map(|payload| {
            Box::new(ChannelDelivery { payload, settlements: self.settlements.clone() }) as Box<dyn Delivery>
        }))
    }
}

struct ChannelDelivery {
    payload: Vec<u8>,
    settlements: mpsc::UnboundedSender<Settlement>,
}

#[async_trait]
impl Delivery for ChannelDelivery {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    async fn ack(self: Box<Self>) -> Result<(), QueueError> {
        let ChannelDelivery { payload, settlements } = *self;
        settlements
            .send(Settlement::Acked(payload))
            .map_err(|_| QueueError::Ack("settlement receiver dropped".into()))
    }

    async fn nack(self: Box<Self>) -> Result<(), QueueError> {
        let ChannelDelivery { payload, settlements } = *self;
        settlements
            .send(Settlement::Nacked(payload))
            .map_err(|_| QueueError::Nack("settlement receiver dropped".into()))
    }
}
