use crate::source::{Delivery, MessageSource, QueueError};
use async_nats::jetstream::{
    self,
    consumer::{pull, AckPolicy, PullConsumer},
    stream::Config as StreamConfig,
    AckKind,
};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    pub url: String,
    pub stream: String,
    /// Durable consumer name; every replica shares it.
    pub consumer: String,
    pub subject: String,
    pub max_outstanding_messages: usize,
    pub connect_timeout_ms: u64,
    /// Create the stream when it does not exist yet.
    pub ensure_stream: bool,
}

impl Default for NatsConfig {
    fn default() -> Self {
        NatsConfig {
            url: "nats://localhost:4222".into(),
            stream: "scans".into(),
            consumer: "scan-sub".into(),
            subject: "scans.>".into(),
            max_outstanding_messages: 10,
            connect_timeout_ms: 5000,
            ensure_stream: false,
        }
    }
}

/// JetStream pull consumer with explicit acks.
///
/// The broker caps unacked messages at `max_outstanding_messages` and
/// redelivers anything nacked or left unacked past its ack wait.
pub struct NatsSource {
    messages: BoxStream<'static, Result<jetstream::Message, QueueError>>,
}

impl NatsSource {
    pub async fn connect(config: &NatsConfig) -> Result<Self, QueueError> {
        info!(url = %config.url, timeout_ms = config.connect_timeout_ms, "connecting to NATS");
        let client = async_nats::ConnectOptions::new()
            .connection_timeout(Duration::from_millis(config.connect_timeout_ms))
            .connect(config.url.as_str())
            .await
            .map_err(|e| QueueError::Connect(e.to_string()))?;
        let context = jetstream::new(client);

        if config.ensure_stream && context.get_stream(config.stream.as_str()).await.is_err() {
            context
                .create_stream(StreamConfig {
                    name: config.stream.clone(),
                    subjects: vec![config.subject.clone()],
                    ..Default::default()
                })
                .await
                .map_err(|e| QueueError::Connect(format!("create stream {}: {e}", config.stream)))?;
            info!(stream = %config.stream, "created stream");
        }

        let consumer: PullConsumer = context
            .create_consumer_on_stream(
                pull::Config {
                    name: Some(config.consumer.clone()),
                    durable_name: Some(config.consumer.clone()),
                    filter_subject: config.subject.clone(),
                    ack_policy: AckPolicy::Explicit,
                    max_ack_pending: config.max_outstanding_messages as i64,
                    ..Default::default()
                },
                config.stream.as_str(),
            )
            .await
            .map_err(|e| QueueError::Connect(format!("create consumer {}: {e}", config.consumer)))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| QueueError::Connect(format!("open message stream: {e}")))?
            .map(|message| message.map_err(|e| QueueError::Receive(e.to_string())))
            .boxed();

        info!(stream = %config.stream, consumer = %config.consumer, subject = %config.subject, "subscribed");
        Ok(NatsSource { messages })
    }
}

#[async_trait]
impl MessageSource for NatsSource {
    async fn receive(&mut self) -> Result<Option<Box<dyn Delivery>>, QueueError> {
        match self.messages.next().await {
            Some(Ok(message)) => {
                debug!(subject = %message.subject, "message received");
                Ok(Some(Box::new(NatsDelivery { message }) as Box<dyn Delivery>))
            }
            Some(Err(err)) => Err(err),
            None => Ok(None),
        }
    }
}

struct NatsDelivery {
    message: jetstream::Message,
}

#[async_trait]
impl Delivery for NatsDelivery {
    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    fn attempt(&self) -> Option<u64> {
        self.message.info().ok().map(|info| info.delivered as u64)
    }

    async fn ack(self: Box<Self>) -> Result<(), QueueError> {
        self.message.ack().await.map_err(|e| QueueError::Ack(e.to_string()))
    }

    async fn nack(self: Box<Self>) -> Result<(), QueueError> {
        self.message
            .ack_with(AckKind::Nak(None))
            .await
            .map_err(|e| QueueError::Nack(e.to_string()))
    }
}
