//! Message-processing pipeline: decode, transform and persist scan messages
//! delivered at least once, with bounded concurrency and a graceful drain.

pub mod consumer;
pub mod nats;
pub mod pipeline;
pub mod processor;
pub mod shutdown;
pub mod source;

pub use consumer::{Consumer, ConsumerConfig, ConsumerStats, RunExit, StatsSnapshot};
pub use nats::{NatsConfig, NatsSource};
pub use pipeline::{run_until_shutdown, PipelineReport};
pub use processor::{ProcessError, Processor};
pub use shutdown::{DrainOutcome, Phase, ShutdownCoordinator};
pub use source::{channel, ChannelPublisher, ChannelSource, Delivery, MessageSource, QueueError, Settlement};
