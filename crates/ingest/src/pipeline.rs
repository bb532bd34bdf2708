use crate::consumer::{Consumer, RunExit, StatsSnapshot};
use crate::shutdown::{DrainOutcome, ShutdownCoordinator};
use crate::source::MessageSource;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineReport {
    pub exit: RunExit,
    pub drain: DrainOutcome,
    pub stats: StatsSnapshot,
}

/// Consume until shutdown is requested or the source closes, then drain.
///
/// The store is left open; the caller closes it after this returns.
pub async fn run_until_shutdown<S>(
    consumer: &Consumer,
    source: &mut S,
    coordinator: &ShutdownCoordinator,
) -> PipelineReport
where
    S: MessageSource + ?Sized,
{
    let exit = consumer.run(source, coordinator.token()).await;
    let drain = coordinator.drain(consumer.tracker()).await;
    let stats = consumer.stats();
    info!(
        ?exit,
        ?drain,
        received = stats.received,
        acked = stats.acked,
        nacked = stats.nacked,
        settle_failures = stats.settle_failures,
        "pipeline stopped"
    );
    PipelineReport { exit, drain, stats }
}
