use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

/// Lifecycle of the consumer as seen by observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    /// No new messages are admitted; in-flight ones are finishing.
    Draining,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every in-flight message settled within the grace period.
    Completed,
    /// The grace period elapsed first; the broker redelivers the abandoned
    /// messages after their ack deadline.
    Abandoned { in_flight: usize },
}

/// Owns the shutdown trigger and the bounded drain that follows it.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    grace: Duration,
    phase: Arc<watch::Sender<Phase>>,
}

impl ShutdownCoordinator {
    pub fn new(grace: Duration) -> Self {
        let (phase, _) = watch::channel(Phase::Running);
        ShutdownCoordinator { token: CancellationToken::new(), grace, phase: Arc::new(phase) }
    }

    /// Token the consumer watches; cancelled on the first shutdown request.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Request shutdown and publish `Draining`. Later calls are no-ops.
    pub fn trigger(&self) {
        if !self.token.is_cancelled() {
            info!("shutdown requested");
        }
        begin_draining(&self.token, &self.phase);
    }

    /// Cancel the token on SIGINT or SIGTERM.
    ///
    /// The task also publishes `Draining` when the token is cancelled by
    /// anyone else, then ends.
    pub fn listen_for_signals(&self) -> JoinHandle<()> {
        let token = self.token.clone();
        let phase = Arc::clone(&self.phase);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                signal = wait_for_signal() => {
                    info!(signal, "received shutdown signal");
                }
            }
            begin_draining(&token, &phase);
        })
    }

    /// Stop admitting work and wait up to the grace period for `tracker` to
    /// empty.
    ///
    /// Returns as soon as the last task finishes, not after the full grace.
    pub async fn drain(&self, tracker: &TaskTracker) -> DrainOutcome {
        begin_draining(&self.token, &self.phase);
        tracker.close();
        info!(
            in_flight = tracker.len(),
            grace_ms = self.grace.as_millis() as u64,
            "draining in-flight messages"
        );

        let outcome = match tokio::time::timeout(self.grace, tracker.wait()).await {
            Ok(()) => {
                info!("all in-flight messages settled");
                DrainOutcome::Completed
            }
            Err(_) => {
                let in_flight = tracker.len();
                warn!(in_flight, "grace period elapsed, abandoning in-flight messages");
                DrainOutcome::Abandoned { in_flight }
            }
        };
        self.phase.send_replace(Phase::Terminated);
        outcome
    }
}

/// Cancel and move `Running` to `Draining`; never steps back from `Terminated`.
fn begin_draining(token: &CancellationToken, phase: &watch::Sender<Phase>) {
    token.cancel();
    phase.send_if_modified(|current| {
        if *current == Phase::Running {
            *current = Phase::Draining;
            true
        } else {
            false
        }
    });
}

async fn wait_for_signal() -> &'static str {
    let interrupt = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => "SIGINT",
            Err(err) => {
                error!(error = %err, "failed to listen for SIGINT");
                std::future::pending::<&'static str>().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                "SIGTERM"
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<&'static str>().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<&'static str>();

    tokio::select! {
        name = interrupt => name,
        name = terminate => name,
    }
}
