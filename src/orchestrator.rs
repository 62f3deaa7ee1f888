//! Leadership-gated scheduling of the per-store pruning jobs
//!
//! Each store gets its own timer task so one slow store can never delay the
//! others or the lease-renewal path. Every firing re-reads the leadership
//! snapshot; a firing that lands while a previous run is still in flight is
//! skipped outright, never queued (pruning is idempotent, a skipped cycle is
//! cheaper than a backlog).

use crate::lock::LeaseState;
use crate::store::{Prune, StoreKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// How long `stop` waits for an in-flight run before abandoning it.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// One store's pruning schedule: the pruner and its timer interval.
pub struct PruningJob {
    pub pruner: Arc<dyn Prune>,
    pub interval: Duration,
}

/// Runs the pruning jobs while the lease is held.
pub struct Orchestrator {
    jobs: Vec<PruningJob>,
    lease_rx: watch::Receiver<LeaseState>,
    stop_tx: watch::Sender<bool>,
    handles: Vec<(StoreKind, JoinHandle<()>)>,
}

impl Orchestrator {
    pub fn new(jobs: Vec<PruningJob>, lease_rx: watch::Receiver<LeaseState>) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            jobs,
            lease_rx,
            stop_tx,
            handles: Vec::new(),
        }
    }

    /// Start one timer task per store. Called once, after leadership has
    /// been observed; the per-firing gate still re-checks the lease state.
    pub fn start(&mut self) {
        for job in self.jobs.drain(..) {
            let kind = job.pruner.kind();
            info!(event = "store-pruner-started", store = %kind, "store pruner started");

            let handle = tokio::spawn(run_job(
                job.pruner,
                job.interval,
                self.lease_rx.clone(),
                self.stop_tx.subscribe(),
            ));
            self.handles.push((kind, handle));
        }

        info!(event = "orchestrator-started", "orchestrator started");
    }

    /// Cooperative stop: flip the stop flag, then wait for each job to
    /// drain its in-flight run. A run that outlives the drain timeout is
    /// logged and abandoned; connection-level timeouts clean up after it.
    pub async fn stop(&mut self) {
        self.stop_tx.send_replace(true);

        for (kind, handle) in self.handles.drain(..) {
            match tokio::time::timeout(DRAIN_TIMEOUT, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(store = %kind, error = %e, "pruner task ended abnormally"),
                Err(_) => {
                    warn!(store = %kind, "in-flight pruning run did not drain in time, abandoning")
                }
            }
        }
    }
}

async fn run_job(
    pruner: Arc<dyn Prune>,
    interval: Duration,
    lease_rx: watch::Receiver<LeaseState>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let kind = pruner.kind();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    return;
                }
            }
            _ = ticker.tick() => {
                if *stop_rx.borrow() {
                    return;
                }
                // Fresh snapshot at every firing; a stale Held must never
                // start a run after the monitor has moved on.
                if *lease_rx.borrow() != LeaseState::Held {
                    continue;
                }

                match pruner.prune_once().await {
                    Ok(rows) => {
                        info!(event = "pruning-run-completed", store = %kind, rows = rows, "pruning run completed");
                    }
                    Err(e) => {
                        // Non-fatal: the next firing retries at the fixed
                        // cadence. A chronic failure shows up as repeated
                        // events, not a crash.
                        error!(event = "pruning-run-failed", store = %kind, error = %e, "pruning run failed");
                    }
                }
            }
        }
    }
}
