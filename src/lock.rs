//! Leadership state machine over the lease primitive
//!
//! The lock monitor is the only writer of `LeaseState`; every other task
//! reads the latest snapshot through a watch channel and re-checks it at the
//! top of each cycle instead of caching a boolean.

use crate::error::Result;
use crate::lease::LeaseClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Local mirror of the lease's acquisition state.
///
/// `Seeking -> Held` on acquisition; `Held -> Lost` on the first failed
/// renewal; `Held -> Released` on graceful shutdown. `Lost` and `Released`
/// are terminal; re-seeking requires a full process restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    Seeking,
    Held,
    Lost,
    Released,
}

/// Owns the acquire/renew/release loop for one named lease.
#[derive(Clone)]
pub struct LockMonitor {
    client: Arc<dyn LeaseClient>,
    retry_interval: Duration,
    ttl: Duration,
    state_tx: watch::Sender<LeaseState>,
}

impl LockMonitor {
    pub fn new(
        client: Arc<dyn LeaseClient>,
        retry_interval: Duration,
        ttl: Duration,
    ) -> (Self, watch::Receiver<LeaseState>) {
        let (state_tx, state_rx) = watch::channel(LeaseState::Seeking);
        (
            Self {
                client,
                retry_interval,
                ttl,
                state_tx,
            },
            state_rx,
        )
    }

    /// Block until the lease is ours, retrying forever at the configured
    /// interval. Waiting beats fail-fast here: a fleet with no leader is
    /// worse than a standby that sits in line.
    pub async fn acquire(&self) {
        loop {
            match self.client.try_acquire().await {
                Ok(true) => {
                    info!(event = "lock-acquired", "acquired lock");
                    self.state_tx.send_replace(LeaseState::Held);
                    return;
                }
                Ok(false) => {
                    info!(event = "lock-acquiring", "lock held elsewhere, waiting");
                }
                Err(e) => {
                    warn!(event = "lock-acquiring", error = %e, "lock service error, retrying");
                }
            }
            tokio::time::sleep(self.retry_interval).await;
        }
    }

    /// Renew the held lease until a renewal fails. One failed renewal is
    /// final: whether the service was unreachable or the lease was stolen,
    /// we can no longer prove exclusivity, so leadership is declared lost.
    pub async fn monitor(&self) {
        let mut ticker = tokio::time::interval(self.ttl / 2);
        ticker.tick().await; // consume the immediate first tick

        loop {
            ticker.tick().await;

            let renewed = match self.client.renew().await {
                Ok(renewed) => renewed,
                Err(e) => {
                    warn!(error = %e, "lease renewal errored");
                    false
                }
            };

            if !renewed {
                // Held -> Lost only; a graceful Released must not be
                // overwritten by a renewal that raced the release.
                self.state_tx.send_if_modified(|state| {
                    if *state == LeaseState::Held {
                        error!(event = "lock-lost", "lost lock");
                        *state = LeaseState::Lost;
                        true
                    } else {
                        false
                    }
                });
                return;
            }
        }
    }

    /// Give the lease back during graceful shutdown so a standby takes over
    /// without waiting out the TTL.
    pub async fn release(&self) -> Result<()> {
        self.client.release().await?;
        self.state_tx.send_replace(LeaseState::Released);
        Ok(())
    }

    pub fn state(&self) -> LeaseState {
        *self.state_tx.borrow()
    }
}

/// Resolve once the monitor reports the lease as lost.
pub async fn lost(mut state_rx: watch::Receiver<LeaseState>) {
    loop {
        if *state_rx.borrow() == LeaseState::Lost {
            return;
        }
        if state_rx.changed().await.is_err() {
            // Monitor dropped without reporting loss; treat as lost.
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lease::testing::FakeLockService;

    const RETRY: Duration = Duration::from_secs(5);
    const TTL: Duration = Duration::from_secs(15);

    // Give freshly spawned tasks a chance to establish their timers before
    // the clock moves.
    async fn settle() {
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
    }

    fn monitor_for(
        service: &FakeLockService,
    ) -> (LockMonitor, watch::Receiver<LeaseState>, Arc<std::sync::atomic::AtomicBool>) {
        let client = service.client("pruner", TTL);
        let outage = client.outage_switch();
        let (monitor, rx) = LockMonitor::new(Arc::new(client), RETRY, TTL);
        (monitor, rx, outage)
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_transitions_to_held() {
        let service = FakeLockService::new();
        let (monitor, rx, _) = monitor_for(&service);

        assert_eq!(*rx.borrow(), LeaseState::Seeking);
        monitor.acquire().await;
        assert_eq!(*rx.borrow(), LeaseState::Held);
        assert!(service.holder("pruner").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_at_most_one_holder_among_competitors() {
        let service = FakeLockService::new();
        let (first, first_rx, _) = monitor_for(&service);
        let (second, second_rx, _) = monitor_for(&service);

        first.acquire().await;

        // The holder renews in the background so its lease cannot lapse
        // while the contender waits.
        let renewer = {
            let first = first.clone();
            tokio::spawn(async move { first.monitor().await })
        };

        let contender = {
            let second = second.clone();
            tokio::spawn(async move { second.acquire().await })
        };
        settle().await;

        // The contender keeps retrying without ever observing Held.
        tokio::time::advance(RETRY * 3).await;
        assert_eq!(*first_rx.borrow(), LeaseState::Held);
        assert_eq!(*second_rx.borrow(), LeaseState::Seeking);

        // Once the holder releases, the contender wins within one retry.
        first.release().await.unwrap();
        tokio::time::advance(RETRY).await;
        contender.await.unwrap();
        assert_eq!(*second_rx.borrow(), LeaseState::Held);
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_failure_is_fatal_loss() {
        let service = FakeLockService::new();
        let (monitor, rx, outage) = monitor_for(&service);

        monitor.acquire().await;
        let renewer = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.monitor().await })
        };

        // Renewals at ttl/2 keep the lease alive.
        tokio::time::advance(TTL).await;
        assert_eq!(*rx.borrow(), LeaseState::Held);

        // First failed renewal transitions to Lost and the loop exits.
        outage.store(true, std::sync::atomic::Ordering::SeqCst);
        tokio::time::advance(TTL).await;
        renewer.await.unwrap();
        assert_eq!(*rx.borrow(), LeaseState::Lost);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_resolves_for_watchers() {
        let service = FakeLockService::new();
        let (monitor, rx, outage) = monitor_for(&service);

        monitor.acquire().await;
        let waiter = tokio::spawn(lost(rx));
        let renewer = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.monitor().await })
        };

        outage.store(true, std::sync::atomic::Ordering::SeqCst);
        tokio::time::advance(TTL).await;
        renewer.await.unwrap();
        waiter.await.unwrap();
        assert_eq!(monitor.state(), LeaseState::Lost);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_frees_the_lease() {
        let service = FakeLockService::new();
        let (monitor, rx, _) = monitor_for(&service);

        monitor.acquire().await;
        monitor.release().await.unwrap();
        assert_eq!(*rx.borrow(), LeaseState::Released);
        assert!(service.holder("pruner").is_none());
    }
}
