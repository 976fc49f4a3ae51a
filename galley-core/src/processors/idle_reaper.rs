//! IdleReaper processor.
//!
//! Periodically asks the [`EventBroadcaster`] to drop subscriptions whose
//! clients stopped acknowledging, replying to pings or touching them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::broadcast::EventBroadcaster;

const MIN_PERIOD: Duration = Duration::from_secs(1);

pub struct IdleReaper {
    broadcaster: Arc<EventBroadcaster>,
}

impl IdleReaper {
    pub fn new(broadcaster: Arc<EventBroadcaster>) -> Self {
        Self { broadcaster }
    }

    /// Half the idle timeout, so a dead subscriber lingers at most 1.5x of it.
    fn period(&self) -> Duration {
        (self.broadcaster.idle_timeout() / 2).max(MIN_PERIOD)
    }

    /// Run the IdleReaper until shutdown is signaled.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!("IdleReaper started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("IdleReaper received shutdown signal");
                        break;
                    }
                }

                _ = tokio::time::sleep(self.period()) => {
                    let evicted = self.broadcaster.reap_idle();
                    if evicted > 0 {
                        debug!(evicted, "Reaped idle subscriptions");
                    }
                }
            }
        }

        info!("IdleReaper shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::AuthContext;
    use crate::testing::{self, Harness};

    #[tokio::test(start_paused = true)]
    async fn test_reaps_silent_subscribers() {
        let h = Harness::new();
        let auth = AuthContext::Authenticated(h.identity.clone());
        let quiet = h.broadcaster.subscribe(h.tenant_id, &auth).unwrap();
        let lively = h.broadcaster.subscribe(h.tenant_id, &auth).unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(IdleReaper::new(h.broadcaster.clone()).run(shutdown_rx));

        for _ in 0..12 {
            testing::advance(Duration::from_secs(10)).await;
            lively.touch();
        }
        assert!(quiet.close_reason().is_some());
        assert!(lively.close_reason().is_none());
        assert_eq!(h.broadcaster.subscriber_count(h.tenant_id), 1);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
