//! Periodic health cycle
//!
//! Re-probes every known proxy on a fixed interval so failed proxies can
//! recover and active ones keep being validated.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, instrument};

use crate::pool::PoolManager;

/// Health cycle service
pub struct HealthCycleService {
    manager: Arc<PoolManager>,
    interval: Duration,
}

impl HealthCycleService {
    pub fn new(manager: Arc<PoolManager>, interval: Duration) -> Self {
        Self { manager, interval }
    }

    /// Run until the shutdown flag turns `true` (call in a spawned task).
    ///
    /// The first cycle starts one interval after launch; admission already
    /// probed every proxy it added.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting health cycle with {}s interval",
            self.interval.as_secs()
        );

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.manager.run_health_cycle().await {
                        error!("Health cycle failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Health cycle shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Handle for stopping the health cycle service
pub struct HealthCycleHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl HealthCycleHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for HealthCycleHandle {
    fn default() -> Self {
        Self::new().0
    }
}
