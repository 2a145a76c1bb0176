//! services/api/src/sweeper.rs
//!
//! Periodic removal of expired login sessions.
//!
//! Lookups already treat expired sessions as absent, so the sweep only
//! reclaims storage. It runs on its own task and talks to the store through
//! the same port as the request handlers.

use std::sync::Arc;
use std::time::Duration;

use agrisite_core::ports::{DatabaseService, PortResult};
use chrono::Utc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default interval between sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Deletes sessions whose expiry has passed, on a fixed schedule.
pub struct SessionSweeper {
    db: Arc<dyn DatabaseService>,
    interval: Duration,
}

impl SessionSweeper {
    pub fn new(db: Arc<dyn DatabaseService>) -> Self {
        Self {
            db,
            interval: SWEEP_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Runs a single sweep and returns how many sessions were deleted.
    pub async fn run_once(&self) -> PortResult<u64> {
        let deleted = self.db.delete_expired_sessions(Utc::now()).await?;
        if deleted > 0 {
            info!(deleted, "Swept expired sessions");
        } else {
            debug!("No expired sessions to sweep");
        }
        Ok(deleted)
    }

    /// Sweeps on every tick until `shutdown` is cancelled. The first sweep
    /// happens immediately.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs(), "Session sweeper started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Session sweeper stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        warn!(error = %e, "Session sweep failed");
                    }
                }
            }
        }
    }

    /// Spawns [`run`](Self::run) on the tokio runtime.
    pub fn spawn(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
