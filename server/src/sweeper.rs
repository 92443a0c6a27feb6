//! Periodic eviction of abandoned key-exchange sessions.
//!
//! A begin that is never followed by finalize would otherwise pin a
//! wallet handle forever. The sweeper walks the pending table on a
//! fixed interval and evicts sessions older than the TTL, releasing
//! their wallets. An id whose transition lock is currently held is
//! skipped; it will be rechecked on the next tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::registry::EscrowRegistry;

pub struct CleanupSweeper {
    registry: Arc<EscrowRegistry>,
    interval: Duration,
    ttl: ChronoDuration,
}

impl CleanupSweeper {
    pub fn new(registry: Arc<EscrowRegistry>, interval: Duration, ttl: Duration) -> Self {
        Self {
            registry,
            interval,
            ttl: ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::seconds(300)),
        }
    }

    /// One sweep over the pending table as of `now`. Returns the number
    /// of sessions evicted.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> usize {
        let mut evicted = 0;

        for escrow_id in self.registry.pending_older_than(now, self.ttl) {
            let lock = self.registry.id_lock(&escrow_id);
            let Ok(_transition) = lock.try_lock() else {
                debug!(escrow_id, "session busy, skipping this tick");
                continue;
            };

            // Re-check under the lock: a finalize may have consumed the
            // session between the scan and here.
            let Some((_, _, created_at)) = self.registry.pending_session(&escrow_id) else {
                continue;
            };
            if now - created_at <= self.ttl {
                continue;
            }

            if let Some(session) = self.registry.remove_pending(&escrow_id) {
                session.wallet.release().await;
                info!(
                    escrow_id,
                    age_secs = (now - created_at).num_seconds(),
                    "evicted expired session"
                );
                evicted += 1;
            }
        }

        evicted
    }

    /// Run the sweep loop until the process exits.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            // The first tick fires immediately; skip it so a fresh start
            // does not race the very first begin.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = self.sweep_once(Utc::now()).await;
                if evicted > 0 {
                    info!(evicted, "cleanup sweep finished");
                }
            }
        })
    }
}
