//! Periodic pruning of dispatched outbox rows.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::{Result, outbox::OutboxStore};

/// Deletes dispatched outbox rows older than a retention window.
pub struct OutboxJanitor {
    store: Arc<dyn OutboxStore>,
    retention: Duration,
    interval: Duration,
}

impl OutboxJanitor {
    pub fn new(store: Arc<dyn OutboxStore>, retention: Duration, interval: Duration) -> Self {
        Self {
            store,
            retention,
            interval,
        }
    }

    /// Prunes once, returning the number of deleted rows.
    #[tracing::instrument(skip(self))]
    pub async fn prune_once(&self) -> Result<u64> {
        let retention = chrono::Duration::from_std(self.retention)
            .unwrap_or_else(|_| chrono::Duration::days(7));
        let pruned = self.store.prune_dispatched(Utc::now() - retention).await?;
        if pruned > 0 {
            tracing::info!(pruned, "Pruned dispatched outbox rows");
        }
        Ok(pruned)
    }

    /// Prunes every `interval` until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.prune_once().await {
                        tracing::error!(error = %e, "Outbox pruning failed");
                    }
                }
                _ = shutdown.cancelled() => return,
            }
        }
    }
}
