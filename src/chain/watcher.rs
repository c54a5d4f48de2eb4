//! Polls receipts for pending prerequisite transactions and resolves them in the ledger

use super::confirmation::{ConfirmationTracker, ReceiptResolution};
use super::provider::ReceiptSource;
use crate::config::ChainConfig;
use crate::error::CoordinatorResult;
use crate::ledger::Ledger;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Watches one chain for receipts of transactions the ledger still considers pending
pub struct ReceiptWatcher {
    chain_id: u64,
    source: Arc<dyn ReceiptSource>,
    tracker: ConfirmationTracker,
    ledger: Arc<dyn Ledger>,
    poll_interval: Duration,
}

impl ReceiptWatcher {
    pub fn new(
        config: &ChainConfig,
        source: Arc<dyn ReceiptSource>,
        ledger: Arc<dyn Ledger>,
    ) -> Self {
        Self {
            chain_id: config.chain_id,
            source,
            tracker: ConfirmationTracker::new(config.chain_id, config.confirmation_blocks),
            ledger,
            poll_interval: Duration::from_millis(config.receipt_poll_interval_ms),
        }
    }

    /// Poll until shutdown is flagged
    pub async fn run(&self, shutdown: Arc<RwLock<bool>>) {
        info!(
            "Receipt watcher started for chain {} (every {:?})",
            self.chain_id, self.poll_interval
        );

        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            ticker.tick().await;
            if *shutdown.read().await {
                break;
            }

            match self.poll_once().await {
                Err(e) if e.is_retryable() => {
                    warn!("Receipt poll failed for chain {}, retrying: {}", self.chain_id, e);
                }
                Err(e) => error!("Receipt poll failed for chain {}: {}", self.chain_id, e),
                Ok(_) => {}
            }
        }

        info!("Receipt watcher stopped for chain {}", self.chain_id);
    }

    /// Check every pending transaction once. Returns how many were resolved.
    pub async fn poll_once(&self) -> CoordinatorResult<usize> {
        let pending = self.ledger.pending_transactions(self.chain_id).await?;
        if pending.is_empty() {
            return Ok(0);
        }

        let current_block = self.source.block_number().await?;
        let mut resolved = 0;

        for tx in pending {
            let Some(hash) = tx.hash else { continue };

            let receipt = match self.source.receipt(hash).await {
                Ok(receipt) => receipt,
                Err(e) => {
                    warn!("Skipping {} on chain {}: {}", tx.id, self.chain_id, e);
                    continue;
                }
            };

            match self.tracker.evaluate(receipt.as_ref(), current_block) {
                ReceiptResolution::Resolved(status) => {
                    if self
                        .ledger
                        .resolve_transaction(&tx.id, status, Some(hash))
                        .await?
                    {
                        info!(
                            "{} transaction {} resolved {} on chain {}",
                            tx.kind.as_str(),
                            tx.id,
                            status.as_str(),
                            self.chain_id
                        );
                        crate::metrics::record_prerequisite_resolved(self.chain_id, status);
                        resolved += 1;
                    }
                }
                ReceiptResolution::Confirming { .. } | ReceiptResolution::Unmined => {
                    debug!("Transaction {} still pending on chain {}", tx.id, self.chain_id);
                }
            }
        }

        Ok(resolved)
    }
}
