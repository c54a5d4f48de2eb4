//! In-memory ledger backed by concurrent maps
//!
//! Used when no database is configured and as the ledger in tests.

use super::types::{
    LedgerStats, OrderRecord, OrderUpdate, QueueStatus, TransactionRecord, TransactionStatus,
    TransactionTransition,
};
use super::{Ledger, TRANSITION_CHANNEL_CAPACITY};
use crate::error::{CoordinatorError, CoordinatorResult};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ethers::types::H256;
use tokio::sync::broadcast;
use tracing::debug;

pub struct MemoryLedger {
    orders: DashMap<String, OrderRecord>,
    transactions: DashMap<String, TransactionRecord>,
    transition_tx: broadcast::Sender<TransactionTransition>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        let (transition_tx, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        Self {
            orders: DashMap::new(),
            transactions: DashMap::new(),
            transition_tx,
        }
    }

    /// Number of live transition subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.transition_tx.receiver_count()
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn record_order(&self, record: OrderRecord) -> CoordinatorResult<()> {
        match self.orders.entry(record.id.clone()) {
            Entry::Occupied(_) => Err(CoordinatorError::DuplicateOrder { id: record.id }),
            Entry::Vacant(slot) => {
                debug!("Recorded order {} ({})", record.id, record.queue_status);
                slot.insert(record);
                Ok(())
            }
        }
    }

    async fn update_order(&self, update: OrderUpdate) -> CoordinatorResult<OrderRecord> {
        let mut record = self
            .orders
            .get_mut(&update.id)
            .ok_or_else(|| CoordinatorError::OrderNotFound {
                id: update.id.clone(),
            })?;

        update.apply(&mut record)?;
        Ok(record.clone())
    }

    async fn get_order(&self, id: &str) -> CoordinatorResult<Option<OrderRecord>> {
        Ok(self.orders.get(id).map(|r| r.clone()))
    }

    async fn orders_with_status(&self, status: QueueStatus) -> CoordinatorResult<Vec<OrderRecord>> {
        Ok(self
            .orders
            .iter()
            .filter(|r| r.queue_status == status)
            .map(|r| r.clone())
            .collect())
    }

    async fn record_transaction(&self, record: TransactionRecord) -> CoordinatorResult<()> {
        match self.transactions.entry(record.id.clone()) {
            Entry::Occupied(mut existing) => {
                if existing.get().status.is_terminal() {
                    return Err(CoordinatorError::InvalidStateTransition {
                        from: existing.get().status.as_str().to_string(),
                        to: record.status.as_str().to_string(),
                    });
                }
                existing.insert(record);
            }
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
        }
        Ok(())
    }

    async fn resolve_transaction(
        &self,
        id: &str,
        status: TransactionStatus,
        hash: Option<H256>,
    ) -> CoordinatorResult<bool> {
        if !status.is_terminal() {
            return Err(CoordinatorError::Ledger(format!(
                "cannot resolve {} to non-terminal status",
                id
            )));
        }

        let transition = {
            let mut record =
                self.transactions
                    .get_mut(id)
                    .ok_or_else(|| CoordinatorError::TransactionNotFound {
                        id: id.to_string(),
                    })?;

            if record.status.is_terminal() {
                return Ok(false);
            }

            record.status = status;
            if hash.is_some() {
                record.hash = hash;
            }

            TransactionTransition {
                id: record.id.clone(),
                status,
                hash: record.hash,
            }
        };

        // Record is updated before publishing so late subscribers can read it back
        if self.transition_tx.send(transition).is_err() {
            debug!("No transition subscribers for {}", id);
        }
        Ok(true)
    }

    async fn get_transaction(&self, id: &str) -> CoordinatorResult<Option<TransactionRecord>> {
        Ok(self.transactions.get(id).map(|r| r.clone()))
    }

    async fn pending_transactions(&self, chain_id: u64) -> CoordinatorResult<Vec<TransactionRecord>> {
        Ok(self
            .transactions
            .iter()
            .filter(|r| r.chain_id == chain_id && r.hash.is_some() && !r.status.is_terminal())
            .map(|r| r.clone())
            .collect())
    }

    fn subscribe(&self) -> broadcast::Receiver<TransactionTransition> {
        self.transition_tx.subscribe()
    }

    async fn stats(&self) -> CoordinatorResult<LedgerStats> {
        let mut stats = LedgerStats::default();
        for record in self.orders.iter() {
            stats.count(record.queue_status);
        }
        Ok(stats)
    }

    async fn health_check(&self) -> CoordinatorResult<()> {
        Ok(())
    }
}
