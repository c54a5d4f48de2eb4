//! Ledger of queued orders and their prerequisite transactions
//!
//! Handles:
//! - Append-once order records with monotonic queue status updates
//! - Prerequisite transaction records and their terminal resolution
//! - A broadcast stream of transaction transitions
//!
//! Records are keyed by id and never deleted. Writes for one id come from a
//! single coordinator, so no cross-id locking is needed.

mod memory;
mod postgres;
mod types;

pub use memory::MemoryLedger;
#[cfg(test)]
pub(crate) use memory::tests as fixtures;
pub use postgres::PgLedger;
pub use types::{
    LedgerStats, OrderRecord, OrderUpdate, PrerequisiteRefs, QueueStatus, TransactionKind,
    TransactionRecord, TransactionStatus, TransactionTransition,
};

use crate::error::CoordinatorResult;

use async_trait::async_trait;
use ethers::types::H256;
use tokio::sync::broadcast;

/// Capacity of the transition broadcast channel
pub const TRANSITION_CHANNEL_CAPACITY: usize = 10_000;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Append a new order. Fails with `DuplicateOrder` if the id exists.
    async fn record_order(&self, record: OrderRecord) -> CoordinatorResult<()>;

    /// Apply a partial update. Fails on unknown ids and illegal transitions.
    async fn update_order(&self, update: OrderUpdate) -> CoordinatorResult<OrderRecord>;

    async fn get_order(&self, id: &str) -> CoordinatorResult<Option<OrderRecord>>;

    async fn orders_with_status(&self, status: QueueStatus) -> CoordinatorResult<Vec<OrderRecord>>;

    /// Track a prerequisite transaction. Re-recording an id replaces a pending entry.
    async fn record_transaction(&self, record: TransactionRecord) -> CoordinatorResult<()>;

    /// Move a transaction to a terminal status and publish the transition.
    ///
    /// Returns `false` without publishing if it was already terminal.
    async fn resolve_transaction(
        &self,
        id: &str,
        status: TransactionStatus,
        hash: Option<H256>,
    ) -> CoordinatorResult<bool>;

    async fn get_transaction(&self, id: &str) -> CoordinatorResult<Option<TransactionRecord>>;

    /// Transactions with a known hash still awaiting resolution on a chain
    async fn pending_transactions(&self, chain_id: u64) -> CoordinatorResult<Vec<TransactionRecord>>;

    /// Subscribe to transitions published from now on
    fn subscribe(&self) -> broadcast::Receiver<TransactionTransition>;

    /// Order counts by queue status
    async fn stats(&self) -> CoordinatorResult<LedgerStats>;

    async fn health_check(&self) -> CoordinatorResult<()>;
}
