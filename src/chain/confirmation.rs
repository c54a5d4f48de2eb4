//! Confirmation depth tracking for prerequisite transactions
//!
//! A receipt is only trusted once enough blocks were built on top of it.
//! Reverted receipts wait for the same depth as successful ones, so a reorg
//! that re-includes the transaction cannot flip a resolution.

use crate::ledger::TransactionStatus;

use ethers::types::TransactionReceipt;
use tracing::debug;

/// Where a transaction stands relative to the confirmation depth
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptResolution {
    /// No receipt or not yet in a block
    Unmined,
    /// Mined but not deep enough
    Confirming { confirmations: u64 },
    /// Deep enough to resolve the ledger record
    Resolved(TransactionStatus),
}

/// Evaluates receipts against one chain's confirmation requirement
#[derive(Debug, Clone, Copy)]
pub struct ConfirmationTracker {
    chain_id: u64,
    confirmation_blocks: u64,
}

impl ConfirmationTracker {
    pub fn new(chain_id: u64, confirmation_blocks: u64) -> Self {
        Self {
            chain_id,
            confirmation_blocks,
        }
    }

    pub fn evaluate(
        &self,
        receipt: Option<&TransactionReceipt>,
        current_block: u64,
    ) -> ReceiptResolution {
        let Some(receipt) = receipt else {
            return ReceiptResolution::Unmined;
        };
        let Some(block) = receipt.block_number else {
            return ReceiptResolution::Unmined;
        };

        let confirmations = current_block.saturating_sub(block.as_u64());
        if confirmations < self.confirmation_blocks {
            debug!(
                "Transaction {:?} has {} / {} confirmations on chain {}",
                receipt.transaction_hash, confirmations, self.confirmation_blocks, self.chain_id
            );
            return ReceiptResolution::Confirming { confirmations };
        }

        // Pre-Byzantium receipts carry no status
        let status = match receipt.status {
            Some(status) if status.is_zero() => TransactionStatus::Failed,
            _ => TransactionStatus::Success,
        };
        ReceiptResolution::Resolved(status)
    }
}
