//! Record types held by the ledger

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::events::{OriginType, WrapType};
use crate::submission::{OrderRequest, Routing};

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Why an order has not reached the matching service, or that it has
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueueStatus {
    Waiting,
    Submitted,
    SubmissionFailed,
    ApprovalFailed,
    WrapFailed,
    Stale,
    /// The coordinator stopped before submitting (shutdown or restart)
    AppClosed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Waiting => "waiting",
            QueueStatus::Submitted => "submitted",
            QueueStatus::SubmissionFailed => "submissionFailed",
            QueueStatus::ApprovalFailed => "approvalFailed",
            QueueStatus::WrapFailed => "wrapFailed",
            QueueStatus::Stale => "stale",
            QueueStatus::AppClosed => "appClosed",
        }
    }

    pub fn is_failure(&self) -> bool {
        !matches!(self, QueueStatus::Waiting | QueueStatus::Submitted)
    }

    /// `Submitted` may still be overwritten by `SubmissionFailed`; failures never change.
    pub fn can_transition_to(&self, next: QueueStatus) -> bool {
        match self {
            QueueStatus::Waiting => true,
            QueueStatus::Submitted => {
                matches!(next, QueueStatus::Submitted | QueueStatus::SubmissionFailed)
            }
            failed => *failed == next,
        }
    }

    /// Human-readable reason for a failure status
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            QueueStatus::Waiting | QueueStatus::Submitted => None,
            QueueStatus::SubmissionFailed => Some("The matching service rejected the order"),
            QueueStatus::ApprovalFailed => Some("The token approval transaction failed"),
            QueueStatus::WrapFailed => Some("The wrap transaction failed"),
            QueueStatus::Stale => {
                Some("Prerequisite transactions took too long; the quote is no longer valid")
            }
            QueueStatus::AppClosed => Some("The order was interrupted before it was submitted"),
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = CoordinatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(QueueStatus::Waiting),
            "submitted" => Ok(QueueStatus::Submitted),
            "submissionFailed" => Ok(QueueStatus::SubmissionFailed),
            "approvalFailed" => Ok(QueueStatus::ApprovalFailed),
            "wrapFailed" => Ok(QueueStatus::WrapFailed),
            "stale" => Ok(QueueStatus::Stale),
            "appClosed" => Ok(QueueStatus::AppClosed),
            other => Err(CoordinatorError::Ledger(format!("unknown queue status {}", other))),
        }
    }
}

/// Prerequisite transactions an order waits on
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrerequisiteRefs {
    pub approve_tx_id: Option<String>,
    pub wrap_tx_id: Option<String>,
}

impl PrerequisiteRefs {
    pub fn is_empty(&self) -> bool {
        self.approve_tx_id.is_none() && self.wrap_tx_id.is_none()
    }
}

/// The unit of state for one queued order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    pub id: String,
    pub chain_id: u64,
    pub signer: Address,
    pub order_hash: Option<String>,
    pub queue_status: QueueStatus,
    pub routing: Routing,
    pub wrap_type: WrapType,
    pub origin_type: OriginType,
    pub prerequisites: PrerequisiteRefs,
    pub payload: OrderRequest,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update of an order record, keyed by id
#[derive(Debug, Clone, PartialEq)]
pub struct OrderUpdate {
    pub id: String,
    pub queue_status: Option<QueueStatus>,
    pub order_hash: Option<String>,
}

impl OrderUpdate {
    pub fn status(id: impl Into<String>, status: QueueStatus) -> Self {
        Self {
            id: id.into(),
            queue_status: Some(status),
            order_hash: None,
        }
    }

    /// Apply to a record, enforcing queue status monotonicity
    pub fn apply(&self, record: &mut OrderRecord) -> CoordinatorResult<()> {
        if let Some(next) = self.queue_status {
            if !record.queue_status.can_transition_to(next) {
                return Err(CoordinatorError::InvalidStateTransition {
                    from: record.queue_status.to_string(),
                    to: next.to_string(),
                });
            }
            record.queue_status = next;
        }
        if let Some(ref hash) = self.order_hash {
            record.order_hash = Some(hash.clone());
        }
        record.updated_at = Utc::now();
        Ok(())
    }
}

/// What a prerequisite transaction does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransactionKind {
    Approve,
    Wrap,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Approve => "approve",
            TransactionKind::Wrap => "wrap",
        }
    }
}

impl FromStr for TransactionKind {
    type Err = CoordinatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" => Ok(TransactionKind::Approve),
            "wrap" => Ok(TransactionKind::Wrap),
            other => Err(CoordinatorError::Ledger(format!("unknown transaction kind {}", other))),
        }
    }
}

/// Generic on-chain transaction status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
    Cancelled,
    /// Superseded by another transaction with the same nonce
    Replaced,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Success => "success",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Cancelled => "cancelled",
            TransactionStatus::Replaced => "replaced",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TransactionStatus::Success)
    }
}

impl FromStr for TransactionStatus {
    type Err = CoordinatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "success" => Ok(TransactionStatus::Success),
            "failed" => Ok(TransactionStatus::Failed),
            "cancelled" => Ok(TransactionStatus::Cancelled),
            "replaced" => Ok(TransactionStatus::Replaced),
            other => Err(CoordinatorError::Ledger(format!(
                "unknown transaction status {}",
                other
            ))),
        }
    }
}

/// A prerequisite transaction tracked by the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub id: String,
    pub chain_id: u64,
    pub kind: TransactionKind,
    pub hash: Option<H256>,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}

/// Published when a transaction reaches a terminal status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionTransition {
    pub id: String,
    pub status: TransactionStatus,
    pub hash: Option<H256>,
}

/// Order counts by queue status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    pub waiting: u64,
    pub submitted: u64,
    pub failed: u64,
}

impl LedgerStats {
    pub fn count(&mut self, status: QueueStatus) {
        match status {
            QueueStatus::Waiting => self.waiting += 1,
            QueueStatus::Submitted => self.submitted += 1,
            _ => self.failed += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_statuses_are_final() {
        for failed in [
            QueueStatus::SubmissionFailed,
            QueueStatus::ApprovalFailed,
            QueueStatus::WrapFailed,
            QueueStatus::Stale,
            QueueStatus::AppClosed,
        ] {
            assert!(failed.is_failure());
            assert!(failed.reason().is_some());
            assert!(!failed.can_transition_to(QueueStatus::Submitted));
            assert!(!failed.can_transition_to(QueueStatus::Waiting));
        }
    }

    #[test]
    fn test_submitted_only_falls_to_submission_failed() {
        assert!(QueueStatus::Submitted.can_transition_to(QueueStatus::SubmissionFailed));
        assert!(!QueueStatus::Submitted.can_transition_to(QueueStatus::Stale));
        assert!(!QueueStatus::Submitted.can_transition_to(QueueStatus::Waiting));
    }

    #[test]
    fn test_status_string_round_trip_matches_serde() {
        let status = QueueStatus::ApprovalFailed;
        let json = serde_json::to_string(&status).unwrap();
        assert_eq!(json, format!("\"{}\"", status.as_str()));
        assert_eq!(status.as_str().parse::<QueueStatus>().unwrap(), status);
    }
}
