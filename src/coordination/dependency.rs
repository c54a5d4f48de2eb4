//! Waits for an order's prerequisite transactions to resolve
//!
//! The waiter subscribes to the ledger's transition stream before it reads
//! the current state of any prerequisite, so a transaction that resolves in
//! between is seen either by the read or by the stream. Dropping the waiter
//! drops the subscription.

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::ledger::{
    Ledger, PrerequisiteRefs, QueueStatus, TransactionKind, TransactionStatus,
    TransactionTransition,
};

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

/// How the prerequisite wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrerequisiteOutcome {
    /// Every prerequisite succeeded
    Cleared,
    /// The first failure observed, as the queue status it maps to
    Failed(QueueStatus),
}

/// Subscription to transitions for one order's prerequisites
pub struct PrerequisiteWaiter {
    ledger: Arc<dyn Ledger>,
    rx: broadcast::Receiver<TransactionTransition>,
    /// Unresolved prerequisites: transaction id -> role
    remaining: HashMap<String, TransactionKind>,
}

impl PrerequisiteWaiter {
    /// Subscribe to the ledger for the given prerequisites
    pub fn subscribe(ledger: Arc<dyn Ledger>, refs: &PrerequisiteRefs) -> Self {
        let rx = ledger.subscribe();

        let mut remaining = HashMap::new();
        if let Some(ref id) = refs.approve_tx_id {
            remaining.insert(id.clone(), TransactionKind::Approve);
        }
        if let Some(ref id) = refs.wrap_tx_id {
            remaining.insert(id.clone(), TransactionKind::Wrap);
        }

        Self {
            ledger,
            rx,
            remaining,
        }
    }

    /// Wait until every prerequisite succeeded or one failed
    pub async fn wait(mut self) -> CoordinatorResult<PrerequisiteOutcome> {
        if let Some(outcome) = self.check_current_state().await? {
            return Ok(outcome);
        }

        while !self.remaining.is_empty() {
            match self.rx.recv().await {
                Ok(transition) => {
                    if let Some(outcome) = self.apply(&transition.id, transition.status) {
                        return Ok(outcome);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        "Transition stream lagged by {} messages, re-reading prerequisites",
                        skipped
                    );
                    if let Some(outcome) = self.check_current_state().await? {
                        return Ok(outcome);
                    }
                }
                Err(RecvError::Closed) => {
                    let id = self.remaining.keys().next().cloned().unwrap_or_default();
                    return Err(CoordinatorError::SubscriptionClosed { id });
                }
            }
        }

        Ok(PrerequisiteOutcome::Cleared)
    }

    /// Read prerequisites that may have resolved before or during subscription
    async fn check_current_state(&mut self) -> CoordinatorResult<Option<PrerequisiteOutcome>> {
        let ids: Vec<String> = self.remaining.keys().cloned().collect();

        for id in ids {
            if let Some(record) = self.ledger.get_transaction(&id).await? {
                if record.status.is_terminal() {
                    if let Some(outcome) = self.apply(&id, record.status) {
                        return Ok(Some(outcome));
                    }
                }
            }
        }

        if self.remaining.is_empty() {
            return Ok(Some(PrerequisiteOutcome::Cleared));
        }
        Ok(None)
    }

    /// Fold one resolution into the wait. Returns the outcome once decided.
    fn apply(&mut self, id: &str, status: TransactionStatus) -> Option<PrerequisiteOutcome> {
        let Some(kind) = self.remaining.get(id).copied() else {
            debug!("Ignoring transition for unrelated transaction {}", id);
            return None;
        };

        if !status.is_terminal() {
            return None;
        }

        if !status.is_success() {
            debug!("Prerequisite {} ({}) resolved {}", id, kind.as_str(), status.as_str());
            let failed = match kind {
                TransactionKind::Approve => QueueStatus::ApprovalFailed,
                TransactionKind::Wrap => QueueStatus::WrapFailed,
            };
            return Some(PrerequisiteOutcome::Failed(failed));
        }

        debug!("Prerequisite {} ({}) succeeded", id, kind.as_str());
        self.remaining.remove(id);

        if self.remaining.is_empty() {
            Some(PrerequisiteOutcome::Cleared)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::fixtures::sample_transaction;
    use crate::ledger::{MemoryLedger, MockLedger, TransactionRecord};
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready};

    async fn ledger_with(ids: &[(&str, TransactionKind)]) -> Arc<MemoryLedger> {
        let ledger = Arc::new(MemoryLedger::new());
        for (id, kind) in ids {
            ledger
                .record_transaction(sample_transaction(id, *kind))
                .await
                .unwrap();
        }
        ledger
    }

    fn refs(approve: Option<&str>, wrap: Option<&str>) -> PrerequisiteRefs {
        PrerequisiteRefs {
            approve_tx_id: approve.map(str::to_string),
            wrap_tx_id: wrap.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_already_resolved_prerequisite_is_not_missed() {
        let ledger = ledger_with(&[("0xA", TransactionKind::Approve)]).await;
        ledger
            .resolve_transaction("0xA", TransactionStatus::Success, None)
            .await
            .unwrap();

        let waiter = PrerequisiteWaiter::subscribe(ledger.clone(), &refs(Some("0xA"), None));
        assert_eq!(waiter.wait().await.unwrap(), PrerequisiteOutcome::Cleared);
    }

    #[tokio::test]
    async fn test_waiter_wakes_only_when_last_prerequisite_resolves() {
        let ledger = ledger_with(&[
            ("0xA", TransactionKind::Approve),
            ("0xW", TransactionKind::Wrap),
        ])
        .await;

        let waiter =
            PrerequisiteWaiter::subscribe(ledger.clone(), &refs(Some("0xA"), Some("0xW")));
        let mut task = tokio_test::task::spawn(waiter.wait());
        assert_pending!(task.poll());

        ledger
            .resolve_transaction("0xW", TransactionStatus::Success, None)
            .await
            .unwrap();
        assert!(task.is_woken());
        assert_pending!(task.poll());

        ledger
            .resolve_transaction("0xA", TransactionStatus::Success, None)
            .await
            .unwrap();
        assert_eq!(
            assert_ready!(task.poll()).unwrap(),
            PrerequisiteOutcome::Cleared
        );
    }

    #[tokio::test]
    async fn test_unrelated_transitions_are_ignored() {
        let ledger = ledger_with(&[
            ("0xA", TransactionKind::Approve),
            ("0xOTHER", TransactionKind::Approve),
        ])
        .await;

        let waiter = PrerequisiteWaiter::subscribe(ledger.clone(), &refs(Some("0xA"), None));
        let task = tokio::spawn(waiter.wait());

        ledger
            .resolve_transaction("0xOTHER", TransactionStatus::Failed, None)
            .await
            .unwrap();
        tokio::task::yield_now().await;
        assert!(!task.is_finished());

        ledger
            .resolve_transaction("0xA", TransactionStatus::Success, None)
            .await
            .unwrap();
        assert_eq!(task.await.unwrap().unwrap(), PrerequisiteOutcome::Cleared);
    }

    #[tokio::test]
    async fn test_wrap_failure_short_circuits_pending_approval() {
        let ledger = ledger_with(&[
            ("0xA", TransactionKind::Approve),
            ("0xW", TransactionKind::Wrap),
        ])
        .await;

        let waiter =
            PrerequisiteWaiter::subscribe(ledger.clone(), &refs(Some("0xA"), Some("0xW")));
        let task = tokio::spawn(waiter.wait());

        ledger
            .resolve_transaction("0xW", TransactionStatus::Failed, None)
            .await
            .unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(outcome, PrerequisiteOutcome::Failed(QueueStatus::WrapFailed));
    }

    #[tokio::test]
    async fn test_cancelled_approval_maps_to_approval_failed() {
        let ledger = ledger_with(&[("0xA", TransactionKind::Approve)]).await;
        let waiter = PrerequisiteWaiter::subscribe(ledger.clone(), &refs(Some("0xA"), None));

        ledger
            .resolve_transaction("0xA", TransactionStatus::Cancelled, None)
            .await
            .unwrap();

        assert_eq!(
            waiter.wait().await.unwrap(),
            PrerequisiteOutcome::Failed(QueueStatus::ApprovalFailed)
        );
    }

    #[tokio::test]
    async fn test_subscription_released_after_wait() {
        let ledger = ledger_with(&[("0xA", TransactionKind::Approve)]).await;

        let waiter = PrerequisiteWaiter::subscribe(ledger.clone(), &refs(Some("0xA"), None));
        assert_eq!(ledger.subscriber_count(), 1);

        let task = tokio::spawn(waiter.wait());
        ledger
            .resolve_transaction("0xA", TransactionStatus::Success, None)
            .await
            .unwrap();
        assert_eq!(task.await.unwrap().unwrap(), PrerequisiteOutcome::Cleared);
        assert_eq!(ledger.subscriber_count(), 0);
    }

    fn approval_with_status(id: &str, status: TransactionStatus) -> TransactionRecord {
        let mut record = sample_transaction(id, TransactionKind::Approve);
        record.status = status;
        record
    }

    #[tokio::test]
    async fn test_lagged_stream_rereads_the_ledger() {
        let (tx, rx) = broadcast::channel(4);
        let mut ledger = MockLedger::new();
        ledger.expect_subscribe().return_once(move || rx);
        ledger
            .expect_get_transaction()
            .times(1)
            .returning(|id| Ok(Some(approval_with_status(id, TransactionStatus::Pending))));
        ledger
            .expect_get_transaction()
            .times(1)
            .returning(|id| Ok(Some(approval_with_status(id, TransactionStatus::Success))));

        let waiter = PrerequisiteWaiter::subscribe(Arc::new(ledger), &refs(Some("0xA"), None));
        let mut task = tokio_test::task::spawn(waiter.wait());
        assert_pending!(task.poll());

        // The success for 0xA is pushed out of the buffer by unrelated traffic
        for i in 0..10 {
            tx.send(TransactionTransition {
                id: format!("0xOTHER{}", i),
                status: TransactionStatus::Success,
                hash: None,
            })
            .unwrap();
        }

        assert_eq!(
            assert_ready!(task.poll()).unwrap(),
            PrerequisiteOutcome::Cleared
        );
    }

    #[tokio::test]
    async fn test_closed_stream_is_an_error() {
        let (tx, rx) = broadcast::channel::<TransactionTransition>(4);
        let mut ledger = MockLedger::new();
        ledger.expect_subscribe().return_once(move || rx);
        ledger
            .expect_get_transaction()
            .returning(|id| Ok(Some(approval_with_status(id, TransactionStatus::Pending))));

        let waiter = PrerequisiteWaiter::subscribe(Arc::new(ledger), &refs(Some("0xA"), None));
        drop(tx);

        let err = waiter.wait().await.unwrap_err();
        assert!(matches!(
            err,
            CoordinatorError::SubscriptionClosed { ref id } if id == "0xA"
        ));
    }
}
