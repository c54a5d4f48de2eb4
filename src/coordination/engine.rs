//! Order submission coordinator
//!
//! Drives one order through `Waiting -> (prerequisites) -> Submitted` or to
//! exactly one failure status. Each invocation records the order before it
//! waits on anything and writes `Submitted` before the network call is made.

use super::dependency::{PrerequisiteOutcome, PrerequisiteWaiter};
use super::staleness::StalenessPolicy;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::events::{AnalyticsEvent, AppNotification, EventSink, OriginType, WrapType};
use crate::ledger::{Ledger, OrderRecord, OrderUpdate, PrerequisiteRefs, QueueStatus};
use crate::submission::{OrderRequest, OrderSubmitter, SubmittedOrder};

use chrono::Utc;
use ethers::types::Address;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Everything needed to queue one order
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSubmission {
    #[serde(default = "new_order_id")]
    pub id: String,
    pub chain_id: u64,
    pub signer: Address,
    /// Hash of the signed order, when the wallet computed it locally
    #[serde(default)]
    pub order_hash: Option<String>,
    pub payload: OrderRequest,
    #[serde(default)]
    pub prerequisites: PrerequisiteRefs,
    #[serde(default)]
    pub wrap_type: WrapType,
    #[serde(default)]
    pub origin_type: OriginType,
}

fn new_order_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl OrderSubmission {
    /// Reject submissions whose prerequisites cannot be told apart
    pub fn validate(&self) -> CoordinatorResult<()> {
        let refs = &self.prerequisites;
        if let (Some(approve), Some(wrap)) = (&refs.approve_tx_id, &refs.wrap_tx_id) {
            if approve == wrap {
                return Err(CoordinatorError::InvalidOrder {
                    id: self.id.clone(),
                    reason: format!("approval and wrap both reference transaction {}", approve),
                });
            }
        }
        Ok(())
    }

    fn to_record(&self) -> OrderRecord {
        let now = Utc::now();
        OrderRecord {
            id: self.id.clone(),
            chain_id: self.chain_id,
            signer: self.signer,
            order_hash: self.order_hash.clone(),
            queue_status: QueueStatus::Waiting,
            routing: self.payload.routing,
            wrap_type: self.wrap_type,
            origin_type: self.origin_type,
            prerequisites: self.prerequisites.clone(),
            payload: self.payload.clone(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Success and failure callbacks. Consumed by whichever fires, so at most one runs.
pub struct Completion {
    on_success: Box<dyn FnOnce(&SubmittedOrder) + Send>,
    on_failure: Box<dyn FnOnce(QueueStatus) + Send>,
}

impl Completion {
    pub fn new(
        on_success: impl FnOnce(&SubmittedOrder) + Send + 'static,
        on_failure: impl FnOnce(QueueStatus) + Send + 'static,
    ) -> Self {
        Self {
            on_success: Box::new(on_success),
            on_failure: Box::new(on_failure),
        }
    }

    /// Callbacks that do nothing; the returned outcome is the only signal
    pub fn noop() -> Self {
        Self::new(|_| {}, |_| {})
    }

    fn succeed(self, order: &SubmittedOrder) {
        (self.on_success)(order)
    }

    fn fail(self, status: QueueStatus) {
        (self.on_failure)(status)
    }
}

/// Terminal result of one coordination
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinationOutcome {
    Submitted(SubmittedOrder),
    Failed(QueueStatus),
}

impl CoordinationOutcome {
    pub fn queue_status(&self) -> QueueStatus {
        match self {
            CoordinationOutcome::Submitted(_) => QueueStatus::Submitted,
            CoordinationOutcome::Failed(status) => *status,
        }
    }
}

/// Sender half of a cancellation signal
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<watch::Sender<bool>>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

/// Receiver half of a cancellation signal
#[derive(Debug, Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

impl CancelSignal {
    pub fn pair() -> (CancelHandle, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle(Arc::new(tx)), CancelSignal(rx))
    }

    /// A signal that never fires
    pub fn never() -> CancelSignal {
        Self::pair().1
    }

    /// Resolves once cancelled. Never resolves if the handle is dropped uncancelled.
    async fn cancelled(&mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }
            if self.0.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// An order already recorded as `Waiting` whose lifecycle has not run yet
pub struct AdmittedOrder {
    submission: OrderSubmission,
    created_at: Instant,
}

impl AdmittedOrder {
    pub fn id(&self) -> &str {
        &self.submission.id
    }
}

enum WaitResult {
    Outcome(PrerequisiteOutcome),
    TimedOut,
    Cancelled,
}

/// Coordinates prerequisite waits, staleness and submission for orders
pub struct OrderCoordinator {
    ledger: Arc<dyn Ledger>,
    submitter: Arc<dyn OrderSubmitter>,
    events: Arc<dyn EventSink>,
    policy: StalenessPolicy,
}

impl OrderCoordinator {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        submitter: Arc<dyn OrderSubmitter>,
        events: Arc<dyn EventSink>,
        policy: StalenessPolicy,
    ) -> Self {
        Self {
            ledger,
            submitter,
            events,
            policy,
        }
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    /// Run one order to a terminal queue status.
    ///
    /// Order-domain failures come back as `CoordinationOutcome::Failed` after
    /// `on_failure` ran. An `Err` means the submission was rejected up front or
    /// the ledger or its transition stream failed; neither callback runs in
    /// that case.
    pub async fn coordinate(
        &self,
        submission: OrderSubmission,
        completion: Completion,
        cancel: CancelSignal,
    ) -> CoordinatorResult<CoordinationOutcome> {
        let order = self.admit(submission).await?;
        self.run(order, completion, cancel).await
    }

    /// Validate the submission and record it as `Waiting`.
    ///
    /// Once this returns the order is visible in the ledger. Duplicate ids
    /// fail here with `DuplicateOrder`.
    pub async fn admit(&self, submission: OrderSubmission) -> CoordinatorResult<AdmittedOrder> {
        submission.validate()?;

        let created_at = Instant::now();
        self.ledger.record_order(submission.to_record()).await?;
        crate::metrics::record_order_started(submission.chain_id);
        info!("Order {} queued (waiting)", submission.id);

        Ok(AdmittedOrder {
            submission,
            created_at,
        })
    }

    /// Drive an admitted order from `Waiting` to its terminal status
    pub async fn run(
        &self,
        order: AdmittedOrder,
        completion: Completion,
        mut cancel: CancelSignal,
    ) -> CoordinatorResult<CoordinationOutcome> {
        let AdmittedOrder {
            submission,
            created_at,
        } = order;
        let id = submission.id.clone();

        if !submission.prerequisites.is_empty() {
            let waiter =
                PrerequisiteWaiter::subscribe(self.ledger.clone(), &submission.prerequisites);

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => WaitResult::Cancelled,
                result = self.wait_with_deadline(waiter) => result?,
            };

            crate::metrics::record_prerequisite_wait(created_at.elapsed().as_secs_f64());

            match result {
                WaitResult::Outcome(PrerequisiteOutcome::Cleared) => {
                    debug!("Order {} prerequisites cleared", id);
                }
                WaitResult::Outcome(PrerequisiteOutcome::Failed(status)) => {
                    return self.fail(&id, status, completion).await;
                }
                WaitResult::TimedOut => {
                    warn!("Order {} exceeded the maximum prerequisite wait", id);
                    return self.fail(&id, QueueStatus::Stale, completion).await;
                }
                WaitResult::Cancelled => {
                    return self.fail(&id, QueueStatus::AppClosed, completion).await;
                }
            }

            if self.policy.is_stale_since(created_at) {
                warn!(
                    "Order {} went stale after {:?} waiting on prerequisites",
                    id,
                    created_at.elapsed()
                );
                return self.fail(&id, QueueStatus::Stale, completion).await;
            }
        }

        self.ledger
            .update_order(OrderUpdate::status(&id, QueueStatus::Submitted))
            .await?;
        info!("Order {} submitted to matching service", id);

        let submit_started = Instant::now();
        let result = self.submitter.submit(&submission.payload).await;
        crate::metrics::record_submission_latency(submit_started.elapsed().as_secs_f64());

        match result {
            Ok(submitted) => {
                self.events.track(AnalyticsEvent::OrderSubmitted {
                    routing: submission.payload.routing,
                    order_hash: submitted.order_id.clone(),
                    origin_type: submission.origin_type,
                });
                self.events.notify(AppNotification::OrderPending {
                    wrap_type: submission.wrap_type,
                });
                crate::metrics::record_order_outcome(QueueStatus::Submitted);

                completion.succeed(&submitted);
                Ok(CoordinationOutcome::Submitted(submitted))
            }
            Err(e) => {
                warn!("Order {} submission failed: {}", id, e);
                self.fail(&id, QueueStatus::SubmissionFailed, completion)
                    .await
            }
        }
    }

    async fn wait_with_deadline(&self, waiter: PrerequisiteWaiter) -> CoordinatorResult<WaitResult> {
        match self.policy.max_prerequisite_wait {
            Some(max_wait) => match tokio::time::timeout(max_wait, waiter.wait()).await {
                Ok(outcome) => Ok(WaitResult::Outcome(outcome?)),
                Err(_) => Ok(WaitResult::TimedOut),
            },
            None => Ok(WaitResult::Outcome(waiter.wait().await?)),
        }
    }

    async fn fail(
        &self,
        id: &str,
        status: QueueStatus,
        completion: Completion,
    ) -> CoordinatorResult<CoordinationOutcome> {
        self.ledger
            .update_order(OrderUpdate::status(id, status))
            .await?;
        info!("Order {} ended {}", id, status);
        crate::metrics::record_order_outcome(status);

        completion.fail(status);
        Ok(CoordinationOutcome::Failed(status))
    }
}
