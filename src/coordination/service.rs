//! Registry of in-flight coordinations

use super::engine::{
    CancelHandle, CancelSignal, Completion, CoordinationOutcome, OrderCoordinator, OrderSubmission,
};
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::ledger::{Ledger, OrderUpdate, QueueStatus};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{error, info, warn};

/// Spawns one coordination per order id and tracks it until it finishes
pub struct CoordinatorService {
    coordinator: Arc<OrderCoordinator>,
    /// Order id -> cancellation handle of its running coordination
    in_flight: Arc<DashMap<String, CancelHandle>>,
    /// Signalled whenever a coordination finishes
    idle: Arc<Notify>,
    shutdown: Arc<RwLock<bool>>,
}

impl CoordinatorService {
    pub fn new(coordinator: Arc<OrderCoordinator>) -> Self {
        Self {
            coordinator,
            in_flight: Arc::new(DashMap::new()),
            idle: Arc::new(Notify::new()),
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        self.coordinator.ledger()
    }

    /// Record an order as `Waiting` and coordinate the rest in the background.
    ///
    /// The order is in the ledger when this returns. Fails with
    /// `DuplicateOrder` if the id is running or already recorded, so callbacks
    /// for an id can only be registered once.
    pub async fn start(
        &self,
        submission: OrderSubmission,
        completion: Completion,
    ) -> CoordinatorResult<JoinHandle<CoordinatorResult<CoordinationOutcome>>> {
        // Held until the entry is registered so shutdown cannot miss it
        let shutting_down = self.shutdown.read().await;
        if *shutting_down {
            return Err(CoordinatorError::Internal(
                "coordinator is shutting down".to_string(),
            ));
        }

        let id = submission.id.clone();
        let (handle, signal) = CancelSignal::pair();
        match self.in_flight.entry(id.clone()) {
            Entry::Occupied(_) => return Err(CoordinatorError::DuplicateOrder { id }),
            Entry::Vacant(slot) => {
                slot.insert(handle);
            }
        }

        let order = match self.coordinator.admit(submission).await {
            Ok(order) => order,
            Err(e) => {
                self.in_flight.remove(&id);
                return Err(e);
            }
        };
        drop(shutting_down);

        let coordinator = self.coordinator.clone();
        let in_flight = self.in_flight.clone();
        let idle = self.idle.clone();

        Ok(tokio::spawn(async move {
            let result = coordinator.run(order, completion, signal).await;

            in_flight.remove(&id);
            idle.notify_waiters();

            match &result {
                Ok(outcome) => {
                    info!("Coordination for {} finished: {}", id, outcome.queue_status())
                }
                Err(e) => error!("Coordination for {} aborted: {}", id, e),
            }
            result
        }))
    }

    pub fn is_in_flight(&self, id: &str) -> bool {
        self.in_flight.contains_key(id)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Mark orders left `Waiting` by a previous process as `AppClosed`.
    ///
    /// Must run before new orders are accepted. Returns the number closed.
    pub async fn recover_interrupted(&self) -> CoordinatorResult<usize> {
        let waiting = self.ledger().orders_with_status(QueueStatus::Waiting).await?;

        let mut closed = 0;
        for order in waiting {
            if self.is_in_flight(&order.id) {
                continue;
            }
            self.ledger()
                .update_order(OrderUpdate::status(&order.id, QueueStatus::AppClosed))
                .await?;
            closed += 1;
        }

        if closed > 0 {
            warn!("Closed {} orders interrupted by a previous shutdown", closed);
        }
        Ok(closed)
    }

    /// Cancel every running coordination and wait up to `grace` for them to settle.
    ///
    /// Returns the number still running when the grace period ran out.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        *self.shutdown.write().await = true;
        info!(
            "Coordinator shutdown initiated, cancelling {} orders",
            self.in_flight.len()
        );

        for entry in self.in_flight.iter() {
            entry.value().cancel();
        }

        let drain = async {
            loop {
                let notified = self.idle.notified();
                if self.in_flight.is_empty() {
                    break;
                }
                notified.await;
            }
        };

        if tokio::time::timeout(grace, drain).await.is_err() {
            let remaining = self.in_flight.len();
            warn!("{} coordinations still running after {:?}", remaining, grace);
            return remaining;
        }
        0
    }
}
