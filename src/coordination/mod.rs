//! Order coordination
//!
//! An order is recorded as waiting, held until its approval and wrap
//! transactions resolve, checked for staleness, and then handed to the
//! matching service. Every order ends in exactly one terminal queue status.

pub mod dependency;
pub mod engine;
pub mod service;
pub mod staleness;

pub use dependency::{PrerequisiteOutcome, PrerequisiteWaiter};
pub use engine::{
    CancelHandle, CancelSignal, Completion, CoordinationOutcome, OrderCoordinator,
    OrderSubmission,
};
pub use service::CoordinatorService;
pub use staleness::{is_stale, StalenessPolicy};
