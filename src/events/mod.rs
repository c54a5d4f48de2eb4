//! Analytics events and user notifications emitted on successful submission
//!
//! Failure paths emit nothing here; the ledger record is their only trace.

use crate::submission::Routing;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Whether the trade wraps or unwraps the native currency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WrapType {
    #[default]
    NotApplicable,
    Wrap,
    Unwrap,
}

impl WrapType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WrapType::NotApplicable => "notApplicable",
            WrapType::Wrap => "wrap",
            WrapType::Unwrap => "unwrap",
        }
    }
}

impl std::str::FromStr for WrapType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "notApplicable" => Ok(WrapType::NotApplicable),
            "wrap" => Ok(WrapType::Wrap),
            "unwrap" => Ok(WrapType::Unwrap),
            other => Err(format!("unknown wrap type {}", other)),
        }
    }
}

/// Where the order originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OriginType {
    #[default]
    Internal,
    External,
}

impl OriginType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OriginType::Internal => "internal",
            OriginType::External => "external",
        }
    }
}

impl std::str::FromStr for OriginType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "internal" => Ok(OriginType::Internal),
            "external" => Ok(OriginType::External),
            other => Err(format!("unknown origin type {}", other)),
        }
    }
}

/// Structured analytics event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum AnalyticsEvent {
    #[serde(rename_all = "camelCase")]
    OrderSubmitted {
        routing: Routing,
        order_hash: String,
        origin_type: OriginType,
    },
}

/// User-facing notification payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AppNotification {
    #[serde(rename = "order-pending", rename_all = "camelCase")]
    OrderPending { wrap_type: WrapType },
}

/// Anything the coordinator emits outside the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CoordinatorEvent {
    Analytics(AnalyticsEvent),
    Notification(AppNotification),
}

/// Destination for analytics events and notifications
pub trait EventSink: Send + Sync {
    fn track(&self, event: AnalyticsEvent);
    fn notify(&self, notification: AppNotification);
}

/// Fans events out over a broadcast channel and logs them
pub struct BroadcastEventSink {
    tx: broadcast::Sender<CoordinatorEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to emitted events
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.tx.subscribe()
    }

    fn publish(&self, event: CoordinatorEvent) {
        if self.tx.send(event).is_err() {
            debug!("No event subscribers");
        }
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventSink for BroadcastEventSink {
    fn track(&self, event: AnalyticsEvent) {
        info!(event = ?event, "analytics");
        self.publish(CoordinatorEvent::Analytics(event));
    }

    fn notify(&self, notification: AppNotification) {
        info!(notification = ?notification, "notification");
        self.publish(CoordinatorEvent::Notification(notification));
    }
}
