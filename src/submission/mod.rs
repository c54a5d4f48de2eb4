//! Order submission to the matching service
//!
//! A single asynchronous call per order. No retries happen here: the
//! coordinator turns any failure into a `SubmissionFailed` outcome and the
//! caller decides whether to start over.

mod client;

pub use client::HttpOrderSubmitter;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Auction routing the order is submitted under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Routing {
    DutchV2,
    DutchV3,
    DutchLimit,
    Priority,
}

impl Routing {
    pub fn as_str(&self) -> &'static str {
        match self {
            Routing::DutchV2 => "DUTCH_V2",
            Routing::DutchV3 => "DUTCH_V3",
            Routing::DutchLimit => "DUTCH_LIMIT",
            Routing::Priority => "PRIORITY",
        }
    }
}

impl std::str::FromStr for Routing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DUTCH_V2" => Ok(Routing::DutchV2),
            "DUTCH_V3" => Ok(Routing::DutchV3),
            "DUTCH_LIMIT" => Ok(Routing::DutchLimit),
            "PRIORITY" => Ok(Routing::Priority),
            other => Err(format!("unknown routing {}", other)),
        }
    }
}

/// Signed order as posted to the matching service. The quote is opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub signature: String,
    /// ABI-encoded order, when the quote did not embed it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoded_order: Option<String>,
    pub quote: serde_json::Value,
    pub routing: Routing,
}

/// Acknowledgement returned by the matching service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedOrder {
    pub order_id: String,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub order_status: Option<String>,
}

/// Ways a single submission attempt can fail
#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("submission timed out")]
    Timeout,

    #[error("invalid response: {0}")]
    Decode(String),
}

/// Client for the off-chain matching service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderSubmitter: Send + Sync {
    /// Post one order. Exactly one attempt.
    async fn submit(&self, request: &OrderRequest) -> Result<SubmittedOrder, SubmissionError>;
}
