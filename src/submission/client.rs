//! HTTP client for the matching service order endpoint

use super::{OrderRequest, OrderSubmitter, SubmissionError, SubmittedOrder};
use crate::config::SubmissionConfig;
use crate::error::{CoordinatorError, CoordinatorResult};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

const API_KEY_HEADER: &str = "x-api-key";

/// Posts signed orders to `{base_url}/order`
pub struct HttpOrderSubmitter {
    client: Client,
    order_url: String,
}

impl HttpOrderSubmitter {
    /// Create a new submitter from configuration
    pub fn new(config: &SubmissionConfig) -> CoordinatorResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(ref key) = config.api_key {
            let value = HeaderValue::from_str(key)
                .map_err(|e| CoordinatorError::Config(format!("Invalid api key: {}", e)))?;
            headers.insert(API_KEY_HEADER, value);
        }

        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| CoordinatorError::Config(format!("Invalid header {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| CoordinatorError::Config(format!("Invalid header value: {}", e)))?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| CoordinatorError::Submission(e.to_string()))?;

        Ok(Self {
            client,
            order_url: format!("{}/order", config.base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl OrderSubmitter for HttpOrderSubmitter {
    async fn submit(&self, request: &OrderRequest) -> Result<SubmittedOrder, SubmissionError> {
        debug!("POST {} ({})", self.order_url, request.routing.as_str());

        let response = self
            .client
            .post(&self.order_url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SubmissionError::Timeout
                } else {
                    SubmissionError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!("Order rejected by matching service ({}): {}", status, message);
            return Err(SubmissionError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<SubmittedOrder>()
            .await
            .map_err(|e| SubmissionError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submission::Routing;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn config(base_url: String) -> SubmissionConfig {
        SubmissionConfig {
            base_url,
            api_key: Some("secret".to_string()),
            request_timeout_ms: 2_000,
            headers: HashMap::from([("x-universal-router-version".to_string(), "2.0".to_string())]),
        }
    }

    fn request() -> OrderRequest {
        OrderRequest {
            signature: "0xsig".to_string(),
            encoded_order: None,
            quote: json!({ "orderId": "0xorder", "encodedOrder": "0xdead" }),
            routing: Routing::DutchV2,
        }
    }

    #[tokio::test]
    async fn test_submit_posts_json_with_headers() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/order")
                    .header("x-api-key", "secret")
                    .header("x-universal-router-version", "2.0")
                    .json_body(json!({
                        "signature": "0xsig",
                        "quote": { "orderId": "0xorder", "encodedOrder": "0xdead" },
                        "routing": "DUTCH_V2"
                    }));
                then.status(201).json_body(json!({
                    "requestId": "req-1",
                    "orderId": "0xorder",
                    "orderStatus": "open"
                }));
            })
            .await;

        let submitter = HttpOrderSubmitter::new(&config(server.url("/v1/"))).unwrap();
        let submitted = submitter.submit(&request()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(submitted.order_id, "0xorder");
        assert_eq!(submitted.request_id.as_deref(), Some("req-1"));
    }

    #[tokio::test]
    async fn test_rejection_carries_status_and_body() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/order");
                then.status(400).body("quote expired");
            })
            .await;

        let submitter = HttpOrderSubmitter::new(&config(server.base_url())).unwrap();
        let err = submitter.submit(&request()).await.unwrap_err();

        match err {
            SubmissionError::Rejected { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "quote expired");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_response_is_decode_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/order");
                then.status(200).body("not json");
            })
            .await;

        let submitter = HttpOrderSubmitter::new(&config(server.base_url())).unwrap();
        let err = submitter.submit(&request()).await.unwrap_err();
        assert!(matches!(err, SubmissionError::Decode(_)));
    }
}
