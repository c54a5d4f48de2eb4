//! HTTP API for queueing orders, feeding prerequisite transactions, and health checks

use crate::chain::ChainManager;
use crate::config::ApiConfig;
use crate::coordination::{Completion, CoordinatorService, OrderSubmission};
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::ledger::{
    Ledger, LedgerStats, OrderRecord, QueueStatus, TransactionKind, TransactionRecord,
    TransactionStatus,
};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use ethers::types::H256;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<CoordinatorService>,
    pub chain_manager: Arc<ChainManager>,
}

type ApiResult<T> = Result<(StatusCode, Json<T>), (StatusCode, Json<ErrorResponse>)>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/stats", get(get_stats))
        .route("/orders", post(create_order))
        .route("/orders/:id", get(get_order))
        .route("/transactions", post(register_transaction))
        .route("/transactions/:id/resolve", post(resolve_transaction))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(
    config: ApiConfig,
    service: Arc<CoordinatorService>,
    chain_manager: Arc<ChainManager>,
) -> CoordinatorResult<()> {
    let app = router(AppState {
        service,
        chain_manager,
    });

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| CoordinatorError::Internal(format!("API bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| CoordinatorError::Internal(format!("API server: {}", e)))?;

    Ok(())
}

fn error_response(e: CoordinatorError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &e {
        CoordinatorError::DuplicateOrder { .. } | CoordinatorError::InvalidStateTransition { .. } => {
            StatusCode::CONFLICT
        }
        CoordinatorError::OrderNotFound { .. } | CoordinatorError::TransactionNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        CoordinatorError::InvalidOrder { .. } => StatusCode::BAD_REQUEST,
        _ => {
            warn!("API request failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    (status, Json(ErrorResponse { error: e.to_string() }))
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - ledger and chain connections
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let ledger_ok = state.service.ledger().health_check().await.is_ok();

    let chain_health = state.chain_manager.health_check().await;
    let chains_ok = chain_health.iter().all(|(_, healthy)| *healthy);

    let ready = ledger_ok && chains_ok;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready,
            ledger: ledger_ok,
            chains: chains_ok,
            in_flight: state.service.in_flight_count(),
            details: chain_health
                .into_iter()
                .map(|(id, h)| ChainHealth {
                    chain_id: id,
                    healthy: h,
                })
                .collect(),
        }),
    )
}

/// Order counts by queue status
async fn get_stats(State(state): State<AppState>) -> ApiResult<LedgerStats> {
    let stats = state
        .service
        .ledger()
        .stats()
        .await
        .map_err(error_response)?;
    Ok((StatusCode::OK, Json(stats)))
}

/// Queue an order. It is recorded as waiting before the response is sent and
/// coordinated in the background.
async fn create_order(
    State(state): State<AppState>,
    Json(submission): Json<OrderSubmission>,
) -> ApiResult<OrderAccepted> {
    let id = submission.id.clone();
    state
        .service
        .start(submission, Completion::noop())
        .await
        .map_err(error_response)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(OrderAccepted {
            id,
            queue_status: QueueStatus::Waiting,
        }),
    ))
}

async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<OrderResponse> {
    let order = state
        .service
        .ledger()
        .get_order(&id)
        .await
        .map_err(error_response)?
        .ok_or_else(|| error_response(CoordinatorError::OrderNotFound { id: id.clone() }))?;

    Ok((
        StatusCode::OK,
        Json(OrderResponse {
            reason: order.queue_status.reason(),
            order,
        }),
    ))
}

/// Track a prerequisite transaction so watchers and waiters can see it
async fn register_transaction(
    State(state): State<AppState>,
    Json(request): Json<RegisterTransactionRequest>,
) -> ApiResult<TransactionRecord> {
    let record = TransactionRecord {
        id: request.id,
        chain_id: request.chain_id,
        kind: request.kind,
        hash: request.hash,
        status: TransactionStatus::Pending,
        created_at: Utc::now(),
    };

    state
        .service
        .ledger()
        .record_transaction(record.clone())
        .await
        .map_err(error_response)?;

    Ok((StatusCode::CREATED, Json(record)))
}

/// Resolve a prerequisite transaction reported by a client that watches the chain itself
async fn resolve_transaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ResolveTransactionRequest>,
) -> ApiResult<ResolveResponse> {
    if !request.status.is_terminal() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("{} is not a terminal status", request.status.as_str()),
            }),
        ));
    }

    let resolved = state
        .service
        .ledger()
        .resolve_transaction(&id, request.status, request.hash)
        .await
        .map_err(error_response)?;

    Ok((StatusCode::OK, Json(ResolveResponse { resolved })))
}

// Request types

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterTransactionRequest {
    id: String,
    chain_id: u64,
    kind: TransactionKind,
    #[serde(default)]
    hash: Option<H256>,
}

#[derive(Deserialize)]
struct ResolveTransactionRequest {
    status: TransactionStatus,
    #[serde(default)]
    hash: Option<H256>,
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    ledger: bool,
    chains: bool,
    in_flight: usize,
    details: Vec<ChainHealth>,
}

#[derive(Serialize)]
struct ChainHealth {
    chain_id: u64,
    healthy: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderAccepted {
    id: String,
    queue_status: QueueStatus,
}

#[derive(Serialize)]
struct OrderResponse {
    #[serde(flatten)]
    order: OrderRecord,
    reason: Option<&'static str>,
}

#[derive(Serialize)]
struct ResolveResponse {
    resolved: bool,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::minimal_settings;
    use crate::coordination::{OrderCoordinator, StalenessPolicy};
    use crate::events::BroadcastEventSink;
    use crate::ledger::MemoryLedger;
    use crate::submission::MockOrderSubmitter;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(ledger: Arc<MemoryLedger>) -> Router {
        let mut submitter = MockOrderSubmitter::new();
        submitter.expect_submit().times(0);

        let coordinator = OrderCoordinator::new(
            ledger.clone(),
            Arc::new(submitter),
            Arc::new(BroadcastEventSink::default()),
            StalenessPolicy::default(),
        );
        let chain_manager = ChainManager::new(&minimal_settings(), ledger).unwrap();

        router(AppState {
            service: Arc::new(CoordinatorService::new(Arc::new(coordinator))),
            chain_manager: Arc::new(chain_manager),
        })
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn order_body(id: &str) -> Value {
        json!({
            "id": id,
            "chainId": 1,
            "signer": "0x0000000000000000000000000000000000000001",
            "payload": {
                "signature": "0xsig",
                "quote": { "orderId": "0xorder" },
                "routing": "DUTCH_V2"
            },
            "prerequisites": { "approveTxId": "0xA" }
        })
    }

    async fn wait_for_status(ledger: &MemoryLedger, id: &str, status: QueueStatus) {
        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let Ok(Some(order)) = ledger.get_order(id).await {
                    if order.queue_status == status {
                        return;
                    }
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_health_and_ready() {
        let app = app(Arc::new(MemoryLedger::new()));

        let (status, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = send(&app, "GET", "/ready", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ready"], true);
        assert_eq!(body["in_flight"], 0);
    }

    #[tokio::test]
    async fn test_failed_approval_flows_through_api() {
        let ledger = Arc::new(MemoryLedger::new());
        let app = app(ledger.clone());

        let (status, body) = send(
            &app,
            "POST",
            "/transactions",
            Some(json!({ "id": "0xA", "chainId": 1, "kind": "approve" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "pending");

        let (status, body) = send(&app, "POST", "/orders", Some(order_body("order-1"))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["queueStatus"], "waiting");

        let (status, body) = send(
            &app,
            "POST",
            "/transactions/0xA/resolve",
            Some(json!({ "status": "failed" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["resolved"], true);
        wait_for_status(&ledger, "order-1", QueueStatus::ApprovalFailed).await;

        let (status, body) = send(&app, "GET", "/orders/order-1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["queueStatus"], "approvalFailed");
        assert_eq!(body["reason"], "The token approval transaction failed");

        let (status, body) = send(&app, "GET", "/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["failed"], 1);
    }

    #[tokio::test]
    async fn test_duplicate_order_conflicts() {
        let ledger = Arc::new(MemoryLedger::new());
        let app = app(ledger.clone());
        send(
            &app,
            "POST",
            "/transactions",
            Some(json!({ "id": "0xA", "chainId": 1, "kind": "approve" })),
        )
        .await;

        let (status, _) = send(&app, "POST", "/orders", Some(order_body("order-1"))).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (status, _) = send(&app, "POST", "/orders", Some(order_body("order-1"))).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_missing_order_id_is_generated() {
        let ledger = Arc::new(MemoryLedger::new());
        let app = app(ledger.clone());
        send(
            &app,
            "POST",
            "/transactions",
            Some(json!({ "id": "0xA", "chainId": 1, "kind": "approve" })),
        )
        .await;

        let mut body = order_body("unused");
        body.as_object_mut().unwrap().remove("id");

        let (status, body) = send(&app, "POST", "/orders", Some(body)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let id = body["id"].as_str().unwrap();
        assert!(uuid::Uuid::parse_str(id).is_ok());
    }

    #[tokio::test]
    async fn test_unknown_order_and_bad_resolution() {
        let app = app(Arc::new(MemoryLedger::new()));

        let (status, _) = send(&app, "GET", "/orders/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &app,
            "POST",
            "/transactions/0xA/resolve",
            Some(json!({ "status": "pending" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            "POST",
            "/transactions/0xA/resolve",
            Some(json!({ "status": "success" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_accepted_order_is_immediately_visible() {
        let ledger = Arc::new(MemoryLedger::new());
        let app = app(ledger.clone());
        send(
            &app,
            "POST",
            "/transactions",
            Some(json!({ "id": "0xA", "chainId": 1, "kind": "approve" })),
        )
        .await;

        let (status, _) = send(&app, "POST", "/orders", Some(order_body("order-1"))).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (status, body) = send(&app, "GET", "/orders/order-1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["queueStatus"], "waiting");
    }

    #[tokio::test]
    async fn test_shared_prerequisite_id_is_a_bad_request() {
        let ledger = Arc::new(MemoryLedger::new());
        let app = app(ledger.clone());

        let mut body = order_body("order-1");
        body["prerequisites"]["wrapTxId"] = json!("0xA");

        let (status, _) = send(&app, "POST", "/orders", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, "GET", "/orders/order-1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
