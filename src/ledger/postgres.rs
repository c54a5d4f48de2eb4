//! PostgreSQL ledger

use super::types::{
    LedgerStats, OrderRecord, OrderUpdate, PrerequisiteRefs, QueueStatus, TransactionKind,
    TransactionRecord, TransactionStatus, TransactionTransition,
};
use super::{Ledger, TRANSITION_CHANNEL_CAPACITY};
use crate::config::DatabaseConfig;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::events::{OriginType, WrapType};
use crate::submission::Routing;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::types::{Address, H256};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::str::FromStr;
use tokio::sync::broadcast;
use tracing::{debug, info};

const ORDER_COLUMNS: &str = "id, chain_id, signer, order_hash, queue_status, routing, wrap_type, \
     origin_type, approve_tx_id, wrap_tx_id, payload, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, chain_id, kind, hash, status, created_at";

/// Ledger persisted in PostgreSQL
pub struct PgLedger {
    pool: PgPool,
    transition_tx: broadcast::Sender<TransactionTransition>,
}

impl PgLedger {
    /// Connect to the configured database
    pub async fn new(config: &DatabaseConfig) -> CoordinatorResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        let (transition_tx, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        Ok(Self {
            pool,
            transition_tx,
        })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> CoordinatorResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queued_orders (
                id TEXT PRIMARY KEY,
                chain_id BIGINT NOT NULL,
                signer VARCHAR(42) NOT NULL,
                order_hash TEXT,
                queue_status VARCHAR(20) NOT NULL,
                routing VARCHAR(20) NOT NULL,
                wrap_type VARCHAR(20) NOT NULL,
                origin_type VARCHAR(20) NOT NULL,
                approve_tx_id TEXT,
                wrap_tx_id TEXT,
                payload JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_queued_orders_status
            ON queued_orders (queue_status)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS prerequisite_transactions (
                id TEXT PRIMARY KEY,
                chain_id BIGINT NOT NULL,
                kind VARCHAR(10) NOT NULL,
                hash VARCHAR(66),
                status VARCHAR(10) NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_prerequisites_chain_status
            ON prerequisite_transactions (chain_id, status)
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }

    async fn fetch_order(&self, id: &str) -> CoordinatorResult<Option<OrderRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM queued_orders WHERE id = $1",
            ORDER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(order_from_row).transpose()
    }
}

#[async_trait]
impl Ledger for PgLedger {
    async fn record_order(&self, record: OrderRecord) -> CoordinatorResult<()> {
        let payload = serde_json::to_value(&record.payload)?;

        let result = sqlx::query(
            r#"
            INSERT INTO queued_orders
                (id, chain_id, signer, order_hash, queue_status, routing, wrap_type,
                 origin_type, approve_tx_id, wrap_tx_id, payload, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&record.id)
        .bind(record.chain_id as i64)
        .bind(format!("{:?}", record.signer))
        .bind(&record.order_hash)
        .bind(record.queue_status.as_str())
        .bind(record.routing.as_str())
        .bind(record.wrap_type.as_str())
        .bind(record.origin_type.as_str())
        .bind(&record.prerequisites.approve_tx_id)
        .bind(&record.prerequisites.wrap_tx_id)
        .bind(payload)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoordinatorError::DuplicateOrder { id: record.id });
        }

        debug!("Recorded order {} ({})", record.id, record.queue_status);
        Ok(())
    }

    async fn update_order(&self, update: OrderUpdate) -> CoordinatorResult<OrderRecord> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM queued_orders WHERE id = $1 FOR UPDATE",
            ORDER_COLUMNS
        ))
        .bind(&update.id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| CoordinatorError::OrderNotFound {
            id: update.id.clone(),
        })?;

        let mut record = order_from_row(&row)?;
        update.apply(&mut record)?;

        sqlx::query(
            r#"
            UPDATE queued_orders
            SET queue_status = $2, order_hash = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(&record.id)
        .bind(record.queue_status.as_str())
        .bind(&record.order_hash)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(record)
    }

    async fn get_order(&self, id: &str) -> CoordinatorResult<Option<OrderRecord>> {
        self.fetch_order(id).await
    }

    async fn orders_with_status(&self, status: QueueStatus) -> CoordinatorResult<Vec<OrderRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM queued_orders WHERE queue_status = $1",
            ORDER_COLUMNS
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(order_from_row).collect()
    }

    async fn record_transaction(&self, record: TransactionRecord) -> CoordinatorResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO prerequisite_transactions (id, chain_id, kind, hash, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id)
            DO UPDATE SET chain_id = $2, kind = $3, hash = $4, status = $5
            WHERE prerequisite_transactions.status = 'pending'
            "#,
        )
        .bind(&record.id)
        .bind(record.chain_id as i64)
        .bind(record.kind.as_str())
        .bind(record.hash.map(|h| format!("{:?}", h)))
        .bind(record.status.as_str())
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoordinatorError::InvalidStateTransition {
                from: "terminal".to_string(),
                to: record.status.as_str().to_string(),
            });
        }
        Ok(())
    }

    async fn resolve_transaction(
        &self,
        id: &str,
        status: TransactionStatus,
        hash: Option<H256>,
    ) -> CoordinatorResult<bool> {
        if !status.is_terminal() {
            return Err(CoordinatorError::Ledger(format!(
                "cannot resolve {} to non-terminal status",
                id
            )));
        }

        let row = sqlx::query(
            r#"
            UPDATE prerequisite_transactions
            SET status = $2, hash = COALESCE($3, hash)
            WHERE id = $1 AND status = 'pending'
            RETURNING hash
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(hash.map(|h| format!("{:?}", h)))
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return match self.get_transaction(id).await? {
                Some(_) => Ok(false),
                None => Err(CoordinatorError::TransactionNotFound { id: id.to_string() }),
            };
        };

        let transition = TransactionTransition {
            id: id.to_string(),
            status,
            hash: parse_hash(row.get("hash"))?,
        };

        // Committed before publishing so late subscribers can read it back
        if self.transition_tx.send(transition).is_err() {
            debug!("No transition subscribers for {}", id);
        }
        Ok(true)
    }

    async fn get_transaction(&self, id: &str) -> CoordinatorResult<Option<TransactionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM prerequisite_transactions WHERE id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn pending_transactions(&self, chain_id: u64) -> CoordinatorResult<Vec<TransactionRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM prerequisite_transactions \
             WHERE chain_id = $1 AND status = 'pending' AND hash IS NOT NULL",
            TRANSACTION_COLUMNS
        ))
        .bind(chain_id as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(transaction_from_row).collect()
    }

    fn subscribe(&self) -> broadcast::Receiver<TransactionTransition> {
        self.transition_tx.subscribe()
    }

    async fn stats(&self) -> CoordinatorResult<LedgerStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE queue_status = 'waiting') as waiting,
                COUNT(*) FILTER (WHERE queue_status = 'submitted') as submitted,
                COUNT(*) FILTER (WHERE queue_status NOT IN ('waiting', 'submitted')) as failed
            FROM queued_orders
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(LedgerStats {
            waiting: row.get::<i64, _>("waiting") as u64,
            submitted: row.get::<i64, _>("submitted") as u64,
            failed: row.get::<i64, _>("failed") as u64,
        })
    }

    async fn health_check(&self) -> CoordinatorResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn order_from_row(row: &PgRow) -> CoordinatorResult<OrderRecord> {
    let signer: String = row.get("signer");
    let signer = Address::from_str(&signer)
        .map_err(|e| CoordinatorError::Ledger(format!("invalid signer {}: {}", signer, e)))?;

    let routing: String = row.get("routing");
    let wrap_type: String = row.get("wrap_type");
    let origin_type: String = row.get("origin_type");
    let queue_status: String = row.get("queue_status");
    let payload: serde_json::Value = row.get("payload");

    Ok(OrderRecord {
        id: row.get("id"),
        chain_id: row.get::<i64, _>("chain_id") as u64,
        signer,
        order_hash: row.get("order_hash"),
        queue_status: queue_status.parse::<QueueStatus>()?,
        routing: routing.parse::<Routing>().map_err(CoordinatorError::Ledger)?,
        wrap_type: wrap_type.parse::<WrapType>().map_err(CoordinatorError::Ledger)?,
        origin_type: origin_type.parse::<OriginType>().map_err(CoordinatorError::Ledger)?,
        prerequisites: PrerequisiteRefs {
            approve_tx_id: row.get("approve_tx_id"),
            wrap_tx_id: row.get("wrap_tx_id"),
        },
        payload: serde_json::from_value(payload)?,
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
    })
}

fn transaction_from_row(row: &PgRow) -> CoordinatorResult<TransactionRecord> {
    let kind: String = row.get("kind");
    let status: String = row.get("status");

    Ok(TransactionRecord {
        id: row.get("id"),
        chain_id: row.get::<i64, _>("chain_id") as u64,
        kind: kind.parse::<TransactionKind>()?,
        hash: parse_hash(row.get("hash"))?,
        status: status.parse::<TransactionStatus>()?,
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
    })
}

fn parse_hash(raw: Option<String>) -> CoordinatorResult<Option<H256>> {
    raw.map(|h| {
        H256::from_str(&h).map_err(|e| CoordinatorError::Ledger(format!("invalid hash {}: {}", h, e)))
    })
    .transpose()
}
