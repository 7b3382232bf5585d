use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::time::Duration;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::models::{NewOrder, Order};
use super::{OrderStore, StoreError};

const CREATE_ORDERS_TABLE: &str = "CREATE TABLE IF NOT EXISTS orders (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    username TEXT NOT NULL,
    products JSONB NOT NULL,
    total_price DOUBLE PRECISION NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
)";

#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    /// Open the connection pool. Callers treat a failure here as fatal.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        tracing::info!(max_connections = config.max_connections, "Connecting to PostgreSQL...");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await?;

        tracing::info!("✅ PostgreSQL connected");
        Ok(Self { pool })
    }

    /// Create the orders table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_ORDERS_TABLE)
            .execute(&self.pool)
            .await
            .map_err(StoreError::Schema)?;

        tracing::debug!("Orders schema ready");
        Ok(())
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("PostgreSQL pool closed");
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn create_order(&self, order: NewOrder) -> Result<Order, StoreError> {
        let (id, created_at): (Uuid, DateTime<Utc>) = sqlx::query_as(
            "INSERT INTO orders (username, products, total_price)
             VALUES ($1, $2, $3)
             RETURNING id, created_at",
        )
        .bind(order.user())
        .bind(Json(order.products()))
        .bind(order.total_price())
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(
            order_id = %id,
            user = %order.user(),
            total_price = order.total_price(),
            "Order row inserted"
        );

        Ok(Order::persisted(id, created_at, order))
    }
}
