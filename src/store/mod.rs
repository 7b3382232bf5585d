// ============================================================================
// Order Store - Durable persistence for order records
// ============================================================================
//
// The relay only depends on the `OrderStore` trait. `PgOrderStore` is the
// PostgreSQL implementation used by the service.
//
// `create_order` is not idempotent: storing the same request twice (for
// example after a redelivery) yields two distinct records.
//
// ============================================================================

mod postgres;

use async_trait::async_trait;

use crate::models::{NewOrder, Order};

pub use postgres::PgOrderStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to prepare schema: {0}")]
    Schema(#[source] sqlx::Error),
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persist a new order and return it with its store-assigned identity.
    async fn create_order(&self, order: NewOrder) -> Result<Order, StoreError>;
}
