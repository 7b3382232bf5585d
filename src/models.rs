use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use uuid::Uuid;
use chrono::{DateTime, Utc};

use crate::pricing::compute_total;

// ============================================================================
// Domain Models
// ============================================================================

/// A product line item as received from the upstream producer.
///
/// Only `id` and `price` are interpreted; every other attribute is carried
/// through untouched so the downstream notification matches the request.
/// The price keeps its wire form (`10` stays `10`, not `10.0`).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Product {
    pub id: Value,
    pub price: Number,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl Product {
    pub fn new(id: impl Into<Value>, price: impl Into<Number>) -> Self {
        Self {
            id: id.into(),
            price: price.into(),
            attributes: Map::new(),
        }
    }

    /// Price as a float, for arithmetic.
    pub fn unit_price(&self) -> f64 {
        // Always Some without serde_json's arbitrary_precision feature
        self.price.as_f64().unwrap_or_default()
    }
}

/// Order creation event decoded from the inbound queue.
///
/// Lives only for the duration of a single delivery.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreationRequest {
    pub order_id: Value,
    pub username: String,
    pub products: Vec<Product>,
}

/// Order that has not been persisted yet.
///
/// The total is computed on construction, never supplied by callers.
#[derive(Clone, Debug, PartialEq)]
pub struct NewOrder {
    user: String,
    products: Vec<Product>,
    total_price: f64,
}

impl NewOrder {
    pub fn new(user: impl Into<String>, products: Vec<Product>) -> Self {
        let total_price = compute_total(&products);
        Self {
            user: user.into(),
            products,
            total_price,
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn products(&self) -> &[Product] {
        &self.products
    }

    pub fn total_price(&self) -> f64 {
        self.total_price
    }
}

/// Persisted order record. Identity and timestamp are assigned by the store.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct Order {
    id: Uuid,
    user: String,
    products: Vec<Product>,
    total_price: f64,
    created_at: DateTime<Utc>,
}

impl Order {
    pub(crate) fn persisted(id: Uuid, created_at: DateTime<Utc>, order: NewOrder) -> Self {
        Self {
            id,
            user: order.user,
            products: order.products,
            total_price: order.total_price,
            created_at,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn products(&self) -> &[Product] {
        &self.products
    }

    pub fn total_price(&self) -> f64 {
        self.total_price
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

// ============================================================================
// Outbound Events
// ============================================================================

/// Notification published downstream once an order is stored.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PricedOrderNotification {
    pub order_id: Value,
    pub user: String,
    pub products: Vec<Product>,
    pub total_price: f64,
}

impl PricedOrderNotification {
    /// Build from the stored order, carrying the inbound correlation token.
    pub fn for_order(order_id: Value, order: &Order) -> Self {
        Self {
            order_id,
            user: order.user.clone(),
            products: order.products.clone(),
            total_price: order.total_price,
        }
    }
}
