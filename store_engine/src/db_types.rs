use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use log::error;
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, FromRow, SqliteConnection, Type};
use store_common::Money;
use thiserror::Error;

use crate::sqlite::StorageError;

//--------------------------------------       Entity        ---------------------------------------------------------
/// A persisted record with a store-assigned integer identity.
///
/// Implementors describe just enough about themselves (table name, identity accessor, relation loading) for the
/// generic [`crate::Repository`] to read and write them without per-entity query code. Column names are derived from
/// the entity's serde representation, so field names must match the table schema.
#[allow(async_fn_in_trait)]
pub trait Entity:
    Clone + Send + Sync + Unpin + Serialize + for<'r> FromRow<'r, SqliteRow> + 'static
{
    /// The table backing this entity type.
    const TABLE: &'static str;

    /// Field names that are relations rather than columns. They stay in the serde representation (clients want them
    /// in responses) but are stripped before the entity is written.
    const RELATIONS: &'static [&'static str] = &[];

    /// The store-assigned identity. Zero means "not persisted yet"; the store assigns the real identity on commit,
    /// and it is immutable afterwards.
    fn id(&self) -> i64;

    /// Load the relation named by `path` into each of the fetched `rows`. Entities without relations inherit the
    /// default, which rejects every path.
    async fn load_related(
        rows: &mut [Self],
        path: &str,
        conn: &mut SqliteConnection,
    ) -> Result<(), StorageError> {
        let _ = (rows, conn);
        Err(StorageError::UnknownRelation { table: Self::TABLE, path: path.to_string() })
    }
}

//--------------------------------------      Product        ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Product {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    pub description: String,
    pub price: Money,
    pub picture_url: String,
    pub brand: String,
    pub product_type: String,
    pub quantity_in_stock: i64,
}

impl Entity for Product {
    const TABLE: &'static str = "products";

    fn id(&self) -> i64 {
        self.id
    }
}

//--------------------------------------   DeliveryMethod    ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DeliveryMethod {
    #[serde(default)]
    pub id: i64,
    pub short_name: String,
    pub delivery_time: String,
    pub description: String,
    pub price: Money,
}

impl Entity for DeliveryMethod {
    const TABLE: &'static str = "delivery_methods";

    fn id(&self) -> i64 {
        self.id
    }
}

//--------------------------------------    OrderStatus      ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum OrderStatus {
    /// The order has been placed, and no settlement webhook has arrived yet.
    Pending,
    /// The provider reported a succeeded intent and its amount matched the order total.
    PaymentReceived,
    /// The provider reported a succeeded intent whose amount did not match the order total.
    PaymentMismatch,
    /// Fulfilment state, never set by the reconciliation flow.
    Shipped,
    /// Fulfilment state, never set by the reconciliation flow.
    Refunded,
}

impl Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::Pending => write!(f, "Pending"),
            OrderStatus::PaymentReceived => write!(f, "PaymentReceived"),
            OrderStatus::PaymentMismatch => write!(f, "PaymentMismatch"),
            OrderStatus::Shipped => write!(f, "Shipped"),
            OrderStatus::Refunded => write!(f, "Refunded"),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("Invalid order status: {0}")]
pub struct ConversionError(String);

impl FromStr for OrderStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "PaymentReceived" => Ok(Self::PaymentReceived),
            "PaymentMismatch" => Ok(Self::PaymentMismatch),
            "Shipped" => Ok(Self::Shipped),
            "Refunded" => Ok(Self::Refunded),
            s => Err(ConversionError(s.to_string())),
        }
    }
}

impl From<String> for OrderStatus {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_else(|_| {
            error!("Invalid order status: {value}. But this conversion cannot fail. Defaulting to Pending");
            OrderStatus::Pending
        })
    }
}

//--------------------------------------        Order        ---------------------------------------------------------
/// The order aggregate root. Status is mutated exclusively by the [`crate::PaymentReconciler`]; the core never
/// deletes an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Order {
    #[serde(default)]
    pub id: i64,
    pub buyer_email: String,
    pub order_date: DateTime<Utc>,
    pub delivery_method_id: i64,
    /// Snapshot of the delivery price at order time.
    pub delivery_price: Money,
    pub payment_intent_id: String,
    pub status: OrderStatus,
    /// Line items are not a column; they are eagerly loaded via the `"items"` relation path.
    #[serde(default)]
    #[sqlx(skip)]
    pub items: Vec<OrderItem>,
}

impl Order {
    /// The authoritative order total: the sum of line item price × quantity, plus the delivery price.
    pub fn total(&self) -> Money {
        self.items.iter().map(|i| i.price * i.quantity).sum::<Money>() + self.delivery_price
    }
}

impl Entity for Order {
    const TABLE: &'static str = "orders";

    const RELATIONS: &'static [&'static str] = &["items"];

    fn id(&self) -> i64 {
        self.id
    }

    async fn load_related(
        rows: &mut [Self],
        path: &str,
        conn: &mut SqliteConnection,
    ) -> Result<(), StorageError> {
        match path {
            "items" => {
                for order in rows.iter_mut() {
                    order.items =
                        sqlx::query_as("SELECT * FROM order_items WHERE order_id = $1 ORDER BY id")
                            .bind(order.id)
                            .fetch_all(&mut *conn)
                            .await?;
                }
                Ok(())
            },
            other => Err(StorageError::UnknownRelation { table: Self::TABLE, path: other.to_string() }),
        }
    }
}

//--------------------------------------     OrderItem       ---------------------------------------------------------
/// A line item with the product details captured at order time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct OrderItem {
    #[serde(default)]
    pub id: i64,
    pub order_id: i64,
    pub product_id: i64,
    pub product_name: String,
    pub picture_url: String,
    pub price: Money,
    pub quantity: i64,
}

impl Entity for OrderItem {
    const TABLE: &'static str = "order_items";

    fn id(&self) -> i64 {
        self.id
    }
}

//--------------------------------------  WebhookEventRecord -------------------------------------------------------
/// Ledger entry for a processed webhook delivery. Redeliveries of an already-recorded event id are acknowledged
/// without being re-applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WebhookEventRecord {
    #[serde(default)]
    pub id: i64,
    pub event_id: String,
    pub payment_intent_id: String,
    pub processed_at: DateTime<Utc>,
}

impl WebhookEventRecord {
    pub fn new(event_id: &str, payment_intent_id: &str) -> Self {
        Self {
            id: 0,
            event_id: event_id.to_string(),
            payment_intent_id: payment_intent_id.to_string(),
            processed_at: Utc::now(),
        }
    }
}

impl Entity for WebhookEventRecord {
    const TABLE: &'static str = "webhook_events";

    fn id(&self) -> i64 {
        self.id
    }
}
