//! Order and webhook-ledger specifications.
use crate::{
    db_types::{Order, WebhookEventRecord},
    specification::{Expr, Specification},
};

/// The order settled by a payment intent, with line items eagerly loaded so the total can be computed.
pub fn order_by_payment_intent_spec(payment_intent_id: &str) -> Specification<Order> {
    Specification::new(Some(Expr::eq("payment_intent_id", payment_intent_id))).with_include("items")
}

/// Orders belonging to a buyer, newest first.
pub fn orders_for_buyer_spec(buyer_email: &str) -> Specification<Order> {
    Specification::new(Some(Expr::eq("buyer_email", buyer_email)))
        .with_order_by_descending("order_date")
        .with_include("items")
}

/// The ledger entry for a processed webhook delivery, if any.
pub fn processed_event_spec(event_id: &str) -> Specification<WebhookEventRecord> {
    Specification::new(Some(Expr::eq("event_id", event_id)))
}
