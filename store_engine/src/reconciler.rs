//! Payment-webhook reconciliation.
//!
//! One delivery from the payment provider flows through here: the signature is checked against the raw bytes, the
//! event is parsed, the affected order is located by payment-intent id, the amount rule decides the status
//! transition, and the transition plus a ledger entry for the delivery commit in one transaction. The ledger is what
//! makes redelivery safe: a second delivery of the same event id is acknowledged without being re-applied, and two
//! concurrent deliveries race on the ledger's unique index so at most one of them commits.
use log::{debug, info, warn};
use sqlx::SqlitePool;
use store_common::{MoneyConversionError, Secret, STORE_CURRENCY_CODE_LOWER};
use thiserror::Error;

use crate::{
    db_types::{Order, OrderStatus, WebhookEventRecord},
    notify::NotificationDispatcher,
    specification::orders::{order_by_payment_intent_spec, processed_event_spec},
    sqlite::{StorageError, UnitOfWork},
    webhook::{self, PaymentIntent, SignatureError, WebhookEvent, INTENT_SUCCEEDED},
};

//--------------------------------------      Outcomes       ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The intent amount matched the order total and the order moved to `PaymentReceived`.
    PaymentReceived { order_id: i64 },
    /// The intent amount did not match the order total and the order moved to `PaymentMismatch`.
    PaymentMismatch { order_id: i64, expected: i64, received: i64 },
    /// The event is of no interest (wrong type, or the intent has not succeeded).
    Ignored,
    /// The event id is already in the ledger, or the order has already left `Pending`. Nothing was re-applied.
    AlreadyProcessed,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The delivery failed signature verification. Surfacing this as a server error, not a client error, keeps a
    /// misconfigured secret from silently discarding real settlements.
    #[error("The webhook signature could not be verified. {0}")]
    Authenticity(#[from] SignatureError),
    #[error("The webhook payload could not be parsed. {0}")]
    MalformedEvent(String),
    /// A succeeded intent referenced an order this store does not have. The provider will redeliver.
    #[error("No order matches payment intent {0}")]
    OrderNotFound(String),
    #[error("The order total cannot be expressed in minor units. {0}")]
    Amount(#[from] MoneyConversionError),
    #[error("Reconciliation could not be committed. {0}")]
    Storage(#[from] StorageError),
}

//--------------------------------------  PaymentReconciler  ---------------------------------------------------------
pub struct PaymentReconciler {
    pool: SqlitePool,
    webhook_secret: Secret<String>,
    dispatcher: NotificationDispatcher,
}

impl PaymentReconciler {
    pub fn new(pool: SqlitePool, webhook_secret: Secret<String>, dispatcher: NotificationDispatcher) -> Self {
        Self { pool, webhook_secret, dispatcher }
    }

    /// Reconcile one raw webhook delivery. `payload` must be the request body bytes exactly as received.
    pub async fn process_delivery(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        webhook::verify_signature(payload, signature_header, self.webhook_secret.reveal())?;
        let event: WebhookEvent =
            serde_json::from_slice(payload).map_err(|e| ReconcileError::MalformedEvent(e.to_string()))?;
        self.handle_event(&event).await
    }

    /// Reconcile an already-verified event.
    pub async fn handle_event(&self, event: &WebhookEvent) -> Result<ReconcileOutcome, ReconcileError> {
        if event.event_type != INTENT_SUCCEEDED {
            debug!("🔁 Ignoring webhook event {} of type {}", event.id, event.event_type);
            return Ok(ReconcileOutcome::Ignored);
        }
        let intent = &event.data.object;
        if !intent.has_succeeded() {
            debug!("🔁 Intent {} in event {} has status {}. Ignoring.", intent.id, event.id, intent.status);
            return Ok(ReconcileOutcome::Ignored);
        }
        self.settle(&event.id, intent).await
    }

    async fn settle(&self, event_id: &str, intent: &PaymentIntent) -> Result<ReconcileOutcome, ReconcileError> {
        if intent.currency != STORE_CURRENCY_CODE_LOWER {
            warn!("🔁 Intent {} settled in {}, not {STORE_CURRENCY_CODE_LOWER}.", intent.id, intent.currency);
        }
        let uow = UnitOfWork::new(self.pool.clone());
        let events = uow.repository::<WebhookEventRecord>();
        if events.get_one_matching(&processed_event_spec(event_id)).await?.is_some() {
            info!("🔁 Webhook event {event_id} has already been processed. Acknowledging without re-applying.");
            return Ok(ReconcileOutcome::AlreadyProcessed);
        }
        let orders = uow.repository::<Order>();
        let mut order = orders
            .get_one_matching(&order_by_payment_intent_spec(&intent.id))
            .await?
            .ok_or_else(|| ReconcileError::OrderNotFound(intent.id.clone()))?;
        if order.status != OrderStatus::Pending {
            // The order settled through some other path. Record the delivery so redeliveries short-circuit.
            warn!("🔁 Order {} is already {}. Recording event {event_id} without a transition.", order.id, order.status);
            events.add(WebhookEventRecord::new(event_id, &intent.id));
            uow.complete().await?;
            return Ok(ReconcileOutcome::AlreadyProcessed);
        }
        let expected = order.total().to_minor_units()?;
        let outcome = if expected == intent.amount {
            order.status = OrderStatus::PaymentReceived;
            ReconcileOutcome::PaymentReceived { order_id: order.id }
        } else {
            warn!(
                "🔁 Intent {} settled {} minor units but order {} totals {expected}. Flagging a mismatch.",
                intent.id, intent.amount, order.id
            );
            order.status = OrderStatus::PaymentMismatch;
            ReconcileOutcome::PaymentMismatch { order_id: order.id, expected, received: intent.amount }
        };
        orders.update(order.clone());
        events.add(WebhookEventRecord::new(event_id, &intent.id));
        uow.complete().await?;
        info!("🔁 Order {} reconciled to {} by event {event_id}", order.id, order.status);
        // The transition is committed; the push is best-effort and must not fail the delivery.
        self.dispatcher.notify_order_complete(&order);
        Ok(outcome)
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use super::*;
    use crate::{
        db_types::Order,
        notify::{ConnectionRegistry, ORDER_COMPLETE_EVENT},
        test_utils::{memory_pool, seed_pending_order},
        webhook::signature_header,
    };

    const SECRET: &str = "whsec_test_secret";

    fn reconciler(pool: SqlitePool) -> (PaymentReconciler, Arc<ConnectionRegistry>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = NotificationDispatcher::new(registry.clone());
        (PaymentReconciler::new(pool, Secret::new(SECRET.to_string()), dispatcher), registry)
    }

    fn succeeded_event(event_id: &str, intent_id: &str, amount: i64) -> String {
        format!(
            r#"{{"id":"{event_id}","type":"payment_intent.succeeded","data":{{"object":{{"id":"{intent_id}","status":"succeeded","amount":{amount},"currency":"aud"}}}}}}"#
        )
    }

    async fn order_status(pool: &SqlitePool, order_id: i64) -> OrderStatus {
        let uow = UnitOfWork::new(pool.clone());
        uow.repository::<Order>().get_by_id(order_id).await.unwrap().unwrap().status
    }

    #[tokio::test]
    async fn matching_amount_settles_the_order() {
        let _ = env_logger::try_init();
        let pool = memory_pool().await;
        // Seeded order: 2 × 4.999 + 5.00 = 14.998, which settles at 1500 minor units.
        let order_id = seed_pending_order(&pool, "pi_1", "buyer@example.com").await;
        let (reconciler, _) = reconciler(pool.clone());
        let payload = succeeded_event("evt_1", "pi_1", 1500);
        let header = signature_header(payload.as_bytes(), SECRET, 1_700_000_000);
        let outcome = reconciler.process_delivery(payload.as_bytes(), &header).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::PaymentReceived { order_id });
        assert_eq!(order_status(&pool, order_id).await, OrderStatus::PaymentReceived);
    }

    #[tokio::test]
    async fn mismatched_amount_flags_the_order() {
        let _ = env_logger::try_init();
        let pool = memory_pool().await;
        let order_id = seed_pending_order(&pool, "pi_1", "buyer@example.com").await;
        let (reconciler, _) = reconciler(pool.clone());
        let payload = succeeded_event("evt_1", "pi_1", 999);
        let header = signature_header(payload.as_bytes(), SECRET, 1_700_000_000);
        let outcome = reconciler.process_delivery(payload.as_bytes(), &header).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::PaymentMismatch { order_id, expected: 1500, received: 999 });
        assert_eq!(order_status(&pool, order_id).await, OrderStatus::PaymentMismatch);
    }

    #[tokio::test]
    async fn redelivery_is_acknowledged_without_reapplying() {
        let _ = env_logger::try_init();
        let pool = memory_pool().await;
        let order_id = seed_pending_order(&pool, "pi_1", "buyer@example.com").await;
        let (reconciler, _) = reconciler(pool.clone());
        let payload = succeeded_event("evt_1", "pi_1", 1500);
        let header = signature_header(payload.as_bytes(), SECRET, 1_700_000_000);
        reconciler.process_delivery(payload.as_bytes(), &header).await.unwrap();
        let outcome = reconciler.process_delivery(payload.as_bytes(), &header).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::AlreadyProcessed);
        assert_eq!(order_status(&pool, order_id).await, OrderStatus::PaymentReceived);
    }

    #[tokio::test]
    async fn a_fresh_event_for_a_settled_order_is_not_reapplied() {
        let _ = env_logger::try_init();
        let pool = memory_pool().await;
        let order_id = seed_pending_order(&pool, "pi_1", "buyer@example.com").await;
        let (reconciler, _) = reconciler(pool.clone());
        let first = succeeded_event("evt_1", "pi_1", 1500);
        let header = signature_header(first.as_bytes(), SECRET, 1_700_000_000);
        reconciler.process_delivery(first.as_bytes(), &header).await.unwrap();
        // Same intent, different event id: the ledger misses, but the order has left Pending.
        let second = succeeded_event("evt_2", "pi_1", 1500);
        let header = signature_header(second.as_bytes(), SECRET, 1_700_000_001);
        let outcome = reconciler.process_delivery(second.as_bytes(), &header).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::AlreadyProcessed);
        assert_eq!(order_status(&pool, order_id).await, OrderStatus::PaymentReceived);
    }

    #[tokio::test]
    async fn unknown_intent_is_an_error() {
        let _ = env_logger::try_init();
        let pool = memory_pool().await;
        let (reconciler, _) = reconciler(pool);
        let payload = succeeded_event("evt_1", "pi_unknown", 1500);
        let header = signature_header(payload.as_bytes(), SECRET, 1_700_000_000);
        let err = reconciler.process_delivery(payload.as_bytes(), &header).await.unwrap_err();
        assert!(matches!(err, ReconcileError::OrderNotFound(id) if id == "pi_unknown"));
    }

    #[tokio::test]
    async fn bad_signature_is_rejected_before_parsing() {
        let _ = env_logger::try_init();
        let pool = memory_pool().await;
        seed_pending_order(&pool, "pi_1", "buyer@example.com").await;
        let (reconciler, _) = reconciler(pool.clone());
        let payload = succeeded_event("evt_1", "pi_1", 1500);
        let header = signature_header(payload.as_bytes(), "whsec_wrong", 1_700_000_000);
        let err = reconciler.process_delivery(payload.as_bytes(), &header).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Authenticity(SignatureError::InvalidSignature)));
        assert_eq!(order_status(&pool, 1).await, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn garbage_payloads_are_malformed() {
        let _ = env_logger::try_init();
        let pool = memory_pool().await;
        let (reconciler, _) = reconciler(pool);
        let payload = b"not json at all";
        let header = signature_header(payload, SECRET, 1_700_000_000);
        let err = reconciler.process_delivery(payload, &header).await.unwrap_err();
        assert!(matches!(err, ReconcileError::MalformedEvent(_)));
    }

    #[tokio::test]
    async fn other_event_types_and_unsettled_intents_are_ignored() {
        let _ = env_logger::try_init();
        let pool = memory_pool().await;
        let order_id = seed_pending_order(&pool, "pi_1", "buyer@example.com").await;
        let (reconciler, _) = reconciler(pool.clone());
        let created = r#"{"id":"evt_1","type":"payment_intent.created","data":{"object":{"id":"pi_1","status":"requires_payment_method","amount":1500,"currency":"aud"}}}"#;
        let header = signature_header(created.as_bytes(), SECRET, 1_700_000_000);
        assert_eq!(
            reconciler.process_delivery(created.as_bytes(), &header).await.unwrap(),
            ReconcileOutcome::Ignored
        );
        // A succeeded-type event whose embedded intent is not actually succeeded is also ignored.
        let inconsistent = r#"{"id":"evt_2","type":"payment_intent.succeeded","data":{"object":{"id":"pi_1","status":"processing","amount":1500,"currency":"aud"}}}"#;
        let header = signature_header(inconsistent.as_bytes(), SECRET, 1_700_000_001);
        assert_eq!(
            reconciler.process_delivery(inconsistent.as_bytes(), &header).await.unwrap(),
            ReconcileOutcome::Ignored
        );
        assert_eq!(order_status(&pool, order_id).await, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn settlement_is_pushed_to_the_buyer() {
        let _ = env_logger::try_init();
        let pool = memory_pool().await;
        seed_pending_order(&pool, "pi_1", "buyer@example.com").await;
        let (reconciler, registry) = reconciler(pool);
        let (tx, mut rx) = mpsc::channel(4);
        registry.connect("buyer@example.com", tx);
        let payload = succeeded_event("evt_1", "pi_1", 1500);
        let header = signature_header(payload.as_bytes(), SECRET, 1_700_000_000);
        reconciler.process_delivery(payload.as_bytes(), &header).await.unwrap();
        let message = rx.try_recv().expect("the buyer's connection receives the push");
        assert_eq!(message.event, ORDER_COMPLETE_EVENT);
        assert_eq!(message.payload["status"], "PaymentReceived");
    }
}
