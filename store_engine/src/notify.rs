//! Live settlement notifications.
//!
//! The registry maps buyer emails to live client connections so the reconciler can push an
//! `OrderCompleteNotification` the moment an order settles. The mapping is process-local and non-durable: a buyer
//! with no live connection simply misses the push and learns the outcome when they next query their orders.
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::db_types::{Order, OrderItem};

/// The event name clients subscribe to.
pub const ORDER_COMPLETE_EVENT: &str = "OrderCompleteNotification";

pub type ConnectionId = u64;

/// A message pushed down a live connection.
#[derive(Debug, Clone, Serialize)]
pub struct PushMessage {
    pub event: &'static str,
    pub payload: serde_json::Value,
}

/// The settled order, as pushed to the buyer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderNotification {
    pub id: i64,
    pub buyer_email: String,
    pub status: String,
    pub total: String,
    pub items: Vec<OrderItem>,
}

impl From<&Order> for OrderNotification {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id,
            buyer_email: order.buyer_email.clone(),
            status: order.status.to_string(),
            total: order.total().to_string(),
            items: order.items.clone(),
        }
    }
}

//--------------------------------------  ConnectionRegistry  --------------------------------------------------------
/// Tracks which buyer is reachable on which live connection.
///
/// A buyer may hold several connections (multiple tabs); pushes go to the most recently registered one that is still
/// open. Disconnects, explicit or observed as a closed channel, drop the mapping.
#[derive(Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    senders: RwLock<HashMap<ConnectionId, mpsc::Sender<PushMessage>>>,
    by_email: RwLock<HashMap<String, Vec<ConnectionId>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a live connection for `email` and return its id.
    pub fn connect(&self, email: &str, sender: mpsc::Sender<PushMessage>) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.senders.write().expect("sender map lock poisoned").insert(id, sender);
        self.by_email.write().expect("email map lock poisoned").entry(email.to_string()).or_default().push(id);
        info!("📡 Connection {id} registered for {email}");
        id
    }

    pub fn disconnect(&self, id: ConnectionId) {
        self.senders.write().expect("sender map lock poisoned").remove(&id);
        let mut by_email = self.by_email.write().expect("email map lock poisoned");
        by_email.retain(|_, ids| {
            ids.retain(|conn| *conn != id);
            !ids.is_empty()
        });
        debug!("📡 Connection {id} deregistered");
    }

    /// The most recently registered open connection for `email`, if any. Closed channels found along the way are
    /// pruned.
    pub fn resolve(&self, email: &str) -> Option<mpsc::Sender<PushMessage>> {
        let candidates = self.by_email.read().expect("email map lock poisoned").get(email).cloned()?;
        let senders = self.senders.read().expect("sender map lock poisoned");
        let mut stale = Vec::new();
        let mut result = None;
        for id in candidates.iter().rev() {
            match senders.get(id) {
                Some(sender) if !sender.is_closed() => {
                    result = Some(sender.clone());
                    break;
                },
                _ => stale.push(*id),
            }
        }
        drop(senders);
        for id in stale {
            self.disconnect(id);
        }
        result
    }

    pub fn connection_count(&self) -> usize {
        self.senders.read().expect("sender map lock poisoned").len()
    }
}

//------------------------------------- NotificationDispatcher -------------------------------------------------------
/// Pushes settlement notifications to live buyers. Push failures never affect reconciliation; they are logged and
/// swallowed.
#[derive(Clone)]
pub struct NotificationDispatcher {
    registry: Arc<ConnectionRegistry>,
}

impl NotificationDispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Best-effort push of the settled order to its buyer.
    pub fn notify_order_complete(&self, order: &Order) {
        let Some(sender) = self.registry.resolve(&order.buyer_email) else {
            debug!("📡 No live connection for {}. Skipping settlement push for order {}", order.buyer_email, order.id);
            return;
        };
        let notification = OrderNotification::from(order);
        let payload = match serde_json::to_value(&notification) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("📡 Could not serialise settlement notification for order {}. {e}", order.id);
                return;
            },
        };
        let message = PushMessage { event: ORDER_COMPLETE_EVENT, payload };
        if let Err(e) = sender.try_send(message) {
            warn!("📡 Could not push settlement notification for order {}. {e}", order.id);
        } else {
            info!("📡 Pushed {ORDER_COMPLETE_EVENT} for order {} to {}", order.id, order.buyer_email);
        }
    }
}
