//! Checkout payment intents.
//!
//! Before a buyer can pay, their cart needs a payment intent at the provider. The amount charged is never taken from
//! the cart as the client submitted it: prices are re-read from the catalog at intent time, so a stale or tampered
//! cart cannot buy at the wrong price. Creating an intent for a cart that already has one updates the existing intent
//! instead, keeping one intent per cart however many times the buyer revisits checkout.
use std::{collections::HashMap, sync::RwLock};

use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use store_common::{MinorUnits, Money, MoneyConversionError, STORE_CURRENCY_CODE_LOWER};
use thiserror::Error;

use crate::{
    db_types::{DeliveryMethod, Product},
    sqlite::{StorageError, UnitOfWork},
};

//--------------------------------------    Shopping cart    ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: i64,
    pub product_name: String,
    pub price: Money,
    pub quantity: i64,
    #[serde(default)]
    pub picture_url: String,
}

/// A buyer's cart. Client-owned except for the provider fields, which only the intent service writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShoppingCart {
    pub id: String,
    pub items: Vec<CartItem>,
    #[serde(default)]
    pub delivery_method_id: Option<i64>,
    #[serde(default)]
    pub payment_intent_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
}

impl ShoppingCart {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), items: Vec::new(), delivery_method_id: None, payment_intent_id: None, client_secret: None }
    }
}

/// Cart persistence. Carts are ephemeral client state, so the store contract is a plain keyed get/set.
#[async_trait]
pub trait CartStore: Send + Sync {
    async fn get(&self, id: &str) -> Option<ShoppingCart>;
    async fn set(&self, cart: ShoppingCart);
    async fn delete(&self, id: &str);
}

#[async_trait]
impl<S: CartStore + ?Sized> CartStore for std::sync::Arc<S> {
    async fn get(&self, id: &str) -> Option<ShoppingCart> {
        (**self).get(id).await
    }

    async fn set(&self, cart: ShoppingCart) {
        (**self).set(cart).await
    }

    async fn delete(&self, id: &str) {
        (**self).delete(id).await
    }
}

#[derive(Default)]
pub struct InMemoryCartStore {
    carts: RwLock<HashMap<String, ShoppingCart>>,
}

impl InMemoryCartStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CartStore for InMemoryCartStore {
    async fn get(&self, id: &str) -> Option<ShoppingCart> {
        self.carts.read().expect("cart store lock poisoned").get(id).cloned()
    }

    async fn set(&self, cart: ShoppingCart) {
        self.carts.write().expect("cart store lock poisoned").insert(cart.id.clone(), cart);
    }

    async fn delete(&self, id: &str) {
        self.carts.write().expect("cart store lock poisoned").remove(id);
    }
}

//--------------------------------------  Payment provider   ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderIntent {
    pub id: String,
    pub client_secret: String,
}

#[derive(Debug, Error)]
#[error("Payment provider error: {0}")]
pub struct ProviderError(pub String);

/// The slice of the provider API the checkout flow needs.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_intent(&self, amount: MinorUnits, currency: &str) -> Result<ProviderIntent, ProviderError>;
    async fn update_intent(&self, intent_id: &str, amount: MinorUnits) -> Result<(), ProviderError>;
}

//------------------------------------- PaymentIntentService ---------------------------------------------------------
#[derive(Debug, Error)]
pub enum PaymentIntentError {
    #[error("No cart with id {0}")]
    CartNotFound(String),
    #[error("Cart references product {0}, which does not exist")]
    ProductNotFound(i64),
    #[error("Cart references delivery method {0}, which does not exist")]
    DeliveryMethodNotFound(i64),
    #[error("The cart total cannot be expressed in minor units. {0}")]
    Amount(#[from] MoneyConversionError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub struct PaymentIntentService<C: CartStore, P: PaymentProvider> {
    pool: SqlitePool,
    carts: C,
    provider: P,
}

impl<C: CartStore, P: PaymentProvider> PaymentIntentService<C, P> {
    pub fn new(pool: SqlitePool, carts: C, provider: P) -> Self {
        Self { pool, carts, provider }
    }

    pub fn carts(&self) -> &C {
        &self.carts
    }

    /// Create or refresh the payment intent for `cart_id` and return the updated cart, with every item price
    /// re-snapshotted from the catalog.
    pub async fn create_or_update_intent(&self, cart_id: &str) -> Result<ShoppingCart, PaymentIntentError> {
        let mut cart =
            self.carts.get(cart_id).await.ok_or_else(|| PaymentIntentError::CartNotFound(cart_id.to_string()))?;
        let uow = UnitOfWork::new(self.pool.clone());
        let products = uow.repository::<Product>();
        let mut amount = Money::default();
        for item in cart.items.iter_mut() {
            let product = products
                .get_by_id(item.product_id)
                .await?
                .ok_or(PaymentIntentError::ProductNotFound(item.product_id))?;
            if item.price != product.price {
                debug!(
                    "💳 Repricing {} in cart {cart_id}: {} -> {}",
                    product.name, item.price, product.price
                );
                item.price = product.price;
            }
            amount += item.price * item.quantity;
        }
        if let Some(method_id) = cart.delivery_method_id {
            let method = uow
                .repository::<DeliveryMethod>()
                .get_by_id(method_id)
                .await?
                .ok_or(PaymentIntentError::DeliveryMethodNotFound(method_id))?;
            amount += method.price;
        }
        let minor_units = amount.to_minor_units()?;
        match cart.payment_intent_id.as_deref() {
            Some(intent_id) => {
                self.provider.update_intent(intent_id, minor_units).await?;
                info!("💳 Updated intent {intent_id} for cart {cart_id} to {minor_units} minor units");
            },
            None => {
                let intent = self.provider.create_intent(minor_units, STORE_CURRENCY_CODE_LOWER).await?;
                info!("💳 Created intent {} for cart {cart_id} at {minor_units} minor units", intent.id);
                cart.payment_intent_id = Some(intent.id);
                cart.client_secret = Some(intent.client_secret);
            },
        }
        self.carts.set(cart.clone()).await;
        Ok(cart)
    }
}

#[cfg(test)]
mod test {
    use std::sync::Mutex;

    use super::*;
    use crate::test_utils::{memory_pool, seed_catalog};

    #[derive(Default)]
    struct FakeProvider {
        created: Mutex<Vec<(MinorUnits, String)>>,
        updated: Mutex<Vec<(String, MinorUnits)>>,
    }

    #[async_trait]
    impl PaymentProvider for FakeProvider {
        async fn create_intent(&self, amount: MinorUnits, currency: &str) -> Result<ProviderIntent, ProviderError> {
            self.created.lock().unwrap().push((amount, currency.to_string()));
            Ok(ProviderIntent { id: "pi_fake_1".into(), client_secret: "pi_fake_1_secret".into() })
        }

        async fn update_intent(&self, intent_id: &str, amount: MinorUnits) -> Result<(), ProviderError> {
            self.updated.lock().unwrap().push((intent_id.to_string(), amount));
            Ok(())
        }
    }

    async fn service(pool: SqlitePool) -> PaymentIntentService<InMemoryCartStore, FakeProvider> {
        PaymentIntentService::new(pool, InMemoryCartStore::new(), FakeProvider::default())
    }

    fn cart_with_stale_price() -> ShoppingCart {
        let mut cart = ShoppingCart::new("cart_1");
        // Catalog price for product 1 is 49.95; the cart claims 0.01.
        cart.items.push(CartItem {
            product_id: 1,
            product_name: "Anvil".into(),
            price: "0.01".parse().unwrap(),
            quantity: 2,
            picture_url: String::new(),
        });
        cart
    }

    #[tokio::test]
    async fn creating_an_intent_reprices_the_cart() {
        let _ = env_logger::try_init();
        let pool = memory_pool().await;
        seed_catalog(&pool).await;
        let service = service(pool).await;
        service.carts().set(cart_with_stale_price()).await;
        let cart = service.create_or_update_intent("cart_1").await.unwrap();
        assert_eq!(cart.items[0].price, "49.95".parse().unwrap());
        assert_eq!(cart.payment_intent_id.as_deref(), Some("pi_fake_1"));
        assert_eq!(cart.client_secret.as_deref(), Some("pi_fake_1_secret"));
        // 2 × 49.95 = 99.90
        assert_eq!(*service.provider.created.lock().unwrap(), [(9990, "aud".to_string())]);
        // The repriced cart was saved back.
        let stored = service.carts().get("cart_1").await.unwrap();
        assert_eq!(stored, cart);
    }

    #[tokio::test]
    async fn an_existing_intent_is_updated_not_replaced() {
        let _ = env_logger::try_init();
        let pool = memory_pool().await;
        seed_catalog(&pool).await;
        let service = service(pool).await;
        let mut cart = cart_with_stale_price();
        cart.payment_intent_id = Some("pi_existing".into());
        cart.client_secret = Some("pi_existing_secret".into());
        service.carts().set(cart).await;
        let cart = service.create_or_update_intent("cart_1").await.unwrap();
        assert_eq!(cart.payment_intent_id.as_deref(), Some("pi_existing"));
        assert!(service.provider.created.lock().unwrap().is_empty());
        assert_eq!(*service.provider.updated.lock().unwrap(), [("pi_existing".to_string(), 9990)]);
    }

    #[tokio::test]
    async fn delivery_price_joins_the_amount() {
        let _ = env_logger::try_init();
        let pool = memory_pool().await;
        seed_catalog(&pool).await;
        let service = service(pool).await;
        let mut cart = cart_with_stale_price();
        cart.delivery_method_id = Some(1);
        service.carts().set(cart).await;
        service.create_or_update_intent("cart_1").await.unwrap();
        // 99.90 + 5.00 delivery
        assert_eq!(service.provider.created.lock().unwrap()[0].0, 10490);
    }

    #[tokio::test]
    async fn missing_cart_and_unknown_references_fail() {
        let _ = env_logger::try_init();
        let pool = memory_pool().await;
        seed_catalog(&pool).await;
        let service = service(pool).await;
        let err = service.create_or_update_intent("cart_missing").await.unwrap_err();
        assert!(matches!(err, PaymentIntentError::CartNotFound(_)));

        let mut cart = ShoppingCart::new("cart_1");
        cart.items.push(CartItem {
            product_id: 999,
            product_name: "Phantom".into(),
            price: "1.00".parse().unwrap(),
            quantity: 1,
            picture_url: String::new(),
        });
        service.carts().set(cart).await;
        let err = service.create_or_update_intent("cart_1").await.unwrap_err();
        assert!(matches!(err, PaymentIntentError::ProductNotFound(999)));

        let mut cart = cart_with_stale_price();
        cart.delivery_method_id = Some(42);
        service.carts().set(cart).await;
        let err = service.create_or_update_intent("cart_1").await.unwrap_err();
        assert!(matches!(err, PaymentIntentError::DeliveryMethodNotFound(42)));
    }
}
