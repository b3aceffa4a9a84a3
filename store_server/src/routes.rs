//! Route handlers. Thin plumbing: deserialize, call into the engine, map errors to statuses.
use std::sync::Arc;

use actix_web::{delete, get, post, put, web, HttpRequest, HttpResponse};
use log::*;
use serde::Deserialize;
use sqlx::SqlitePool;
use store_engine::{
    db_types::{DeliveryMethod, Order, Product},
    payments::{InMemoryCartStore, PaymentIntentService, ShoppingCart},
    specification::{
        orders::orders_for_buyer_spec,
        product::{brand_list_spec, product_list_spec, type_list_spec, ProductQuery},
    },
    webhook::SIGNATURE_HEADER,
    PaymentReconciler,
    ReconcileError,
    ReconcileOutcome,
    Specification,
    UnitOfWork,
};

use crate::{
    data_objects::{JsonResponse, Pagination, ProductListParams},
    errors::ServerError,
    stripe::StripeClient,
};

pub type IntentService = PaymentIntentService<Arc<InMemoryCartStore>, StripeClient>;

#[get("/health")]
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().body("👍️\n")
}

//--------------------------------------      Catalog        ---------------------------------------------------------

#[get("/products")]
pub async fn list_products(
    params: web::Query<ProductListParams>,
    pool: web::Data<SqlitePool>,
) -> Result<HttpResponse, ServerError> {
    let query = ProductQuery::from(params.into_inner());
    trace!("🛒️ GET products: {query:?}");
    let spec = product_list_spec(&query);
    let products = UnitOfWork::new(pool.get_ref().clone()).repository::<Product>();
    let count = products.count(&spec).await?;
    let data = products.list(&spec).await?;
    let page =
        Pagination { page_index: query.page_index(), page_size: query.page_size(), count, data };
    Ok(HttpResponse::Ok().json(page))
}

#[get("/products/brands")]
pub async fn list_brands(pool: web::Data<SqlitePool>) -> Result<HttpResponse, ServerError> {
    let products = UnitOfWork::new(pool.get_ref().clone()).repository::<Product>();
    let rows: Vec<(String,)> = products.list_projected(&brand_list_spec()).await?;
    Ok(HttpResponse::Ok().json(dedupe_sorted(rows)))
}

#[get("/products/types")]
pub async fn list_types(pool: web::Data<SqlitePool>) -> Result<HttpResponse, ServerError> {
    let products = UnitOfWork::new(pool.get_ref().clone()).repository::<Product>();
    let rows: Vec<(String,)> = products.list_projected(&type_list_spec()).await?;
    Ok(HttpResponse::Ok().json(dedupe_sorted(rows)))
}

/// The projection runs after deduplication of full rows, so the projected column still repeats. Sorting happens here
/// rather than in SQL: an ORDER BY inside a subquery does not bind the outer projection's row order.
fn dedupe_sorted(rows: Vec<(String,)>) -> Vec<String> {
    let mut values: Vec<String> = rows.into_iter().map(|(v,)| v).collect();
    values.sort_unstable();
    values.dedup();
    values
}

#[get("/products/{id}")]
pub async fn get_product(path: web::Path<i64>, pool: web::Data<SqlitePool>) -> Result<HttpResponse, ServerError> {
    let id = path.into_inner();
    let products = UnitOfWork::new(pool.get_ref().clone()).repository::<Product>();
    match products.get_by_id(id).await? {
        Some(product) => Ok(HttpResponse::Ok().json(product)),
        None => Err(ServerError::NoRecordFound(format!("Product {id}"))),
    }
}

#[post("/products")]
pub async fn create_product(
    body: web::Json<Product>,
    pool: web::Data<SqlitePool>,
) -> Result<HttpResponse, ServerError> {
    let product = body.into_inner();
    debug!("🛒️ POST new product: {}", product.name);
    let uow = UnitOfWork::new(pool.get_ref().clone());
    uow.repository::<Product>().add(product);
    uow.complete().await?;
    Ok(HttpResponse::Created().json(JsonResponse::success("Product created.")))
}

#[put("/products/{id}")]
pub async fn update_product(
    path: web::Path<i64>,
    body: web::Json<Product>,
    pool: web::Data<SqlitePool>,
) -> Result<HttpResponse, ServerError> {
    let id = path.into_inner();
    let mut product = body.into_inner();
    product.id = id;
    let uow = UnitOfWork::new(pool.get_ref().clone());
    let products = uow.repository::<Product>();
    if !products.exists(id).await? {
        return Err(ServerError::NoRecordFound(format!("Product {id}")));
    }
    products.update(product);
    uow.complete().await?;
    Ok(HttpResponse::Ok().json(JsonResponse::success("Product updated.")))
}

#[delete("/products/{id}")]
pub async fn delete_product(path: web::Path<i64>, pool: web::Data<SqlitePool>) -> Result<HttpResponse, ServerError> {
    let id = path.into_inner();
    let uow = UnitOfWork::new(pool.get_ref().clone());
    let products = uow.repository::<Product>();
    let product =
        products.get_by_id(id).await?.ok_or_else(|| ServerError::NoRecordFound(format!("Product {id}")))?;
    products.delete(product);
    uow.complete().await?;
    Ok(HttpResponse::Ok().json(JsonResponse::success("Product deleted.")))
}

//--------------------------------------      Payments       ---------------------------------------------------------

#[get("/payments/delivery_methods")]
pub async fn list_delivery_methods(pool: web::Data<SqlitePool>) -> Result<HttpResponse, ServerError> {
    let methods = UnitOfWork::new(pool.get_ref().clone()).repository::<DeliveryMethod>();
    let data = methods.list(&Specification::new(None)).await?;
    Ok(HttpResponse::Ok().json(data))
}

#[post("/payments/{cart_id}")]
pub async fn create_or_update_payment_intent(
    path: web::Path<String>,
    service: web::Data<IntentService>,
) -> Result<HttpResponse, ServerError> {
    let cart_id = path.into_inner();
    debug!("💳 POST payment intent for cart {cart_id}");
    let cart = service.create_or_update_intent(&cart_id).await?;
    Ok(HttpResponse::Ok().json(cart))
}

/// The raw body and the signature header travel together into the reconciler; the body must not be deserialized
/// before its signature is checked.
///
/// The provider only ever receives a bare status code on failure. Error detail stays in the logs; a body would hand
/// an external system information about internal state (which intents have no order, whether the store is up).
#[post("/payments/webhook")]
pub async fn payment_webhook(
    req: HttpRequest,
    body: web::Bytes,
    reconciler: web::Data<PaymentReconciler>,
) -> HttpResponse {
    trace!("🔁 Received webhook delivery: {} bytes", body.len());
    let Some(signature) = req.headers().get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) else {
        warn!("🔁 Webhook delivery without a {SIGNATURE_HEADER} header");
        return HttpResponse::BadRequest().finish();
    };
    match reconciler.process_delivery(&body, signature).await {
        Ok(outcome) => {
            let message = match outcome {
                ReconcileOutcome::PaymentReceived { order_id } => format!("Order {order_id} settled."),
                ReconcileOutcome::PaymentMismatch { order_id, expected, received } => {
                    format!("Order {order_id} flagged: expected {expected}, received {received}.")
                },
                ReconcileOutcome::Ignored => "Event ignored.".to_string(),
                ReconcileOutcome::AlreadyProcessed => "Event already processed.".to_string(),
            };
            HttpResponse::Ok().json(JsonResponse::success(message))
        },
        // A malformed payload will never become valid; the provider must not retry it.
        Err(ReconcileError::MalformedEvent(e)) => {
            warn!("🔁 Discarding undecodable webhook delivery. {e}");
            HttpResponse::BadRequest().finish()
        },
        // Everything else is retryable, including signature failures, which usually mean a misconfigured secret.
        Err(e) => {
            error!("🔁 Webhook delivery failed. {e}");
            HttpResponse::InternalServerError().finish()
        },
    }
}

//--------------------------------------        Carts        ---------------------------------------------------------

#[get("/cart/{id}")]
pub async fn get_cart(
    path: web::Path<String>,
    carts: web::Data<Arc<InMemoryCartStore>>,
) -> Result<HttpResponse, ServerError> {
    use store_engine::payments::CartStore;
    let id = path.into_inner();
    // An unknown id yields a fresh empty cart rather than a 404; the client owns cart ids.
    let cart = carts.get(&id).await.unwrap_or_else(|| ShoppingCart::new(id));
    Ok(HttpResponse::Ok().json(cart))
}

#[post("/cart")]
pub async fn set_cart(
    body: web::Json<ShoppingCart>,
    carts: web::Data<Arc<InMemoryCartStore>>,
) -> Result<HttpResponse, ServerError> {
    use store_engine::payments::CartStore;
    let cart = body.into_inner();
    carts.set(cart.clone()).await;
    Ok(HttpResponse::Ok().json(cart))
}

#[delete("/cart/{id}")]
pub async fn delete_cart(
    path: web::Path<String>,
    carts: web::Data<Arc<InMemoryCartStore>>,
) -> Result<HttpResponse, ServerError> {
    use store_engine::payments::CartStore;
    carts.delete(&path.into_inner()).await;
    Ok(HttpResponse::Ok().json(JsonResponse::success("Cart deleted.")))
}

//--------------------------------------       Orders        ---------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct OrdersParams {
    pub email: String,
}

#[get("/orders")]
pub async fn list_orders(
    params: web::Query<OrdersParams>,
    pool: web::Data<SqlitePool>,
) -> Result<HttpResponse, ServerError> {
    let orders = UnitOfWork::new(pool.get_ref().clone()).repository::<Order>();
    let data = orders.list(&orders_for_buyer_spec(&params.email)).await?;
    Ok(HttpResponse::Ok().json(data))
}
