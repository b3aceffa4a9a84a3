use std::{sync::Arc, time::Duration};

use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, web, App, HttpServer};
use sqlx::SqlitePool;
use store_engine::{
    notify::{ConnectionRegistry, NotificationDispatcher},
    payments::{InMemoryCartStore, PaymentIntentService},
    sqlite::{new_pool, run_migrations},
    PaymentReconciler,
};

use crate::{
    config::ServerConfig,
    errors::ServerError,
    routes::{
        create_or_update_payment_intent,
        create_product,
        delete_cart,
        delete_product,
        get_cart,
        get_product,
        health,
        list_brands,
        list_delivery_methods,
        list_orders,
        list_products,
        list_types,
        payment_webhook,
        set_cart,
        update_product,
    },
    stripe::StripeClient,
};

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let pool =
        new_pool(&config.database_url, 25).await.map_err(|e| ServerError::InitializeError(e.to_string()))?;
    run_migrations(&pool).await.map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let srv = create_server_instance(config, pool)?;
    srv.await.map_err(|e| ServerError::Unspecified(e.to_string()))
}

pub fn create_server_instance(config: ServerConfig, pool: SqlitePool) -> Result<Server, ServerError> {
    let registry = Arc::new(ConnectionRegistry::new());
    let dispatcher = NotificationDispatcher::new(registry.clone());
    let reconciler =
        web::Data::new(PaymentReconciler::new(pool.clone(), config.webhook_secret.clone(), dispatcher));
    let carts = Arc::new(InMemoryCartStore::new());
    let stripe =
        StripeClient::new(config.stripe.clone()).map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let intents = web::Data::new(PaymentIntentService::new(pool.clone(), carts.clone(), stripe));
    let carts = web::Data::new(carts);
    let pool = web::Data::new(pool);
    let srv = HttpServer::new(move || {
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("store::access_log"))
            .app_data(pool.clone())
            .app_data(reconciler.clone())
            .app_data(intents.clone())
            .app_data(carts.clone())
            .service(health)
            // Literal product paths must register before the {id} matcher.
            .service(list_brands)
            .service(list_types)
            .service(list_products)
            .service(get_product)
            .service(create_product)
            .service(update_product)
            .service(delete_product)
            .service(list_delivery_methods)
            .service(payment_webhook)
            .service(create_or_update_payment_intent)
            .service(get_cart)
            .service(set_cart)
            .service(delete_cart)
            .service(list_orders)
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((config.host.as_str(), config.port))?
    .run();
    Ok(srv)
}
