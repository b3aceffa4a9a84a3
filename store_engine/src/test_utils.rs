//! Shared helpers for the unit tests: an in-memory database and a small seeded world.
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::db_types::Product;

/// A fresh in-memory database with the schema applied. One connection, so every query in a test sees the same
/// database.
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory database opens");
    sqlx::migrate!("./migrations").run(&pool).await.expect("migrations apply");
    pool
}

pub fn sample_product(name: &str, brand: &str, product_type: &str, price: &str) -> Product {
    Product {
        id: 0,
        name: name.into(),
        description: format!("{name} ({brand})"),
        price: price.parse().expect("valid price"),
        picture_url: format!("/images/{}.png", name.to_lowercase()),
        brand: brand.into(),
        product_type: product_type.into(),
        quantity_in_stock: 10,
    }
}

/// Five products over two brands (ids 1 to 5, names in alphabetical order) and one delivery method (id 1, $5.00).
pub async fn seed_catalog(pool: &SqlitePool) {
    let products = [
        ("Anvil", "Acme", "Hardware", "49.95"),
        ("Boots", "Acme", "Footwear", "89.99"),
        ("Dynamite", "Acme", "Explosives", "12.50"),
        ("Gloves", "Globex", "Apparel", "19.99"),
        ("Rocket skates", "Globex", "Footwear", "120.00"),
    ];
    for (name, brand, product_type, price) in products {
        let product = sample_product(name, brand, product_type, price);
        sqlx::query(
            "INSERT INTO products (name, description, price, picture_url, brand, product_type, quantity_in_stock) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.price)
        .bind(&product.picture_url)
        .bind(&product.brand)
        .bind(&product.product_type)
        .bind(product.quantity_in_stock)
        .execute(pool)
        .await
        .expect("product seeds");
    }
    sqlx::query(
        "INSERT INTO delivery_methods (short_name, delivery_time, description, price) \
         VALUES ('Standard', '3-5 days', 'Standard delivery', '5.00')",
    )
    .execute(pool)
    .await
    .expect("delivery method seeds");
}

/// A pending order for `buyer_email` paid with `payment_intent_id`: two units at $4.999 plus $5.00 delivery, so it
/// totals 14.998 and settles at 1500 minor units. Returns the order id.
pub async fn seed_pending_order(pool: &SqlitePool, payment_intent_id: &str, buyer_email: &str) -> i64 {
    sqlx::query(
        "INSERT INTO delivery_methods (short_name, delivery_time, description, price) \
         VALUES ('Standard', '3-5 days', 'Standard delivery', '5.00')",
    )
    .execute(pool)
    .await
    .expect("delivery method seeds");
    let order_id: i64 = sqlx::query_scalar(
        "INSERT INTO orders (buyer_email, order_date, delivery_method_id, delivery_price, payment_intent_id, status) \
         VALUES ($1, $2, 1, '5.00', $3, 'Pending') RETURNING id",
    )
    .bind(buyer_email)
    .bind(chrono::Utc::now())
    .bind(payment_intent_id)
    .fetch_one(pool)
    .await
    .expect("order seeds");
    sqlx::query(
        "INSERT INTO order_items (order_id, product_id, product_name, picture_url, price, quantity) \
         VALUES ($1, 1, 'Anvil', '', '4.999', 2)",
    )
    .bind(order_id)
    .execute(pool)
    .await
    .expect("order item seeds");
    order_id
}
