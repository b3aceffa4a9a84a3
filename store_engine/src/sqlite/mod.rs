//! # SQLite persistence layer
//!
//! Pool construction, the generic [`Repository`] and the [`UnitOfWork`]. Reads go straight to the pool; writes are
//! staged on repositories and only hit the database when [`UnitOfWork::complete`] commits them in one transaction.
mod repository;
mod unit_of_work;

use std::env;

use log::info;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use thiserror::Error;

pub use repository::Repository;
pub use unit_of_work::UnitOfWork;

const SQLITE_DB_URL: &str = "sqlite://data/store.db";

pub fn db_url() -> String {
    let result = env::var("STORE_DATABASE_URL").unwrap_or_else(|_| {
        info!("STORE_DATABASE_URL is not set. Using the default.");
        SQLITE_DB_URL.to_string()
    });
    info!("Using database URL: {result}");
    result
}

pub async fn new_pool(url: &str, max_connections: u32) -> Result<SqlitePool, StorageError> {
    let pool = SqlitePoolOptions::new().max_connections(max_connections).connect(url).await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),
    #[error("Entity in table {table} has no identity yet, so it cannot be updated or deleted")]
    MissingIdentity { table: &'static str },
    #[error("Unknown relation path '{path}' for table {table}")]
    UnknownRelation { table: &'static str, path: String },
    #[error("Could not stage entity for writing. {0}")]
    SerializationError(String),
}
