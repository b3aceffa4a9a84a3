//! Store Payment Server
//!
//! The HTTP surface over [`store_engine`]: catalog and cart routes, payment-intent creation, and the provider
//! webhook endpoint that drives reconciliation. Everything here is plumbing; the business rules live in the engine.
pub mod config;
pub mod data_objects;
pub mod errors;
pub mod routes;
pub mod server;
pub mod stripe;
