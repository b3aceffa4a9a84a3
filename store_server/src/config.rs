use std::env;

use log::*;
use store_common::Secret;

const DEFAULT_STORE_HOST: &str = "127.0.0.1";
const DEFAULT_STORE_PORT: u16 = 8360;
const DEFAULT_STRIPE_API_URL: &str = "https://api.stripe.com/v1";

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// The shared secret webhook deliveries are signed with.
    pub webhook_secret: Secret<String>,
    pub stripe: StripeConfig,
}

#[derive(Clone, Debug, Default)]
pub struct StripeConfig {
    pub api_url: String,
    pub api_key: Secret<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_STORE_HOST.to_string(),
            port: DEFAULT_STORE_PORT,
            database_url: String::default(),
            webhook_secret: Secret::default(),
            stripe: StripeConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("STORE_HOST").ok().unwrap_or_else(|| DEFAULT_STORE_HOST.into());
        let port = env::var("STORE_PORT")
            .map(|s| {
                s.parse::<u16>().unwrap_or_else(|e| {
                    error!(
                        "🪛️ {s} is not a valid port for STORE_PORT. {e} Using the default, {DEFAULT_STORE_PORT}, \
                         instead."
                    );
                    DEFAULT_STORE_PORT
                })
            })
            .ok()
            .unwrap_or(DEFAULT_STORE_PORT);
        let database_url = store_engine::sqlite::db_url();
        let webhook_secret = env::var("STORE_WEBHOOK_SECRET").map(Secret::new).unwrap_or_else(|_| {
            warn!("🪛️ STORE_WEBHOOK_SECRET is not set. Webhook deliveries will fail signature verification.");
            Secret::default()
        });
        let stripe = StripeConfig {
            api_url: env::var("STORE_PAYMENT_API_URL").ok().unwrap_or_else(|| DEFAULT_STRIPE_API_URL.into()),
            api_key: env::var("STORE_PAYMENT_API_KEY").map(Secret::new).unwrap_or_else(|_| {
                warn!("🪛️ STORE_PAYMENT_API_KEY is not set. Payment intents cannot be created.");
                Secret::default()
            }),
        };
        Self { host, port, database_url, webhook_secret, stripe }
    }
}
