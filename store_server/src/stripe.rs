//! The payment-provider client used in production.
use std::sync::Arc;

use async_trait::async_trait;
use log::*;
use reqwest::Client;
use serde::Deserialize;
use store_common::MinorUnits;
use store_engine::payments::{PaymentProvider, ProviderError, ProviderIntent};

use crate::config::StripeConfig;

#[derive(Clone)]
pub struct StripeClient {
    config: StripeConfig,
    client: Arc<Client>,
}

#[derive(Debug, Deserialize)]
struct IntentResponse {
    id: String,
    client_secret: String,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Result<Self, ProviderError> {
        let client = Client::builder().build().map_err(|e| ProviderError(e.to_string()))?;
        Ok(Self { config, client: Arc::new(client) })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.api_url)
    }

    async fn post_form<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        form: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let url = self.url(path);
        trace!("💳 Sending provider request: {url}");
        let response = self
            .client
            .post(url)
            .basic_auth(self.config.api_key.reveal(), None::<&str>)
            .form(form)
            .send()
            .await
            .map_err(|e| ProviderError(e.to_string()))?;
        if response.status().is_success() {
            response.json::<T>().await.map_err(|e| ProviderError(e.to_string()))
        } else {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            Err(ProviderError(format!("Provider returned {status}. {message}")))
        }
    }
}

#[async_trait]
impl PaymentProvider for StripeClient {
    async fn create_intent(&self, amount: MinorUnits, currency: &str) -> Result<ProviderIntent, ProviderError> {
        let form = [
            ("amount", amount.to_string()),
            ("currency", currency.to_string()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
        ];
        let intent: IntentResponse = self.post_form("/payment_intents", &form).await?;
        debug!("💳 Provider created intent {}", intent.id);
        Ok(ProviderIntent { id: intent.id, client_secret: intent.client_secret })
    }

    async fn update_intent(&self, intent_id: &str, amount: MinorUnits) -> Result<(), ProviderError> {
        let form = [("amount", amount.to_string())];
        let _: serde_json::Value = self.post_form(&format!("/payment_intents/{intent_id}"), &form).await?;
        debug!("💳 Provider updated intent {intent_id}");
        Ok(())
    }
}
