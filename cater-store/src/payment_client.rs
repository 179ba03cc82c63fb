//! Stripe charges over the REST API (no SDK dependency)

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, info};

use cater_core::payment::{
    CardDetails, CardToken, PaymentAdapter, ProviderCustomer, Transaction, TransactionRequest,
};
use cater_core::{CoreError, CoreResult};

pub struct StripeClient {
    http: reqwest::Client,
    api_url: String,
    secret_key: String,
}

impl StripeClient {
    pub fn new(api_url: &str, secret_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
        }
    }

    async fn post_form(&self, path: &str, form: &[(&str, String)]) -> CoreResult<Value> {
        let response = self
            .http
            .post(format!("{}/{}", self.api_url, path))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(form)
            .send()
            .await
            .map_err(provider_error)?;

        let status = response.status();
        let body: Value = response.json().await.map_err(provider_error)?;
        if !status.is_success() {
            let message = body["error"]["message"]
                .as_str()
                .unwrap_or("unknown provider failure");
            error!("Stripe {} failed with {}: {}", path, status, message);
            return Err(CoreError::ProviderError(message.to_string()));
        }
        Ok(body)
    }
}

fn provider_error(err: reqwest::Error) -> CoreError {
    CoreError::ProviderError(err.to_string())
}

fn required_str(body: &Value, field: &str) -> CoreResult<String> {
    body[field]
        .as_str()
        .map(String::from)
        .ok_or_else(|| CoreError::ProviderError(format!("Stripe response missing {field}: {body}")))
}

#[async_trait]
impl PaymentAdapter for StripeClient {
    async fn create_token(&self, card: &CardDetails) -> CoreResult<CardToken> {
        let body = self
            .post_form(
                "tokens",
                &[
                    ("card[number]", card.number.clone()),
                    ("card[exp_month]", card.exp_month.to_string()),
                    ("card[exp_year]", card.exp_year.to_string()),
                    ("card[cvc]", card.cvc.clone()),
                ],
            )
            .await?;
        Ok(CardToken {
            id: required_str(&body, "id")?,
        })
    }

    async fn create_transaction(&self, request: &TransactionRequest) -> CoreResult<Transaction> {
        let body = self
            .post_form(
                "charges",
                &[
                    ("amount", request.amount_minor.to_string()),
                    ("currency", request.currency.clone()),
                    ("source", request.source.clone()),
                    ("capture", "false".to_string()),
                ],
            )
            .await?;

        let transaction = Transaction {
            id: required_str(&body, "id")?,
            amount_minor: body["amount"].as_i64().unwrap_or(request.amount_minor),
            currency: body["currency"]
                .as_str()
                .unwrap_or(&request.currency)
                .to_string(),
        };
        info!("Authorized charge {} for {} minor units", transaction.id, transaction.amount_minor);
        Ok(transaction)
    }

    async fn capture_transaction(&self, transaction_id: &str) -> CoreResult<()> {
        self.post_form(&format!("charges/{transaction_id}/capture"), &[])
            .await?;
        info!("Captured charge {}", transaction_id);
        Ok(())
    }

    async fn create_customer(&self, email: &str) -> CoreResult<ProviderCustomer> {
        let body = self
            .post_form("customers", &[("email", email.to_string())])
            .await?;
        Ok(ProviderCustomer {
            id: required_str(&body, "id")?,
        })
    }
}
