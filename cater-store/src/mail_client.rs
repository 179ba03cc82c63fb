use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use cater_core::notification::{DeliveryReceipt, Mailer, Template};
use cater_core::{CoreError, CoreResult};
use cater_shared::Masked;

/// Mandrill `messages/send-template` client.
pub struct MandrillClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    from_email: String,
}

impl MandrillClient {
    pub fn new(api_url: &str, api_key: &str, from_email: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            from_email: from_email.to_string(),
        }
    }

    fn message_body(&self, template: Template, context: &Value) -> CoreResult<Value> {
        let receiver = context
            .get("receiver")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::DeliveryError(format!("{template}: missing receiver")))?;

        let merge_vars: Vec<Value> = context
            .as_object()
            .map(|fields| {
                fields
                    .iter()
                    .filter(|(name, _)| name.as_str() != "receiver")
                    .map(|(name, content)| json!({ "name": name, "content": content }))
                    .collect()
            })
            .unwrap_or_default();

        Ok(json!({
            "key": self.api_key,
            "template_name": template.as_str(),
            "template_content": [],
            "message": {
                "from_email": self.from_email,
                "to": [{ "email": receiver, "type": "to" }],
                "global_merge_vars": merge_vars,
                "merge_language": "handlebars",
            }
        }))
    }
}

#[async_trait]
impl Mailer for MandrillClient {
    async fn send(&self, template: Template, context: &Value) -> CoreResult<DeliveryReceipt> {
        let body = self.message_body(template, context)?;
        let receiver = Masked::new(body["message"]["to"][0]["email"].clone());
        debug!(%template, receiver = ?receiver, "Sending templated email");

        let response = self
            .http
            .post(format!("{}/messages/send-template.json", self.api_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::DeliveryError(e.to_string()))?;

        let status = response.status();
        let results: Value = response
            .json()
            .await
            .map_err(|e| CoreError::DeliveryError(e.to_string()))?;
        if !status.is_success() {
            let message = results["message"].as_str().unwrap_or("mail provider error");
            return Err(CoreError::DeliveryError(message.to_string()));
        }

        let first = &results[0];
        let delivery_status = first["status"].as_str().unwrap_or("unknown").to_string();
        if matches!(delivery_status.as_str(), "rejected" | "invalid") {
            let reason = first["reject_reason"].as_str().unwrap_or("rejected");
            return Err(CoreError::DeliveryError(format!("{template}: {reason}")));
        }

        Ok(DeliveryReceipt {
            id: first["_id"].as_str().unwrap_or_default().to_string(),
            status: delivery_status,
        })
    }
}
