use serde_json::Value;

use crate::ChatWebhookError;

/// Raw result of a webhook call.
#[derive(Debug, Clone)]
pub struct WebhookResponse {
    pub status: u16,
    /// Parsed JSON body, when the endpoint returned JSON.
    pub body: Option<Value>,
    /// Id of the created or edited message, when present in the body.
    pub message_id: Option<String>,
}

impl WebhookResponse {
    pub(crate) async fn read(response: reqwest::Response) -> Result<Self, ChatWebhookError> {
        let status = response.status().as_u16();
        let text = response.text().await?;

        // Error bodies are often plain text; only keep JSON.
        let body = serde_json::from_str::<Value>(&text).ok();
        let message_id = body.as_ref().and_then(extract_message_id);

        Ok(Self {
            status,
            body,
            message_id,
        })
    }
}

fn extract_message_id(body: &Value) -> Option<String> {
    match body.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}
