// Chat webhook client (Discord-style incoming webhooks).
//
// POST {webhook}?wait=true creates a message and returns it, which gives us the
// message id for later edits. PATCH {webhook}/messages/{id} edits it in place.
//
// This crate only moves bytes. It reports the HTTP status it got back and leaves
// classification (retryable, fatal, deleted) to the caller.

use std::time::Duration;

use reqwest::{Client, Url};
use serde_json::Value;

pub mod models;

pub use models::WebhookResponse;

#[derive(Debug, thiserror::Error)]
pub enum ChatWebhookError {
    #[error("invalid webhook url: {0}")]
    InvalidUrl(String),

    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("failed to build http client: {0}")]
    Client(String),
}

impl From<reqwest::Error> for ChatWebhookError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ChatWebhookError::Timeout
        } else {
            ChatWebhookError::Network(e.to_string())
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatWebhookOptions {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for ChatWebhookOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: "pipeline-chat-webhook/0.1".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatWebhookService {
    client: Client,
}

impl ChatWebhookService {
    pub fn new(options: ChatWebhookOptions) -> Result<Self, ChatWebhookError> {
        let client = Client::builder()
            .timeout(options.timeout)
            .user_agent(options.user_agent)
            .build()
            .map_err(|e| ChatWebhookError::Client(e.to_string()))?;

        Ok(Self { client })
    }

    /// Post a new message. `wait=true` makes the endpoint echo the created message.
    pub async fn create_message(
        &self,
        webhook_url: &str,
        body: &Value,
    ) -> Result<WebhookResponse, ChatWebhookError> {
        let mut url = parse_url(webhook_url)?;
        url.query_pairs_mut().append_pair("wait", "true");

        let response = self.client.post(url).json(body).send().await?;
        WebhookResponse::read(response).await
    }

    /// Edit a message previously created through the same webhook.
    pub async fn edit_message(
        &self,
        webhook_url: &str,
        message_id: &str,
        body: &Value,
    ) -> Result<WebhookResponse, ChatWebhookError> {
        let url = message_url(webhook_url, message_id)?;

        let response = self.client.patch(url).json(body).send().await?;
        WebhookResponse::read(response).await
    }
}

fn parse_url(raw: &str) -> Result<Url, ChatWebhookError> {
    // The url carries the webhook token, keep it out of error messages
    Url::parse(raw).map_err(|e| ChatWebhookError::InvalidUrl(e.to_string()))
}

fn message_url(webhook_url: &str, message_id: &str) -> Result<Url, ChatWebhookError> {
    let mut url = parse_url(webhook_url)?;
    url.set_query(None);
    url.path_segments_mut()
        .map_err(|_| ChatWebhookError::InvalidUrl("url cannot be a base".to_string()))?
        .pop_if_empty()
        .extend(["messages", message_id]);
    Ok(url)
}
