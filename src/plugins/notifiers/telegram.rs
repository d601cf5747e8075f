use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

use crate::plugins::traits::Notifier;
use crate::utils::error::AppError;
use crate::utils::retry::{retry_with_backoff, BackoffPolicy};
use crate::Result;

const TELEGRAM_API: &str = "https://api.telegram.org";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends HTML messages to one chat through the Bot API `sendMessage` call.
pub struct TelegramNotifier {
    client: Client,
    endpoint: String,
    chat_id: String,
    retry: BackoffPolicy,
}

impl TelegramNotifier {
    pub fn new(bot_token: &str, chat_id: &str) -> Result<Self> {
        Self::with_base_url(bot_token, chat_id, TELEGRAM_API)
    }

    /// Point the notifier at another API host (mock servers in tests).
    pub fn with_base_url(bot_token: &str, chat_id: &str, base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AppError::Notification(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/bot{}/sendMessage",
                base_url.trim_end_matches('/'),
                bot_token
            ),
            chat_id: chat_id.to_string(),
            retry: BackoffPolicy::new(3, Duration::from_millis(500)),
        })
    }

    pub fn with_retry(mut self, retry: BackoffPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn post(&self, text: &str) -> Result<()> {
        let body = json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "HTML",
        });

        let response = self.client.post(&self.endpoint).json(&body).send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let error_text = response.text().await.unwrap_or_default();
        Err(AppError::Notification(format!(
            "Telegram API error: {} - {}",
            status, error_text
        )))
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &str {
        "Telegram"
    }

    async fn send(&self, text: &str) -> Result<()> {
        let preview: String = text.chars().take(50).collect();
        tracing::debug!("Sending Telegram message: {}...", preview);

        retry_with_backoff(self.retry, "Telegram sendMessage", || self.post(text)).await
    }
}
