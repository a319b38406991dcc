// =============================================================================
// Telegram Notifier — Bot API sendMessage
// =============================================================================
//
// SECURITY: The bot token is embedded in every request URL per the Telegram
// Bot API contract, so it must never appear in logs or Debug output.
// =============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use super::Notifier;

/// Default timeout for sendMessage requests.
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Delivers alert messages through the Telegram Bot API. The user id doubles
/// as the Telegram chat id.
pub struct TelegramNotifier {
    token: String,
    client: reqwest::Client,
    base_url: String,
}

impl TelegramNotifier {
    /// Create a new notifier for the bot identified by `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_timeout(token, DEFAULT_TIMEOUT_SECS)
    }

    /// Create a notifier whose requests time out after `timeout_secs`.
    pub fn with_timeout(token: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            token: token.into(),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(timeout_secs))
                .build()
                .expect("failed to build reqwest client for TelegramNotifier"),
            base_url: "https://api.telegram.org".to_string(),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, user_id: &str, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.token);

        let payload = serde_json::json!({
            "chat_id": user_id,
            "text": text,
        });

        let resp = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("POST sendMessage for chat {user_id}"))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Telegram sendMessage returned {}: {}", status, body);
        }

        debug!(user = %user_id, chars = text.len(), "notification delivered");
        Ok(())
    }
}

impl std::fmt::Debug for TelegramNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramNotifier")
            .field("token", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}
