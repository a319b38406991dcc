// =============================================================================
// Notifier — where alert messages go
// =============================================================================
//
// Fire-and-forget from the monitor's perspective: a failed send is logged and
// the cycle moves on; the core never retries delivery.

pub mod telegram;

pub use telegram::TelegramNotifier;

use anyhow::Result;
use async_trait::async_trait;

/// Delivery channel for user-facing alert messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `text` to `user_id`.
    async fn send(&self, user_id: &str, text: &str) -> Result<()>;
}
