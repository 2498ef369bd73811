use async_trait::async_trait;

use crate::{notify::types::Notification, Result};

/// Delivery port for user-visible notifications.
///
/// Implementations report failure through `Result` and must not panic. Callers
/// log failures and move on; delivery is never retried.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<()>;
}
