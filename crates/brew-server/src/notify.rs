//! Push notification seam.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("recipient rejected: {0}")]
    Rejected(String),
}

/// Delivers a data-only push message to one recipient token.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        recipient: &str,
        payload: &HashMap<String, String>,
    ) -> Result<(), NotifyError>;
}

/// Writes each notification to the log instead of sending it.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        recipient: &str,
        payload: &HashMap<String, String>,
    ) -> Result<(), NotifyError> {
        info!(recipient, ?payload, "push notification");
        Ok(())
    }
}
