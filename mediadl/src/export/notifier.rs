use async_trait::async_trait;
use tracing::info;

use crate::Result;

/// User-facing notification, used when nobody is awaiting a result.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, body: &str, identifier: &str) -> Result<()>;
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, body: &str, identifier: &str) -> Result<()> {
        info!(target: "mediadl::notification", identifier, "{body}");
        Ok(())
    }
}
