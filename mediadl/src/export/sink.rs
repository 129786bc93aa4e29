use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use super::{AssetStore, CompletionRegistry, Notifier};
use crate::error::DownloadFailure;
use crate::queue::JobKey;

/// Final stage: register finished files and tell whoever is waiting.
pub struct ExportSink {
    store: Option<Arc<dyn AssetStore>>,
    notifier: Arc<dyn Notifier>,
    registry: CompletionRegistry,
}

impl ExportSink {
    pub fn new(store: Option<Arc<dyn AssetStore>>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            notifier,
            registry: CompletionRegistry::new(),
        }
    }

    pub fn registry(&self) -> &CompletionRegistry {
        &self.registry
    }

    /// Register `path` with the asset store, then resolve the title's waiters.
    ///
    /// A failing asset store is logged; the file is still reported as done.
    pub async fn export(&self, key: &JobKey, path: &Path) {
        if let Some(store) = &self.store {
            match store.register(path).await {
                Ok(()) => info!(store = store.name(), path = %path.display(), "Registered with asset store"),
                Err(e) => warn!(store = store.name(), path = %path.display(), error = %e, "Asset store registration failed"),
            }
        }

        if self.registry.resolve(key, Ok(path.to_path_buf())) {
            info!(key = %key, path = %path.display(), "Download finished");
        } else {
            self.notify(&format!("Download complete: {}", key.title), &key.title)
                .await;
        }
    }

    /// Report a failed title.
    pub async fn fail(&self, key: &JobKey, failure: DownloadFailure) {
        let message = format!("Download failed: {} ({})", key.title, failure.message);
        if !self.registry.resolve(key, Err(failure)) {
            self.notify(&message, &key.title).await;
        }
    }

    async fn notify(&self, body: &str, identifier: &str) {
        if let Err(e) = self.notifier.notify(body, identifier).await {
            warn!(error = %e, "Notification failed");
        }
    }
}
