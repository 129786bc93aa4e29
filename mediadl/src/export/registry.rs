use std::path::PathBuf;

use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::error::DownloadFailure;
use crate::queue::JobKey;

pub type CompletionResult = std::result::Result<PathBuf, DownloadFailure>;
pub type CompletionReceiver = oneshot::Receiver<CompletionResult>;

/// Callers waiting for a title to finish, keyed by directory + title.
#[derive(Debug, Default)]
pub struct CompletionRegistry {
    waiters: DashMap<JobKey, Vec<oneshot::Sender<CompletionResult>>>,
}

impl CompletionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, key: &JobKey) -> CompletionReceiver {
        let (tx, rx) = oneshot::channel();
        self.waiters.entry(key.clone()).or_default().push(tx);
        rx
    }

    /// Deliver `result` to every waiter of `key`.
    ///
    /// Returns `false` when nobody was listening, including waiters that
    /// already gave up.
    pub fn resolve(&self, key: &JobKey, result: CompletionResult) -> bool {
        let Some((_, senders)) = self.waiters.remove(key) else {
            return false;
        };
        let mut delivered = false;
        for sender in senders {
            delivered |= sender.send(result.clone()).is_ok();
        }
        delivered
    }

    pub fn has_waiters(&self, key: &JobKey) -> bool {
        self.waiters
            .get(key)
            .is_some_and(|senders| senders.iter().any(|s| !s.is_closed()))
    }
}
