use std::path::PathBuf;

use uuid::Uuid;

use crate::error::DownloadFailure;
use crate::media::Kind;
use crate::queue::{DownloadOptions, JobKey, TrimRange};

/// How a transfer ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferOutcome {
    Completed { bytes: u64 },
    Failed(DownloadFailure),
}

/// Emitted by the scheduler for every transfer that ends, successful or not.
///
/// Carries the [`Kind`] explicitly so the pipeline never has to re-derive it
/// from the file name.
#[derive(Debug, Clone)]
pub struct CompletionEvent {
    pub job_id: Uuid,
    pub key: JobKey,
    pub kind: Kind,
    pub path: PathBuf,
    pub options: DownloadOptions,
    pub time_range: Option<TrimRange>,
    pub outcome: TransferOutcome,
}

impl CompletionEvent {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, TransferOutcome::Completed { .. })
    }
}
