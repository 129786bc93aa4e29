use std::path::PathBuf;

use async_trait::async_trait;

use crate::Result;
use crate::downloader::ProgressHandle;
use crate::queue::TrimRange;

/// Combine a video-only and an audio-only stream without re-encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeJob {
    pub video: PathBuf,
    pub audio: PathBuf,
    pub output: PathBuf,
    pub time_range: Option<TrimRange>,
}

/// Re-encode a video-only stream into a mergeable codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeJob {
    pub input: PathBuf,
    pub output: PathBuf,
}

/// Container-level media operations used by the merge pipeline.
///
/// Implementations leave `output` absent or incomplete on error; the caller
/// owns cleanup of inputs.
#[async_trait]
pub trait MediaMuxer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn merge(&self, job: &MergeJob, progress: &ProgressHandle) -> Result<()>;

    async fn transcode(&self, job: &TranscodeJob, progress: &ProgressHandle) -> Result<()>;
}
