//! Reacts to completion events: export, wait for a sibling, transcode, merge.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::muxer::{MediaMuxer, MergeJob, TranscodeJob};
use crate::config::PipelineConfig;
use crate::downloader::{CompletionEvent, ProgressHandle, ProgressPhase, TransferOutcome};
use crate::error::DownloadFailure;
use crate::export::ExportSink;
use crate::media::Kind;
use crate::queue::{DownloadOptions, JobKey};
use crate::utils::fs;

/// Extension of transcoded video-only output.
const TRANSCODE_EXTENSION: &str = "mp4";

/// Known elementary files of one title.
#[derive(Debug, Default)]
struct TitleState {
    job_id: Option<Uuid>,
    video: Option<PathBuf>,
    audio: Option<PathBuf>,
    merged: bool,
}

impl TitleState {
    /// Forget a previous job's files when a new job for the same title starts.
    fn reset_for(&mut self, job_id: Uuid) {
        if self.job_id != Some(job_id) {
            *self = Self {
                job_id: Some(job_id),
                ..Default::default()
            };
        }
    }
}

pub struct MergePipeline {
    muxer: Arc<dyn MediaMuxer>,
    export: Arc<ExportSink>,
    config: PipelineConfig,
    titles: DashMap<JobKey, Arc<Mutex<TitleState>>>,
    /// One transcode at a time per process.
    transcoder: Semaphore,
    progress: ProgressHandle,
}

impl MergePipeline {
    pub fn new(
        muxer: Arc<dyn MediaMuxer>,
        export: Arc<ExportSink>,
        config: PipelineConfig,
        progress: ProgressHandle,
    ) -> Self {
        Self {
            muxer,
            export,
            config,
            titles: DashMap::new(),
            transcoder: Semaphore::new(1),
            progress,
        }
    }

    /// Consume completion events until the channel closes or `shutdown` fires.
    ///
    /// Each event is handled on its own task; per-title locking keeps merges
    /// of the same title serialized.
    pub fn spawn(
        self: Arc<Self>,
        mut events: mpsc::Receiver<CompletionEvent>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tasks = JoinSet::new();
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Pipeline shutting down");
                        break;
                    }
                    Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                        if let Err(e) = joined {
                            error!(error = %e, "Pipeline task panicked");
                        }
                    }
                    event = events.recv() => {
                        let Some(event) = event else { break };
                        let this = self.clone();
                        tasks.spawn(async move { this.handle(event).await });
                    }
                }
            }

            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "Pipeline task panicked");
                }
            }
        })
    }

    pub async fn handle(&self, event: CompletionEvent) {
        let key = event.key.clone();
        if let TransferOutcome::Failed(failure) = &event.outcome {
            warn!(key = %key, kind = %event.kind, error = %failure, "Transfer failed");
            self.titles.remove(&key);
            self.export.fail(&key, failure.clone()).await;
            return;
        }

        if event.kind == Kind::Complete || event.options.contains(DownloadOptions::NO_REMUX) {
            info!(key = %key, kind = %event.kind, path = %event.path.display(), "Exporting without merge");
            self.export.export(&key, &event.path).await;
            return;
        }

        let slot = self.titles.entry(key.clone()).or_default().clone();
        let mut state = slot.lock().await;
        state.reset_for(event.job_id);

        match event.kind {
            Kind::VideoOnly => state.video = Some(event.path.clone()),
            Kind::AudioOnly => state.audio = Some(event.path.clone()),
            Kind::OtherVideo => match self.transcode(&event).await {
                Ok(output) => state.video = Some(output),
                Err(failure) => {
                    drop(state);
                    self.forget(&key, &slot);
                    self.export.fail(&key, failure).await;
                    return;
                }
            },
            Kind::Complete => return,
        }

        let outcome = self.try_merge(&event, &mut state).await;
        drop(state);
        match outcome {
            MergeOutcome::Waiting => {}
            MergeOutcome::Merged(path) => {
                self.forget(&key, &slot);
                self.export.export(&key, &path).await;
            }
            MergeOutcome::Failed(failure) => {
                self.forget(&key, &slot);
                self.export.fail(&key, failure).await;
            }
        }
    }

    fn forget(&self, key: &JobKey, slot: &Arc<Mutex<TitleState>>) {
        self.titles.remove_if(key, |_, current| Arc::ptr_eq(current, slot));
    }

    async fn transcode(&self, event: &CompletionEvent) -> Result<PathBuf, DownloadFailure> {
        let _permit = self
            .transcoder
            .acquire()
            .await
            .map_err(|_| DownloadFailure::canceled())?;

        let output = Kind::VideoOnly.destination(
            event.key.directory(),
            &event.key.title,
            TRANSCODE_EXTENSION,
        );
        let job = TranscodeJob {
            input: event.path.clone(),
            output: output.clone(),
        };
        info!(input = %job.input.display(), output = %job.output.display(), muxer = self.muxer.name(), "Transcoding");

        self.progress
            .begin(ProgressPhase::Transcoding, event.key.title.clone(), None);
        let result = self.muxer.transcode(&job, &self.progress).await;
        self.progress.finish();

        if let Err(e) = result {
            error!(input = %job.input.display(), error = %e, "Transcode failed, keeping original");
            if let Err(cleanup) = fs::remove_file_if_exists(&output).await {
                warn!(error = %cleanup, "Failed to remove partial transcode output");
            }
            return Err(DownloadFailure::from(&e));
        }

        if !self.config.keep_intermediates {
            self.discard(&job.input).await;
        }
        Ok(output)
    }

    async fn try_merge(&self, event: &CompletionEvent, state: &mut TitleState) -> MergeOutcome {
        if state.merged {
            return MergeOutcome::Waiting;
        }
        let key = &event.key;
        if state.video.is_none() {
            state.video = find_sibling(key, Kind::VideoOnly).await;
        }
        if state.audio.is_none() {
            state.audio = find_sibling(key, Kind::AudioOnly).await;
        }
        let (Some(video), Some(audio)) = (state.video.clone(), state.audio.clone()) else {
            debug!(key = %key, "Waiting for sibling stream");
            return MergeOutcome::Waiting;
        };

        let output = key
            .directory()
            .join(format!("{}.{}", key.title, self.config.container));
        if let Err(e) = fs::remove_file_if_exists(&output).await {
            return MergeOutcome::Failed(DownloadFailure::from(&e));
        }

        let job = MergeJob {
            video,
            audio,
            output,
            time_range: event.time_range,
        };
        info!(video = %job.video.display(), audio = %job.audio.display(), output = %job.output.display(), "Merging");

        self.progress
            .begin(ProgressPhase::Merging, key.title.clone(), None);
        let result = self.muxer.merge(&job, &self.progress).await;
        self.progress.finish();

        match result {
            Ok(()) => {
                state.merged = true;
                if !self.config.keep_intermediates {
                    self.discard(&job.video).await;
                    self.discard(&job.audio).await;
                }
                MergeOutcome::Merged(job.output)
            }
            Err(e) => {
                error!(key = %key, error = %e, "Merge failed, keeping intermediates");
                if let Err(cleanup) = fs::remove_file_if_exists(&job.output).await {
                    warn!(path = %job.output.display(), error = %cleanup, "Failed to remove partial merge output");
                }
                MergeOutcome::Failed(DownloadFailure::from(&e))
            }
        }
    }

    async fn discard(&self, path: &Path) {
        match fs::remove_file_if_exists(path).await {
            Ok(_) => debug!(path = %path.display(), "Removed intermediate"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove intermediate"),
        }
    }
}

enum MergeOutcome {
    Waiting,
    Merged(PathBuf),
    Failed(DownloadFailure),
}

/// Look for a finished `title-<kind>.*` file next to the title.
async fn find_sibling(key: &JobKey, kind: Kind) -> Option<PathBuf> {
    let prefix = format!("{}.", kind.stem(&key.title));
    let mut entries = tokio::fs::read_dir(key.directory()).await.ok()?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with(&prefix) && !name.ends_with(".part") && !name.ends_with(".tmp") {
            return Some(entry.path());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;
    use crate::error::FailureKind;
    use crate::export::LogNotifier;
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeMuxer {
        merges: SyncMutex<Vec<MergeJob>>,
        transcodes: SyncMutex<Vec<TranscodeJob>>,
        fail_transcode: bool,
        fail_merge: bool,
    }

    #[async_trait]
    impl MediaMuxer for FakeMuxer {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn merge(&self, job: &MergeJob, _progress: &ProgressHandle) -> Result<()> {
            self.merges.lock().push(job.clone());
            tokio::fs::write(&job.output, b"merged").await?;
            if self.fail_merge {
                return Err(crate::Error::pipeline("muxer exited with status 1"));
            }
            Ok(())
        }

        async fn transcode(&self, job: &TranscodeJob, _progress: &ProgressHandle) -> Result<()> {
            self.transcodes.lock().push(job.clone());
            if self.fail_transcode {
                return Err(crate::Error::pipeline("unsupported codec"));
            }
            tokio::fs::write(&job.output, b"h264").await?;
            Ok(())
        }
    }

    fn pipeline(muxer: Arc<FakeMuxer>) -> (MergePipeline, Arc<ExportSink>) {
        let export = Arc::new(ExportSink::new(None, Arc::new(LogNotifier)));
        let pipeline = MergePipeline::new(
            muxer,
            export.clone(),
            PipelineConfig::default(),
            ProgressHandle::new(),
        );
        (pipeline, export)
    }

    async fn completed(key: &JobKey, job_id: Uuid, kind: Kind, ext: &str) -> CompletionEvent {
        let path = kind.destination(key.directory(), &key.title, ext);
        tokio::fs::write(&path, kind.tag()).await.unwrap();
        CompletionEvent {
            job_id,
            key: key.clone(),
            kind,
            path,
            options: DownloadOptions::default(),
            time_range: None,
            outcome: TransferOutcome::Completed { bytes: 8 },
        }
    }

    #[tokio::test]
    async fn test_merges_after_both_siblings() {
        let dir = TempDir::new().unwrap();
        let key = JobKey::new(dir.path(), "clip");
        let job_id = Uuid::new_v4();
        let muxer = Arc::new(FakeMuxer::default());
        let (pipeline, export) = pipeline(muxer.clone());
        let rx = export.registry().subscribe(&key);

        let video = completed(&key, job_id, Kind::VideoOnly, "mp4").await;
        pipeline.handle(video.clone()).await;
        assert!(muxer.merges.lock().is_empty());

        let audio = completed(&key, job_id, Kind::AudioOnly, "m4a").await;
        pipeline.handle(audio.clone()).await;

        let merged = dir.path().join("clip.mp4");
        assert_eq!(rx.await.unwrap().unwrap(), merged);
        assert_eq!(muxer.merges.lock().len(), 1);
        assert!(merged.exists());
        assert!(!video.path.exists());
        assert!(!audio.path.exists());
    }

    #[tokio::test]
    async fn test_sibling_found_on_disk() {
        let dir = TempDir::new().unwrap();
        let key = JobKey::new(dir.path(), "clip");
        let muxer = Arc::new(FakeMuxer::default());
        let (pipeline, _export) = pipeline(muxer.clone());

        tokio::fs::write(dir.path().join("clip-videoOnly.webm.part"), b"partial")
            .await
            .unwrap();
        let audio = completed(&key, Uuid::new_v4(), Kind::AudioOnly, "m4a").await;
        pipeline.handle(audio.clone()).await;
        assert!(muxer.merges.lock().is_empty());

        tokio::fs::write(dir.path().join("clip-videoOnly.webm"), b"video")
            .await
            .unwrap();
        pipeline.handle(audio).await;
        let merges = muxer.merges.lock();
        assert_eq!(merges.len(), 1);
        assert_eq!(merges[0].video, dir.path().join("clip-videoOnly.webm"));
    }

    #[tokio::test]
    async fn test_transcode_then_merge() {
        let dir = TempDir::new().unwrap();
        let key = JobKey::new(dir.path(), "clip");
        let job_id = Uuid::new_v4();
        let muxer = Arc::new(FakeMuxer::default());
        let (pipeline, _export) = pipeline(muxer.clone());

        let other = completed(&key, job_id, Kind::OtherVideo, "webm").await;
        pipeline.handle(other.clone()).await;
        pipeline
            .handle(completed(&key, job_id, Kind::AudioOnly, "m4a").await)
            .await;

        assert_eq!(muxer.transcodes.lock().len(), 1);
        let merges = muxer.merges.lock();
        assert_eq!(merges.len(), 1);
        assert_eq!(merges[0].video, dir.path().join("clip-videoOnly.mp4"));
        assert!(!other.path.exists());
    }

    #[tokio::test]
    async fn test_transcode_failure_keeps_original_and_skips_merge() {
        let dir = TempDir::new().unwrap();
        let key = JobKey::new(dir.path(), "clip");
        let muxer = Arc::new(FakeMuxer {
            fail_transcode: true,
            ..Default::default()
        });
        let (pipeline, export) = pipeline(muxer.clone());
        let rx = export.registry().subscribe(&key);

        let other = completed(&key, Uuid::new_v4(), Kind::OtherVideo, "webm").await;
        pipeline.handle(other.clone()).await;

        let failure = rx.await.unwrap().unwrap_err();
        assert_eq!(failure.kind, FailureKind::Pipeline);
        assert!(muxer.merges.lock().is_empty());
        assert!(other.path.exists());
    }

    #[tokio::test]
    async fn test_merge_failure_keeps_inputs_and_removes_output() {
        let dir = TempDir::new().unwrap();
        let key = JobKey::new(dir.path(), "clip");
        let job_id = Uuid::new_v4();
        let muxer = Arc::new(FakeMuxer {
            fail_merge: true,
            ..Default::default()
        });
        let (pipeline, export) = pipeline(muxer.clone());
        let rx = export.registry().subscribe(&key);

        let video = completed(&key, job_id, Kind::VideoOnly, "mp4").await;
        pipeline.handle(video.clone()).await;
        let audio = completed(&key, job_id, Kind::AudioOnly, "m4a").await;
        pipeline.handle(audio.clone()).await;

        let failure = rx.await.unwrap().unwrap_err();
        assert_eq!(failure.kind, FailureKind::Pipeline);
        assert_eq!(muxer.merges.lock().len(), 1);
        assert!(video.path.exists());
        assert!(audio.path.exists());
        assert!(!dir.path().join("clip.mp4").exists());
    }

    #[tokio::test]
    async fn test_no_remux_exports_elementary_file() {
        let dir = TempDir::new().unwrap();
        let key = JobKey::new(dir.path(), "clip");
        let muxer = Arc::new(FakeMuxer::default());
        let (pipeline, export) = pipeline(muxer.clone());
        let rx = export.registry().subscribe(&key);

        let mut audio = completed(&key, Uuid::new_v4(), Kind::AudioOnly, "m4a").await;
        audio.options = DownloadOptions::NO_REMUX;
        pipeline.handle(audio.clone()).await;

        assert_eq!(rx.await.unwrap().unwrap(), audio.path);
        assert!(muxer.merges.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failed_transfer_is_reported() {
        let dir = TempDir::new().unwrap();
        let key = JobKey::new(dir.path(), "clip");
        let (pipeline, export) = pipeline(Arc::new(FakeMuxer::default()));
        let rx = export.registry().subscribe(&key);

        let mut event = completed(&key, Uuid::new_v4(), Kind::VideoOnly, "mp4").await;
        event.outcome = TransferOutcome::Failed(DownloadFailure::canceled());
        pipeline.handle(event).await;

        assert_eq!(rx.await.unwrap().unwrap_err().kind, FailureKind::Canceled);
    }
}
