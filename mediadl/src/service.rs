//! [`MediaDownloader`]: resolve, select, queue, transfer, merge, export.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::downloader::{
    HttpEngine, ProgressHandle, ProgressSnapshot, Scheduler, SchedulerHandle, StartOutcome,
    TransferEngine,
};
use crate::export::{
    AssetStore, CompletionReceiver, DirectoryAssetStore, ExportSink, LogNotifier, Notifier,
};
use crate::extractor::{MediaResolver, SelectionPolicy, YtDlpResolver};
use crate::media::MediaInfo;
use crate::pipeline::{FfmpegMuxer, MediaMuxer, MergePipeline};
use crate::queue::{DownloadOptions, JobKey, PendingDownload, PendingQueue};
use crate::utils::fs;
use crate::{Error, Result};

/// Buffered completion events between the scheduler and the pipeline.
const EVENT_CHANNEL_CAPACITY: usize = 32;

pub struct MediaDownloaderBuilder {
    config: AppConfig,
    resolver: Option<Arc<dyn MediaResolver>>,
    engine: Option<Arc<dyn TransferEngine>>,
    muxer: Option<Arc<dyn MediaMuxer>>,
    asset_store: Option<Arc<dyn AssetStore>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl MediaDownloaderBuilder {
    pub fn with_resolver(mut self, resolver: Arc<dyn MediaResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_engine(mut self, engine: Arc<dyn TransferEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_muxer(mut self, muxer: Arc<dyn MediaMuxer>) -> Self {
        self.muxer = Some(muxer);
        self
    }

    pub fn with_asset_store(mut self, store: Arc<dyn AssetStore>) -> Self {
        self.asset_store = Some(store);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Probe the extraction service, restore the pending queue and start the
    /// scheduler and pipeline tasks.
    ///
    /// A missing extraction service is the one fatal initialization error.
    /// Persisted work is not started until [`MediaDownloader::resume`].
    pub async fn build(self) -> Result<MediaDownloader> {
        let config = self.config;
        config.validate()?;

        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(YtDlpResolver::from_config(&config.tools)));
        resolver.probe().await?;

        let engine = match self.engine {
            Some(engine) => engine,
            None => Arc::new(HttpEngine::new(&config.transfer)?),
        };
        let muxer = self
            .muxer
            .unwrap_or_else(|| Arc::new(FfmpegMuxer::from_config(&config.tools, &config.pipeline)));
        let asset_store = self.asset_store.or_else(|| {
            config
                .library_dir
                .as_ref()
                .map(|dir| Arc::new(DirectoryAssetStore::new(dir)) as Arc<dyn AssetStore>)
        });
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(LogNotifier));

        fs::ensure_dir_all_with_op("creating downloads directory", &config.downloads_dir)
            .await?;
        let queue = PendingQueue::load(&config.downloads_dir).await;

        let shutdown = CancellationToken::new();
        let transfer_progress = ProgressHandle::new();
        let pipeline_progress = ProgressHandle::new();
        let export = Arc::new(ExportSink::new(asset_store, notifier));
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let pipeline = Arc::new(MergePipeline::new(
            muxer,
            export.clone(),
            config.pipeline.clone(),
            pipeline_progress.clone(),
        ));
        let pipeline_task = pipeline.spawn(events_rx, shutdown.child_token());

        let scheduler = Scheduler::new(
            queue,
            engine,
            transfer_progress.clone(),
            events_tx,
            config.transcode_policy.clone(),
        );
        let (scheduler, scheduler_task) = scheduler.spawn(shutdown.child_token());

        info!(
            downloads_dir = %config.downloads_dir.display(),
            resolver = resolver.name(),
            "Media downloader ready"
        );

        Ok(MediaDownloader {
            config,
            resolver,
            scheduler,
            export,
            transfer_progress,
            pipeline_progress,
            shutdown,
            tasks: Mutex::new(vec![scheduler_task, pipeline_task]),
        })
    }
}

/// Entry point for callers: one instance per downloads directory.
pub struct MediaDownloader {
    config: AppConfig,
    resolver: Arc<dyn MediaResolver>,
    scheduler: SchedulerHandle,
    export: Arc<ExportSink>,
    transfer_progress: ProgressHandle,
    pipeline_progress: ProgressHandle,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MediaDownloader {
    pub fn builder(config: AppConfig) -> MediaDownloaderBuilder {
        MediaDownloaderBuilder {
            config,
            resolver: None,
            engine: None,
            muxer: None,
            asset_store: None,
            notifier: None,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Options used when the caller has no preference.
    pub fn default_options(&self) -> DownloadOptions {
        self.config.default_options()
    }

    pub async fn resolve(&self, url: &str) -> Result<MediaInfo> {
        self.resolver.resolve(url).await
    }

    /// Resolve `url`, select streams, queue them and wait for the finished file.
    pub async fn download<P>(&self, url: &str, options: DownloadOptions, policy: &P) -> Result<PathBuf>
    where
        P: SelectionPolicy + ?Sized,
    {
        let info = self.resolve(url).await?;
        self.download_info(&info, options, policy).await
    }

    /// Like [`download`](Self::download) for already resolved metadata.
    pub async fn download_info<P>(
        &self,
        info: &MediaInfo,
        options: DownloadOptions,
        policy: &P,
    ) -> Result<PathBuf>
    where
        P: SelectionPolicy + ?Sized,
    {
        let job = self.prepare_job(info, options, policy)?;
        let key = job.key();
        let completion = self.watch_completion(&key);

        self.scheduler.enqueue(job).await?;
        self.kick().await;
        Self::await_completion(completion).await
    }

    /// Queue a download without waiting for it.
    pub async fn enqueue<P>(&self, info: &MediaInfo, options: DownloadOptions, policy: &P) -> Result<JobKey>
    where
        P: SelectionPolicy + ?Sized,
    {
        let job = self.prepare_job(info, options, policy)?;
        let key = job.key();
        self.scheduler.enqueue(job).await?;
        self.kick().await;
        Ok(key)
    }

    /// Start work restored from the queue file.
    pub async fn resume(&self) -> Result<StartOutcome> {
        let outcome = self.scheduler.start().await?;
        debug!(?outcome, "Resume requested");
        Ok(outcome)
    }

    /// Cancel the active transfer. The job it belongs to is dropped.
    pub async fn cancel(&self) -> Result<bool> {
        self.scheduler.cancel().await
    }

    pub async fn pending(&self) -> Result<Vec<PendingDownload>> {
        self.scheduler.jobs().await
    }

    pub fn transfer_progress(&self) -> watch::Receiver<ProgressSnapshot> {
        self.transfer_progress.subscribe()
    }

    pub fn pipeline_progress(&self) -> watch::Receiver<ProgressSnapshot> {
        self.pipeline_progress.subscribe()
    }

    /// Register interest in a title's result. Subscribe before the work starts.
    pub fn watch_completion(&self, key: &JobKey) -> CompletionReceiver {
        self.export.registry().subscribe(key)
    }

    pub async fn await_completion(completion: CompletionReceiver) -> Result<PathBuf> {
        match completion.await {
            Ok(Ok(path)) => Ok(path),
            Ok(Err(failure)) => Err(failure.into()),
            Err(_) => Err(Error::Other(
                "downloader stopped before the download finished".to_string(),
            )),
        }
    }

    /// Stop the scheduler and pipeline, cancelling any active transfer.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        info!("Media downloader stopped");
    }

    fn prepare_job<P>(&self, info: &MediaInfo, options: DownloadOptions, policy: &P) -> Result<PendingDownload>
    where
        P: SelectionPolicy + ?Sized,
    {
        let selection = policy.select(info);
        if selection.is_empty() {
            info!(title = %info.title, "Selection returned no streams, nothing queued");
            return Err(Error::SelectionCanceled);
        }
        if let Some(range) = selection.time_range
            && !range.is_valid()
        {
            return Err(Error::config(format!(
                "invalid trim range {}..{}: end must be after a non-negative start",
                range.start, range.end
            )));
        }

        let directory = selection
            .directory
            .unwrap_or_else(|| self.config.downloads_dir.clone());
        Ok(PendingDownload::new(selection.descriptors, directory, info.safe_title(), options)
            .with_time_range(selection.time_range))
    }

    /// Start the scheduler. Errors here belong to whichever job was dequeued
    /// and reach that job's waiters through the pipeline.
    async fn kick(&self) {
        if let Err(e) = self.scheduler.start().await {
            warn!(error = %e, "Scheduler start reported an error");
        }
    }
}

impl Drop for MediaDownloader {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
