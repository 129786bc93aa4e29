//! Single-flight download scheduler.
//!
//! The scheduler is an actor owning the [`PendingQueue`] and the one active
//! transfer slot. Everything else talks to it through a [`SchedulerHandle`],
//! so the "is a transfer running" flag and the queue are never shared.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::engine::TransferEngine;
use super::events::{CompletionEvent, TransferOutcome};
use super::progress::ProgressHandle;
use super::task::{DownloadTask, effective_kind};
use crate::error::DownloadFailure;
use crate::media::{Kind, TranscodePolicy};
use crate::queue::{DownloadOptions, JobKey, PendingDownload, PendingQueue, QueuedDescriptor, TrimRange};
use crate::{Error, Result};

const MAILBOX_CAPACITY: usize = 64;

/// Result of asking the scheduler to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new transfer was started.
    Started,
    /// A transfer was already running; nothing changed.
    AlreadyActive,
    /// The queue is empty.
    Idle,
}

/// Summary of the transfer currently running.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveTransfer {
    pub task_id: Uuid,
    pub job_id: Uuid,
    pub key: JobKey,
    pub kind: Kind,
    pub path: PathBuf,
}

#[derive(Debug)]
enum SchedulerMessage {
    Enqueue {
        job: PendingDownload,
        reply: oneshot::Sender<()>,
    },
    Start(oneshot::Sender<Result<StartOutcome>>),
    Cancel(oneshot::Sender<bool>),
    GetJobs(oneshot::Sender<Vec<PendingDownload>>),
    GetActive(oneshot::Sender<Option<ActiveTransfer>>),
    /// Sent by the transfer task itself.
    TransferEnded {
        task_id: Uuid,
        outcome: TransferOutcome,
    },
}

/// Cloneable handle to the scheduler actor.
#[derive(Clone)]
pub struct SchedulerHandle {
    mailbox: mpsc::Sender<SchedulerMessage>,
}

impl SchedulerHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SchedulerMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.mailbox
            .send(build(tx))
            .await
            .map_err(|_| Error::Other("scheduler has stopped".to_string()))?;
        rx.await
            .map_err(|_| Error::Other("scheduler dropped the request".to_string()))
    }

    /// Append a job to the queue. Does not start it.
    pub async fn enqueue(&self, job: PendingDownload) -> Result<()> {
        self.request(|reply| SchedulerMessage::Enqueue { job, reply })
            .await
    }

    /// Start the next transfer unless one is already running.
    ///
    /// Returns [`Error::InvalidDescriptor`] when a dequeued descriptor had no
    /// usable URL; that job is failed and dropped, and the scheduler still
    /// moves on to the following job.
    pub async fn start(&self) -> Result<StartOutcome> {
        self.request(SchedulerMessage::Start).await?
    }

    /// Cancel the active transfer. Returns whether one was running.
    pub async fn cancel(&self) -> Result<bool> {
        self.request(SchedulerMessage::Cancel).await
    }

    pub async fn jobs(&self) -> Result<Vec<PendingDownload>> {
        self.request(SchedulerMessage::GetJobs).await
    }

    pub async fn active(&self) -> Result<Option<ActiveTransfer>> {
        self.request(SchedulerMessage::GetActive).await
    }

    pub async fn is_transferring(&self) -> Result<bool> {
        Ok(self.active().await?.is_some())
    }
}

struct RunningTransfer {
    summary: ActiveTransfer,
    options: DownloadOptions,
    time_range: Option<TrimRange>,
    cancel: CancellationToken,
}

pub struct Scheduler {
    queue: PendingQueue,
    active: Option<RunningTransfer>,
    engine: Arc<dyn TransferEngine>,
    progress: ProgressHandle,
    events: mpsc::Sender<CompletionEvent>,
    policy: TranscodePolicy,
}

impl Scheduler {
    pub fn new(
        queue: PendingQueue,
        engine: Arc<dyn TransferEngine>,
        progress: ProgressHandle,
        events: mpsc::Sender<CompletionEvent>,
        policy: TranscodePolicy,
    ) -> Self {
        Self {
            queue,
            active: None,
            engine,
            progress,
            events,
            policy,
        }
    }

    /// Spawn the actor loop. It stops when `shutdown` fires or every handle is dropped.
    pub fn spawn(self, shutdown: CancellationToken) -> (SchedulerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let handle = SchedulerHandle { mailbox: tx.clone() };
        let join = tokio::spawn(self.run(rx, tx.downgrade(), shutdown));
        (handle, join)
    }

    async fn run(
        mut self,
        mut mailbox: mpsc::Receiver<SchedulerMessage>,
        self_tx: mpsc::WeakSender<SchedulerMessage>,
        shutdown: CancellationToken,
    ) {
        info!(pending = self.queue.len(), engine = self.engine.name(), "Scheduler started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    if let Some(active) = &self.active {
                        active.cancel.cancel();
                    }
                    break;
                }
                msg = mailbox.recv() => {
                    let Some(msg) = msg else { break };
                    self.handle_message(msg, &self_tx).await;
                }
            }
        }
        debug!("Scheduler stopped");
    }

    async fn handle_message(
        &mut self,
        msg: SchedulerMessage,
        self_tx: &mpsc::WeakSender<SchedulerMessage>,
    ) {
        match msg {
            SchedulerMessage::Enqueue { job, reply } => {
                self.queue.enqueue(job).await;
                let _ = reply.send(());
            }
            SchedulerMessage::Start(reply) => {
                let result = self.start_next(self_tx).await;
                let _ = reply.send(result);
            }
            SchedulerMessage::Cancel(reply) => {
                let cancelled = match &self.active {
                    Some(active) => {
                        info!(key = %active.summary.key, "Cancelling active transfer");
                        active.cancel.cancel();
                        true
                    }
                    None => false,
                };
                let _ = reply.send(cancelled);
            }
            SchedulerMessage::GetJobs(reply) => {
                let _ = reply.send(self.queue.jobs().cloned().collect());
            }
            SchedulerMessage::GetActive(reply) => {
                let _ = reply.send(self.active.as_ref().map(|a| a.summary.clone()));
            }
            SchedulerMessage::TransferEnded { task_id, outcome } => {
                self.on_transfer_ended(task_id, outcome, self_tx).await;
            }
        }
    }

    async fn start_next(
        &mut self,
        self_tx: &mpsc::WeakSender<SchedulerMessage>,
    ) -> Result<StartOutcome> {
        if self.active.is_some() {
            return Ok(StartOutcome::AlreadyActive);
        }

        let mut first_error = None;
        while let Some(queued) = self.queue.pop_next_descriptor().await {
            match DownloadTask::prepare(&queued, &self.policy) {
                Ok(task) => {
                    self.launch(task, self_tx);
                    return match first_error {
                        Some(err) => Err(err),
                        None => Ok(StartOutcome::Started),
                    };
                }
                Err(err) => {
                    error!(
                        key = %queued.key,
                        format_id = %queued.descriptor.format_id,
                        error = %err,
                        "Invalid descriptor, dropping job"
                    );
                    self.fail_unstarted(&queued, &err).await;
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(StartOutcome::Idle),
        }
    }

    /// Report a descriptor that never became a transfer and drop the rest of its job.
    async fn fail_unstarted(&mut self, queued: &QueuedDescriptor, err: &Error) {
        self.queue.drop_job(queued.job_id).await;

        let kind = effective_kind(queued, &self.policy);
        let event = CompletionEvent {
            job_id: queued.job_id,
            key: queued.key.clone(),
            kind,
            path: kind.destination(&queued.key.directory, &queued.key.title, &queued.descriptor.ext),
            options: queued.options,
            time_range: queued.time_range,
            outcome: TransferOutcome::Failed(DownloadFailure::from(err)),
        };
        self.emit(event).await;
    }

    fn launch(&mut self, task: DownloadTask, self_tx: &mpsc::WeakSender<SchedulerMessage>) {
        let summary = ActiveTransfer {
            task_id: task.id,
            job_id: task.job_id,
            key: task.key.clone(),
            kind: task.kind,
            path: task.destination.clone(),
        };
        info!(key = %summary.key, kind = %summary.kind, path = %summary.path.display(), "Transfer started");

        self.active = Some(RunningTransfer {
            summary,
            options: task.options,
            time_range: task.time_range,
            cancel: task.cancel.clone(),
        });

        let engine = Arc::clone(&self.engine);
        let progress = self.progress.clone();
        let self_tx = self_tx.clone();
        tokio::spawn(async move {
            let outcome = match engine.fetch(&task, &progress).await {
                Ok(bytes) => TransferOutcome::Completed { bytes },
                Err(err) => {
                    if err.is_cancellation() {
                        info!(path = %task.destination.display(), "Transfer cancelled");
                    } else {
                        warn!(path = %task.destination.display(), error = %err, "Transfer failed");
                    }
                    TransferOutcome::Failed(DownloadFailure::from(&err))
                }
            };
            progress.finish();

            let Some(tx) = self_tx.upgrade() else {
                debug!("Scheduler gone before transfer result could be delivered");
                return;
            };
            let _ = tx
                .send(SchedulerMessage::TransferEnded {
                    task_id: task.id,
                    outcome,
                })
                .await;
        });
    }

    async fn on_transfer_ended(
        &mut self,
        task_id: Uuid,
        outcome: TransferOutcome,
        self_tx: &mpsc::WeakSender<SchedulerMessage>,
    ) {
        let Some(running) = self.active.take_if(|a| a.summary.task_id == task_id) else {
            warn!(%task_id, "Completion for unknown transfer ignored");
            return;
        };

        if let TransferOutcome::Failed(failure) = &outcome
            && self.queue.drop_job(running.summary.job_id).await
        {
            info!(key = %running.summary.key, reason = %failure, "Dropped remaining streams of failed job");
        }

        let ActiveTransfer {
            job_id,
            key,
            kind,
            path,
            ..
        } = running.summary;
        self.emit(CompletionEvent {
            job_id,
            key,
            kind,
            path,
            options: running.options,
            time_range: running.time_range,
            outcome,
        })
        .await;

        match self.start_next(self_tx).await {
            Ok(StartOutcome::Started) => {}
            Ok(_) => debug!("Queue drained"),
            Err(err) => warn!(error = %err, "Failed to start next transfer"),
        }
    }

    async fn emit(&self, event: CompletionEvent) {
        if self.events.send(event).await.is_err() {
            debug!("Completion event dropped: pipeline not running");
        }
    }
}
