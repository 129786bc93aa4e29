use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{DownloadOptions, JobKey, PendingDownload, TrimRange};
use crate::media::StreamDescriptor;
use crate::utils::fs;

/// File name of the persisted queue inside a downloads directory.
pub const QUEUE_FILE_NAME: &str = "PendingDownloads.json";

/// A descriptor taken off the front job, with the job context it belongs to.
#[derive(Debug, Clone)]
pub struct QueuedDescriptor {
    pub job_id: Uuid,
    pub key: JobKey,
    pub descriptor: StreamDescriptor,
    pub options: DownloadOptions,
    pub time_range: Option<TrimRange>,
    /// Descriptors still queued for the same job after this one.
    pub remaining: usize,
}

/// Ordered queue of pending downloads, mirrored to a JSON file.
///
/// Every mutation rewrites the whole file (write to `.tmp`, then rename), so
/// the file is the source of truth after a crash. Persistence failures are
/// logged and never surface to the caller.
#[derive(Debug)]
pub struct PendingQueue {
    path: PathBuf,
    jobs: VecDeque<PendingDownload>,
}

impl PendingQueue {
    /// Load the queue persisted in `downloads_dir`.
    ///
    /// A missing or unreadable file yields an empty queue.
    pub async fn load(downloads_dir: &Path) -> Self {
        let path = downloads_dir.join(QUEUE_FILE_NAME);
        let jobs = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<VecDeque<PendingDownload>>(&bytes) {
                Ok(jobs) => {
                    info!(path = %path.display(), jobs = jobs.len(), "Restored pending downloads");
                    jobs
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Pending queue file is corrupt, starting empty");
                    VecDeque::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No pending queue file");
                VecDeque::new()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read pending queue, starting empty");
                VecDeque::new()
            }
        };

        Self { path, jobs }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn jobs(&self) -> impl Iterator<Item = &PendingDownload> {
        self.jobs.iter()
    }

    /// Append a job and persist.
    pub async fn enqueue(&mut self, job: PendingDownload) {
        if job.formats.is_empty() {
            warn!(title = %job.title, "Refusing to enqueue a job without streams");
            return;
        }
        debug!(job_id = %job.id, title = %job.title, streams = job.formats.len(), "Enqueued download");
        self.jobs.push_back(job);
        self.save().await;
    }

    /// Earliest unfinished job.
    pub fn peek_front(&self) -> Option<&PendingDownload> {
        self.jobs.front()
    }

    /// Take the next descriptor of the front job and persist.
    ///
    /// The job is removed together with its last descriptor.
    pub async fn pop_next_descriptor(&mut self) -> Option<QueuedDescriptor> {
        loop {
            let job = self.jobs.front_mut()?;
            if job.formats.is_empty() {
                // Only reachable through a hand-edited queue file.
                self.jobs.pop_front();
                continue;
            }

            let descriptor = job.formats.remove(0);
            let queued = QueuedDescriptor {
                job_id: job.id,
                key: job.key(),
                descriptor,
                options: job.options,
                time_range: job.time_range,
                remaining: job.formats.len(),
            };
            if job.formats.is_empty() {
                self.jobs.pop_front();
            }
            self.save().await;
            return Some(queued);
        }
    }

    /// Remove whatever is left of job `id` and persist. Returns whether anything was removed.
    pub async fn drop_job(&mut self, id: Uuid) -> bool {
        let before = self.jobs.len();
        self.jobs.retain(|job| job.id != id);
        let removed = self.jobs.len() != before;
        if removed {
            self.save().await;
        }
        removed
    }

    /// Rewrite the persisted queue. Best effort.
    pub async fn save(&self) {
        let bytes = match serde_json::to_vec_pretty(&self.jobs) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Failed to serialize pending queue");
                return;
            }
        };
        if let Err(e) = fs::write_atomic(&self.path, &bytes).await {
            warn!(path = %self.path.display(), error = %e, "Failed to persist pending queue");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn stream(id: &str) -> StreamDescriptor {
        StreamDescriptor::new(id, "mp4", "avc1", "none", format!("https://cdn/{id}"))
            .with_filesize(1000)
            .with_header("Referer", "https://example.com")
    }

    fn job(dir: &Path, title: &str, ids: &[&str]) -> PendingDownload {
        PendingDownload::new(
            ids.iter().map(|id| stream(id)).collect(),
            dir,
            title,
            DownloadOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_round_trip_preserves_order() {
        let dir = TempDir::new().unwrap();
        let mut queue = PendingQueue::load(dir.path()).await;
        assert!(queue.is_empty());

        let jobs = vec![
            job(dir.path(), "first", &["1", "2", "3"]),
            job(dir.path(), "second", &["4"]).with_time_range(TrimRange::new(1.0, 9.5)),
            job(dir.path(), "third", &["5", "6"]),
        ];
        for j in jobs.clone() {
            queue.enqueue(j).await;
        }

        let reloaded = PendingQueue::load(dir.path()).await;
        let restored: Vec<PendingDownload> = reloaded.jobs().cloned().collect();
        assert_eq!(restored, jobs);
    }

    #[tokio::test]
    async fn test_pop_consumes_front_to_back() {
        let dir = TempDir::new().unwrap();
        let mut queue = PendingQueue::load(dir.path()).await;
        queue.enqueue(job(dir.path(), "a", &["1", "2"])).await;
        queue.enqueue(job(dir.path(), "b", &["3"])).await;

        let first = queue.pop_next_descriptor().await.unwrap();
        assert_eq!(first.descriptor.format_id, "1");
        assert_eq!(first.key.title, "a");
        assert_eq!(first.remaining, 1);
        assert_eq!(queue.len(), 2);

        let second = queue.pop_next_descriptor().await.unwrap();
        assert_eq!(second.descriptor.format_id, "2");
        assert_eq!(second.remaining, 0);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.peek_front().unwrap().title, "b");

        // Persisted state follows every pop.
        let reloaded = PendingQueue::load(dir.path()).await;
        assert_eq!(reloaded.len(), 1);

        let third = queue.pop_next_descriptor().await.unwrap();
        assert_eq!(third.key.title, "b");
        assert!(queue.pop_next_descriptor().await.is_none());
        assert!(PendingQueue::load(dir.path()).await.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(QUEUE_FILE_NAME);
        tokio::fs::write(&path, b"{ this is not json").await.unwrap();

        let queue = PendingQueue::load(dir.path()).await;
        assert!(queue.is_empty());
        // The corrupt file is left for inspection until the next mutation.
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"{ this is not json");
    }

    #[tokio::test]
    async fn test_drop_job_removes_remainder() {
        let dir = TempDir::new().unwrap();
        let mut queue = PendingQueue::load(dir.path()).await;
        let doomed = job(dir.path(), "doomed", &["1", "2"]);
        let doomed_id = doomed.id;
        queue.enqueue(doomed).await;
        queue.enqueue(job(dir.path(), "kept", &["3"])).await;

        queue.pop_next_descriptor().await.unwrap();
        assert!(queue.drop_job(doomed_id).await);
        assert!(!queue.drop_job(doomed_id).await);
        assert_eq!(queue.peek_front().unwrap().title, "kept");
    }

    #[tokio::test]
    async fn test_empty_job_is_not_enqueued() {
        let dir = TempDir::new().unwrap();
        let mut queue = PendingQueue::load(dir.path()).await;
        queue.enqueue(job(dir.path(), "empty", &[])).await;
        assert!(queue.is_empty());
        assert!(!dir.path().join(QUEUE_FILE_NAME).exists());
    }
}
