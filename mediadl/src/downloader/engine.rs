//! Transfer engines.

use std::io::SeekFrom;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::{Client, StatusCode};
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

use super::progress::{ProgressHandle, ProgressPhase};
use super::task::{ByteRange, DownloadTask};
use crate::config::TransferConfig;
use crate::queue::DownloadOptions;
use crate::utils::{fs, http_client};
use crate::{Error, Result};

/// Size of follow-up range requests, in bytes.
///
/// Matches the chunk boundary a major video CDN throttles on; must stay exactly this value.
pub const CHUNK_SIZE: u64 = 10_485_760;

/// Fetches one [`DownloadTask`] to its destination path.
#[async_trait]
pub trait TransferEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Download the task's resource and return the number of bytes written.
    ///
    /// On success the destination file exists and is complete; on failure or
    /// cancellation no file is left at the destination path.
    async fn fetch(&self, task: &DownloadTask, progress: &ProgressHandle) -> Result<u64>;
}

/// HTTP(S) engine backed by reqwest.
#[derive(Debug, Clone)]
pub struct HttpEngine {
    foreground: Client,
    background: Client,
    chunk_size: u64,
}

impl HttpEngine {
    pub fn new(config: &TransferConfig) -> Result<Self> {
        let connect_timeout = Duration::from_secs(config.connect_timeout_secs);
        let foreground = http_client::build_transfer_client(
            &config.user_agent,
            connect_timeout,
            Duration::from_secs(config.request_timeout_secs),
        )?;
        let background =
            http_client::build_transfer_client(&config.user_agent, connect_timeout, Duration::ZERO)?;

        Ok(Self {
            foreground,
            background,
            chunk_size: config.chunk_size.max(1),
        })
    }

    fn client_for(&self, options: DownloadOptions) -> &Client {
        if options.contains(DownloadOptions::BACKGROUND) {
            &self.background
        } else {
            &self.foreground
        }
    }

    async fn send(
        &self,
        task: &DownloadTask,
        range: Option<ByteRange>,
    ) -> Result<reqwest::Response> {
        let mut request = self
            .client_for(task.options)
            .get(task.request.url.clone());
        for (name, value) in &task.request.headers {
            request = request.header(name, value);
        }
        if let Some(range) = range {
            request = request.header(RANGE, range.header_value());
        }

        let response = tokio::select! {
            biased;
            _ = task.cancel.cancelled() => return Err(Error::TransferCancelled),
            response = request.send() => response?,
        };

        match response.status() {
            StatusCode::OK | StatusCode::PARTIAL_CONTENT => Ok(response),
            status => Err(Error::HttpStatus {
                status: status.as_u16(),
                url: task.request.url.to_string(),
            }),
        }
    }

    /// Stream the body(ies) into `writer`, issuing follow-up range requests
    /// when the server answers a ranged request with less than asked for.
    async fn transfer(
        &self,
        task: &DownloadTask,
        writer: &mut BufWriter<File>,
        part_path: &Path,
        progress: &ProgressHandle,
    ) -> Result<u64> {
        let overall = task.request.range;
        let mut range = overall;
        let mut written: u64 = 0;

        loop {
            let response = self.send(task, range).await?;
            let status = response.status();
            if status == StatusCode::PARTIAL_CONTENT
                && let Some(current) = range
                && let Some(start) = content_range_start(&response)
                && start != current.start
            {
                return Err(Error::Transfer(format!(
                    "asked for {} but server answered from byte {start}",
                    current.header_value()
                )));
            }
            if status == StatusCode::OK && written > 0 {
                debug!(discarded = written, "Server ignored the range, restarting from byte 0");
                rewind(writer, part_path).await?;
                written = 0;
            }
            if (range.is_none() || status == StatusCode::OK)
                && let Some(len) = response
                    .headers()
                    .get(CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
            {
                progress.set_total(len);
            }

            let mut body = response.bytes_stream();
            let mut received: u64 = 0;
            loop {
                let next = tokio::select! {
                    biased;
                    _ = task.cancel.cancelled() => return Err(Error::TransferCancelled),
                    next = body.next() => next,
                };
                let Some(chunk) = next else { break };
                let chunk = chunk?;
                writer
                    .write_all(&chunk)
                    .await
                    .map_err(|e| fs::io_error("writing", part_path, e))?;
                received += chunk.len() as u64;
                written += chunk.len() as u64;
                progress.advance_to(written);
            }

            let (Some(current), Some(overall)) = (range, overall) else {
                break;
            };
            if status == StatusCode::OK {
                // Range ignored, the full body was sent.
                break;
            }

            let next_start = current.start + received;
            if next_start > overall.end {
                break;
            }
            if received == 0 {
                return Err(Error::Transfer(format!(
                    "server stopped sending at byte {next_start} of {}",
                    overall.len()
                )));
            }
            let next = ByteRange {
                start: next_start,
                end: overall.end.min(next_start.saturating_add(self.chunk_size - 1)),
            };
            debug!(range = %next.header_value(), "Continuing ranged transfer");
            range = Some(next);
        }

        Ok(written)
    }
}

/// Start offset of a `Content-Range: bytes start-end/total` header.
fn content_range_start(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_RANGE)?
        .to_str()
        .ok()?
        .strip_prefix("bytes ")?
        .split_once('-')?
        .0
        .trim()
        .parse()
        .ok()
}

/// Discard everything written so far.
async fn rewind(writer: &mut BufWriter<File>, part_path: &Path) -> Result<()> {
    writer
        .flush()
        .await
        .map_err(|e| fs::io_error("flushing", part_path, e))?;
    let file = writer.get_mut();
    file.set_len(0)
        .await
        .map_err(|e| fs::io_error("truncating", part_path, e))?;
    file.seek(SeekFrom::Start(0))
        .await
        .map_err(|e| fs::io_error("rewinding", part_path, e))?;
    Ok(())
}

#[async_trait]
impl TransferEngine for HttpEngine {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn fetch(&self, task: &DownloadTask, progress: &ProgressHandle) -> Result<u64> {
        let destination = &task.destination;
        let part_path = fs::with_suffix(destination, ".part");

        fs::ensure_parent_dir(destination).await?;
        if fs::remove_file_if_exists(destination).await? {
            debug!(path = %destination.display(), "Removed existing file before transfer");
        }
        fs::remove_file_if_exists(&part_path).await?;

        let file = File::create(&part_path)
            .await
            .map_err(|e| fs::io_error("creating", &part_path, e))?;
        let mut writer = BufWriter::new(file);

        let total = task.request.range.map(|r| r.len()).or(task.expected_size);
        progress.begin(ProgressPhase::Downloading, task.file_name(), total);
        info!(
            url = %task.request.url,
            path = %destination.display(),
            kind = %task.kind,
            range = ?task.request.range.map(|r| r.header_value()),
            "Starting transfer"
        );

        let result = match self.transfer(task, &mut writer, &part_path, progress).await {
            Ok(bytes) => writer
                .flush()
                .await
                .map(|_| bytes)
                .map_err(|e| fs::io_error("flushing", &part_path, e)),
            Err(e) => Err(e),
        };
        drop(writer);

        match result {
            Ok(bytes) => {
                tokio::fs::rename(&part_path, destination)
                    .await
                    .map_err(|e| fs::io_error("renaming into", destination, e))?;
                info!(path = %destination.display(), bytes, "Transfer complete");
                Ok(bytes)
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_file_if_exists(&part_path).await {
                    warn!(error = %cleanup, "Failed to remove partial file");
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{StreamDescriptor, TranscodePolicy};
    use crate::queue::{JobKey, QueuedDescriptor};
    use axum::{
        Router,
        extract::State,
        http::{HeaderMap, StatusCode as AxumStatus, header},
        response::{IntoResponse, Response},
        routing::get,
    };
    use parking_lot::Mutex;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tempfile::TempDir;
    use uuid::Uuid;

    #[derive(Clone)]
    struct Upstream {
        body: Arc<Vec<u8>>,
        /// Maximum bytes served per ranged response.
        cap: Option<usize>,
        /// How ranged requests after the first one are answered.
        followup: Followup,
        seen: Arc<Mutex<Vec<HeaderMap>>>,
    }

    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Followup {
        Honor,
        /// 200 with the whole body.
        IgnoreRange,
        /// 206 starting from byte 0 regardless of the request.
        FromStart,
    }

    impl Upstream {
        fn new(len: usize, cap: Option<usize>) -> Self {
            Self {
                body: Arc::new((0..len).map(|i| (i % 251) as u8).collect()),
                cap,
                followup: Followup::Honor,
                seen: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn with_followup(mut self, followup: Followup) -> Self {
            self.followup = followup;
            self
        }

        fn ranges(&self) -> Vec<Option<String>> {
            self.seen
                .lock()
                .iter()
                .map(|h| {
                    h.get(header::RANGE)
                        .map(|v| v.to_str().unwrap().to_string())
                })
                .collect()
        }
    }

    async fn serve(State(up): State<Upstream>, headers: HeaderMap) -> Response {
        up.seen.lock().push(headers.clone());

        let Some(range) = headers.get(header::RANGE) else {
            return (AxumStatus::OK, up.body.as_ref().clone()).into_response();
        };
        let bounds = range.to_str().unwrap().trim_start_matches("bytes=");
        let (start, end) = bounds.split_once('-').unwrap();
        let mut start: usize = start.parse().unwrap();
        let end: usize = end.parse().unwrap();
        if start > 0 {
            match up.followup {
                Followup::Honor => {}
                Followup::IgnoreRange => {
                    return (AxumStatus::OK, up.body.as_ref().clone()).into_response();
                }
                Followup::FromStart => start = 0,
            }
        }
        let mut end = end.min(up.body.len() - 1);
        if let Some(cap) = up.cap {
            end = end.min(start + cap - 1);
        }
        let slice = up.body[start..=end].to_vec();
        (
            AxumStatus::PARTIAL_CONTENT,
            [(
                header::CONTENT_RANGE,
                format!("bytes {start}-{end}/{}", up.body.len()),
            )],
            slice,
        )
            .into_response()
    }

    async fn spawn_upstream(up: Upstream) -> SocketAddr {
        let app = Router::new()
            .route("/media", get(serve))
            .route("/missing", get(|| async { AxumStatus::NOT_FOUND }))
            .with_state(up);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn task(dir: &Path, url: String, filesize: Option<u64>, options: DownloadOptions) -> DownloadTask {
        let mut descriptor = StreamDescriptor::new("18", "mp4", "avc1", "mp4a", url)
            .with_header("X-Token", "secret");
        descriptor.filesize = filesize;
        let queued = QueuedDescriptor {
            job_id: Uuid::new_v4(),
            key: JobKey::new(dir, "clip"),
            descriptor,
            options,
            time_range: None,
            remaining: 0,
        };
        DownloadTask::prepare(&queued, &TranscodePolicy::default()).unwrap()
    }

    fn engine(chunk_size: u64) -> HttpEngine {
        HttpEngine::new(&TransferConfig {
            chunk_size,
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_whole_resource_without_range() {
        let up = Upstream::new(1000, None);
        let addr = spawn_upstream(up.clone()).await;
        let dir = TempDir::new().unwrap();
        let task = task(
            dir.path(),
            format!("http://{addr}/media"),
            Some(1000),
            DownloadOptions::BACKGROUND,
        );

        let progress = ProgressHandle::new();
        let bytes = engine(CHUNK_SIZE).fetch(&task, &progress).await.unwrap();

        assert_eq!(bytes, 1000);
        assert_eq!(tokio::fs::read(&task.destination).await.unwrap(), *up.body);
        assert!(!fs::with_suffix(&task.destination, ".part").exists());
        assert_eq!(up.ranges(), vec![None]);
        let seen = up.seen.lock();
        assert_eq!(seen[0].get("x-token").unwrap().to_str().unwrap(), "secret");
        assert_eq!(progress.snapshot().bytes_completed, 1000);
    }

    #[tokio::test]
    async fn test_chunked_requests_full_range() {
        let up = Upstream::new(5000, None);
        let addr = spawn_upstream(up.clone()).await;
        let dir = TempDir::new().unwrap();
        let task = task(
            dir.path(),
            format!("http://{addr}/media"),
            Some(5000),
            DownloadOptions::default(),
        );

        engine(CHUNK_SIZE)
            .fetch(&task, &ProgressHandle::new())
            .await
            .unwrap();

        assert_eq!(up.ranges(), vec![Some("bytes=0-4999".to_string())]);
        assert_eq!(tokio::fs::read(&task.destination).await.unwrap(), *up.body);
    }

    #[tokio::test]
    async fn test_short_ranged_response_continues_in_chunks() {
        let up = Upstream::new(5000, Some(1500));
        let addr = spawn_upstream(up.clone()).await;
        let dir = TempDir::new().unwrap();
        let task = task(
            dir.path(),
            format!("http://{addr}/media"),
            Some(5000),
            DownloadOptions::CHUNKED,
        );

        let bytes = engine(1000)
            .fetch(&task, &ProgressHandle::new())
            .await
            .unwrap();

        assert_eq!(bytes, 5000);
        assert_eq!(
            up.ranges(),
            vec![
                Some("bytes=0-4999".to_string()),
                Some("bytes=1500-2499".to_string()),
                Some("bytes=2500-3499".to_string()),
                Some("bytes=3500-4499".to_string()),
                Some("bytes=4500-4999".to_string()),
            ]
        );
        assert_eq!(tokio::fs::read(&task.destination).await.unwrap(), *up.body);
    }

    #[tokio::test]
    async fn test_followup_answered_with_full_body_restarts_file() {
        let up = Upstream::new(5000, Some(1500)).with_followup(Followup::IgnoreRange);
        let addr = spawn_upstream(up.clone()).await;
        let dir = TempDir::new().unwrap();
        let task = task(
            dir.path(),
            format!("http://{addr}/media"),
            Some(5000),
            DownloadOptions::CHUNKED,
        );

        let bytes = engine(CHUNK_SIZE)
            .fetch(&task, &ProgressHandle::new())
            .await
            .unwrap();

        assert_eq!(bytes, 5000);
        assert_eq!(
            up.ranges(),
            vec![
                Some("bytes=0-4999".to_string()),
                Some("bytes=1500-4999".to_string()),
            ]
        );
        assert_eq!(tokio::fs::read(&task.destination).await.unwrap(), *up.body);
    }

    #[tokio::test]
    async fn test_misaligned_content_range_is_rejected() {
        let up = Upstream::new(5000, Some(1500)).with_followup(Followup::FromStart);
        let addr = spawn_upstream(up.clone()).await;
        let dir = TempDir::new().unwrap();
        let task = task(
            dir.path(),
            format!("http://{addr}/media"),
            Some(5000),
            DownloadOptions::CHUNKED,
        );

        let err = engine(CHUNK_SIZE)
            .fetch(&task, &ProgressHandle::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Transfer(msg) if msg.contains("bytes=1500-4999")));
        assert!(!task.destination.exists());
        assert!(!fs::with_suffix(&task.destination, ".part").exists());
    }

    #[tokio::test]
    async fn test_huge_chunk_size_clamps_to_resource_end() {
        let up = Upstream::new(5000, Some(1500));
        let addr = spawn_upstream(up.clone()).await;
        let dir = TempDir::new().unwrap();
        let task = task(
            dir.path(),
            format!("http://{addr}/media"),
            Some(5000),
            DownloadOptions::CHUNKED,
        );

        engine(u64::MAX)
            .fetch(&task, &ProgressHandle::new())
            .await
            .unwrap();

        assert_eq!(
            up.ranges(),
            vec![
                Some("bytes=0-4999".to_string()),
                Some("bytes=1500-4999".to_string()),
                Some("bytes=3000-4999".to_string()),
                Some("bytes=4500-4999".to_string()),
            ]
        );
        assert_eq!(tokio::fs::read(&task.destination).await.unwrap(), *up.body);
    }

    #[tokio::test]
    async fn test_existing_file_is_replaced() {
        let up = Upstream::new(64, None);
        let addr = spawn_upstream(up.clone()).await;
        let dir = TempDir::new().unwrap();
        let task = task(
            dir.path(),
            format!("http://{addr}/media"),
            None,
            DownloadOptions::default(),
        );
        tokio::fs::write(&task.destination, b"stale partial data that is longer than the body, definitely longer")
            .await
            .unwrap();

        engine(CHUNK_SIZE)
            .fetch(&task, &ProgressHandle::new())
            .await
            .unwrap();
        assert_eq!(tokio::fs::read(&task.destination).await.unwrap(), *up.body);
    }

    #[tokio::test]
    async fn test_http_error_leaves_no_file() {
        let addr = spawn_upstream(Upstream::new(10, None)).await;
        let dir = TempDir::new().unwrap();
        let task = task(
            dir.path(),
            format!("http://{addr}/missing"),
            None,
            DownloadOptions::default(),
        );

        let err = engine(CHUNK_SIZE)
            .fetch(&task, &ProgressHandle::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HttpStatus { status: 404, .. }));
        assert!(!task.destination.exists());
        assert!(!fs::with_suffix(&task.destination, ".part").exists());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let up = Upstream::new(10, None);
        let addr = spawn_upstream(up.clone()).await;
        let dir = TempDir::new().unwrap();
        let task = task(
            dir.path(),
            format!("http://{addr}/media"),
            None,
            DownloadOptions::default(),
        );
        task.cancel.cancel();

        let err = engine(CHUNK_SIZE)
            .fetch(&task, &ProgressHandle::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TransferCancelled));
        assert!(!task.destination.exists());
        assert!(up.ranges().is_empty());
    }
}
