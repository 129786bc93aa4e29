#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    extract::{Path as UrlPath, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use parking_lot::Mutex;

use mediadl::config::AppConfig;
use mediadl::downloader::ProgressHandle;
use mediadl::export::{AssetStore, Notifier};
use mediadl::extractor::MediaResolver;
use mediadl::media::MediaInfo;
use mediadl::pipeline::{MediaMuxer, MergeJob, TranscodeJob};
use mediadl::{Error, MediaDownloader, Result};

/// Serves `/media/{len}` bodies of `len` bytes and records every request.
#[derive(Clone, Default)]
pub struct Upstream {
    pub requests: Arc<Mutex<Vec<(String, Option<String>)>>>,
}

impl Upstream {
    pub fn ranges_for(&self, path: &str) -> Vec<Option<String>> {
        self.requests
            .lock()
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, r)| r.clone())
            .collect()
    }
}

fn body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

async fn serve(
    State(up): State<Upstream>,
    UrlPath(len): UrlPath<usize>,
    headers: HeaderMap,
) -> Response {
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    up.requests.lock().push((format!("/media/{len}"), range.clone()));

    let body = body(len);
    let Some(range) = range else {
        return (StatusCode::OK, body).into_response();
    };
    let bounds = range.trim_start_matches("bytes=");
    let Some((start, end)) = bounds.split_once('-') else {
        return StatusCode::RANGE_NOT_SATISFIABLE.into_response();
    };
    let start: usize = start.parse().unwrap();
    let end: usize = end.parse::<usize>().unwrap().min(len - 1);
    (
        StatusCode::PARTIAL_CONTENT,
        [(header::CONTENT_RANGE, format!("bytes {start}-{end}/{len}"))],
        body[start..=end].to_vec(),
    )
        .into_response()
}

pub async fn spawn_upstream() -> (SocketAddr, Upstream) {
    let up = Upstream::default();
    let app = Router::new()
        .route("/media/{len}", get(serve))
        .with_state(up.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, up)
}

/// Returns a fixed [`MediaInfo`] for every URL.
pub struct FakeResolver {
    pub info: MediaInfo,
    pub available: bool,
}

#[async_trait]
impl MediaResolver for FakeResolver {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn probe(&self) -> Result<String> {
        if self.available {
            Ok("fake 1.0".to_string())
        } else {
            Err(Error::ServiceUnavailable("fake resolver offline".into()))
        }
    }

    async fn resolve(&self, _url: &str) -> Result<MediaInfo> {
        Ok(self.info.clone())
    }
}

#[derive(Default)]
pub struct FakeMuxer {
    pub merges: Mutex<Vec<MergeJob>>,
    pub transcodes: Mutex<Vec<TranscodeJob>>,
    pub fail_transcode: bool,
}

#[async_trait]
impl MediaMuxer for FakeMuxer {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn merge(&self, job: &MergeJob, _progress: &ProgressHandle) -> Result<()> {
        self.merges.lock().push(job.clone());
        tokio::fs::write(&job.output, b"merged").await?;
        Ok(())
    }

    async fn transcode(&self, job: &TranscodeJob, _progress: &ProgressHandle) -> Result<()> {
        self.transcodes.lock().push(job.clone());
        if self.fail_transcode {
            return Err(Error::pipeline("encoder rejected input"));
        }
        tokio::fs::write(&job.output, b"transcoded").await?;
        Ok(())
    }
}

/// Asset store and notifier that only record what they were given.
#[derive(Default)]
pub struct Recorder {
    pub exported: Mutex<Vec<PathBuf>>,
    pub notes: Mutex<Vec<String>>,
}

#[async_trait]
impl AssetStore for Recorder {
    fn name(&self) -> &'static str {
        "recorder"
    }

    async fn register(&self, path: &Path) -> Result<()> {
        self.exported.lock().push(path.to_path_buf());
        Ok(())
    }
}

#[async_trait]
impl Notifier for Recorder {
    async fn notify(&self, body: &str, _identifier: &str) -> Result<()> {
        self.notes.lock().push(body.to_string());
        Ok(())
    }
}

pub fn config(downloads: &Path) -> AppConfig {
    AppConfig {
        downloads_dir: downloads.to_path_buf(),
        ..Default::default()
    }
}

pub async fn downloader(
    downloads: &Path,
    info: MediaInfo,
    muxer: Arc<FakeMuxer>,
    recorder: Arc<Recorder>,
) -> MediaDownloader {
    MediaDownloader::builder(config(downloads))
        .with_resolver(Arc::new(FakeResolver {
            info,
            available: true,
        }))
        .with_muxer(muxer)
        .with_asset_store(recorder.clone())
        .with_notifier(recorder)
        .build()
        .await
        .unwrap()
}
