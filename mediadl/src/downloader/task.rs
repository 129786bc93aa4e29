use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::media::{Kind, TranscodePolicy};
use crate::queue::{DownloadOptions, JobKey, QueuedDescriptor, TrimRange};
use crate::Result;

/// Inclusive byte range, as sent in a `Range` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Range covering a whole resource of `size` bytes.
    pub fn whole(size: u64) -> Option<Self> {
        (size > 0).then(|| Self {
            start: 0,
            end: size - 1,
        })
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub range: Option<ByteRange>,
}

/// One transfer, alive from dequeue until completion or cancellation.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub id: Uuid,
    pub job_id: Uuid,
    pub key: JobKey,
    pub kind: Kind,
    pub request: TransferRequest,
    /// `directory/title-kind.ext`
    pub destination: PathBuf,
    pub expected_size: Option<u64>,
    pub options: DownloadOptions,
    pub time_range: Option<TrimRange>,
    pub cancel: CancellationToken,
}

impl DownloadTask {
    /// Validate a dequeued descriptor and turn it into a task.
    pub fn prepare(queued: &QueuedDescriptor, policy: &TranscodePolicy) -> Result<Self> {
        let descriptor = &queued.descriptor;
        let url = descriptor.request_url()?;
        let kind = effective_kind(queued, policy);

        let range = if queued.options.contains(DownloadOptions::CHUNKED) {
            descriptor.filesize.and_then(ByteRange::whole)
        } else {
            None
        };

        Ok(Self {
            id: Uuid::new_v4(),
            job_id: queued.job_id,
            key: queued.key.clone(),
            kind,
            request: TransferRequest {
                url,
                headers: descriptor
                    .http_headers
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                range,
            },
            destination: kind.destination(&queued.key.directory, &queued.key.title, &descriptor.ext),
            expected_size: descriptor.filesize,
            options: queued.options,
            time_range: queued.time_range,
            cancel: CancellationToken::new(),
        })
    }

    pub fn file_name(&self) -> String {
        self.destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Kind used for naming and dispatch; NO_TRANSCODE turns otherVideo into videoOnly.
pub fn effective_kind(queued: &QueuedDescriptor, policy: &TranscodePolicy) -> Kind {
    match policy.classify(&queued.descriptor) {
        Kind::OtherVideo if queued.options.contains(DownloadOptions::NO_TRANSCODE) => {
            Kind::VideoOnly
        }
        kind => kind,
    }
}
