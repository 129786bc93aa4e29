use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::DownloadOptions;
use crate::media::StreamDescriptor;

/// Trim window in seconds, applied when the output is produced by ffmpeg.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrimRange {
    pub start: f64,
    pub end: f64,
}

impl TrimRange {
    /// Returns `None` for empty, inverted or negative ranges.
    pub fn new(start: f64, end: f64) -> Option<Self> {
        let range = Self { start, end };
        range.is_valid().then_some(range)
    }

    /// Fields are public, so ranges built by hand or read back from disk go through this.
    pub fn is_valid(&self) -> bool {
        self.start.is_finite() && self.end.is_finite() && self.start >= 0.0 && self.end > self.start
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Identity of a logical title: all files of a job share directory and title.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub directory: PathBuf,
    pub title: String,
}

impl JobKey {
    pub fn new(directory: impl Into<PathBuf>, title: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            title: title.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.directory.join(&self.title).display())
    }
}

/// One logical download waiting in the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingDownload {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// Remaining streams, most preferred first.
    pub formats: Vec<StreamDescriptor>,
    pub directory: PathBuf,
    /// Already sanitized.
    pub title: String,
    #[serde(default)]
    pub options: DownloadOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TrimRange>,
}

impl PendingDownload {
    pub fn new(
        formats: Vec<StreamDescriptor>,
        directory: impl Into<PathBuf>,
        title: impl Into<String>,
        options: DownloadOptions,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            formats,
            directory: directory.into(),
            title: title.into(),
            options,
            time_range: None,
        }
    }

    pub fn with_time_range(mut self, time_range: Option<TrimRange>) -> Self {
        self.time_range = time_range;
        self
    }

    pub fn key(&self) -> JobKey {
        JobKey::new(self.directory.clone(), self.title.clone())
    }
}
