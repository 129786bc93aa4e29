use serde::{Deserialize, Serialize};

use super::StreamDescriptor;
use crate::utils::filename::sanitize_title;

/// Metadata about one source item plus the streams the extraction service offers.
///
/// Only lives for the duration of selection; never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploader: Option<String>,
    /// Duration in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webpage_url: Option<String>,
    /// The service's ranked picks, most preferred first.
    #[serde(default)]
    pub requested: Vec<StreamDescriptor>,
    /// Every stream the service knows about.
    #[serde(default)]
    pub formats: Vec<StreamDescriptor>,
}

impl MediaInfo {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_requested(mut self, requested: Vec<StreamDescriptor>) -> Self {
        self.requested = requested;
        self
    }

    /// Title usable as a filename stem.
    pub fn safe_title(&self) -> String {
        sanitize_title(&self.title)
    }

    pub fn find_format(&self, format_id: &str) -> Option<&StreamDescriptor> {
        self.formats
            .iter()
            .chain(self.requested.iter())
            .find(|f| f.format_id == format_id)
    }
}
