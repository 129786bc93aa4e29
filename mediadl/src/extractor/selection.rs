use std::path::PathBuf;

use crate::media::{MediaInfo, StreamDescriptor};
use crate::queue::TrimRange;

/// What the caller decided to download for one item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    /// Streams to fetch, most preferred first. Empty aborts the download.
    pub descriptors: Vec<StreamDescriptor>,
    /// Overrides the configured downloads directory.
    pub directory: Option<PathBuf>,
    pub time_range: Option<TrimRange>,
}

impl Selection {
    pub fn new(descriptors: Vec<StreamDescriptor>) -> Self {
        Self {
            descriptors,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// Narrows resolved metadata to the streams of one job.
pub trait SelectionPolicy: Send + Sync {
    fn select(&self, info: &MediaInfo) -> Selection;
}

impl<F> SelectionPolicy for F
where
    F: Fn(&MediaInfo) -> Selection + Send + Sync,
{
    fn select(&self, info: &MediaInfo) -> Selection {
        self(info)
    }
}

/// Takes the service's own picks, or the first offered format when it made none.
#[derive(Debug, Clone, Default)]
pub struct DefaultSelection {
    pub directory: Option<PathBuf>,
    pub time_range: Option<TrimRange>,
}

impl SelectionPolicy for DefaultSelection {
    fn select(&self, info: &MediaInfo) -> Selection {
        let descriptors = if info.requested.is_empty() {
            info.formats.iter().take(1).cloned().collect()
        } else {
            info.requested.clone()
        };
        Selection {
            descriptors,
            directory: self.directory.clone(),
            time_range: self.time_range,
        }
    }
}

/// Picks explicit format ids, in the order given. Unknown ids are skipped.
#[derive(Debug, Clone, Default)]
pub struct FormatIdSelection {
    pub format_ids: Vec<String>,
    pub directory: Option<PathBuf>,
    pub time_range: Option<TrimRange>,
}

impl FormatIdSelection {
    pub fn new<I, S>(format_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            format_ids: format_ids.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

impl SelectionPolicy for FormatIdSelection {
    fn select(&self, info: &MediaInfo) -> Selection {
        Selection {
            descriptors: self
                .format_ids
                .iter()
                .filter_map(|id| info.find_format(id).cloned())
                .collect(),
            directory: self.directory.clone(),
            time_range: self.time_range,
        }
    }
}
