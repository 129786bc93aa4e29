//! Stream descriptor model and classification.

mod classify;
mod descriptor;
mod info;
mod kind;

pub use classify::{TranscodePolicy, classify, classify_with, needs_remux, needs_transcode};
pub use descriptor::{DownloaderOptions, NO_CODEC, StreamDescriptor, UNKNOWN_CODEC};
pub use info::MediaInfo;
pub use kind::{KIND_SEPARATOR, Kind};
