//! Merge/transcode pipeline driven by transfer completion events.

mod coordinator;
mod ffmpeg;
mod muxer;

pub use coordinator::MergePipeline;
pub use ffmpeg::{FfmpegMuxer, parse_duration_line, parse_out_time, parse_time};
pub use muxer::{MediaMuxer, MergeJob, TranscodeJob};
