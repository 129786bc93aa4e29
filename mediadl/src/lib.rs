//! mediadl: queued, single-flight downloading of remote media streams with
//! merge and transcode of separately fetched video and audio.
//!
//! [`MediaDownloader`] is the entry point; the modules below are its parts
//! and can be swapped through the traits they define.

pub mod config;
pub mod downloader;
pub mod error;
pub mod export;
pub mod extractor;
pub mod logging;
pub mod media;
pub mod pipeline;
pub mod queue;
pub mod service;
pub mod utils;

pub use error::{Error, Result};
pub use service::{MediaDownloader, MediaDownloaderBuilder};
