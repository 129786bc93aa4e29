//! Durable queue of pending downloads.

mod job;
mod options;
mod store;

pub use job::{JobKey, PendingDownload, TrimRange};
pub use options::DownloadOptions;
pub use store::{PendingQueue, QUEUE_FILE_NAME, QueuedDescriptor};
