//! Transfer side: tasks, engines, progress and the single-flight scheduler.

mod engine;
mod events;
mod progress;
mod scheduler;
mod task;

pub use engine::{CHUNK_SIZE, HttpEngine, TransferEngine};
pub use events::{CompletionEvent, TransferOutcome};
pub use progress::{ProgressHandle, ProgressPhase, ProgressSnapshot};
pub use scheduler::{ActiveTransfer, Scheduler, SchedulerHandle, StartOutcome};
pub use task::{ByteRange, DownloadTask, TransferRequest, effective_kind};
