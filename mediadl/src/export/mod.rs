//! Final hand-off of finished files.
//!
//! - [`AssetStore`]: external library the file is registered with
//! - [`Notifier`]: best-effort user notification
//! - [`CompletionRegistry`]: callers awaiting a title's result
//! - [`ExportSink`]: ties the three together

mod notifier;
mod registry;
mod sink;
mod store;

pub use notifier::{LogNotifier, Notifier};
pub use registry::{CompletionReceiver, CompletionRegistry, CompletionResult};
pub use sink::ExportSink;
pub use store::{AssetStore, DirectoryAssetStore};
