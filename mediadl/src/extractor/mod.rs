//! Resolution of source URLs into [`MediaInfo`](crate::media::MediaInfo) and
//! narrowing of the offered streams into a job.

mod resolver;
mod selection;
mod ytdlp;

pub use resolver::MediaResolver;
pub use selection::{DefaultSelection, FormatIdSelection, Selection, SelectionPolicy};
pub use ytdlp::{YtDlpResolver, parse_dump};
