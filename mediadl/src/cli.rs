use std::path::PathBuf;

use clap::{ArgAction, Args as ClapArgs, Parser, Subcommand};

use mediadl::extractor::{DefaultSelection, FormatIdSelection, SelectionPolicy};
use mediadl::queue::{DownloadOptions, TrimRange};

#[derive(Debug, Parser)]
#[command(name = "mediadl", version, about = "Download, merge and export remote media")]
pub struct Args {
    /// Configuration file (TOML).
    #[arg(long, global = true, env = "MEDIADL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Also write rolling log files into this directory.
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

impl Args {
    pub fn verbosity_filter(&self) -> Option<&'static str> {
        match self.verbose {
            0 => None,
            1 => Some("mediadl=debug,reqwest=info"),
            _ => Some("mediadl=trace,reqwest=debug"),
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Resolve a URL and download it, waiting for the finished file.
    Download(DownloadArgs),
    /// Continue downloads left in the queue by a previous run.
    Resume,
    /// List queued downloads.
    Queue,
    /// Show the streams offered for a URL.
    Info {
        url: String,
        /// Print the raw metadata as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, ClapArgs)]
pub struct DownloadArgs {
    pub url: String,

    /// Destination directory instead of the configured downloads directory.
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Request the whole resource without a Range header.
    #[arg(long)]
    pub no_chunked: bool,

    /// Export elementary streams as they are, without merging.
    #[arg(long)]
    pub no_remux: bool,

    /// Never transcode; incompatible video is merged as-is.
    #[arg(long)]
    pub no_transcode: bool,

    /// Keep elementary and pre-transcode files after merging.
    #[arg(long)]
    pub keep_intermediates: bool,

    /// Trim start in seconds.
    #[arg(long, requires = "end")]
    pub start: Option<f64>,

    /// Trim end in seconds.
    #[arg(long, requires = "start")]
    pub end: Option<f64>,

    /// Download these format ids, in order, instead of the service's pick.
    #[arg(long = "format-id", value_name = "ID")]
    pub format_ids: Vec<String>,
}

impl DownloadArgs {
    pub fn options(&self, mut base: DownloadOptions) -> DownloadOptions {
        base.set(DownloadOptions::CHUNKED, !self.no_chunked && base.contains(DownloadOptions::CHUNKED));
        if self.no_remux {
            base.insert(DownloadOptions::NO_REMUX);
        }
        if self.no_transcode {
            base.insert(DownloadOptions::NO_TRANSCODE);
        }
        base
    }

    pub fn time_range(&self) -> anyhow::Result<Option<TrimRange>> {
        match (self.start, self.end) {
            (Some(start), Some(end)) => TrimRange::new(start, end)
                .map(Some)
                .ok_or_else(|| anyhow::anyhow!("invalid trim range {start}..{end}")),
            _ => Ok(None),
        }
    }

    pub fn policy(&self) -> anyhow::Result<Box<dyn SelectionPolicy>> {
        let time_range = self.time_range()?;
        let directory = self.dir.clone();
        let policy: Box<dyn SelectionPolicy> = if self.format_ids.is_empty() {
            Box::new(DefaultSelection {
                directory,
                time_range,
            })
        } else {
            Box::new(FormatIdSelection {
                format_ids: self.format_ids.clone(),
                directory,
                time_range,
            })
        };
        Ok(policy)
    }
}
