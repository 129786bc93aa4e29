//! Application configuration.
//!
//! Values come from, in increasing precedence: built-in defaults, an optional
//! TOML file, and environment variables (a `.env` file is honored by the binary).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::downloader::CHUNK_SIZE;
use crate::media::TranscodePolicy;
use crate::queue::DownloadOptions;
use crate::{Error, Result};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// Format selector handed to the extraction service: best video and best m4a audio, fetched separately.
pub const DEFAULT_FORMAT_SELECTOR: &str = "bestvideo,bestaudio[ext=m4a]";

const CONFIG_FILE_NAME: &str = "config.toml";
const APP_DIR_NAME: &str = "mediadl";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Where downloads land and where the pending queue file lives.
    pub downloads_dir: PathBuf,
    /// Optional library directory finished files are registered into.
    pub library_dir: Option<PathBuf>,
    /// Raw [`DownloadOptions`] bits applied when the caller does not override them.
    pub default_options: u32,
    pub tools: ToolsConfig,
    pub transfer: TransferConfig,
    pub pipeline: PipelineConfig,
    pub transcode_policy: TranscodePolicy,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: String,
    pub extractor_path: String,
    pub format_selector: String,
    pub extractor_args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub chunk_size: u64,
    pub connect_timeout_secs: u64,
    /// Overall timeout for foreground transfers; `0` disables it.
    pub request_timeout_secs: u64,
    pub user_agent: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub keep_intermediates: bool,
    /// Container of merged output.
    pub container: String,
    pub video_codec: String,
    pub preset: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub dir: Option<PathBuf>,
    pub filter: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            downloads_dir: default_downloads_dir(),
            library_dir: None,
            default_options: DownloadOptions::default().bits(),
            tools: ToolsConfig::default(),
            transfer: TransferConfig::default(),
            pipeline: PipelineConfig::default(),
            transcode_policy: TranscodePolicy::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            extractor_path: "yt-dlp".to_string(),
            format_selector: DEFAULT_FORMAT_SELECTOR.to_string(),
            extractor_args: Vec::new(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            connect_timeout_secs: 30,
            request_timeout_secs: 600,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            keep_intermediates: false,
            container: "mp4".to_string(),
            video_codec: "libx264".to_string(),
            preset: Some("veryfast".to_string()),
        }
    }
}

fn default_downloads_dir() -> PathBuf {
    dirs::download_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("downloads"))
}

/// Default config file location, e.g. `~/.config/mediadl/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}

impl AppConfig {
    /// Load configuration.
    ///
    /// An explicit `path` must exist; otherwise the default location is used
    /// when present. Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path().filter(|p| p.is_file()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read {}: {e}", path.display())))?;
        debug!(path = %path.display(), "Loaded configuration file");
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::config(e.to_string()))
    }

    /// Apply environment-style overrides through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = lookup("MEDIADL_DOWNLOADS_DIR") {
            self.downloads_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("MEDIADL_LIBRARY_DIR") {
            self.library_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = lookup("MEDIADL_LOG_DIR") {
            self.logging.dir = Some(PathBuf::from(dir));
        }
        if let Some(path) = lookup("FFMPEG_PATH") {
            self.tools.ffmpeg_path = path;
        }
        if let Some(path) = lookup("YTDLP_PATH") {
            self.tools.extractor_path = path;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.transfer.chunk_size == 0 {
            return Err(Error::config("transfer.chunk_size must be greater than zero"));
        }
        if self.pipeline.container.trim().is_empty() {
            return Err(Error::config("pipeline.container must not be empty"));
        }
        if self.tools.format_selector.trim().is_empty() {
            return Err(Error::config("tools.format_selector must not be empty"));
        }
        Ok(())
    }

    pub fn default_options(&self) -> DownloadOptions {
        DownloadOptions::from_bits_truncate(self.default_options)
    }
}
