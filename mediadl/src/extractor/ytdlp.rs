use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::MediaResolver;
use crate::config::ToolsConfig;
use crate::media::{MediaInfo, StreamDescriptor};
use crate::utils::process::{probe_version, tokio_command};
use crate::{Error, Result};

/// Resolves URLs by running `yt-dlp --dump-json`.
#[derive(Debug, Clone)]
pub struct YtDlpResolver {
    binary: String,
    format: String,
    extra_args: Vec<String>,
}

impl YtDlpResolver {
    pub fn new(binary: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            format: format.into(),
            extra_args: Vec::new(),
        }
    }

    pub fn from_config(tools: &ToolsConfig) -> Self {
        Self {
            binary: tools.extractor_path.clone(),
            format: tools.format_selector.clone(),
            extra_args: tools.extractor_args.clone(),
        }
    }

    fn unavailable(&self, e: std::io::Error) -> Error {
        match e.kind() {
            std::io::ErrorKind::NotFound => {
                Error::ServiceUnavailable(format!("'{}' is not installed", self.binary))
            }
            _ => Error::ServiceUnavailable(format!("failed to run '{}': {e}", self.binary)),
        }
    }
}

#[async_trait]
impl MediaResolver for YtDlpResolver {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn probe(&self) -> Result<String> {
        let version = probe_version(&self.binary)
            .await
            .map_err(|e| self.unavailable(e))?;
        info!(binary = %self.binary, version = %version, "Extraction service available");
        Ok(version)
    }

    async fn resolve(&self, url: &str) -> Result<MediaInfo> {
        debug!(url, format = %self.format, "Resolving");
        let output = tokio_command(&self.binary)
            .args(["--dump-json", "--no-playlist", "-f", self.format.as_str()])
            .args(&self.extra_args)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| self.unavailable(e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(Error::Extraction(format!(
                "{} exited with {}: {stderr}",
                self.binary, output.status
            )));
        }

        let info = parse_dump(&String::from_utf8_lossy(&output.stdout))?;
        info!(
            url,
            title = %info.title,
            requested = info.requested.len(),
            available = info.formats.len(),
            "Resolved"
        );
        Ok(info)
    }
}

/// Parse `--dump-json` output: one JSON document per line.
///
/// Every line is one requested download. The first line also supplies the
/// item metadata and the list of every available format. A line carrying
/// `requested_formats` (a `video+audio` selector) contributes those instead
/// of itself.
pub fn parse_dump(stdout: &str) -> Result<MediaInfo> {
    let mut info: Option<MediaInfo> = None;
    let mut requested = Vec::new();

    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let value: Value = serde_json::from_str(line)?;

        if info.is_none() {
            info = Some(metadata(&value));
        }

        match value.get("requested_formats").and_then(Value::as_array) {
            Some(formats) => requested.extend(formats.iter().filter_map(descriptor)),
            None => requested.extend(descriptor(&value)),
        }
    }

    let mut info = info.ok_or_else(|| Error::Extraction("no output from extraction service".into()))?;
    info.requested = requested;
    Ok(info)
}

fn metadata(value: &Value) -> MediaInfo {
    let text = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);

    let mut info = MediaInfo::new(
        text("id").unwrap_or_default(),
        text("title").unwrap_or_default(),
    );
    info.uploader = text("uploader");
    info.duration = value.get("duration").and_then(Value::as_f64);
    info.thumbnail = text("thumbnail");
    info.webpage_url = text("webpage_url");
    info.formats = value
        .get("formats")
        .and_then(Value::as_array)
        .map(|formats| formats.iter().filter_map(descriptor).collect())
        .unwrap_or_default();
    info
}

fn descriptor(value: &Value) -> Option<StreamDescriptor> {
    value.get("format_id")?;
    match serde_json::from_value::<StreamDescriptor>(value.clone()) {
        Ok(descriptor) => Some(descriptor),
        Err(e) => {
            warn!(error = %e, "Skipping malformed format entry");
            None
        }
    }
}
