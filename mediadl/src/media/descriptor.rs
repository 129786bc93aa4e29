use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::{Error, Result};

/// Codec sentinel meaning "this stream carries no such track".
pub const NO_CODEC: &str = "none";

/// Placeholder for codecs the extraction service did not report.
pub const UNKNOWN_CODEC: &str = "unknown";

/// One fetchable stream as reported by the extraction service.
///
/// Descriptors are immutable once resolved; the queue persists them verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub format_id: String,
    pub ext: String,
    #[serde(default = "unknown_codec", deserialize_with = "codec_or_unknown")]
    pub vcodec: String,
    #[serde(default = "unknown_codec", deserialize_with = "codec_or_unknown")]
    pub acodec: String,
    /// Total bitrate in kbit/s.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tbr: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    /// Audio sample rate in Hz.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asr: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesize: Option<u64>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub http_headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloader_options: Option<DownloaderOptions>,
}

/// Transfer hints attached to a descriptor by the extraction service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloaderOptions {
    pub http_chunk_size: u64,
}

fn unknown_codec() -> String {
    UNKNOWN_CODEC.to_string()
}

fn codec_or_unknown<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value
        .filter(|v| !v.is_empty())
        .unwrap_or_else(unknown_codec))
}

impl StreamDescriptor {
    /// Minimal descriptor; quality hints default to absent.
    pub fn new(
        format_id: impl Into<String>,
        ext: impl Into<String>,
        vcodec: impl Into<String>,
        acodec: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            format_id: format_id.into(),
            ext: ext.into(),
            vcodec: vcodec.into(),
            acodec: acodec.into(),
            tbr: None,
            width: None,
            height: None,
            fps: None,
            asr: None,
            filesize: None,
            url: url.into(),
            http_headers: BTreeMap::new(),
            protocol: None,
            format_note: None,
            language: None,
            downloader_options: None,
        }
    }

    pub fn with_filesize(mut self, filesize: u64) -> Self {
        self.filesize = Some(filesize);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.http_headers.insert(name.into(), value.into());
        self
    }

    pub fn is_video_only(&self) -> bool {
        self.acodec == NO_CODEC
    }

    pub fn is_audio_only(&self) -> bool {
        self.vcodec == NO_CODEC
    }

    /// Parse the request URL.
    ///
    /// A descriptor without an http(s) URL breaks the extraction contract and
    /// is reported as [`Error::InvalidDescriptor`].
    pub fn request_url(&self) -> Result<Url> {
        if self.url.trim().is_empty() {
            return Err(Error::invalid_descriptor(&self.format_id, "missing url"));
        }
        let url = Url::parse(&self.url)
            .map_err(|e| Error::invalid_descriptor(&self.format_id, e.to_string()))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(Error::invalid_descriptor(
                &self.format_id,
                format!("unsupported scheme {other}"),
            )),
        }
    }

    /// Short human-readable label for logs.
    pub fn label(&self) -> String {
        match (self.width, self.height) {
            (Some(w), Some(h)) => format!("{} ({}x{} {})", self.format_id, w, h, self.ext),
            _ => format!("{} ({})", self.format_id, self.ext),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_extractor_format() {
        let json = r#"{
            "format_id": "137",
            "ext": "mp4",
            "vcodec": "avc1.640028",
            "acodec": "none",
            "width": 1920,
            "height": 1080,
            "fps": 30,
            "tbr": 4400.5,
            "filesize": 123456,
            "url": "https://cdn.example.com/v.mp4",
            "protocol": "https",
            "http_headers": {"User-Agent": "ua", "Accept": "*/*"},
            "downloader_options": {"http_chunk_size": 10485760},
            "some_unknown_field": [1, 2, 3]
        }"#;

        let d: StreamDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(d.format_id, "137");
        assert!(d.is_video_only());
        assert!(!d.is_audio_only());
        assert_eq!(d.filesize, Some(123456));
        assert_eq!(d.http_headers.get("User-Agent").map(String::as_str), Some("ua"));
        assert_eq!(
            d.downloader_options,
            Some(DownloaderOptions {
                http_chunk_size: 10_485_760
            })
        );
    }

    #[test]
    fn test_null_codec_is_unknown_not_none() {
        let json = r#"{"format_id": "0", "ext": "mp4", "vcodec": null, "url": "https://a/b"}"#;
        let d: StreamDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(d.vcodec, UNKNOWN_CODEC);
        assert_eq!(d.acodec, UNKNOWN_CODEC);
        assert!(!d.is_video_only());
        assert!(!d.is_audio_only());
    }

    #[test]
    fn test_request_url_validation() {
        let ok = StreamDescriptor::new("1", "mp4", "avc1", "mp4a", "https://example.com/a.mp4");
        assert_eq!(ok.request_url().unwrap().host_str(), Some("example.com"));

        let empty = StreamDescriptor::new("2", "mp4", "avc1", "mp4a", "");
        assert!(matches!(
            empty.request_url(),
            Err(Error::InvalidDescriptor { format_id, .. }) if format_id == "2"
        ));

        let garbage = StreamDescriptor::new("3", "mp4", "avc1", "mp4a", "not a url");
        assert!(garbage.request_url().is_err());

        let ftp = StreamDescriptor::new("4", "mp4", "avc1", "mp4a", "ftp://example.com/a");
        assert!(ftp.request_url().is_err());
    }
}
