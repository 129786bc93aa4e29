use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Separator between the title stem and the kind tag in sibling filenames.
pub const KIND_SEPARATOR: &str = "-";

/// What a downloaded stream is, and therefore what the pipeline does with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Kind {
    /// Video track only, codec is mergeable as-is.
    VideoOnly,
    /// Audio track only.
    AudioOnly,
    /// Muxed audio + video, exported directly.
    Complete,
    /// Video track only, codec must be transcoded before merging.
    OtherVideo,
}

impl Kind {
    pub const ALL: [Kind; 4] = [
        Kind::VideoOnly,
        Kind::AudioOnly,
        Kind::Complete,
        Kind::OtherVideo,
    ];

    /// Filename tag for this kind.
    pub fn tag(self) -> &'static str {
        match self {
            Kind::VideoOnly => "videoOnly",
            Kind::AudioOnly => "audioOnly",
            Kind::Complete => "complete",
            Kind::OtherVideo => "otherVideo",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.tag() == tag)
    }

    /// Filename stem for `title` in this slot, e.g. `title-videoOnly`.
    pub fn stem(self, title: &str) -> String {
        format!("{title}{KIND_SEPARATOR}{}", self.tag())
    }

    /// Destination path for a stream of this kind: `dir/title-tag.ext`.
    pub fn destination(self, directory: &Path, title: &str, ext: &str) -> PathBuf {
        directory.join(format!("{}.{ext}", self.stem(title)))
    }

    pub fn is_elementary(self) -> bool {
        !matches!(self, Kind::Complete)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_are_distinct_and_parse_back() {
        for kind in Kind::ALL {
            assert_eq!(Kind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(Kind::from_tag("video"), None);
    }

    #[test]
    fn test_destination_layout() {
        let path = Kind::AudioOnly.destination(Path::new("/dl"), "My Song", "m4a");
        assert_eq!(path, PathBuf::from("/dl/My Song-audioOnly.m4a"));
    }

    #[test]
    fn test_serde_uses_tag_names() {
        assert_eq!(
            serde_json::to_string(&Kind::OtherVideo).unwrap(),
            "\"otherVideo\""
        );
    }
}
