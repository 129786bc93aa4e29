use serde::{Deserialize, Serialize};

use super::{Kind, StreamDescriptor};

/// Heuristic deciding which video streams need transcoding before a merge.
///
/// This is container/codec-prefix matching, not codec introspection. The
/// defaults flag AV1 inside the mp4 family and any video stream whose
/// container is not the passthrough audio container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodePolicy {
    /// Containers treated as the mp4 family.
    pub mp4_extensions: Vec<String>,
    /// Codec prefixes that cannot be merged even inside an mp4-family container.
    pub incompatible_codec_prefixes: Vec<String>,
    /// Container that is always passed through untouched.
    pub passthrough_extension: String,
}

impl Default for TranscodePolicy {
    fn default() -> Self {
        Self {
            mp4_extensions: vec!["mp4".to_string()],
            incompatible_codec_prefixes: vec!["av01.".to_string()],
            passthrough_extension: "m4a".to_string(),
        }
    }
}

impl TranscodePolicy {
    pub fn needs_transcode(&self, descriptor: &StreamDescriptor) -> bool {
        let ext = descriptor.ext.to_ascii_lowercase();
        if self.mp4_extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)) {
            return self
                .incompatible_codec_prefixes
                .iter()
                .any(|prefix| descriptor.vcodec.starts_with(prefix.as_str()));
        }
        !ext.eq_ignore_ascii_case(&self.passthrough_extension)
    }

    pub fn classify(&self, descriptor: &StreamDescriptor) -> Kind {
        if descriptor.is_audio_only() {
            Kind::AudioOnly
        } else if descriptor.is_video_only() {
            if self.needs_transcode(descriptor) {
                Kind::OtherVideo
            } else {
                Kind::VideoOnly
            }
        } else {
            Kind::Complete
        }
    }
}

/// Classify with the default [`TranscodePolicy`].
pub fn classify(descriptor: &StreamDescriptor) -> Kind {
    TranscodePolicy::default().classify(descriptor)
}

pub fn classify_with(policy: &TranscodePolicy, descriptor: &StreamDescriptor) -> Kind {
    policy.classify(descriptor)
}

/// Whether `descriptor` needs transcoding under the default policy.
pub fn needs_transcode(descriptor: &StreamDescriptor) -> bool {
    TranscodePolicy::default().needs_transcode(descriptor)
}

/// A single elementary stream always has to be packaged.
pub fn needs_remux(descriptor: &StreamDescriptor) -> bool {
    descriptor.is_video_only() || descriptor.is_audio_only()
}
