use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// Behavioral flags attached to a job.
///
/// Persisted as the raw bit value so queue files stay compatible across versions.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DownloadOptions(u32);

impl DownloadOptions {
    /// Export elementary streams as-is instead of merging them.
    pub const NO_REMUX: Self = Self(1 << 0);
    /// Treat incompatible video as mergeable; never transcode.
    pub const NO_TRANSCODE: Self = Self(1 << 1);
    /// Use explicit byte-range requests.
    pub const CHUNKED: Self = Self(1 << 2);
    /// Long-running transfer without an overall request timeout.
    pub const BACKGROUND: Self = Self(1 << 3);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Unknown bits are dropped.
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & 0b1111)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    pub fn set(&mut self, other: Self, value: bool) {
        if value {
            self.insert(other);
        } else {
            self.remove(other);
        }
    }
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self::CHUNKED | Self::BACKGROUND
    }
}

impl BitOr for DownloadOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for DownloadOptions {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for DownloadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (Self::NO_REMUX, "NO_REMUX"),
            (Self::NO_TRANSCODE, "NO_TRANSCODE"),
            (Self::CHUNKED, "CHUNKED"),
            (Self::BACKGROUND, "BACKGROUND"),
        ]
        .into_iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| name)
        .collect();
        write!(f, "DownloadOptions({})", names.join(" | "))
    }
}
