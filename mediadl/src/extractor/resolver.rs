use async_trait::async_trait;

use crate::Result;
use crate::media::MediaInfo;

/// Turns a source URL into metadata plus ranked stream descriptors.
///
/// The core never interprets provider-specific selection syntax; whatever
/// ranking the service applies is carried in [`MediaInfo::requested`].
#[async_trait]
pub trait MediaResolver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Check that the service is usable and return its version string.
    ///
    /// Fails with [`Error::ServiceUnavailable`](crate::Error::ServiceUnavailable)
    /// when it is not installed or not reachable.
    async fn probe(&self) -> Result<String>;

    async fn resolve(&self, url: &str) -> Result<MediaInfo>;
}
