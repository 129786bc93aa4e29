use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::utils::fs;
use crate::{Error, Result};

/// External media library a finished file is registered with.
#[async_trait]
pub trait AssetStore: Send + Sync {
    fn name(&self) -> &'static str;

    async fn register(&self, path: &Path) -> Result<()>;
}

/// Registers files by copying them into a library directory.
#[derive(Debug, Clone)]
pub struct DirectoryAssetStore {
    library: PathBuf,
}

impl DirectoryAssetStore {
    pub fn new(library: impl Into<PathBuf>) -> Self {
        Self {
            library: library.into(),
        }
    }

    pub fn library(&self) -> &Path {
        &self.library
    }
}

#[async_trait]
impl AssetStore for DirectoryAssetStore {
    fn name(&self) -> &'static str {
        "directory"
    }

    async fn register(&self, path: &Path) -> Result<()> {
        let file_name = path
            .file_name()
            .ok_or_else(|| Error::Other(format!("not a file path: {}", path.display())))?;
        fs::ensure_dir_all_with_op("creating library directory", &self.library).await?;

        let target = self.library.join(file_name);
        tokio::fs::copy(path, &target)
            .await
            .map_err(|e| fs::io_error("copying into library", &target, e))?;
        debug!(from = %path.display(), to = %target.display(), "Registered asset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_copies_into_library() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("Clip.mp4");
        tokio::fs::write(&source, b"movie").await.unwrap();

        let store = DirectoryAssetStore::new(dir.path().join("library"));
        store.register(&source).await.unwrap();

        assert_eq!(
            tokio::fs::read(dir.path().join("library/Clip.mp4")).await.unwrap(),
            b"movie"
        );
        assert!(source.exists());
    }

    #[tokio::test]
    async fn test_missing_source_fails() {
        let dir = TempDir::new().unwrap();
        let store = DirectoryAssetStore::new(dir.path().join("library"));
        assert!(store.register(&dir.path().join("nope.mp4")).await.is_err());
    }
}
