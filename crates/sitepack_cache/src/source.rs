//! Loaders backed by a read-only file system.

use std::{
    path::{Component, Path, PathBuf},
    sync::Arc,
    time::SystemTime,
};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{ContentCache, Loaded};

/// Metadata about a path of a [`ContentSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Whether the path refers to a directory.
    pub is_dir: bool,
    /// The size of the file in bytes.
    pub size: u64,
    /// The last modification time, if the source knows it.
    pub modified: Option<SystemTime>,
}

/// A read-only file system that content can be loaded from.
#[async_trait::async_trait]
pub trait ContentSource: Send + Sync {
    /// Returns metadata about `path`.
    async fn stat(&self, path: &str) -> std::io::Result<FileInfo>;

    /// Opens `path` for sequential reading.
    async fn open(&self, path: &str) -> std::io::Result<Box<dyn AsyncRead + Send + Unpin>>;
}

/// Serves the files below a local directory. Paths are interpreted relative to
/// the root; leading slashes are ignored and `..` is rejected.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    /// Constructs a source rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> std::io::Result<PathBuf> {
        let mut resolved = self.root.clone();
        for component in Path::new(path.trim_start_matches('/')).components() {
            match component {
                Component::Normal(segment) => resolved.push(segment),
                Component::CurDir => {}
                _ => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("'{path}' escapes the content root"),
                    ))
                }
            }
        }
        Ok(resolved)
    }
}

#[async_trait::async_trait]
impl ContentSource for DirectorySource {
    async fn stat(&self, path: &str) -> std::io::Result<FileInfo> {
        let metadata = fs_err::tokio::metadata(self.resolve(path)?).await?;
        Ok(FileInfo {
            is_dir: metadata.is_dir(),
            size: metadata.len(),
            modified: metadata.modified().ok(),
        })
    }

    async fn open(&self, path: &str) -> std::io::Result<Box<dyn AsyncRead + Send + Unpin>> {
        let file = fs_err::tokio::File::open(self.resolve(path)?).await?;
        Ok(Box::new(file))
    }
}

/// Reads `reader` to the end. The cost of the result is its length in bytes.
pub async fn read_to_loaded(mut reader: impl AsyncRead + Unpin) -> std::io::Result<Loaded> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data).await?;
    Ok(Loaded::from(Bytes::from(data)))
}

impl ContentCache<String> {
    /// Constructs a cache keyed by path that loads files from `source`.
    pub fn from_source(capacity: u64, source: Arc<dyn ContentSource>) -> Self {
        ContentCache::new(capacity, move |path: String| {
            let source = source.clone();
            async move {
                let info = source.stat(&path).await?;
                if info.is_dir {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("'{path}' is a directory"),
                    ));
                }
                let reader = source.open(&path).await?;
                read_to_loaded(reader).await
            }
        })
    }
}

#[cfg(test)]
mod test {
    use super::{ContentSource, DirectorySource};

    #[tokio::test]
    async fn test_directory_source() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/page.html"), "page").unwrap();

        let source = DirectorySource::new(dir.path());
        let info = source.stat("/sub/page.html").await.unwrap();
        assert!(!info.is_dir);
        assert_eq!(info.size, 4);
        assert!(source.stat("sub").await.unwrap().is_dir);

        let reader = source.open("sub/page.html").await.unwrap();
        let loaded = super::read_to_loaded(reader).await.unwrap();
        assert_eq!(&loaded.blob[..], b"page");
        assert_eq!(loaded.cost, 4);

        let err = source.stat("../outside").await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }
}
