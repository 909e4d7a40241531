use serde::{Deserialize, Serialize};
use std::io::Write;

/// The default maximum number of entries in a single manifest.
pub const MAX_FILES: usize = 10_000;

/// A single entry of a deployment manifest.
///
/// Paths are rooted at the archive root and always start with `/`.
/// Directories end with a `/`, have a size of zero and an empty hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileEntry {
    /// The path of the entry inside the archive.
    pub path: String,

    /// The size of the content in bytes.
    pub size: u64,

    /// The hex encoded content hash.
    pub hash: String,
}

impl FileEntry {
    /// Constructs the entry for a directory.
    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            size: 0,
            hash: String::new(),
        }
    }

    /// Returns true if this entry describes a directory.
    pub fn is_directory(&self) -> bool {
        self.path.ends_with('/')
    }
}

/// The ordered list of entries produced by one collection.
pub type Manifest = Vec<FileEntry>;

/// Writes a manifest as pretty printed JSON.
pub fn write_manifest(writer: impl Write, files: &[FileEntry]) -> serde_json::Result<()> {
    serde_json::to_writer_pretty(writer, files)
}
