#![deny(missing_docs)]

//! This crate packs a site directory into a deployable archive.
//!
//! A [`Collector`] writes a `.tar.zst` stream into any [`std::io::Write`]
//! sink. While the archive is being written every regular file is hashed on
//! the fly, and a manifest of [`FileEntry`] records is accumulated in the same
//! order the entries appear in the archive. The manifest is what a deployment
//! server uses to decide which content it already has.
//!
//! ```no_run
//! use sitepack_archive::Collector;
//!
//! let file = std::fs::File::create("site.tar.zst").unwrap();
//! let mut collector = Collector::open(chrono::Utc::now(), file).unwrap();
//! collector.add_directory("/").unwrap();
//! collector.collect("public", "/public").unwrap();
//! collector.close().unwrap();
//! println!("{} files", collector.files().len());
//! ```

use std::path::PathBuf;

mod collector;
mod manifest;
pub mod read;
pub mod write;

pub use collector::Collector;
pub use manifest::{write_manifest, FileEntry, Manifest, MAX_FILES};
pub use write::{CollectorOptions, CompressionLevel};

/// An error that can occur while collecting files into an archive.
#[derive(thiserror::Error, Debug)]
pub enum CollectError {
    /// The manifest would contain more entries than allowed.
    #[error("too many files collected (at most {max} are allowed)")]
    TooManyFiles {
        /// The configured maximum.
        max: usize,
    },

    /// The sink could not be wrapped by the zstd compressor.
    #[error("failed to initialize the zstd compressor")]
    CompressionInit(#[source] std::io::Error),

    /// Reading from the file system or writing to the archive failed.
    #[error("failed to archive '{}'", path.display())]
    Io {
        /// The offending path.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A symbolic link points back to one of its own ancestors.
    #[error("symbolic link '{}' loops back to '{}'", path.display(), ancestor.display())]
    SymlinkLoop {
        /// The link that closes the cycle.
        path: PathBuf,
        /// The directory it points back to.
        ancestor: PathBuf,
    },

    /// A path could not be represented in the archive.
    #[error("'{}' cannot be represented in the archive", .0.display())]
    InvalidPath(PathBuf),

    /// Flushing the tar writer or the compressor failed.
    #[error("failed to finish the archive")]
    Finish(#[source] std::io::Error),

    /// The collector was used after it has been closed.
    #[error("the collector has already been closed")]
    Closed,
}
