#![deny(missing_docs)]

//! An in-memory cache for content blobs that are expensive to load.
//!
//! A [`ContentCache`] is bounded by the total cost of its resident entries
//! (usually their size in bytes) and collapses concurrent requests for the
//! same key into a single call of the user supplied loader. Eviction follows
//! the W-TinyLFU policy of the underlying [`moka`] store.
//!
//! ```no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use sitepack_cache::{ContentCache, Loaded};
//!
//! let cache = ContentCache::new(1 << 24, |path: String| async move {
//!     let data = fs_err::tokio::read(&path).await?;
//!     Ok::<_, std::io::Error>(Loaded::from(data))
//! });
//! let blob = cache.get("index.html".to_string()).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

mod content_cache;
mod source;

pub use content_cache::{ContentCache, EvictionEvent, Loaded, DEFAULT_CAPACITY};
pub use moka::notification::RemovalCause;
pub use source::{read_to_loaded, ContentSource, DirectorySource, FileInfo};

/// An error that might be returned by [`ContentCache::get`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum ContentCacheError {
    /// The loader failed to produce the content.
    #[error("failed to load content for {key}")]
    LoadFailure {
        /// A debug rendering of the requested key.
        key: String,
        /// The error returned by the loader.
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync + 'static>,
    },
}
