#![deny(missing_docs)]

//! Content hashing for sitepack archives.
//!
//! Every regular file that ends up in an archive is identified by the SHA-256
//! digest of its exact bytes, encoded as lowercase hex. This crate provides the
//! pieces needed to compute that digest incrementally:
//!
//! - [`ContentHasher`]: an accumulator that implements [`Write`] and produces
//!   the hex digest with [`ContentHasher::sum`].
//! - [`HashingReader`] / [`HashingWriter`]: adapters that forward bytes
//!   unchanged to the wrapped object while hashing everything that passes
//!   through. These are used to tee a file into an archive and the hasher at
//!   the same time.
//!
//! # Examples
//!
//! ```
//! use sitepack_digest::ContentHasher;
//! use std::io::Write;
//!
//! let mut hasher = ContentHasher::new();
//! hasher.write_all(b"Hello, ").unwrap();
//! hasher.write_all(b"world!").unwrap();
//! assert_eq!(
//!     hasher.sum(),
//!     "315f5bdb76d078c43b8ac0064e4a0164612b1fce77c869345bfc94c75894edd3"
//! );
//! ```

pub use digest;

use digest::{Digest, Output};
use std::io::{Read, Write};
use std::{fs::File, path::Path};

pub use sha2::Sha256;

/// The hash function used to address content.
pub type ContentDigest = Sha256;

/// A type alias for the raw output of a [`ContentDigest`].
pub type ContentHash = Output<ContentDigest>;

/// Accumulates bytes and produces the hex encoded content hash.
///
/// Bytes can be fed with [`ContentHasher::update`] or through the [`Write`]
/// implementation; chunk boundaries do not influence the result.
#[derive(Default, Clone)]
pub struct ContentHasher {
    hasher: ContentDigest,
    len: u64,
}

impl ContentHasher {
    /// Constructs a new, empty hasher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds more bytes into the hasher.
    pub fn update(&mut self, bytes: impl AsRef<[u8]>) {
        let bytes = bytes.as_ref();
        self.hasher.update(bytes);
        self.len += bytes.len() as u64;
    }

    /// The number of bytes hashed so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns true if no bytes have been hashed yet.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Consumes the hasher and returns the raw digest.
    pub fn finalize(self) -> ContentHash {
        self.hasher.finalize()
    }

    /// Consumes the hasher and returns the lowercase hex digest of everything
    /// written to it.
    pub fn sum(self) -> String {
        digest_to_hex(&self.finalize())
    }
}

impl Write for ContentHasher {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Encodes a digest as lowercase hex.
pub fn digest_to_hex(hash: &ContentHash) -> String {
    format!("{hash:x}")
}

/// Compute the content hash of the specified bytes and return it as hex.
pub fn compute_bytes_digest(bytes: impl AsRef<[u8]>) -> String {
    let mut hasher = ContentHasher::new();
    hasher.update(bytes);
    hasher.sum()
}

/// Compute the content hash of the file at the specified location.
pub fn compute_file_digest(path: impl AsRef<Path>) -> Result<String, std::io::Error> {
    let mut file = File::open(path)?;
    let mut hasher = ContentHasher::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hasher.sum())
}

/// Parses a hex string into a raw digest. Returns `None` if the string is not
/// a valid hex representation of a [`ContentHash`].
pub fn parse_digest_from_hex(str: &str) -> Option<ContentHash> {
    let mut hash = ContentHash::default();
    match hex::decode_to_slice(str, &mut hash) {
        Ok(_) => Some(hash),
        Err(_) => None,
    }
}

/// A [`Write`] implementation that forwards to the wrapped writer and hashes
/// every byte the wrapped writer accepted. Call [`HashingWriter::finalize`]
/// to retrieve both the original writer and the hasher.
pub struct HashingWriter<W> {
    writer: W,
    hasher: ContentHasher,
}

impl<W> HashingWriter<W> {
    /// Constructs a new instance from a writer and a new (empty) hasher.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            hasher: ContentHasher::new(),
        }
    }

    /// Consumes this instance and returns the original writer and the hasher
    /// holding all bytes written through this instance.
    pub fn finalize(self) -> (W, ContentHasher) {
        (self.writer, self.hasher)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let bytes = self.writer.write(buf)?;
        self.hasher.update(&buf[..bytes]);
        Ok(bytes)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

/// A [`Read`] implementation that hashes every byte read from the wrapped
/// reader. Call [`HashingReader::finalize`] to retrieve both the original
/// reader and the hasher.
pub struct HashingReader<R> {
    reader: R,
    hasher: ContentHasher,
}

impl<R> HashingReader<R> {
    /// Constructs a new instance from a reader and a new (empty) hasher.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            hasher: ContentHasher::new(),
        }
    }

    /// Consumes this instance and returns the original reader and the hasher
    /// holding all bytes read through this instance.
    pub fn finalize(self) -> (R, ContentHasher) {
        (self.reader, self.hasher)
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let bytes_read = self.reader.read(buf)?;
        self.hasher.update(&buf[..bytes_read]);
        Ok(bytes_read)
    }
}
