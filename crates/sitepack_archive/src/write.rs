//! Low level functionality for writing archive entries.

use std::io::{Read, Write};
use std::path::{Component, Path};

use crate::manifest::MAX_FILES;

/// The default zstd window log (8 MiB back-references).
pub const DEFAULT_WINDOW_LOG: u32 = 23;

/// The name GNU tar uses for records that carry an overlong path.
const GNU_LONG_LINK: &[u8] = b"././@LongLink";

/// Select the compression level to use for the archive
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionLevel {
    /// Use the lowest compression level (zstd: 1)
    Lowest,
    /// Use the highest compression level (zstd: 22)
    Highest,
    /// Use the default compression level (zstd: 3)
    #[default]
    Default,
    /// Use a numeric compression level (zstd: 1-22)
    Numeric(i32),
}

impl CompressionLevel {
    /// Converts the compression level to a zstd compression level.
    pub fn to_zstd_level(self) -> Result<i32, std::io::Error> {
        match self {
            CompressionLevel::Lowest => Ok(1),
            CompressionLevel::Highest => Ok(22),
            CompressionLevel::Default => Ok(3),
            CompressionLevel::Numeric(n) => {
                if (1..=22).contains(&n) {
                    Ok(n)
                } else {
                    Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "zstd compression level must be between 1 and 22",
                    ))
                }
            }
        }
    }
}

/// Options that control how a [`crate::Collector`] writes its archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectorOptions {
    /// The maximum number of manifest entries.
    pub max_files: usize,
    /// The zstd compression level.
    pub compression_level: CompressionLevel,
    /// The zstd window log, the base-2 logarithm of the window size.
    pub window_log: u32,
}

impl Default for CollectorOptions {
    fn default() -> Self {
        Self {
            max_files: MAX_FILES,
            compression_level: CompressionLevel::Default,
            window_log: DEFAULT_WINDOW_LOG,
        }
    }
}

/// Creates a header for an entry of the given type. Ownership and device
/// fields stay zeroed, the modification time is fixed to `mtime`.
pub(crate) fn prepare_header(entry_type: tar::EntryType, size: u64, mtime: u64) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_size(size);
    header.set_mtime(mtime);
    header.set_mode(if entry_type.is_dir() { 0o755 } else { 0o644 });
    header
}

/// Appends an entry to the archive under `name`.
///
/// `tar::Builder` refuses absolute paths, but archive names are rooted at `/`,
/// so the name is written into the header directly. Names that do not fit the
/// 100 byte name field are preceded by a GNU long name record.
pub(crate) fn append_entry<W: Write>(
    archive: &mut tar::Builder<W>,
    header: &mut tar::Header,
    name: &str,
    data: impl Read,
) -> std::io::Result<()> {
    let name = name.as_bytes();
    let field_len = name_field(header)?.len();
    if name.len() > field_len {
        let mut long_name =
            prepare_header(tar::EntryType::GNULongName, name.len() as u64 + 1, header.mtime()?);
        name_field(&mut long_name)?[..GNU_LONG_LINK.len()].copy_from_slice(GNU_LONG_LINK);
        long_name.set_cksum();
        archive.append(&long_name, name.chain(&[0u8][..]))?;
    }

    let truncated = &name[..name.len().min(field_len)];
    name_field(header)?[..truncated.len()].copy_from_slice(truncated);
    header.set_cksum();
    archive.append(header, data)
}

fn name_field(header: &mut tar::Header) -> std::io::Result<&mut [u8; 100]> {
    header
        .as_gnu_mut()
        .map(|gnu| &mut gnu.name)
        .ok_or_else(|| std::io::Error::other("expected a GNU tar header"))
}

/// Joins a mount path and a path relative to the walk root into an archive
/// name using `/` as separator. Returns `None` if the relative path is not
/// valid UTF-8 or leaves the root.
pub(crate) fn archive_path(mount_path: &str, relative: &Path) -> Option<String> {
    let mut path = mount_path.trim_end_matches('/').to_string();
    for component in relative.components() {
        match component {
            Component::Normal(segment) => {
                path.push('/');
                path.push_str(segment.to_str()?);
            }
            Component::CurDir => {}
            _ => return None,
        }
    }
    if path.is_empty() {
        path.push('/');
    }
    Some(path)
}

/// Returns the name used for a directory entry, which always ends with `/`.
pub(crate) fn directory_name(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

/// A reader that yields exactly `remaining` bytes from the inner reader.
///
/// A tar header announces the size of the data that follows it, so a file
/// whose length changed between `stat` and `read` fails instead of producing
/// an archive whose content disagrees with its manifest.
pub(crate) struct ExactSizeReader<R> {
    inner: R,
    remaining: u64,
}

impl<R> ExactSizeReader<R> {
    pub(crate) fn new(inner: R, size: u64) -> Self {
        Self {
            inner,
            remaining: size,
        }
    }
}

impl<R: Read> Read for ExactSizeReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.remaining == 0 {
            let mut probe = [0u8; 1];
            if self.inner.read(&mut probe)? > 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "file grew beyond its recorded size",
                ));
            }
            return Ok(0);
        }
        let max = buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let bytes_read = self.inner.read(&mut buf[..max])?;
        if bytes_read == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "file ended {} bytes before its recorded size",
                    self.remaining
                ),
            ));
        }
        self.remaining -= bytes_read as u64;
        Ok(bytes_read)
    }
}
