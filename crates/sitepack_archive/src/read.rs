//! Functions to read back archives produced by a [`crate::Collector`].

use std::io::Read;

use sitepack_digest::HashingReader;

use crate::manifest::FileEntry;

/// Returns the `.tar.zst` as a decompressed `tar::Archive`. The archive can be
/// used to unpack the files or to inspect the entries.
pub fn stream_tar_zst(reader: impl Read) -> std::io::Result<tar::Archive<impl Read + Sized>> {
    Ok(tar::Archive::new(zstd::stream::read::Decoder::new(reader)?))
}

/// Lists the directories and regular files of an archive together with their
/// size and content hash, in archive order.
///
/// Unlike the manifest of a collection this also contains the directories that
/// were added explicitly with [`crate::Collector::add_directory`].
pub fn list_entries(reader: impl Read) -> std::io::Result<Vec<FileEntry>> {
    let mut archive = stream_tar_zst(reader)?;
    let mut files = Vec::new();
    for entry in archive.entries()? {
        let entry = entry?;
        let path = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let entry_type = entry.header().entry_type();
        if entry_type.is_dir() {
            files.push(FileEntry::directory(path));
        } else if entry_type.is_file() {
            let size = entry.header().size()?;
            let mut reader = HashingReader::new(entry);
            let copied = std::io::copy(&mut reader, &mut std::io::sink())?;
            if copied != size {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("'{path}' declares {size} bytes but contains {copied}"),
                ));
            }
            let (_, hasher) = reader.finalize();
            files.push(FileEntry {
                path,
                size,
                hash: hasher.sum(),
            });
        }
    }
    Ok(files)
}
