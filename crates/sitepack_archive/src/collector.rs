use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sitepack_digest::{ContentHasher, HashingReader};
use walkdir::WalkDir;

use crate::manifest::FileEntry;
use crate::write::{
    append_entry, archive_path, directory_name, prepare_header, CollectorOptions, ExactSizeReader,
};
use crate::CollectError;

type ArchiveWriter<W> = tar::Builder<zstd::Encoder<'static, W>>;

/// Streams files into a `.tar.zst` archive while recording a manifest.
///
/// All entries share the modification time passed to [`Collector::open`]. A
/// collector is single-use: after any error the archive written so far is
/// incomplete and should be discarded.
pub struct Collector<W: Write> {
    files: Vec<FileEntry>,
    mod_time: DateTime<Utc>,
    options: CollectorOptions,
    archive: Option<ArchiveWriter<W>>,
    sink: Option<W>,
}

impl<W: Write> Collector<W> {
    /// Creates a collector that writes a compressed archive into `sink` using
    /// the default [`CollectorOptions`].
    pub fn open(mod_time: DateTime<Utc>, sink: W) -> Result<Self, CollectError> {
        Self::open_with_options(mod_time, sink, CollectorOptions::default())
    }

    /// Creates a collector that writes a compressed archive into `sink`.
    pub fn open_with_options(
        mod_time: DateTime<Utc>,
        sink: W,
        options: CollectorOptions,
    ) -> Result<Self, CollectError> {
        let level = options
            .compression_level
            .to_zstd_level()
            .map_err(CollectError::CompressionInit)?;
        let mut encoder = zstd::Encoder::new(sink, level).map_err(CollectError::CompressionInit)?;
        encoder
            .window_log(options.window_log)
            .map_err(CollectError::CompressionInit)?;

        Ok(Self {
            files: Vec::new(),
            mod_time,
            options,
            archive: Some(tar::Builder::new(encoder)),
            sink: None,
        })
    }

    /// Returns the manifest accumulated so far.
    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    /// Adds an empty directory entry to the archive. Explicit directories are
    /// not part of the manifest.
    pub fn add_directory(&mut self, path: &str) -> Result<(), CollectError> {
        let name = directory_name(&normalize_path(path)?);
        let mut header = prepare_header(tar::EntryType::Directory, 0, self.mtime());
        let archive = self.archive.as_mut().ok_or(CollectError::Closed)?;
        append_entry(archive, &mut header, &name, std::io::empty())
            .map_err(|source| io_error(&name, source))
    }

    /// Adds an in-memory file to the archive and the manifest.
    ///
    /// The path is made absolute, so `a.txt` is recorded as `/a.txt`.
    pub fn add_file(&mut self, path: &str, data: &[u8]) -> Result<(), CollectError> {
        let path = normalize_path(path)?;
        if path == "/" {
            return Err(CollectError::InvalidPath(PathBuf::from(path)));
        }
        let path = path.as_str();

        let mut hasher = ContentHasher::new();
        hasher.update(data);
        let hash = hasher.sum();

        let mut header =
            prepare_header(tar::EntryType::Regular, data.len() as u64, self.mtime());
        let archive = self.archive.as_mut().ok_or(CollectError::Closed)?;
        append_entry(archive, &mut header, path, data).map_err(|source| io_error(path, source))?;

        tracing::debug!("added {path} ({} bytes)", data.len());
        self.push(FileEntry {
            path: path.to_string(),
            size: data.len() as u64,
            hash,
        })
    }

    /// Walks the directory at `root` and adds every directory and regular file
    /// below it to the archive and the manifest, prefixing archive names with
    /// `mount_path`. The root directory itself is not added.
    ///
    /// Entries are visited in file name order. Symbolic links are followed; a
    /// link that points back to one of its ancestors aborts the walk.
    pub fn collect(&mut self, root: impl AsRef<Path>, mount_path: &str) -> Result<(), CollectError> {
        let root = root.as_ref();
        if self.archive.is_none() {
            return Err(CollectError::Closed);
        }

        let walker = WalkDir::new(root)
            .follow_links(true)
            .min_depth(1)
            .sort_by_file_name();

        for entry in walker {
            let entry = entry.map_err(|err| walk_error(root, err))?;
            if let Some(file) = self.append_walked_entry(root, &entry, mount_path)? {
                self.push(file)?;
            }
        }

        Ok(())
    }

    /// Finishes the tar stream and then the compressor. Calling this more than
    /// once is a no-op.
    pub fn close(&mut self) -> Result<(), CollectError> {
        let Some(archive) = self.archive.take() else {
            return Ok(());
        };
        let encoder = archive.into_inner().map_err(CollectError::Finish)?;
        let sink = encoder.finish().map_err(CollectError::Finish)?;
        self.sink = Some(sink);
        Ok(())
    }

    /// Closes the collector and returns the sink the archive was written to.
    pub fn into_sink(mut self) -> Result<W, CollectError> {
        self.close()?;
        self.sink.take().ok_or(CollectError::Closed)
    }

    fn mtime(&self) -> u64 {
        // Tar cannot represent times before the epoch.
        u64::try_from(self.mod_time.timestamp()).unwrap_or(0)
    }

    fn push(&mut self, file: FileEntry) -> Result<(), CollectError> {
        self.files.push(file);
        if self.files.len() > self.options.max_files {
            return Err(CollectError::TooManyFiles {
                max: self.options.max_files,
            });
        }
        Ok(())
    }

    fn append_walked_entry(
        &mut self,
        root: &Path,
        entry: &walkdir::DirEntry,
        mount_path: &str,
    ) -> Result<Option<FileEntry>, CollectError> {
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let name = archive_path(mount_path, relative)
            .ok_or_else(|| CollectError::InvalidPath(path.to_path_buf()))?;

        // Follows symbolic links because the walker does.
        let metadata = entry.metadata().map_err(|err| walk_error(root, err))?;
        let mtime = self.mtime();
        let archive = self.archive.as_mut().ok_or(CollectError::Closed)?;

        if metadata.is_dir() {
            let name = directory_name(&name);
            let mut header = prepare_header(tar::EntryType::Directory, 0, mtime);
            append_entry(archive, &mut header, &name, std::io::empty())
                .map_err(|source| io_error(path, source))?;
            return Ok(Some(FileEntry::directory(name)));
        }

        if !metadata.is_file() {
            tracing::warn!("skipping '{}': not a regular file", path.display());
            return Ok(None);
        }

        let size = metadata.len();
        let file = fs_err::File::open(path).map_err(|source| io_error(path, source))?;
        let mut reader = HashingReader::new(ExactSizeReader::new(file, size));
        let mut header = prepare_header(tar::EntryType::Regular, size, mtime);
        append_entry(archive, &mut header, &name, &mut reader)
            .map_err(|source| io_error(path, source))?;
        let (_, hasher) = reader.finalize();

        tracing::debug!("added {name} ({size} bytes)");
        Ok(Some(FileEntry {
            path: name,
            size,
            hash: hasher.sum(),
        }))
    }
}

impl<W: Write> Drop for Collector<W> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!("failed to close archive: {err}");
        }
    }
}

fn io_error(path: impl AsRef<Path>, source: std::io::Error) -> CollectError {
    CollectError::Io {
        path: path.as_ref().to_path_buf(),
        source,
    }
}

fn walk_error(root: &Path, err: walkdir::Error) -> CollectError {
    let path = err.path().map_or_else(|| root.to_path_buf(), Path::to_path_buf);
    if let Some(ancestor) = err.loop_ancestor() {
        return CollectError::SymlinkLoop {
            path,
            ancestor: ancestor.to_path_buf(),
        };
    }
    let source = err
        .into_io_error()
        .unwrap_or_else(|| std::io::Error::other("failed to walk directory"));
    CollectError::Io { path, source }
}

/// Turns a path given to `add_file` or `add_directory` into an absolute
/// archive name.
fn normalize_path(path: &str) -> Result<String, CollectError> {
    archive_path("", Path::new(path.trim_start_matches('/')))
        .ok_or_else(|| CollectError::InvalidPath(PathBuf::from(path)))
}
