//! Archive creation
//!
//! Walks each source path depth-first and emits one header (plus payload for
//! regular files) per filesystem entry. A directory's header is always written
//! before anything inside it, and children are visited in file-name order so
//! the same tree always produces the same entry order.
//!
//! Symlinks, sockets, FIFOs and device nodes are not archived: they are
//! skipped with a warning and counted in [`CreateSummary::skipped`].
//!
//! # Examples
//!
//! ```no_run
//! use std::path::PathBuf;
//! use gar::{CompressionKind, CreateOptions, create_archive};
//!
//! let summary = create_archive(
//!     "backup.tar.gz".as_ref(),
//!     &[PathBuf::from("photos"), PathBuf::from("notes.txt")],
//!     CompressionKind::Gzip,
//!     &CreateOptions::default(),
//! )?;
//! println!("{} entries", summary.entries);
//! # Ok::<(), gar::ArchiveError>(())
//! ```

use indicatif::ProgressBar;
use log::{debug, warn};
use std::cmp;
use std::fs::{self, File, FileType};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::compression::{ArchiveSink, CompressionKind};
use crate::error::{ArchiveError, Result};
use crate::header::{BLOCK_SIZE, EntryHeader, padding_for};
use crate::linux::fadvise_dontneed;
use crate::utils::{format_size, spinner, with_progress};

/// Buffer size for payload copies and the archive writer (256KB)
const BUFFER_SIZE: usize = 256 * 1024;

const ZERO_BLOCK: [u8; BLOCK_SIZE] = [0; BLOCK_SIZE];

/// Options for [`create_archive`]
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Print each entry name as it is added
    pub verbose: bool,
    /// Quiet level (0 = progress and summary, 1+ = silent)
    pub quiet: u8,
}

/// What a create run wrote
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateSummary {
    /// Headers written (files and directories)
    pub entries: usize,
    /// Payload bytes written, before compression
    pub bytes: u64,
    /// Filesystem entries left out because their type is unsupported
    pub skipped: usize,
}

/// Streaming archive encoder over any writer
pub struct ArchiveWriter<W: Write> {
    sink: W,
    buffer: Vec<u8>,
    summary: CreateSummary,
    progress: Option<ProgressBar>,
    verbose: bool,
    exclude: Option<FileIdentity>,
}

impl<W: Write> ArchiveWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            buffer: vec![0u8; BUFFER_SIZE],
            summary: CreateSummary::default(),
            progress: None,
            verbose: false,
            exclude: None,
        }
    }

    /// Report progress on `progress`; with `verbose`, also print each name
    pub fn with_progress(mut self, progress: Option<ProgressBar>, verbose: bool) -> Self {
        self.progress = progress;
        self.verbose = verbose;
        self
    }

    /// Never archive the file behind `file` (the archive being written)
    fn excluding(mut self, file: &File) -> Self {
        self.exclude = FileIdentity::of_file(file);
        self
    }

    /// Append `path` and, for a directory, everything below it.
    ///
    /// The entry is named after the last component of `path`; leading
    /// directories of `path` are not carried into the archive.
    pub fn append_path(&mut self, path: &Path) -> Result<()> {
        self.emit(path, "")
    }

    /// Write the end marker and return the sink with a summary of the run
    pub fn finish(mut self) -> Result<(W, CreateSummary)> {
        self.sink
            .write_all(&ZERO_BLOCK)
            .and_then(|()| self.sink.write_all(&ZERO_BLOCK))
            .and_then(|()| self.sink.flush())
            .map_err(ArchiveError::ArchiveWriteFailed)?;
        Ok((self.sink, self.summary))
    }

    fn emit(&mut self, path: &Path, prefix: &str) -> Result<()> {
        let meta =
            fs::symlink_metadata(path).map_err(|e| ArchiveError::source_unreadable(path, e))?;
        let file_type = meta.file_type();

        if self.exclude.is_some() && self.exclude == FileIdentity::of_metadata(&meta) {
            warn!("{}: file is the archive; not dumped", path.display());
            self.summary.skipped += 1;
            return Ok(());
        }

        if !file_type.is_dir() && !file_type.is_file() {
            warn!(
                "{}: {} not supported, skipping",
                path.display(),
                describe_file_type(&file_type)
            );
            self.summary.skipped += 1;
            return Ok(());
        }

        let name = entry_name(path, prefix)?;
        let header = EntryHeader::from_metadata(name, &meta);

        if header.is_dir() {
            self.write_header(&header)?;

            let mut children = fs::read_dir(path)
                .and_then(|entries| {
                    entries
                        .map(|entry| entry.map(|e| e.path()))
                        .collect::<io::Result<Vec<PathBuf>>>()
                })
                .map_err(|e| ArchiveError::source_unreadable(path, e))?;
            children.sort();

            for child in &children {
                self.emit(child, &header.name)?;
            }
        } else {
            let mut file = File::open(path).map_err(|e| ArchiveError::source_unreadable(path, e))?;
            self.write_header(&header)?;
            self.copy_payload(&mut file, path, header.size)?;
            fadvise_dontneed(&file, header.size);
        }

        Ok(())
    }

    fn write_header(&mut self, header: &EntryHeader) -> Result<()> {
        let block = header.encode()?;
        self.sink
            .write_all(&block)
            .map_err(ArchiveError::ArchiveWriteFailed)?;
        self.summary.entries += 1;
        debug!("added {} ({} bytes)", header.name, header.size);

        if self.verbose {
            match &self.progress {
                Some(pb) => pb.suspend(|| println!("{}", header.name)),
                None => println!("{}", header.name),
            }
        }
        if let Some(ref pb) = self.progress {
            pb.inc(1);
            pb.set_message(header.name.clone());
        }
        Ok(())
    }

    /// Copy exactly `size` bytes of `file`, then pad to the block boundary
    fn copy_payload(&mut self, file: &mut File, path: &Path, size: u64) -> Result<()> {
        let mut remaining = size;
        while remaining > 0 {
            let want = cmp::min(remaining, self.buffer.len() as u64) as usize;
            let n = match file.read(&mut self.buffer[..want]) {
                Ok(0) => {
                    return Err(ArchiveError::SourceChanged {
                        path: path.to_path_buf(),
                        expected: size,
                        actual: size - remaining,
                    });
                },
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ArchiveError::source_unreadable(path, e)),
            };
            self.sink
                .write_all(&self.buffer[..n])
                .map_err(ArchiveError::ArchiveWriteFailed)?;
            remaining -= n as u64;
        }

        let padding = padding_for(size) as usize;
        self.sink
            .write_all(&ZERO_BLOCK[..padding])
            .map_err(ArchiveError::ArchiveWriteFailed)?;
        self.summary.bytes += size;
        Ok(())
    }
}

/// Create (or truncate) `archive_path` and write every source into it.
///
/// # Errors
///
/// - [`ArchiveError::ArchiveCreateFailed`] before anything is written
/// - [`ArchiveError::SourceUnreadable`] / [`ArchiveError::SourceChanged`] for a
///   source that cannot be read or shrinks while being copied
/// - [`ArchiveError::ArchiveWriteFailed`] if the destination rejects a write
///
/// On error the partially written archive is closed and left on disk.
pub fn create_archive(
    archive_path: &Path,
    sources: &[PathBuf],
    compression: CompressionKind,
    options: &CreateOptions,
) -> Result<CreateSummary> {
    let file = File::create(archive_path).map_err(|source| ArchiveError::ArchiveCreateFailed {
        path: archive_path.to_path_buf(),
        source,
    })?;

    let summary = with_progress(
        spinner(options.quiet, "Archiving"),
        |progress| -> Result<CreateSummary> {
            let sink = ArchiveSink::new(BufWriter::with_capacity(BUFFER_SIZE, &file), compression);
            let mut writer = ArchiveWriter::new(sink)
                .with_progress(progress, options.verbose)
                .excluding(&file);

            for source in sources {
                writer.append_path(source)?;
            }

            let (sink, summary) = writer.finish()?;
            sink.finish()
                .and_then(|buffered| buffered.into_inner().map_err(|e| e.into_error()))
                .map_err(ArchiveError::ArchiveWriteFailed)?;
            Ok(summary)
        },
    )?;

    if options.quiet == 0 {
        println!(
            "Archived {} entries ({}) to {}",
            summary.entries,
            format_size(summary.bytes),
            archive_path.display()
        );
        if summary.skipped > 0 {
            println!("Skipped {} unsupported entries", summary.skipped);
        }
    }

    Ok(summary)
}

/// Archive name for `path`: its last component, under `prefix` if non-empty
fn entry_name(path: &Path, prefix: &str) -> Result<String> {
    let base = match path.file_name() {
        Some(base) => base.to_os_string(),
        // `.`, `..` and the like: name the entry after the directory they resolve to
        None => fs::canonicalize(path)
            .ok()
            .and_then(|p| p.file_name().map(|b| b.to_os_string()))
            .ok_or_else(|| {
                ArchiveError::source_unreadable(
                    path,
                    io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"),
                )
            })?,
    };

    let base = base.into_string().map_err(|_| {
        ArchiveError::source_unreadable(
            path,
            io::Error::new(io::ErrorKind::InvalidData, "file name is not valid UTF-8"),
        )
    })?;

    if prefix.is_empty() {
        Ok(base)
    } else {
        Ok(format!("{prefix}/{base}"))
    }
}

fn describe_file_type(file_type: &FileType) -> &'static str {
    if file_type.is_symlink() {
        return "symbolic links are";
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileTypeExt;
        if file_type.is_socket() {
            return "sockets are";
        }
        if file_type.is_fifo() {
            return "FIFOs are";
        }
        if file_type.is_block_device() || file_type.is_char_device() {
            return "device nodes are";
        }
    }
    "special files are"
}

/// Device and inode of a file, used to recognise the archive among its sources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    dev: u64,
    ino: u64,
}

impl FileIdentity {
    fn of_file(file: &File) -> Option<Self> {
        file.metadata().ok().as_ref().and_then(Self::of_metadata)
    }

    #[cfg(unix)]
    fn of_metadata(meta: &fs::Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;
        Some(Self {
            dev: meta.dev(),
            ino: meta.ino(),
        })
    }

    #[cfg(not(unix))]
    fn of_metadata(_meta: &fs::Metadata) -> Option<Self> {
        None
    }
}
