//! Archive extraction functionality
//!
//! [`ExtractHandler`] materializes entries under a destination root as the
//! iterator hands them over:
//! - Entry names are resolved with [`safe_join`], so nothing lands outside the root
//! - Regular files are written with their archived mode and modification time
//! - Directories are created on the fly; their exact mode and mtime are applied
//!   once the whole archive has been read
//! - Symlinks and special entries are skipped with a warning
//!
//! Extraction is not transactional: a failure leaves whatever was already
//! written in place.
//!
//! # Performance
//!
//! - 256KB copy buffer reused for every file
//! - Linux `fallocate()` for files whose size is known from the header
//! - Linux `fadvise(DONTNEED)` once a file is complete
//!
//! # Examples
//!
//! ```no_run
//! use gar::{CompressionKind, ExtractOptions, extract_archive};
//!
//! let summary = extract_archive(
//!     "backup.tar.gz".as_ref(),
//!     CompressionKind::Gzip,
//!     None,
//!     "restore".as_ref(),
//!     &ExtractOptions::default(),
//! )?;
//! println!("{} files", summary.files);
//! # Ok::<(), gar::ArchiveError>(())
//! ```

use filetime::FileTime;
use indicatif::ProgressBar;
use log::{debug, warn};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};

use crate::compression::CompressionKind;
use crate::error::{ArchiveError, Result};
use crate::handler::EntryHandler;
use crate::header::{EntryHeader, EntryKind};
use crate::linux::{fadvise_dontneed, preallocate_file};
use crate::reader::iterate_entries;
use crate::utils::{EntryFilter, format_size, spinner, with_progress};

/// Buffer size for file I/O (256KB for better throughput)
const BUFFER_SIZE: usize = 256 * 1024;

/// Options for [`extract_archive`]
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Leave files that already exist at the destination untouched
    pub keep_existing: bool,
    /// Set each file's and directory's mtime from its header
    pub restore_mtime: bool,
    /// Quiet level (0 = progress and summary, 1+ = silent)
    pub quiet: u8,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            keep_existing: false,
            restore_mtime: true,
            quiet: 0,
        }
    }
}

/// What an extract run produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub files: usize,
    pub directories: usize,
    /// Payload bytes written to disk
    pub bytes: u64,
    /// Entries not written: existing files kept, or unsupported kinds
    pub skipped: usize,
}

/// Decision on whether to write over an existing file
#[derive(Debug, PartialEq, Eq)]
enum OverwriteDecision {
    Overwrite,
    Skip,
}

/// A directory whose final mode and mtime are applied in `finish`
struct PendingDirectory {
    path: PathBuf,
    mode: u32,
    mtime: u64,
}

/// Entry handler that writes entries below a destination root
pub struct ExtractHandler {
    root: PathBuf,
    options: ExtractOptions,
    buffer: Vec<u8>,
    directories: Vec<PendingDirectory>,
    summary: ExtractSummary,
    progress: Option<ProgressBar>,
}

impl ExtractHandler {
    pub fn new(root: impl Into<PathBuf>, options: ExtractOptions) -> Self {
        Self {
            root: root.into(),
            options,
            buffer: vec![0u8; BUFFER_SIZE],
            directories: Vec::new(),
            summary: ExtractSummary::default(),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Option<ProgressBar>) -> Self {
        self.progress = progress;
        self
    }

    pub fn summary(&self) -> &ExtractSummary {
        &self.summary
    }

    fn extract_directory(&mut self, target: PathBuf, header: &EntryHeader) -> Result<()> {
        self.summary.directories += 1;

        // The destination root itself is created but keeps its own mode
        if target == self.root {
            return create_dirs(&target).map_err(|e| ArchiveError::extraction(&target, e));
        }

        create_dirs(&target).map_err(|e| ArchiveError::extraction(&target, e))?;
        // Owner access until `finish`, so read-only directories can still be filled
        set_mode(&target, header.mode | 0o700).map_err(|e| ArchiveError::extraction(&target, e))?;

        self.directories.push(PendingDirectory {
            path: target,
            mode: header.mode,
            mtime: header.mtime,
        });
        Ok(())
    }

    fn extract_file(
        &mut self,
        target: PathBuf,
        payload: &mut dyn Read,
        header: &EntryHeader,
    ) -> Result<()> {
        if let Some(parent) = target.parent()
            && !parent.exists()
        {
            create_dirs(parent).map_err(|e| ArchiveError::extraction(parent, e))?;
        }

        if should_overwrite_file(&target, &self.options) == OverwriteDecision::Skip {
            self.print(&format!("    skipping: {} (already exists)", header.name));
            self.summary.skipped += 1;
            return Ok(());
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&target)
            .map_err(|e| ArchiveError::extraction(&target, e))?;

        // Linux optimization: pre-allocate disk space to avoid fragmentation
        preallocate_file(&file, header.size);

        let mut writer = BufWriter::with_capacity(BUFFER_SIZE, file);
        let written = copy_payload(payload, &mut writer, &mut self.buffer, &target)?;
        let file = writer
            .into_inner()
            .map_err(|e| ArchiveError::extraction(&target, e.into_error()))?;

        // Linux optimization: tell kernel we're done with this file's cache
        fadvise_dontneed(&file, written);

        finalize_extracted_file(&file, header.mode)
            .map_err(|e| ArchiveError::extraction(&target, e))?;
        drop(file);

        if self.options.restore_mtime {
            filetime::set_file_mtime(&target, unix_filetime(header.mtime))
                .map_err(|e| ArchiveError::extraction(&target, e))?;
        }

        self.print(&format!("  extracting: {}", header.name));
        self.summary.files += 1;
        self.summary.bytes += written;
        Ok(())
    }

    fn print(&self, line: &str) {
        if self.options.quiet == 0
            && let Some(ref pb) = self.progress
        {
            pb.println(line);
        }
    }
}

impl EntryHandler for ExtractHandler {
    fn handle(
        &mut self,
        archive_path: &Path,
        payload: &mut dyn Read,
        header: &EntryHeader,
    ) -> Result<()> {
        let target = safe_join(&self.root, &header.name)?;
        if target == self.root && !header.is_dir() {
            return Err(ArchiveError::UnsafeEntryPath(header.name.clone()));
        }

        match header.kind {
            EntryKind::Directory => self.extract_directory(target, header)?,
            EntryKind::Regular => self.extract_file(target, payload, header)?,
            EntryKind::Symlink => {
                warn!("{}: {}: symbolic links are not extracted", archive_path.display(), header.name);
                self.summary.skipped += 1;
            },
            EntryKind::Other(flag) => {
                warn!(
                    "{}: {}: unsupported entry type {:?}, skipping",
                    archive_path.display(),
                    header.name,
                    flag as char
                );
                self.summary.skipped += 1;
            },
        }

        if let Some(ref pb) = self.progress {
            pb.inc(1);
            pb.set_message(header.name.clone());
        }
        Ok(())
    }

    /// Apply the archived mode and mtime of every directory, deepest first.
    ///
    /// Writing files updates their parent's mtime, so this must run last.
    fn finish(&mut self) -> Result<()> {
        for dir in self.directories.iter().rev() {
            set_mode(&dir.path, dir.mode).map_err(|e| ArchiveError::extraction(&dir.path, e))?;
            if self.options.restore_mtime {
                filetime::set_file_mtime(&dir.path, unix_filetime(dir.mtime))
                    .map_err(|e| ArchiveError::extraction(&dir.path, e))?;
            }
            debug!("finalized directory {}", dir.path.display());
        }
        self.directories.clear();
        Ok(())
    }
}

/// Resolve an entry name below `root`, refusing anything that could escape it.
///
/// `.` components are dropped; `..`, absolute names and drive prefixes are
/// rejected before the filesystem is touched. A name with no remaining
/// components resolves to `root` itself.
///
/// ```
/// use std::path::Path;
/// use gar::safe_join;
///
/// let root = Path::new("/srv/out");
/// assert_eq!(safe_join(root, "./docs/a.txt")?, root.join("docs/a.txt"));
/// assert!(safe_join(root, "../etc/passwd").is_err());
/// assert!(safe_join(root, "/etc/passwd").is_err());
/// # Ok::<(), gar::ArchiveError>(())
/// ```
pub fn safe_join(root: &Path, name: &str) -> Result<PathBuf> {
    let mut target = root.to_path_buf();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => target.push(part),
            Component::CurDir => {},
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ArchiveError::UnsafeEntryPath(name.to_string()));
            },
        }
    }
    Ok(target)
}

/// Extract every entry selected by `filter` below `destination`.
///
/// The destination is created if it does not exist.
///
/// # Errors
///
/// - [`ArchiveError::ArchiveUnreadable`] / [`ArchiveError::CorruptStream`] from the reader
/// - [`ArchiveError::UnsafeEntryPath`] for a name that would escape `destination`
/// - [`ArchiveError::ExtractionFailed`] when the filesystem refuses a write
pub fn extract_archive(
    archive_path: &Path,
    compression: CompressionKind,
    filter: Option<&EntryFilter>,
    destination: &Path,
    options: &ExtractOptions,
) -> Result<ExtractSummary> {
    create_dirs(destination).map_err(|e| ArchiveError::extraction(destination, e))?;

    let summary = with_progress(
        spinner(options.quiet, "Extracting"),
        |progress| -> Result<ExtractSummary> {
            let mut handler = ExtractHandler::new(destination, options.clone()).with_progress(progress);
            iterate_entries(archive_path, compression, filter, &mut handler)?;
            Ok(handler.summary().clone())
        },
    )?;

    if options.quiet == 0 {
        println!(
            "Extracted {} files ({}) to {}",
            summary.files,
            format_size(summary.bytes),
            destination.display()
        );
        if summary.skipped > 0 {
            println!("Skipped {} entries", summary.skipped);
        }
    }

    Ok(summary)
}

/// Determine whether an existing file at `target` may be replaced
fn should_overwrite_file(target: &Path, options: &ExtractOptions) -> OverwriteDecision {
    if options.keep_existing && fs::symlink_metadata(target).is_ok() {
        OverwriteDecision::Skip
    } else {
        OverwriteDecision::Overwrite
    }
}

/// Copy the whole payload into `writer`; returns the byte count
fn copy_payload(
    payload: &mut dyn Read,
    writer: &mut impl Write,
    buffer: &mut [u8],
    target: &Path,
) -> Result<u64> {
    let mut written = 0u64;
    loop {
        let n = match payload.read(buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ArchiveError::from_stream(e, "entry payload")),
        };
        writer
            .write_all(&buffer[..n])
            .map_err(|e| ArchiveError::extraction(target, e))?;
        written += n as u64;
    }
    Ok(written)
}

#[cfg(unix)]
fn finalize_extracted_file(file: &File, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn finalize_extracted_file(file: &File, mode: u32) -> io::Result<()> {
    let mut perms = file.metadata()?.permissions();
    perms.set_readonly(mode & 0o222 == 0);
    file.set_permissions(perms)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// `mkdir -p` with mode 0755 for newly created directories
#[cfg(unix)]
fn create_dirs(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o755).create(path)
}

#[cfg(not(unix))]
fn create_dirs(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path)
}

fn unix_filetime(mtime: u64) -> FileTime {
    FileTime::from_unix_time(i64::try_from(mtime).unwrap_or(i64::MAX), 0)
}
