//! Command-line argument parsing
//!
//! Defines the CLI for the `gar` binary using clap. The mode flags are
//! checked in the order list (`-t`), create (`-c`), extract (`-x`); the first
//! one present wins. Trailing operands are match patterns when listing or
//! extracting, and `ARCHIVE SOURCE...` when creating.
//!
//! # Examples
//!
//! ```
//! use clap::Parser;
//! use gar::{Args, CompressionKind};
//!
//! let args = Args::parse_from(["gar", "-z", "-x", "backup.tar.gz", "-C", "out", "docs"]);
//! assert_eq!(args.compression_kind()?, CompressionKind::Gzip);
//! assert!(args.filter().is_some());
//! # Ok::<(), gar::ArchiveError>(())
//! ```

use clap::Parser;
use std::path::PathBuf;

use crate::compression::CompressionKind;
use crate::error::Result;
use crate::utils::EntryFilter;

/// Streaming archiver: create, list and extract tar archives
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
#[command(after_help = "Examples:
  gar -c backup.tar photos notes.txt     Archive a directory and a file
  gar -z -c backup.tar.gz photos          Same, gzip compressed
  gar -t backup.tar                       List entry names
  gar -v -t backup.tar                    List with mode, size and date
  gar -x backup.tar -C /tmp/restore       Extract into /tmp/restore
  gar -x backup.tar 'photos/*.jpg'        Extract only matching entries
  gar -x backup.tar --exclude '*.log'     Extract everything except .log files
  gar -O -x backup.tar notes.txt          Write notes.txt to stdout")]
pub struct Args {
    /// List the entries of ARCHIVE
    #[arg(short = 't', long = "list", value_name = "ARCHIVE")]
    pub list: Option<PathBuf>,

    /// Create an archive: first operand is the archive, the rest are sources
    #[arg(short = 'c', long = "create")]
    pub create: bool,

    /// Extract the entries of ARCHIVE
    #[arg(short = 'x', long = "extract", value_name = "ARCHIVE")]
    pub extract: Option<PathBuf>,

    /// Filter the archive through gzip
    #[arg(short = 'z', long = "gzip")]
    pub gzip: bool,

    /// Compression of the archive stream (none, gzip)
    #[arg(long = "compression", value_name = "KIND")]
    pub compression: Option<String>,

    /// Directory to extract into (default: current directory)
    #[arg(short = 'C', long = "directory", value_name = "DIR")]
    pub directory: Option<PathBuf>,

    /// Verbose listing; print each name while creating
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Don't replace existing files when extracting
    #[arg(short = 'k', long = "keep-old-files")]
    pub keep_existing: bool,

    /// Don't restore modification times
    #[arg(short = 'm', long = "touch")]
    pub no_mtime: bool,

    /// Extract file contents to stdout
    #[arg(short = 'O', long = "to-stdout")]
    pub to_stdout: bool,

    /// Exclude entries matching PATTERN (repeatable)
    #[arg(long = "exclude", value_name = "PATTERN")]
    pub exclude: Vec<String>,

    /// Match patterns case-insensitively
    #[arg(short = 'i', long = "ignore-case")]
    pub ignore_case: bool,

    /// Quiet mode (-q quieter, -qq quietest)
    #[arg(short = 'q', long = "quiet", action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Patterns (list, extract) or ARCHIVE SOURCE... (create)
    #[arg(value_name = "ARGS")]
    pub operands: Vec<String>,
}

impl Args {
    /// Compression selected by `-z` or `--compression`; `-z` takes precedence
    pub fn compression_kind(&self) -> Result<CompressionKind> {
        if self.gzip {
            return Ok(CompressionKind::Gzip);
        }
        match &self.compression {
            Some(name) => CompressionKind::from_name(name),
            None => Ok(CompressionKind::None),
        }
    }

    /// Entry filter built from the operands and `--exclude`; `None` selects everything
    pub fn filter(&self) -> Option<EntryFilter> {
        if self.operands.is_empty() && self.exclude.is_empty() {
            return None;
        }
        Some(EntryFilter::new(
            self.operands.clone(),
            self.exclude.clone(),
            self.ignore_case,
        ))
    }
}
