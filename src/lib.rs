//! Streaming tar archiver
//!
//! # Overview
//!
//! Archives are a flat sequence of 512-byte ustar header blocks, each followed
//! by the entry's payload padded to the block size, and closed by two zero
//! blocks. The optional gzip envelope wraps the whole stream.
//!
//! - [`ArchiveWriter`] / [`create_archive`] turn directory trees into archives
//! - [`ArchiveReader`] / [`iterate_entries`] decode them one entry at a time and
//!   hand each entry to an [`EntryHandler`]
//! - [`ListHandler`], [`ExtractHandler`] and [`PipeHandler`] implement the
//!   list, extract and pipe-to-stdout operations on top of that
//!
//! Nothing is buffered beyond a single entry: archives of any size are
//! processed in constant memory.

pub mod args;
pub mod compression;
pub mod error;
pub mod extract;
pub mod glob;
pub mod handler;
pub mod header;
pub mod linux;
pub mod list;
pub mod pipe;
pub mod reader;
pub mod utils;
pub mod writer;

pub use args::Args;
pub use compression::{ArchiveSink, CompressionKind, decoder};
pub use error::{ArchiveError, Result};
pub use extract::{ExtractHandler, ExtractOptions, ExtractSummary, extract_archive, safe_join};
pub use glob::glob_match;
pub use handler::EntryHandler;
pub use header::{EntryHeader, EntryKind};
pub use list::{ListHandler, list_archive};
pub use pipe::{PipeHandler, extract_to_stdout};
pub use reader::{ArchiveReader, EntryReader, iterate_entries};
pub use utils::{EntryFilter, format_size};
pub use writer::{ArchiveWriter, CreateOptions, CreateSummary, create_archive};
