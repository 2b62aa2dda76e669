//! Archive listing functionality

use std::io::{self, Read, Write};
use std::path::Path;

use crate::compression::CompressionKind;
use crate::error::{ArchiveError, Result};
use crate::handler::EntryHandler;
use crate::header::{EntryHeader, EntryKind};
use crate::reader::iterate_entries;
use crate::utils::{EntryFilter, format_datetime, format_size};

/// Writes one line per entry, in archive order.
///
/// The short form is just the entry name. The verbose form is
///
/// ```text
/// drwxr-xr-x        0B  2024-01-15 10:30:00  photos
/// -rw-r--r--      1.5M  2024-01-15 10:31:12  photos/beach.jpg
/// ```
pub struct ListHandler<W: Write> {
    out: W,
    verbose: bool,
}

impl<W: Write> ListHandler<W> {
    pub fn new(out: W, verbose: bool) -> Self {
        Self { out, verbose }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> EntryHandler for ListHandler<W> {
    fn handle(&mut self, _: &Path, _: &mut dyn Read, header: &EntryHeader) -> Result<()> {
        let written = if self.verbose {
            writeln!(
                self.out,
                "{}  {:>8}  {}  {}",
                format_mode(header.kind, header.mode),
                format_size(header.size),
                format_datetime(header.mtime),
                header.name
            )
        } else {
            writeln!(self.out, "{}", header.name)
        };
        written.map_err(ArchiveError::OutputFailed)
    }

    fn finish(&mut self) -> Result<()> {
        self.out.flush().map_err(ArchiveError::OutputFailed)
    }
}

/// Print the names of the entries selected by `filter` to stdout
pub fn list_archive(
    archive_path: &Path,
    compression: CompressionKind,
    filter: Option<&EntryFilter>,
    verbose: bool,
) -> Result<()> {
    let stdout = io::stdout();
    let mut handler = ListHandler::new(stdout.lock(), verbose);
    iterate_entries(archive_path, compression, filter, &mut handler)
}

/// `ls -l` style type and permission column
fn format_mode(kind: EntryKind, mode: u32) -> String {
    let type_char = match kind {
        EntryKind::Regular => '-',
        EntryKind::Directory => 'd',
        EntryKind::Symlink => 'l',
        EntryKind::Other(b'3') => 'c',
        EntryKind::Other(b'4') => 'b',
        EntryKind::Other(b'6') => 'p',
        EntryKind::Other(_) => '?',
    };

    let mut out = String::with_capacity(10);
    out.push(type_char);
    for (shift, special, special_char) in [(6, 0o4000, 's'), (3, 0o2000, 's'), (0, 0o1000, 't')] {
        let bits = (mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(match (bits & 0o1 != 0, mode & special != 0) {
            (true, true) => special_char,
            (false, true) => special_char.to_ascii_uppercase(),
            (true, false) => 'x',
            (false, false) => '-',
        });
    }
    out
}
