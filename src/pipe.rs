//! Extraction to stdout for piping to other commands

use std::io::{self, Read, Write};
use std::path::Path;

use crate::compression::CompressionKind;
use crate::error::{ArchiveError, Result};
use crate::handler::EntryHandler;
use crate::header::EntryHeader;
use crate::reader::iterate_entries;
use crate::utils::EntryFilter;

/// Writes regular-file payloads to a sink, back to back in archive order.
///
/// Directories and other entry kinds produce no output.
pub struct PipeHandler<W: Write> {
    out: W,
}

impl<W: Write> PipeHandler<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> EntryHandler for PipeHandler<W> {
    fn handle(&mut self, _: &Path, payload: &mut dyn Read, header: &EntryHeader) -> Result<()> {
        if !header.is_file() {
            return Ok(());
        }

        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = match payload.read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ArchiveError::from_stream(e, "entry payload")),
            };
            self.out
                .write_all(&buf[..n])
                .map_err(ArchiveError::OutputFailed)?;
        }
    }

    fn finish(&mut self) -> Result<()> {
        self.out.flush().map_err(ArchiveError::OutputFailed)
    }
}

/// Write the payload of every selected regular file to stdout.
///
/// Multiple files are concatenated without separators.
pub fn extract_to_stdout(
    archive_path: &Path,
    compression: CompressionKind,
    filter: Option<&EntryFilter>,
) -> Result<()> {
    let stdout = io::stdout();
    let mut handler = PipeHandler::new(stdout.lock());
    iterate_entries(archive_path, compression, filter, &mut handler)
}
