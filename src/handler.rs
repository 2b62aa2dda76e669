//! Per-entry callback contract used by the archive iterator

use std::io::Read;
use std::path::Path;

use crate::error::Result;
use crate::header::EntryHeader;

/// Strategy invoked once per archive entry, in stream order.
///
/// `payload` yields at most `header.size` bytes. The handler may read all,
/// some or none of it; the iterator drains what is left before decoding the
/// next header. Returning an error stops the iteration.
///
/// Closures with the same signature are handlers too:
///
/// ```
/// use std::io::Read;
/// use std::path::Path;
/// use gar::{ArchiveReader, EntryHeader};
///
/// let mut names = Vec::new();
/// let mut reader = ArchiveReader::new(&[0u8; 1024][..]);
/// reader.for_each_entry(
///     Path::new("empty.tar"),
///     None,
///     &mut |_: &Path, _: &mut dyn Read, h: &EntryHeader| -> gar::Result<()> {
///         names.push(h.name.clone());
///         Ok(())
///     },
/// )?;
/// assert!(names.is_empty());
/// # Ok::<(), gar::ArchiveError>(())
/// ```
pub trait EntryHandler {
    fn handle(&mut self, archive_path: &Path, payload: &mut dyn Read, header: &EntryHeader)
    -> Result<()>;

    /// Called once after the end marker has been read
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<F> EntryHandler for F
where
    F: FnMut(&Path, &mut dyn Read, &EntryHeader) -> Result<()>,
{
    fn handle(
        &mut self,
        archive_path: &Path,
        payload: &mut dyn Read,
        header: &EntryHeader,
    ) -> Result<()> {
        self(archive_path, payload, header)
    }
}
