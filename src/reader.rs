//! Pull-based iteration over a framed archive stream
//!
//! [`ArchiveReader`] decodes one header at a time and exposes the payload
//! through an [`EntryReader`] bounded to exactly `size` bytes. Whatever the
//! handler leaves unread is drained afterwards, so the stream always sits on a
//! header boundary when the next entry is decoded.

use log::debug;
use std::cmp;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use crate::compression::{CompressionKind, decoder};
use crate::error::{ArchiveError, Result};
use crate::handler::EntryHandler;
use crate::header::{BLOCK_SIZE, EntryHeader, EntryKind};
use crate::linux::fadvise_sequential;
use crate::utils::EntryFilter;

/// Upper bound on long-name and PAX record payloads (1MB)
const MAX_EXTENSION_SIZE: u64 = 1024 * 1024;

/// Sequential decoder for a (decompressed) archive stream
pub struct ArchiveReader<R: Read> {
    inner: R,
    done: bool,
}

impl<R: Read> ArchiveReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, done: false }
    }

    /// Decode the next header.
    ///
    /// Returns `Ok(None)` once the end marker has been consumed. Callers must
    /// consume or [`skip`](Self::skip) the previous entry's payload and
    /// padding first; [`for_each_entry`](Self::for_each_entry) does that.
    ///
    /// GNU long-name (`L`) and PAX (`x`) records are folded into the header
    /// they describe and never returned on their own.
    pub fn next_header(&mut self) -> Result<Option<EntryHeader>> {
        let mut overrides = Overrides::default();
        loop {
            let Some(mut header) = self.next_block_header()? else {
                if overrides.is_set() {
                    return Err(corrupt("archive ends after an extension record"));
                }
                return Ok(None);
            };

            match header.kind {
                EntryKind::Other(b'L') => {
                    let data = self.read_extension(&header)?;
                    overrides.path = Some(long_name(&data)?);
                },
                EntryKind::Other(b'x') => {
                    let data = self.read_extension(&header)?;
                    overrides.merge_pax(&data)?;
                },
                EntryKind::Other(b'K' | b'g') => {
                    debug!("ignoring extension record {:?}", header.kind);
                    self.skip(header.size + header.padding())?;
                },
                _ => {
                    overrides.apply(&mut header);
                    return Ok(Some(header));
                },
            }
        }
    }

    /// Next raw header block, or `None` at the end marker
    fn next_block_header(&mut self) -> Result<Option<EntryHeader>> {
        if self.done {
            return Ok(None);
        }

        let mut block = [0u8; BLOCK_SIZE];
        match self.read_block(&mut block)? {
            0 => return Err(corrupt("archive ends without an end marker")),
            BLOCK_SIZE => {},
            _ => return Err(corrupt("truncated header block")),
        }

        if is_zero_block(&block) {
            if self.read_block(&mut block)? != BLOCK_SIZE || !is_zero_block(&block) {
                return Err(corrupt("incomplete end marker"));
            }
            self.done = true;
            // Run the decoder to its end so a compressed envelope verifies its trailer
            io::copy(&mut self.inner, &mut io::sink())
                .map_err(|e| ArchiveError::from_stream(e, "archive trailer"))?;
            return Ok(None);
        }

        EntryHeader::decode(&block).map(Some)
    }

    /// Read the payload of an extension record and step over its padding
    fn read_extension(&mut self, header: &EntryHeader) -> Result<Vec<u8>> {
        if header.size > MAX_EXTENSION_SIZE {
            return Err(corrupt("oversized extension record"));
        }
        let mut data = vec![0u8; header.size as usize];
        self.inner
            .read_exact(&mut data)
            .map_err(|e| ArchiveError::from_stream(e, "extension record"))?;
        self.skip(header.padding())?;
        Ok(data)
    }

    /// Payload reader for an entry whose header was just decoded
    pub fn payload(&mut self, header: &EntryHeader) -> EntryReader<'_, R> {
        EntryReader {
            inner: &mut self.inner,
            remaining: header.size,
        }
    }

    /// Discard `len` bytes, failing if the stream ends first
    pub fn skip(&mut self, len: u64) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        let skipped = io::copy(&mut (&mut self.inner).take(len), &mut io::sink())
            .map_err(|e| ArchiveError::from_stream(e, "payload"))?;
        if skipped < len {
            return Err(corrupt("archive ends inside an entry payload"));
        }
        Ok(())
    }

    /// Drive `handler` over every remaining entry.
    ///
    /// Entries rejected by `filter` are skipped without calling the handler.
    /// After the end marker the handler's `finish` runs.
    pub fn for_each_entry(
        &mut self,
        archive_path: &Path,
        filter: Option<&EntryFilter>,
        handler: &mut dyn EntryHandler,
    ) -> Result<()> {
        while let Some(header) = self.next_header()? {
            let mut payload = self.payload(&header);

            if filter.is_none_or(|f| f.matches(&header.name)) {
                debug!("entry {} ({:?}, {} bytes)", header.name, header.kind, header.size);
                handler.handle(archive_path, &mut payload, &header)?;
            }

            let unread = payload.remaining();
            self.skip(unread + header.padding())?;
        }

        handler.finish()
    }

    fn read_block(&mut self, block: &mut [u8; BLOCK_SIZE]) -> Result<usize> {
        let mut filled = 0;
        while filled < BLOCK_SIZE {
            match self.inner.read(&mut block[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ArchiveError::from_stream(e, "header block")),
            }
        }
        Ok(filled)
    }
}

/// Payload of a single entry, bounded to the size its header declares
pub struct EntryReader<'a, R: Read> {
    inner: &'a mut R,
    remaining: u64,
}

impl<R: Read> EntryReader<'_, R> {
    /// Payload bytes not yet read
    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

impl<R: Read> Read for EntryReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let max = cmp::min(buf.len() as u64, self.remaining) as usize;
        let n = self.inner.read(&mut buf[..max])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("archive ends with {} payload bytes missing", self.remaining),
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

/// Open `archive_path`, unwrap its compression envelope and feed every entry
/// to `handler`.
///
/// # Errors
///
/// - [`ArchiveError::ArchiveUnreadable`] if the file cannot be opened
/// - [`ArchiveError::CorruptStream`] on bad framing, truncation or a codec failure
/// - whatever the handler returns, unchanged
pub fn iterate_entries(
    archive_path: &Path,
    compression: CompressionKind,
    filter: Option<&EntryFilter>,
    handler: &mut dyn EntryHandler,
) -> Result<()> {
    let file = File::open(archive_path).map_err(|source| ArchiveError::ArchiveUnreadable {
        path: archive_path.to_path_buf(),
        source,
    })?;

    // Linux optimization: the whole archive is read front to back exactly once
    if let Ok(meta) = file.metadata() {
        fadvise_sequential(&file, meta.len());
    }

    let stream = decoder(file, compression)?;
    ArchiveReader::new(stream).for_each_entry(archive_path, filter, handler)
}

/// Values from extension records that replace fields of the following header
#[derive(Default)]
struct Overrides {
    path: Option<String>,
    size: Option<u64>,
}

impl Overrides {
    fn is_set(&self) -> bool {
        self.path.is_some() || self.size.is_some()
    }

    /// Take `path` and `size` from a PAX record block (`"<len> <key>=<value>\n"`)
    fn merge_pax(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let space = data
                .iter()
                .position(|&b| b == b' ')
                .ok_or_else(|| corrupt("malformed pax record"))?;
            let len: usize = std::str::from_utf8(&data[..space])
                .ok()
                .and_then(|n| n.parse().ok())
                .filter(|&n| n > space + 1 && n <= data.len())
                .ok_or_else(|| corrupt("malformed pax record length"))?;

            let record = &data[space + 1..len];
            let record = record
                .strip_suffix(b"\n")
                .ok_or_else(|| corrupt("pax record not newline terminated"))?;
            let eq = record
                .iter()
                .position(|&b| b == b'=')
                .ok_or_else(|| corrupt("pax record without a value"))?;
            let (key, value) = (&record[..eq], &record[eq + 1..]);

            match key {
                b"path" => {
                    let path = std::str::from_utf8(value)
                        .map_err(|_| corrupt("pax path is not valid UTF-8"))?;
                    self.path = Some(path.trim_end_matches('/').to_string());
                },
                b"size" => {
                    let size = std::str::from_utf8(value)
                        .ok()
                        .and_then(|v| v.parse().ok())
                        .ok_or_else(|| corrupt("bad pax size"))?;
                    self.size = Some(size);
                },
                _ => {},
            }
            data = &data[len..];
        }
        Ok(())
    }

    fn apply(self, header: &mut EntryHeader) {
        if let Some(path) = self.path {
            header.name = path;
        }
        if let Some(size) = self.size
            && header.is_file()
        {
            header.size = size;
        }
    }
}

/// Entry name carried by a GNU long-name record (NUL terminated)
fn long_name(data: &[u8]) -> Result<String> {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    let name = std::str::from_utf8(&data[..end])
        .map_err(|_| corrupt("long entry name is not valid UTF-8"))?;
    Ok(name.trim_end_matches('/').to_string())
}

fn is_zero_block(block: &[u8; BLOCK_SIZE]) -> bool {
    block.iter().all(|&b| b == 0)
}

fn corrupt(msg: &str) -> ArchiveError {
    ArchiveError::CorruptStream(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::ArchiveSink;
    use crate::header::{forged_block, padding_for};
    use std::io::Write;
    use std::io::Cursor;

    fn file_header(name: &str, size: u64) -> EntryHeader {
        EntryHeader {
            name: name.to_string(),
            kind: EntryKind::Regular,
            size,
            mode: 0o644,
            mtime: 0,
        }
    }

    fn frame(entries: &[(EntryHeader, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        for (header, data) in entries {
            out.extend_from_slice(&header.encode().unwrap());
            out.extend_from_slice(data);
            out.resize(out.len() + padding_for(data.len() as u64) as usize, 0);
        }
        out.extend_from_slice(&[0u8; BLOCK_SIZE * 2]);
        out
    }

    /// Runs the iterator, reading at most `limit` bytes of each payload
    fn collect(data: &[u8], limit: usize) -> Result<Vec<(String, Vec<u8>)>> {
        let mut seen = Vec::new();
        let mut reader = ArchiveReader::new(Cursor::new(data));
        reader.for_each_entry(
            Path::new("test.tar"),
            None,
            &mut |_: &Path, payload: &mut dyn Read, h: &EntryHeader| -> Result<()> {
                let mut buf = Vec::new();
                payload
                    .take(limit as u64)
                    .read_to_end(&mut buf)
                    .map_err(|e| ArchiveError::from_stream(e, "payload"))?;
                seen.push((h.name.clone(), buf));
                Ok(())
            },
        )?;
        Ok(seen)
    }

    #[test]
    fn test_iterates_in_order() {
        let data = frame(&[
            (file_header("a.txt", 3), b"abc"),
            (file_header("b.txt", 0), b""),
            (file_header("c.bin", 600), &[7u8; 600]),
        ]);

        let seen = collect(&data, usize::MAX).unwrap();
        let names: Vec<_> = seen.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["a.txt", "b.txt", "c.bin"]);
        assert_eq!(seen[0].1, b"abc");
        assert!(seen[1].1.is_empty());
        assert_eq!(seen[2].1, vec![7u8; 600]);
    }

    #[test]
    fn test_unread_payload_is_skipped() {
        let data = frame(&[
            (file_header("big.bin", 2000), &[1u8; 2000]),
            (file_header("next.txt", 4), b"next"),
        ]);

        // Handler reads nothing at all
        let seen = collect(&data, 0).unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].0, "next.txt");

        // Handler reads part of each payload
        let seen = collect(&data, 10).unwrap();
        assert_eq!(seen[0].1, vec![1u8; 10]);
        assert_eq!(seen[1].1, b"next");
    }

    #[test]
    fn test_empty_archive() {
        let data = frame(&[]);
        assert!(collect(&data, usize::MAX).unwrap().is_empty());
    }

    #[test]
    fn test_missing_end_marker() {
        let mut data = frame(&[(file_header("a.txt", 3), b"abc")]);
        data.truncate(data.len() - BLOCK_SIZE * 2);
        let err = collect(&data, usize::MAX).unwrap_err();
        assert!(matches!(err, ArchiveError::CorruptStream(ref m) if m.contains("end marker")));
    }

    #[test]
    fn test_half_end_marker() {
        let mut data = frame(&[]);
        data.truncate(BLOCK_SIZE);
        assert!(matches!(collect(&data, 0), Err(ArchiveError::CorruptStream(_))));
    }

    #[test]
    fn test_truncated_header() {
        let mut data = frame(&[(file_header("a.txt", 3), b"abc")]);
        data.truncate(100);
        assert!(matches!(collect(&data, 0), Err(ArchiveError::CorruptStream(_))));
    }

    #[test]
    fn test_short_payload_detected_by_handler() {
        // Header declares 10 more bytes than the stream holds
        let mut data = file_header("short.bin", 30).encode().unwrap().to_vec();
        data.extend_from_slice(&[9u8; 20]);

        let err = collect(&data, usize::MAX).unwrap_err();
        assert!(matches!(err, ArchiveError::CorruptStream(_)));
    }

    #[test]
    fn test_short_payload_detected_when_skipping() {
        let mut data = file_header("short.bin", 30).encode().unwrap().to_vec();
        data.extend_from_slice(&[9u8; 20]);

        let err = collect(&data, 0).unwrap_err();
        assert!(matches!(err, ArchiveError::CorruptStream(ref m) if m.contains("payload")));
    }

    #[test]
    fn test_handler_error_stops_iteration() {
        let data = frame(&[(file_header("a", 1), b"a"), (file_header("b", 1), b"b")]);
        let mut calls = 0;
        let mut reader = ArchiveReader::new(Cursor::new(&data));
        let result = reader.for_each_entry(
            Path::new("test.tar"),
            None,
            &mut |_: &Path, _: &mut dyn Read, _: &EntryHeader| -> Result<()> {
                calls += 1;
                Err(ArchiveError::OutputFailed(io::Error::from(io::ErrorKind::BrokenPipe)))
            },
        );
        assert!(matches!(result, Err(ArchiveError::OutputFailed(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_filter_skips_handler() {
        let data = frame(&[
            (file_header("keep.txt", 4), b"keep"),
            (file_header("drop.log", 4), b"drop"),
        ]);
        let filter = EntryFilter::new(vec!["*.txt".to_string()], vec![], false);

        let mut names = Vec::new();
        let mut reader = ArchiveReader::new(Cursor::new(&data));
        reader
            .for_each_entry(
                Path::new("test.tar"),
                Some(&filter),
                &mut |_: &Path, _: &mut dyn Read, h: &EntryHeader| -> Result<()> {
                    names.push(h.name.clone());
                    Ok(())
                },
            )
            .unwrap();
        assert_eq!(names, ["keep.txt"]);
    }

    #[test]
    fn test_symlink_entry_has_no_payload() {
        let mut data = forged_block("link", EntryKind::Symlink, 0, 0o777).to_vec();
        data.extend_from_slice(&frame(&[(file_header("after", 2), b"ok")]));

        let seen = collect(&data, usize::MAX).unwrap();
        assert_eq!(seen[0].0, "link");
        assert_eq!(seen[1], ("after".to_string(), b"ok".to_vec()));
    }

    #[test]
    fn test_reads_tar_crate_output() {
        let mut builder = tar::Builder::new(Vec::new());

        let mut dir = tar::Header::new_gnu();
        dir.set_entry_type(tar::EntryType::Directory);
        dir.set_size(0);
        dir.set_mode(0o755);
        dir.set_mtime(0);
        builder.append_data(&mut dir, "pkg", io::empty()).unwrap();

        let mut file = tar::Header::new_gnu();
        file.set_size(5);
        file.set_mode(0o600);
        file.set_mtime(0);
        builder
            .append_data(&mut file, "pkg/hello.txt", &b"hello"[..])
            .unwrap();
        let data = builder.into_inner().unwrap();

        let seen = collect(&data, usize::MAX).unwrap();
        assert_eq!(seen[0].0, "pkg");
        assert_eq!(seen[1], ("pkg/hello.txt".to_string(), b"hello".to_vec()));
    }

    #[test]
    fn test_iterate_entries_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut noop = |_: &Path, _: &mut dyn Read, _: &EntryHeader| -> Result<()> { Ok(()) };
        let err = iterate_entries(
            &dir.path().join("missing.tar"),
            CompressionKind::None,
            None,
            &mut noop,
        )
        .unwrap_err();
        assert!(matches!(err, ArchiveError::ArchiveUnreadable { .. }));
    }

    #[test]
    fn test_iterate_entries_gzip_on_plain_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.tar");
        std::fs::write(&path, frame(&[(file_header("a", 1), b"a")])).unwrap();

        let mut calls = 0;
        let err = iterate_entries(
            &path,
            CompressionKind::Gzip,
            None,
            &mut |_: &Path, _: &mut dyn Read, _: &EntryHeader| -> Result<()> {
                calls += 1;
                Ok(())
            },
        )
        .unwrap_err();
        assert!(matches!(err, ArchiveError::CorruptStream(_)));
        assert_eq!(calls, 0);
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut sink = ArchiveSink::new(Vec::new(), CompressionKind::Gzip);
        sink.write_all(data).unwrap();
        sink.finish().unwrap()
    }

    fn count_gzip_entries(compressed: Vec<u8>) -> Result<usize> {
        let stream = decoder(Cursor::new(compressed), CompressionKind::Gzip)?;
        let mut count = 0;
        ArchiveReader::new(stream).for_each_entry(
            Path::new("test.tar.gz"),
            None,
            &mut |_: &Path, _: &mut dyn Read, _: &EntryHeader| -> Result<()> {
                count += 1;
                Ok(())
            },
        )?;
        Ok(count)
    }

    #[test]
    fn test_gzip_trailer_verified() {
        let compressed = gzip(&frame(&[(file_header("a.txt", 3), b"abc")]));
        assert_eq!(count_gzip_entries(compressed.clone()).unwrap(), 1);

        // CRC32 field of the gzip trailer
        let mut bad_crc = compressed.clone();
        let crc_at = bad_crc.len() - 8;
        bad_crc[crc_at] ^= 0xff;
        assert!(matches!(
            count_gzip_entries(bad_crc),
            Err(ArchiveError::CorruptStream(_))
        ));

        let mut cut = compressed;
        cut.truncate(cut.len() - 4);
        assert!(matches!(count_gzip_entries(cut), Err(ArchiveError::CorruptStream(_))));
    }

    #[test]
    fn test_gnu_long_name() {
        let long = format!("{}/file.txt", "d".repeat(120));
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(2);
        header.set_mode(0o644);
        header.set_mtime(0);
        builder.append_data(&mut header, &long, &b"hi"[..]).unwrap();
        let data = builder.into_inner().unwrap();

        let seen = collect(&data, usize::MAX).unwrap();
        assert_eq!(seen, [(long, b"hi".to_vec())]);
    }

    /// One PAX record, `"<len> <key>=<value>\n"` where `len` counts itself
    fn pax_record(key: &str, value: &str) -> Vec<u8> {
        let body = format!(" {key}={value}\n");
        let mut len = body.len();
        loop {
            let total = body.len() + len.to_string().len();
            if total == len {
                break;
            }
            len = total;
        }
        format!("{len}{body}").into_bytes()
    }

    #[test]
    fn test_pax_path_and_size() {
        let long = format!("{}/notes.md", "p".repeat(300));
        let mut records = pax_record("mtime", "1700000000.5");
        records.extend(pax_record("path", &long));
        records.extend(pax_record("size", "4"));

        let pax = EntryHeader {
            name: "PaxHeaders/notes.md".to_string(),
            kind: EntryKind::Other(b'x'),
            size: records.len() as u64,
            mode: 0o644,
            mtime: 0,
        };
        // The ustar header itself claims an empty payload
        let data = frame(&[
            (pax, &records[..]),
            (file_header("notes.md", 0), b"memo"),
            (file_header("after.txt", 2), b"ok"),
        ]);

        let seen = collect(&data, usize::MAX).unwrap();
        assert_eq!(seen[0], (long, b"memo".to_vec()));
        assert_eq!(seen[1], ("after.txt".to_string(), b"ok".to_vec()));
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_malformed_pax_record() {
        let records = b"99 path=x\n".to_vec();
        let pax = EntryHeader {
            name: "PaxHeaders/x".to_string(),
            kind: EntryKind::Other(b'x'),
            size: records.len() as u64,
            mode: 0o644,
            mtime: 0,
        };
        let data = frame(&[(pax, &records[..]), (file_header("x", 0), b"")]);
        assert!(matches!(collect(&data, 0), Err(ArchiveError::CorruptStream(_))));
    }

    #[test]
    fn test_long_name_without_entry() {
        let record = EntryHeader {
            name: "././@LongLink".to_string(),
            kind: EntryKind::Other(b'L'),
            size: 6,
            mode: 0o644,
            mtime: 0,
        };
        let data = frame(&[(record, b"name\0\0")]);
        let err = collect(&data, 0).unwrap_err();
        assert!(matches!(err, ArchiveError::CorruptStream(ref m) if m.contains("extension record")));
    }
}
