//! Entry header model and its block framing
//!
//! Each entry is framed as one 512-byte ustar header block, followed by the
//! payload and zero padding up to the next block boundary. Two all-zero blocks
//! end the stream. The block layout itself (octal fields, the ustar
//! name/prefix split) is delegated to [`tar::Header`]; this module owns the
//! validation rules: magic, checksum, and which entry types carry a payload.

use std::fs::Metadata;
use std::time::UNIX_EPOCH;
use tar::EntryType;

use crate::error::{ArchiveError, Result};

/// Size of a header block and the payload alignment unit
pub const BLOCK_SIZE: usize = 512;

/// Byte range of the checksum field inside a header block
const CHECKSUM_FIELD: std::ops::Range<usize> = 148..156;

/// Kind of archive member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Regular,
    Directory,
    /// Decoded from foreign archives only; never written
    Symlink,
    /// Any other type flag (links, devices, pax/gnu extension records)
    Other(u8),
}

impl EntryKind {
    fn from_entry_type(entry_type: EntryType) -> Self {
        if entry_type.is_file() {
            Self::Regular
        } else if entry_type.is_dir() {
            Self::Directory
        } else if entry_type.is_symlink() {
            Self::Symlink
        } else {
            Self::Other(entry_type.as_byte())
        }
    }

    fn entry_type(self) -> EntryType {
        match self {
            Self::Regular => EntryType::Regular,
            Self::Directory => EntryType::Directory,
            Self::Symlink => EntryType::Symlink,
            Self::Other(flag) => EntryType::new(flag),
        }
    }

    /// Entry types whose size field never describes an inline payload
    fn is_header_only(self) -> bool {
        match self {
            Self::Directory | Self::Symlink => true,
            Self::Other(flag) => matches!(flag, b'1' | b'3' | b'4' | b'6'),
            Self::Regular => false,
        }
    }
}

/// Metadata of one archive member.
///
/// `name` is relative and `/`-separated, without a trailing slash. For
/// regular files `size` is the exact payload length that follows the header
/// in the stream; it is always 0 for directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryHeader {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
    pub mode: u32,
    /// Seconds since the Unix epoch
    pub mtime: u64,
}

impl EntryHeader {
    /// Build a header for a regular file or directory from its `stat` result
    pub fn from_metadata(name: String, meta: &Metadata) -> Self {
        let kind = if meta.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::Regular
        };
        let size = if kind == EntryKind::Regular {
            meta.len()
        } else {
            0
        };
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs());

        Self {
            name,
            kind,
            size,
            mode: permission_bits(meta),
            mtime,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::Regular
    }

    /// Number of zero bytes that follow the payload to reach a block boundary
    pub fn padding(&self) -> u64 {
        padding_for(self.size)
    }

    /// Encode into a ustar header block
    pub fn encode(&self) -> Result<[u8; BLOCK_SIZE]> {
        let mut header = tar::Header::new_ustar();
        header
            .set_path(&self.name)
            .map_err(|_| ArchiveError::NameTooLong(self.name.clone()))?;
        header.set_entry_type(self.kind.entry_type());
        header.set_size(self.size);
        header.set_mode(self.mode);
        header.set_mtime(self.mtime);
        header.set_cksum();
        Ok(*header.as_bytes())
    }

    /// Decode a header block that is known not to be part of the end marker
    pub fn decode(block: &[u8; BLOCK_SIZE]) -> Result<Self> {
        let header = tar::Header::from_byte_slice(block);
        if header.as_ustar().is_none() && header.as_gnu().is_none() {
            return Err(corrupt("bad header magic"));
        }

        let stored = header
            .cksum()
            .map_err(|e| corrupt(format!("unreadable header checksum: {e}")))?;
        if stored != block_checksum(block) {
            return Err(corrupt("header checksum mismatch"));
        }

        let name = String::from_utf8(header.path_bytes().into_owned())
            .map_err(|_| corrupt("entry name is not valid UTF-8"))?;
        let name = name.trim_end_matches('/').to_string();

        let kind = EntryKind::from_entry_type(header.entry_type());
        let size = if kind.is_header_only() {
            0
        } else {
            header
                .size()
                .map_err(|e| corrupt(format!("bad size field for {name}: {e}")))?
        };
        let mode = header
            .mode()
            .map_err(|e| corrupt(format!("bad mode field for {name}: {e}")))?;
        let mtime = header
            .mtime()
            .map_err(|e| corrupt(format!("bad mtime field for {name}: {e}")))?;

        Ok(Self {
            name,
            kind,
            size,
            mode: mode & 0o7777,
            mtime,
        })
    }
}

/// Zero bytes needed after `size` payload bytes to realign on a block
pub fn padding_for(size: u64) -> u64 {
    let rem = size % BLOCK_SIZE as u64;
    if rem == 0 { 0 } else { BLOCK_SIZE as u64 - rem }
}

/// Unsigned byte sum with the checksum field read as spaces
fn block_checksum(block: &[u8; BLOCK_SIZE]) -> u32 {
    block
        .iter()
        .enumerate()
        .map(|(i, &b)| {
            if CHECKSUM_FIELD.contains(&i) {
                u32::from(b' ')
            } else {
                u32::from(b)
            }
        })
        .sum()
}

fn corrupt(msg: impl Into<String>) -> ArchiveError {
    ArchiveError::CorruptStream(msg.into())
}

#[cfg(unix)]
fn permission_bits(meta: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(meta: &Metadata) -> u32 {
    match (meta.is_dir(), meta.permissions().readonly()) {
        (true, _) => 0o755,
        (false, true) => 0o444,
        (false, false) => 0o644,
    }
}

/// Hand-built block with an arbitrary name, bypassing the path checks that
/// [`tar::Header::set_path`] enforces. Lets tests forge hostile archives.
#[cfg(test)]
pub(crate) fn forged_block(name: &str, kind: EntryKind, size: u64, mode: u32) -> [u8; BLOCK_SIZE] {
    let mut header = tar::Header::new_ustar();
    let field = &mut header.as_old_mut().name;
    field[..name.len()].copy_from_slice(name.as_bytes());
    header.set_entry_type(kind.entry_type());
    header.set_size(size);
    header.set_mode(mode);
    header.set_mtime(0);
    header.set_cksum();
    *header.as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str, kind: EntryKind, size: u64) -> EntryHeader {
        EntryHeader {
            name: name.to_string(),
            kind,
            size,
            mode: 0o640,
            mtime: 1_700_000_000,
        }
    }

    #[test]
    fn test_encode_decode_regular() {
        let header = sample("docs/readme.txt", EntryKind::Regular, 1234);
        let block = header.encode().unwrap();
        assert_eq!(EntryHeader::decode(&block).unwrap(), header);
    }

    #[test]
    fn test_directory_size_is_zero_on_decode() {
        // A directory block that claims a size must not swallow the next header
        let block = forged_block("dir", EntryKind::Directory, 4096, 0o755);
        let decoded = EntryHeader::decode(&block).unwrap();
        assert!(decoded.is_dir());
        assert_eq!(decoded.size, 0);
    }

    #[test]
    fn test_long_name_uses_prefix_field() {
        let dir = "a".repeat(120);
        let header = sample(&format!("{dir}/file.bin"), EntryKind::Regular, 1);
        let block = header.encode().unwrap();
        assert_eq!(EntryHeader::decode(&block).unwrap().name, header.name);
    }

    #[test]
    fn test_name_too_long() {
        let header = sample(&"x".repeat(300), EntryKind::Regular, 0);
        assert!(matches!(header.encode(), Err(ArchiveError::NameTooLong(_))));
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut block = sample("a.txt", EntryKind::Regular, 3).encode().unwrap();
        block[0] ^= 0x01;
        assert!(matches!(EntryHeader::decode(&block), Err(ArchiveError::CorruptStream(_))));
    }

    #[test]
    fn test_bad_magic() {
        let mut block = sample("a.txt", EntryKind::Regular, 3).encode().unwrap();
        block[257..263].copy_from_slice(b"nope!\0");
        let err = EntryHeader::decode(&block).unwrap_err();
        assert!(err.to_string().contains("magic"));
    }

    #[test]
    fn test_trailing_slash_stripped() {
        let block = forged_block("photos/", EntryKind::Directory, 0, 0o755);
        assert_eq!(EntryHeader::decode(&block).unwrap().name, "photos");
    }

    #[test]
    fn test_symlink_decodes_as_header_only() {
        let block = forged_block("link", EntryKind::Symlink, 10, 0o777);
        let decoded = EntryHeader::decode(&block).unwrap();
        assert_eq!(decoded.kind, EntryKind::Symlink);
        assert_eq!(decoded.size, 0);
    }

    #[test]
    fn test_padding_for() {
        assert_eq!(padding_for(0), 0);
        assert_eq!(padding_for(1), 511);
        assert_eq!(padding_for(512), 0);
        assert_eq!(padding_for(513), 511);
    }

    #[test]
    fn test_from_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, b"12345").unwrap();

        let file = EntryHeader::from_metadata("f.txt".into(), &std::fs::metadata(&path).unwrap());
        assert!(file.is_file());
        assert_eq!(file.size, 5);
        assert!(file.mtime > 0);

        let root = EntryHeader::from_metadata("d".into(), &std::fs::metadata(dir.path()).unwrap());
        assert!(root.is_dir());
        assert_eq!(root.size, 0);
    }
}
