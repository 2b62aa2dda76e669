//! Compression envelope around the archive stream
//!
//! The framing never knows whether it is compressed: the reader pulls blocks
//! from whatever [`decoder`] returns, and the writer pushes blocks into an
//! [`ArchiveSink`]. Both sides are selected by the same [`CompressionKind`].

use flate2::Compression;
use flate2::bufread::MultiGzDecoder;
use flate2::write::GzEncoder;
use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::str::FromStr;

use crate::error::{ArchiveError, Result};

/// Read buffer for the raw archive file (256KB, same as extraction buffers)
const READ_BUFFER_SIZE: usize = 256 * 1024;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Codec wrapped around the framed entry stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CompressionKind {
    /// Raw framing, no envelope
    #[default]
    None,
    /// gzip (RFC 1952) envelope
    Gzip,
}

impl CompressionKind {
    /// Resolve a compression kind by name.
    ///
    /// The empty string and `"none"` select [`CompressionKind::None`]. Unknown
    /// names fail here, at construction, rather than falling back to raw.
    ///
    /// # Examples
    ///
    /// ```
    /// use gar::CompressionKind;
    ///
    /// assert_eq!(CompressionKind::from_name("gzip").unwrap(), CompressionKind::Gzip);
    /// assert_eq!(CompressionKind::from_name("").unwrap(), CompressionKind::None);
    /// assert!(CompressionKind::from_name("lzma").is_err());
    /// ```
    pub fn from_name(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Self::None),
            "gzip" | "gz" => Ok(Self::Gzip),
            _ => Err(ArchiveError::UnsupportedCompression(name.to_string())),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip => "gzip",
        }
    }
}

impl FromStr for CompressionKind {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s)
    }
}

impl fmt::Display for CompressionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Wrap a raw archive source with the decoder for `kind`.
///
/// For [`CompressionKind::None`] the source is returned as is (buffered).
/// For gzip the magic bytes are checked before returning, so a file that is
/// not gzip fails with [`ArchiveError::CorruptStream`] immediately instead of
/// on the first header read.
pub fn decoder<'a, R: Read + 'a>(raw: R, kind: CompressionKind) -> Result<Box<dyn Read + 'a>> {
    let mut buffered = BufReader::with_capacity(READ_BUFFER_SIZE, raw);

    match kind {
        CompressionKind::None => Ok(Box::new(buffered)),
        CompressionKind::Gzip => {
            let head = buffered
                .fill_buf()
                .map_err(|e| ArchiveError::from_stream(e, "gzip header"))?;
            if head.is_empty() {
                return Err(ArchiveError::CorruptStream("empty gzip stream".to_string()));
            }
            if !head.starts_with(&GZIP_MAGIC) {
                return Err(ArchiveError::CorruptStream("bad gzip magic bytes".to_string()));
            }
            Ok(Box::new(MultiGzDecoder::new(buffered)))
        },
    }
}

/// Destination for the framed stream, optionally compressing on the way out
pub enum ArchiveSink<W: Write> {
    Plain(W),
    Gzip(GzEncoder<W>),
}

impl<W: Write> ArchiveSink<W> {
    pub fn new(inner: W, kind: CompressionKind) -> Self {
        match kind {
            CompressionKind::None => Self::Plain(inner),
            CompressionKind::Gzip => Self::Gzip(GzEncoder::new(inner, Compression::default())),
        }
    }

    /// Finalize the envelope (gzip trailer) and hand back the inner writer
    pub fn finish(self) -> io::Result<W> {
        match self {
            Self::Plain(mut w) => {
                w.flush()?;
                Ok(w)
            },
            Self::Gzip(encoder) => {
                let mut w = encoder.finish()?;
                w.flush()?;
                Ok(w)
            },
        }
    }
}

impl<W: Write> Write for ArchiveSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(w) => w.write(buf),
            Self::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(w) => w.flush(),
            Self::Gzip(w) => w.flush(),
        }
    }
}
