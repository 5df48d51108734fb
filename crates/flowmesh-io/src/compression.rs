//! Transparent compression codecs, selected by file suffix.
//!
//! Readers and writers are wrapped so callers stream plain bytes no matter
//! how the file is stored on disk. Compressed streams are *not seekable*:
//! input partitioning must fall back to whole-file granularity for them.

use std::io::{Read, Write};
use std::path::Path;

use flowmesh_core::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionKind {
    None,
    Gzip,
    Bzip2,
    Xz,
    Zstd,
    Lz4,
    /// Recognized but not provided; surfaces as [`Error::Unsupported`].
    Lzo,
}

impl CompressionKind {
    /// Detect the codec from the file suffix.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("gz") => Self::Gzip,
            Some("bz2") => Self::Bzip2,
            Some("xz") => Self::Xz,
            Some("zst") => Self::Zstd,
            Some("lz4") => Self::Lz4,
            Some("lzo") => Self::Lzo,
            _ => Self::None,
        }
    }

    pub fn is_compressed(self) -> bool {
        self != Self::None
    }

    /// Layer the decompressor over `reader`.
    pub fn wrap_reader(self, reader: Box<dyn Read + Send>) -> Result<Box<dyn Read + Send>> {
        Ok(match self {
            Self::None => reader,
            Self::Gzip => Box::new(flate2::read::MultiGzDecoder::new(reader)),
            Self::Bzip2 => Box::new(bzip2::read::MultiBzDecoder::new(reader)),
            Self::Xz => Box::new(xz2::read::XzDecoder::new_multi_decoder(reader)),
            Self::Zstd => Box::new(zstd::stream::read::Decoder::new(reader)?),
            Self::Lz4 => Box::new(lz4_flex::frame::FrameDecoder::new(reader)),
            Self::Lzo => {
                return Err(Error::Unsupported(
                    "lzo compression is not available".to_string(),
                ))
            }
        })
    }

    /// Layer the compressor over `writer`. The returned writer finalizes
    /// its stream when dropped; flush before dropping to observe errors.
    pub fn wrap_writer(self, writer: Box<dyn Write + Send>) -> Result<Box<dyn Write + Send>> {
        Ok(match self {
            Self::None => writer,
            Self::Gzip => Box::new(flate2::write::GzEncoder::new(
                writer,
                flate2::Compression::default(),
            )),
            Self::Bzip2 => Box::new(bzip2::write::BzEncoder::new(
                writer,
                bzip2::Compression::default(),
            )),
            Self::Xz => Box::new(xz2::write::XzEncoder::new(writer, 6)),
            Self::Zstd => Box::new(zstd::stream::write::Encoder::new(writer, 0)?.auto_finish()),
            Self::Lz4 => Box::new(Lz4AutoFinish {
                encoder: Some(lz4_flex::frame::FrameEncoder::new(writer)),
            }),
            Self::Lzo => {
                return Err(Error::Unsupported(
                    "lzo compression is not available".to_string(),
                ))
            }
        })
    }
}

/// The lz4 frame trailer must be written explicitly; this wrapper does it
/// on drop, mirroring the zstd encoder's auto-finish behavior.
struct Lz4AutoFinish {
    encoder: Option<lz4_flex::frame::FrameEncoder<Box<dyn Write + Send>>>,
}

impl Write for Lz4AutoFinish {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.encoder
            .as_mut()
            .expect("encoder live until drop")
            .write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.encoder
            .as_mut()
            .expect("encoder live until drop")
            .flush()
    }
}

impl Drop for Lz4AutoFinish {
    fn drop(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            if let Err(error) = encoder.finish() {
                tracing::warn!(%error, "finalizing lz4 stream failed");
            }
        }
    }
}
