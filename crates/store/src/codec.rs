//! Blob compression backends.

use std::io::{Read, Write};

use auditai_core::CompressionLevel;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    /// The backend cannot be used in this environment.
    #[error("compression backend unavailable")]
    Unavailable,

    #[error("compression failed: {0}")]
    Compress(String),

    #[error("decompression failed: {0}")]
    Decompress(String),
}

/// A reversible byte transform used for model blobs.
///
/// `decompress(compress(b, level)) == b` must hold for every buffer and level.
pub trait Codec: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn compress(&self, data: &[u8], level: CompressionLevel) -> Result<Vec<u8>, CodecError>;

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
}

/// Gzip (deflate) via `flate2`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeflateCodec;

impl DeflateCodec {
    fn flate_level(level: CompressionLevel) -> Compression {
        match level {
            CompressionLevel::None => Compression::none(),
            CompressionLevel::Low => Compression::fast(),
            CompressionLevel::Medium => Compression::default(),
            CompressionLevel::High => Compression::best(),
        }
    }
}

impl Codec for DeflateCodec {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn compress(&self, data: &[u8], level: CompressionLevel) -> Result<Vec<u8>, CodecError> {
        let mut encoder = GzEncoder::new(Vec::new(), Self::flate_level(level));
        encoder
            .write_all(data)
            .map_err(|e| CodecError::Compress(e.to_string()))?;
        encoder
            .finish()
            .map_err(|e| CodecError::Compress(e.to_string()))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut decoder = GzDecoder::new(data);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| CodecError::Decompress(e.to_string()))?;
        Ok(out)
    }
}

/// Backend that is never available; the store keeps blobs uncompressed.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableCodec;

impl Codec for UnavailableCodec {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    fn compress(&self, _data: &[u8], _level: CompressionLevel) -> Result<Vec<u8>, CodecError> {
        Err(CodecError::Unavailable)
    }

    fn decompress(&self, _data: &[u8]) -> Result<Vec<u8>, CodecError> {
        Err(CodecError::Unavailable)
    }
}
