//! Decompressor registry.
//!
//! Each codec receives an entire compressed payload and returns the full
//! decompressed bytes; none of them stream across chunk boundaries —
//! the extraction pipeline always hands over a whole member's payload.

use std::io::Read;

use bzip2::read::BzDecoder;
use flate2::read::DeflateDecoder;
use tracing::warn;

use crate::error::EngineError;
use super::structures::CompressionMethod;

/// Decompress `compressed` according to `method`.
///
/// Returns `None` both for a method this registry doesn't support and
/// for a codec that fails on supposedly-supported input (corrupt
/// stream, truncated payload, etc.) — per spec, a decompressor error is
/// non-fatal, exactly like an unsupported method: the caller falls back
/// to emitting the compressed bytes verbatim and disables CRC
/// verification for that entry, matching the original `decompress_data`
/// prototype's blanket `except Exception: return None`.
pub fn decompress(
    method: CompressionMethod,
    compressed: &[u8],
    uncompressed_size_hint: u64,
) -> Option<Vec<u8>> {
    match method {
        CompressionMethod::Stored => Some(compressed.to_vec()),
        CompressionMethod::Deflate => {
            let mut decoder = DeflateDecoder::new(compressed);
            let mut out = Vec::with_capacity(uncompressed_size_hint as usize);
            match decoder.read_to_end(&mut out) {
                Ok(_) => Some(out),
                Err(e) => {
                    warn!(error = %EngineError::Codec(format!("deflate: {e}")), "decompression failed");
                    None
                }
            }
        }
        CompressionMethod::Bzip2 => {
            let mut decoder = BzDecoder::new(compressed);
            let mut out = Vec::with_capacity(uncompressed_size_hint as usize);
            match decoder.read_to_end(&mut out) {
                Ok(_) => Some(out),
                Err(e) => {
                    warn!(error = %EngineError::Codec(format!("bzip2: {e}")), "decompression failed");
                    None
                }
            }
        }
        CompressionMethod::Lzma => {
            let mut out = Vec::with_capacity(uncompressed_size_hint as usize);
            let mut cursor = std::io::Cursor::new(compressed);
            match lzma_rs::lzma_decompress(&mut cursor, &mut out) {
                Ok(_) => Some(out),
                Err(e) => {
                    warn!(error = %EngineError::Codec(format!("lzma: {e}")), "decompression failed");
                    None
                }
            }
        }
        CompressionMethod::Unknown(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn stored_is_identity() {
        let data = b"hello world";
        let out = decompress(CompressionMethod::Stored, data, data.len() as u64).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn deflate_round_trips() {
        let original = b"the quick brown fox jumps over the lazy dog".repeat(64);
        let mut encoder =
            flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&original).unwrap();
        let compressed = encoder.finish().unwrap();

        let out = decompress(CompressionMethod::Deflate, &compressed, original.len() as u64)
            .unwrap();
        assert_eq!(out, original);
    }

    #[test]
    fn unknown_method_returns_none() {
        let out = decompress(CompressionMethod::Unknown(99), b"whatever", 0);
        assert!(out.is_none());
    }

    #[test]
    fn corrupt_deflate_stream_returns_none_instead_of_erroring() {
        let out = decompress(CompressionMethod::Deflate, &[0xFF, 0xFF, 0xFF, 0xFF], 16);
        assert!(out.is_none());
    }
}
