//! ZIP archive parsing and extraction.
//!
//! This module provides functionality for reading and extracting ZIP archives,
//! supporting both standard ZIP format and ZIP64 extensions for large archives.
//!
//! ## Architecture
//!
//! The module is organized into four main components:
//!
//! - [`structures`]: Data structures representing ZIP format elements (EOCD, file headers, etc.)
//! - [`parser`]: Low-level parsing of ZIP structures, plus the local-header probe
//! - [`codec`]: Decompressor registry dispatching by compression method
//! - [`extractor`]: The parallel chunked extraction pipeline
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! This implementation reads the EOCD first (from the end of the file),
//! then the Central Directory, which allows listing files without reading
//! the entire archive - perfect for HTTP Range requests.
//!
//! ## Supported Features
//!
//! - Standard ZIP format (PKZIP APPNOTE 6.3.x compatible)
//! - ZIP64 extensions for files > 4GB
//! - STORED, DEFLATE, BZIP2, and LZMA compression methods
//! - Parallel chunked extraction with CRC-32 verification
//!
//! ## Limitations
//!
//! - No encryption support
//! - No multi-disk archive support
//! - No cross-chunk streaming decompression (whole-member only)

pub mod codec;
mod extractor;
mod parser;
mod structures;

pub use extractor::{ChunkPlan, ExtractionOutcome, Progress, ProgressSnapshot, ZipExtractor};
pub use parser::{LocalHeaderProbe, ZipParser};
pub use structures::*;
