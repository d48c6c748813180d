//! # runzip
//!
//! A remote ZIP peek-and-extract engine: given the URL of a ZIP archive on a
//! server that honors HTTP Range requests, enumerate its members and extract
//! arbitrary subsets of them without ever downloading the full archive.
//!
//! This library provides functionality to extract ZIP files from both local filesystem
//! and remote HTTP servers. For remote files, it uses HTTP Range requests to efficiently
//! download only the necessary parts of the archive, making it suitable for extracting
//! specific files from large remote archives without downloading the entire file.
//!
//! ## Features
//!
//! - Extract ZIP files from local filesystem or HTTP/HTTPS URLs using Range requests
//! - Support for ZIP64 format (archives larger than 4GB or with more than 65535 entries)
//! - STORED, DEFLATE, BZIP2, and LZMA compression methods
//! - A parallel, chunked download pipeline for large members: ranged reads fan out
//!   across a bounded worker pool and reassemble in order, with CRC-32 verification
//! - [`ArchiveHandle`] for interactive sessions over a remote archive: `list`,
//!   regex-or-substring `search`, and single/bulk `extract`, addressed by a
//!   display index that's stable between listings
//! - Selective file extraction with glob pattern matching (local/one-shot CLI use)
//!
//! ## Example
//!
//! ```no_run
//! use runzip::{ArchiveHandle, RedirectResolver};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let resolver = RedirectResolver::new();
//!     let handle = ArchiveHandle::open("https://example.com/archive.zip", &resolver).await?;
//!
//!     for entry in handle.list(None).await? {
//!         println!("{}", entry.name);
//!     }
//!
//!     handle.extract(1, std::path::Path::new("."), true, None).await?;
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod cli;
pub mod error;
pub mod io;
pub mod resolve;
pub mod zip;

pub use archive::{ArchiveHandle, ListedEntry};
pub use cli::Cli;
pub use error::EngineError;
pub use io::{HttpRangeReader, LocalFileReader, ReadAt};
pub use resolve::{RedirectResolver, UrlResolver};
pub use zip::{ChunkPlan, ExtractionOutcome, Progress, ZipExtractor, ZipFileEntry};
