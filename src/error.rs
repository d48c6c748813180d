//! Error taxonomy for the remote ZIP engine.
//!
//! The engine distinguishes error *kinds* rather than individual error
//! types, matching how the CLI decides whether to keep going: transient
//! transport failures are retried internally and never reach here,
//! protocol/format failures abort the current operation, and codec or
//! integrity failures are logged but never stop extraction.

use thiserror::Error;

/// Error kinds surfaced by the engine.
///
/// Transport errors are retried by the Range Client before they ever
/// reach a caller; by the time one of these is constructed, retries
/// are already exhausted (for `Transport`) or the condition is
/// permanent (everything else).
#[derive(Debug, Error)]
pub enum EngineError {
    /// Connection failed, timed out, or returned a non-2xx/non-206
    /// response after all retries were exhausted.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server does not support range requests (501 on probe).
    /// Fatal at `open()` time; no handle is constructed.
    #[error("server does not support range requests: {0}")]
    Protocol(String),

    /// The archive's structure could not be parsed: missing EOCD,
    /// missing ZIP64 locator after the fallback scan, an invalid local
    /// header signature, or a ZIP64 extra field inconsistent with its
    /// sentinels.
    #[error("zip format error: {0}")]
    Format(String),

    /// Unsupported compression method, or the decompressor reported an
    /// error. Non-fatal: the pipeline falls back to writing the
    /// compressed payload.
    #[error("codec error: {0}")]
    Codec(String),

    /// CRC-32 mismatch between the expected and computed checksum.
    /// Non-fatal: the artifact is still emitted.
    #[error("integrity check failed: expected crc32 {expected:08x}, got {actual:08x}")]
    Integrity { expected: u32, actual: u32 },

    /// Requested display index is out of range. Returned without
    /// touching the network.
    #[error("index {index} out of range (archive has {total} files)")]
    Bounds { index: usize, total: usize },
}
