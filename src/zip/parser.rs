//! Low-level ZIP archive parser.
//!
//! This module handles the binary parsing of ZIP file structures,
//! reading from any source that implements the [`ReadAt`] trait.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's end
//! 2. If ZIP64, read the ZIP64 EOCD for large file support
//! 3. Read the Central Directory to get metadata for all files
//! 4. For extraction, probe each file's Local File Header to find
//!    where its data actually starts.
//!
//! This approach is efficient for HTTP Range requests, as we only
//! need to fetch the file's tail to list contents.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};
use std::sync::Arc;
use tracing::debug;

use crate::error::EngineError;
use crate::io::ReadAt;
use anyhow::{Result, bail};

use super::structures::*;

/// Window scanned for the EOCD signature.
const EOCD_SEARCH_WINDOW: u64 = 4096;

/// Window scanned for the ZIP64 locator signature when it isn't found at
/// the expected fixed offset.
const ZIP64_LOCATOR_SEARCH_WINDOW: u64 = 8192;

/// Low-level ZIP file parser.
///
/// This struct handles reading and parsing ZIP structures from
/// a data source. It's generic over the reader type to support
/// both local files and HTTP sources.
///
/// ## Usage
///
/// Typically used through [`ZipExtractor`](super::ZipExtractor)
/// rather than directly.
pub struct ZipParser<R: ReadAt> {
    /// The underlying data source
    reader: Arc<R>,
    /// Total size of the archive in bytes
    size: u64,
}

impl<R: ReadAt> ZipParser<R> {
    /// Create a new parser for the given reader.
    pub fn new(reader: Arc<R>) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    /// Find and parse the End of Central Directory record.
    ///
    /// Reads the trailing `min(4096, length)` bytes and scans backward
    /// for the EOCD signature. A ZIP comment can embed the signature
    /// bytes incidentally, so the rightmost (closest to EOF) match in
    /// the window is taken as authoritative.
    ///
    /// # Errors
    ///
    /// Returns an error if no EOCD signature is found in the window,
    /// indicating the file is not a valid ZIP archive.
    pub async fn find_eocd(&self) -> Result<(EndOfCentralDirectory, u64)> {
        let window = EOCD_SEARCH_WINDOW.min(self.size);
        let search_start = self.size - window;

        let buf = self
            .reader
            .read_exact_at(search_start, window as usize)
            .await?;

        for i in (0..buf.len().saturating_sub(EndOfCentralDirectory::SIZE - 4)).rev() {
            if &buf[i..i + 4] == EndOfCentralDirectory::SIGNATURE
                && i + EndOfCentralDirectory::SIZE <= buf.len()
            {
                let eocd =
                    EndOfCentralDirectory::from_bytes(&buf[i..i + EndOfCentralDirectory::SIZE])?;
                return Ok((eocd, search_start + i as u64));
            }
        }

        bail!(EngineError::Format(
            "End of Central Directory signature not found".to_string()
        ))
    }

    /// Read the ZIP64 End of Central Directory record.
    ///
    /// Primary path: the locator is the 20 bytes immediately before the
    /// regular EOCD, signature `PK\x06\x07`. When that doesn't check
    /// out (some writers place it elsewhere), falls back to scanning
    /// the trailing `min(8192, length)` window backward for the
    /// signature.
    ///
    /// # Errors
    ///
    /// Returns an error if the locator or the ZIP64 EOCD record itself
    /// cannot be found or parsed.
    pub async fn read_zip64_eocd(&self, eocd_offset: u64) -> Result<Zip64EOCD> {
        let locator = self.read_zip64_locator(eocd_offset).await?;

        let eocd64_buf = self
            .reader
            .read_exact_at(locator.eocd64_offset, Zip64EOCD::MIN_SIZE)
            .await?;

        Zip64EOCD::from_bytes(&eocd64_buf)
    }

    async fn read_zip64_locator(&self, eocd_offset: u64) -> Result<Zip64EOCDLocator> {
        if eocd_offset >= Zip64EOCDLocator::SIZE as u64 {
            let locator_offset = eocd_offset - Zip64EOCDLocator::SIZE as u64;
            let buf = self
                .reader
                .read_exact_at(locator_offset, Zip64EOCDLocator::SIZE)
                .await?;
            if let Ok(locator) = Zip64EOCDLocator::from_bytes(&buf) {
                return Ok(locator);
            }
        }

        debug!("ZIP64 locator not at expected offset, falling back to backward scan");
        let window = ZIP64_LOCATOR_SEARCH_WINDOW.min(self.size);
        let search_start = self.size - window;
        let buf = self
            .reader
            .read_exact_at(search_start, window as usize)
            .await?;

        for i in (0..buf.len().saturating_sub(Zip64EOCDLocator::SIZE)).rev() {
            if &buf[i..i + 4] == Zip64EOCDLocator::SIGNATURE {
                return Zip64EOCDLocator::from_bytes(&buf[i..i + Zip64EOCDLocator::SIZE]);
            }
        }

        bail!(EngineError::Format(
            "ZIP64 End of Central Directory Locator not found".to_string()
        ))
    }

    /// List all files in the ZIP archive.
    ///
    /// Reads the EOCD (promoting to ZIP64 as needed), fetches the
    /// entire Central Directory in one request, and parses every
    /// entry. A corrupt entry mid-walk stops the walk silently rather
    /// than failing the whole listing, on the theory that whatever was
    /// found before it is still useful.
    pub async fn list_files(&self) -> Result<Vec<ZipFileEntry>> {
        let (eocd, eocd_offset) = self.find_eocd().await?;

        let (cd_offset, cd_size, total_entries) = if eocd.is_zip64() {
            let eocd64 = self.read_zip64_eocd(eocd_offset).await?;
            (eocd64.cd_offset, eocd64.cd_size, eocd64.total_entries)
        } else {
            (
                eocd.cd_offset as u64,
                eocd.cd_size as u64,
                eocd.total_entries as u64,
            )
        };

        let cd_data = self
            .reader
            .read_exact_at(cd_offset, cd_size as usize)
            .await?;

        let mut entries = Vec::with_capacity(total_entries as usize);
        let mut cursor = Cursor::new(&cd_data);
        let mut encounter_index = 0usize;

        while (entries.len() as u64) < total_entries {
            match self.parse_cdfh(&mut cursor, &mut encounter_index) {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                Err(e) => {
                    debug!(error = %e, "central directory walk stopped early");
                    break;
                }
            }
        }

        Ok(entries)
    }

    /// Parse one Central Directory File Header from a cursor.
    ///
    /// Returns `Ok(None)` for directory entries and zero-size
    /// placeholders (skipped, not erroneous); `Err` when the signature
    /// doesn't match, which the caller treats as the end of the walk.
    fn parse_cdfh(
        &self,
        cursor: &mut Cursor<&Vec<u8>>,
        encounter_index: &mut usize,
    ) -> Result<Option<ZipFileEntry>> {
        if cursor.position() + CDFH_MIN_SIZE as u64 > cursor.get_ref().len() as u64 {
            bail!("truncated central directory file header");
        }

        let mut sig = [0u8; 4];
        cursor.read_exact(&mut sig)?;
        if sig != CDFH_SIGNATURE {
            bail!("not a Central Directory File Header");
        }

        let _version_made_by = cursor.read_u16::<LittleEndian>()?;
        let _version_needed = cursor.read_u16::<LittleEndian>()?;
        let _flags = cursor.read_u16::<LittleEndian>()?;
        let compression_method = cursor.read_u16::<LittleEndian>()?;
        let last_mod_time = cursor.read_u16::<LittleEndian>()?;
        let last_mod_date = cursor.read_u16::<LittleEndian>()?;
        let crc32 = cursor.read_u32::<LittleEndian>()?;
        let mut compressed_size = cursor.read_u32::<LittleEndian>()? as u64;
        let mut uncompressed_size = cursor.read_u32::<LittleEndian>()? as u64;
        let file_name_length = cursor.read_u16::<LittleEndian>()?;
        let extra_field_length = cursor.read_u16::<LittleEndian>()?;
        let file_comment_length = cursor.read_u16::<LittleEndian>()?;
        let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
        let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
        let _external_attrs = cursor.read_u32::<LittleEndian>()?;
        let mut lfh_offset = cursor.read_u32::<LittleEndian>()? as u64;

        *encounter_index += 1;

        let mut file_name_bytes = vec![0u8; file_name_length as usize];
        cursor.read_exact(&mut file_name_bytes)?;
        let mut file_name = String::from_utf8_lossy(&file_name_bytes).to_string();
        if file_name.is_empty() {
            file_name = format!("unnamed_file_{encounter_index}");
        }

        let is_directory = file_name.ends_with('/');

        let mut extra = vec![0u8; extra_field_length as usize];
        cursor.read_exact(&mut extra)?;
        apply_zip64_extra(
            &extra,
            &mut compressed_size,
            &mut uncompressed_size,
            &mut lfh_offset,
        )?;

        cursor.set_position(cursor.position() + file_comment_length as u64);

        if is_directory || (compressed_size == 0 && uncompressed_size == 0) {
            return Ok(None);
        }

        Ok(Some(ZipFileEntry {
            file_name,
            compression_method: CompressionMethod::from_u16(compression_method),
            compressed_size,
            uncompressed_size,
            crc32,
            lfh_offset,
            last_mod_time,
            last_mod_date,
            is_directory,
        }))
    }

    /// Probe a member's Local File Header to recompute the true payload
    /// offset, compressed size, and compression method.
    ///
    /// The Central Directory's sizes are normally authoritative, but
    /// only the local header says exactly where the payload starts;
    /// re-reading it also catches writers that only promote the local
    /// header to ZIP64 and leave the Central Directory's copy at its
    /// 32-bit sentinel.
    ///
    /// Chunk geometry for the extraction pipeline must be computed from
    /// the size this returns, not from the Central Directory's size —
    /// they can legitimately disagree.
    pub async fn probe_payload(&self, entry: &ZipFileEntry) -> Result<LocalHeaderProbe> {
        let lfh_buf = self
            .reader
            .read_exact_at(entry.lfh_offset, LFH_SIZE)
            .await?;

        if &lfh_buf[0..4] != LFH_SIGNATURE {
            bail!(EngineError::Format(format!(
                "invalid local file header signature at offset {}",
                entry.lfh_offset
            )));
        }

        let mut cursor = Cursor::new(&lfh_buf);
        cursor.set_position(8);
        let compression_method = cursor.read_u16::<LittleEndian>()?;
        cursor.set_position(18);
        let mut compressed_size = cursor.read_u32::<LittleEndian>()? as u64;
        let mut uncompressed_size = cursor.read_u32::<LittleEndian>()? as u64;
        let file_name_length = cursor.read_u16::<LittleEndian>()? as u64;
        let extra_field_length = cursor.read_u16::<LittleEndian>()? as u64;

        if (compressed_size == ZIP64_SENTINEL_32 as u64
            || uncompressed_size == ZIP64_SENTINEL_32 as u64)
            && extra_field_length > 0
        {
            let variable = self
                .reader
                .read_exact_at(
                    entry.lfh_offset + LFH_SIZE as u64,
                    (file_name_length + extra_field_length) as usize,
                )
                .await?;
            let extra = &variable[file_name_length as usize..];
            let mut offset_unused = entry.lfh_offset;
            apply_zip64_extra(
                extra,
                &mut compressed_size,
                &mut uncompressed_size,
                &mut offset_unused,
            )?;
        }

        let payload_start =
            entry.lfh_offset + LFH_SIZE as u64 + file_name_length + extra_field_length;

        Ok(LocalHeaderProbe {
            payload_start,
            compressed_size: compressed_size.max(entry.compressed_size),
            compression_method: CompressionMethod::from_u16(compression_method),
        })
    }

    /// Get a reference to the underlying reader.
    ///
    /// Useful for reading file data after a [`probe_payload()`] call.
    pub fn reader(&self) -> &Arc<R> {
        &self.reader
    }
}

/// Result of probing a member's Local File Header.
#[derive(Debug, Clone, Copy)]
pub struct LocalHeaderProbe {
    /// Byte offset where the compressed payload actually begins.
    pub payload_start: u64,
    /// True compressed size: the larger of the Central Directory's and
    /// the local header's own value.
    pub compressed_size: u64,
    /// Compression method as recorded in the local header.
    pub compression_method: CompressionMethod,
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct InMemory(Vec<u8>);

    #[async_trait]
    impl ReadAt for InMemory {
        async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
            let start = offset as usize;
            let n = buf.len().min(self.0.len().saturating_sub(start));
            buf[..n].copy_from_slice(&self.0[start..start + n]);
            Ok(n)
        }

        fn size(&self) -> u64 {
            self.0.len() as u64
        }
    }

    fn push_lfh(out: &mut Vec<u8>, name: &str, data: &[u8]) -> u64 {
        let offset = out.len() as u64;
        out.extend_from_slice(LFH_SIGNATURE);
        out.extend_from_slice(&20u16.to_le_bytes()); // version needed
        out.extend_from_slice(&0u16.to_le_bytes()); // flags
        out.extend_from_slice(&0u16.to_le_bytes()); // method: stored
        out.extend_from_slice(&0u16.to_le_bytes()); // mod time
        out.extend_from_slice(&0u16.to_le_bytes()); // mod date
        out.extend_from_slice(&crc32fast::hash(data).to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // extra len
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(data);
        offset
    }

    fn push_cdfh(out: &mut Vec<u8>, name: &str, data: &[u8], lfh_offset: u64) {
        out.extend_from_slice(CDFH_SIGNATURE);
        out.extend_from_slice(&0u16.to_le_bytes()); // version made by
        out.extend_from_slice(&20u16.to_le_bytes()); // version needed
        out.extend_from_slice(&0u16.to_le_bytes()); // flags
        out.extend_from_slice(&0u16.to_le_bytes()); // method: stored
        out.extend_from_slice(&0u16.to_le_bytes()); // mod time
        out.extend_from_slice(&0u16.to_le_bytes()); // mod date
        out.extend_from_slice(&crc32fast::hash(data).to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // extra len
        out.extend_from_slice(&0u16.to_le_bytes()); // comment len
        out.extend_from_slice(&0u16.to_le_bytes()); // disk start
        out.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
        out.extend_from_slice(&0u32.to_le_bytes()); // external attrs
        out.extend_from_slice(&(lfh_offset as u32).to_le_bytes());
        out.extend_from_slice(name.as_bytes());
    }

    fn push_eocd(out: &mut Vec<u8>, total_entries: u16, cd_offset: u32, cd_size: u32) {
        out.extend_from_slice(EndOfCentralDirectory::SIGNATURE);
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&total_entries.to_le_bytes());
        out.extend_from_slice(&total_entries.to_le_bytes());
        out.extend_from_slice(&cd_size.to_le_bytes());
        out.extend_from_slice(&cd_offset.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
    }

    fn parser_for(buf: Vec<u8>) -> ZipParser<InMemory> {
        ZipParser::new(Arc::new(InMemory(buf)))
    }

    #[tokio::test]
    async fn lists_a_simple_stored_entry() {
        let data = b"hello world";
        let mut buf = Vec::new();
        let lfh_offset = push_lfh(&mut buf, "hello.txt", data);
        let cd_offset = buf.len() as u32;
        push_cdfh(&mut buf, "hello.txt", data, lfh_offset);
        let cd_size = buf.len() as u32 - cd_offset;
        push_eocd(&mut buf, 1, cd_offset, cd_size);

        let parser = parser_for(buf);
        let entries = parser.list_files().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].file_name, "hello.txt");
        assert_eq!(entries[0].compressed_size, data.len() as u64);
        assert_eq!(entries[0].compression_method, CompressionMethod::Stored);
    }

    #[tokio::test]
    async fn empty_filename_gets_renamed() {
        let data = b"x";
        let mut buf = Vec::new();
        let lfh_offset = push_lfh(&mut buf, "", data);
        let cd_offset = buf.len() as u32;
        push_cdfh(&mut buf, "", data, lfh_offset);
        let cd_size = buf.len() as u32 - cd_offset;
        push_eocd(&mut buf, 1, cd_offset, cd_size);

        let parser = parser_for(buf);
        let entries = parser.list_files().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].file_name, "unnamed_file_1");
    }

    #[tokio::test]
    async fn zip64_locator_fallback_scan_finds_misplaced_locator() {
        let data = b"zip64 payload";
        let mut buf = Vec::new();
        let lfh_offset = push_lfh(&mut buf, "big.bin", data);
        let cd_offset = buf.len() as u64;
        push_cdfh(&mut buf, "big.bin", data, lfh_offset);
        let cd_size = buf.len() as u64 - cd_offset;

        let zip64_eocd_offset = buf.len() as u64;
        buf.extend_from_slice(Zip64EOCD::SIGNATURE);
        buf.extend_from_slice(&44u64.to_le_bytes()); // record size
        buf.extend_from_slice(&0u16.to_le_bytes()); // version made by
        buf.extend_from_slice(&45u16.to_le_bytes()); // version needed
        buf.extend_from_slice(&0u32.to_le_bytes()); // disk number
        buf.extend_from_slice(&0u32.to_le_bytes()); // disk with cd
        buf.extend_from_slice(&1u64.to_le_bytes()); // entries on disk
        buf.extend_from_slice(&1u64.to_le_bytes()); // total entries
        buf.extend_from_slice(&cd_size.to_le_bytes());
        buf.extend_from_slice(&cd_offset.to_le_bytes());

        buf.extend_from_slice(Zip64EOCDLocator::SIGNATURE);
        buf.extend_from_slice(&0u32.to_le_bytes()); // disk with zip64 eocd
        buf.extend_from_slice(&zip64_eocd_offset.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes()); // total disks

        // Junk between the locator and the EOCD so the fixed-offset check
        // (eocd_offset - 20) misses and the backward scan has to find it.
        buf.extend_from_slice(&[0u8; 6]);

        push_eocd(&mut buf, 0xFFFF, 0, 0);

        let parser = parser_for(buf);
        let entries = parser.list_files().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].file_name, "big.bin");
    }

    #[tokio::test]
    async fn probe_payload_recovers_true_payload_start() {
        let data = b"payload bytes";
        let mut buf = Vec::new();
        let lfh_offset = push_lfh(&mut buf, "member", data);
        let cd_offset = buf.len() as u32;
        push_cdfh(&mut buf, "member", data, lfh_offset);
        let cd_size = buf.len() as u32 - cd_offset;
        push_eocd(&mut buf, 1, cd_offset, cd_size);

        let parser = parser_for(buf);
        let entries = parser.list_files().await.unwrap();
        let probe = parser.probe_payload(&entries[0]).await.unwrap();
        assert_eq!(probe.payload_start, lfh_offset + LFH_SIZE as u64 + "member".len() as u64);
        assert_eq!(probe.compression_method, CompressionMethod::Stored);
    }

    #[tokio::test]
    async fn missing_eocd_signature_is_an_error() {
        let parser = parser_for(vec![0u8; 64]);
        assert!(parser.find_eocd().await.is_err());
    }
}
