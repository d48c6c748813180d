//! Archive handle (§3 data model): the process-scoped object bound to
//! one ZIP URL, exposing the `open`/`list`/`search`/`extract`/
//! `extract_bulk` interfaces the CLI collaborator drives (§6).

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use regex::RegexBuilder;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::EngineError;
use crate::io::{HttpRangeReader, ReadAt};
use crate::resolve::UrlResolver;
use crate::zip::{CompressionMethod, ExtractionOutcome, Progress, ZipExtractor, ZipFileEntry};

/// One row of a `list()`/`search()` result: the display-facing view of
/// a catalog member, with the 1-based index used to address it in a
/// subsequent `extract()` call.
#[derive(Debug, Clone)]
pub struct ListedEntry {
    pub display_index: usize,
    pub name: String,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub method: CompressionMethod,
}

/// A process-scoped handle bound to one ZIP URL.
///
/// Owns the original and effective URLs, the member catalog (populated
/// exactly once, on first `list()`/`search()` call), and the
/// display-index → catalog-index mapping established by the most recent
/// listing, kept inside the handle rather than split across the CLI for
/// convenience.
pub struct ArchiveHandle<R: ReadAt + 'static> {
    original_url: String,
    effective_url: String,
    extractor: ZipExtractor<R>,
    catalog: OnceCell<Vec<ZipFileEntry>>,
    display_mapping: Mutex<Vec<usize>>,
}

impl ArchiveHandle<HttpRangeReader> {
    /// Resolve `url` through `resolver`, probe it with the Range Client,
    /// and construct a handle. This is the factory the CLI uses for
    /// remote archives (§4.1/§6 `open`).
    pub async fn open(url: &str, resolver: &dyn UrlResolver) -> Result<Self> {
        let resolved = resolver.resolve(url).await;
        let reader = HttpRangeReader::new(resolved).await?;
        let effective_url = reader.effective_url().to_string();
        Ok(Self::from_reader(url.to_string(), effective_url, Arc::new(reader)))
    }
}

impl<R: ReadAt + 'static> ArchiveHandle<R> {
    /// Construct a handle directly from an already-open reader. Used by
    /// [`ArchiveHandle::open`] and available for local-file handles.
    pub fn from_reader(original_url: String, effective_url: String, reader: Arc<R>) -> Self {
        Self {
            original_url,
            effective_url,
            extractor: ZipExtractor::new(reader),
            catalog: OnceCell::new(),
            display_mapping: Mutex::new(Vec::new()),
        }
    }

    pub fn original_url(&self) -> &str {
        &self.original_url
    }

    pub fn effective_url(&self) -> &str {
        &self.effective_url
    }

    async fn catalog(&self) -> Result<&Vec<ZipFileEntry>> {
        self.catalog
            .get_or_try_init(|| async { self.extractor.list_files().await })
            .await
    }

    /// List entries, optionally restricted to those whose name satisfies
    /// `filter`. Establishes the display-index mapping `extract()` reads
    /// back from.
    pub async fn list(&self, filter: Option<&dyn Fn(&str) -> bool>) -> Result<Vec<ListedEntry>> {
        let catalog = self.catalog().await?;
        let mut mapping = Vec::new();
        let mut out = Vec::new();

        for (catalog_index, entry) in catalog.iter().enumerate() {
            if entry.is_directory {
                continue;
            }
            if let Some(f) = filter
                && !f(&entry.file_name)
            {
                continue;
            }
            mapping.push(catalog_index);
            out.push(ListedEntry {
                display_index: mapping.len(),
                name: entry.file_name.clone(),
                compressed_size: entry.compressed_size,
                uncompressed_size: entry.uncompressed_size,
                method: entry.compression_method,
            });
        }

        *self.display_mapping.lock().unwrap() = mapping;
        Ok(out)
    }

    /// Search entries by name (§6 `search`): tries `pattern` as a
    /// case-insensitive regular expression, falling back to a
    /// case-insensitive substring match if it fails to compile.
    pub async fn search(&self, pattern: &str) -> Result<Vec<ListedEntry>> {
        match RegexBuilder::new(pattern).case_insensitive(true).build() {
            Ok(re) => self.list(Some(&|name: &str| re.is_match(name))).await,
            Err(e) => {
                debug!(pattern, error = %e, "invalid regex, falling back to substring match");
                let needle = pattern.to_lowercase();
                self.list(Some(&|name: &str| name.to_lowercase().contains(&needle)))
                    .await
            }
        }
    }

    fn resolve_display_index(&self, display_index: usize) -> Result<usize> {
        let mapping = self.display_mapping.lock().unwrap();
        if display_index == 0 || display_index > mapping.len() {
            bail!(EngineError::Bounds {
                index: display_index,
                total: mapping.len(),
            });
        }
        Ok(mapping[display_index - 1])
    }

    /// Extract one member, addressed by the display index produced by
    /// the most recent `list()`/`search()` call.
    ///
    /// Acts as the default output sink: joins the member name onto
    /// `output_dir`, stripping path separators and parent traversal
    /// components so a crafted archive can't write outside it, then
    /// hands the rest of the write to the extraction pipeline.
    pub async fn extract(
        &self,
        display_index: usize,
        output_dir: &Path,
        verify: bool,
        progress: Option<Arc<Progress>>,
    ) -> Result<ExtractionOutcome> {
        let catalog_index = self.resolve_display_index(display_index)?;
        let catalog = self.catalog().await?;
        let entry = &catalog[catalog_index];
        let output_path = output_dir.join(sanitize_member_path(&entry.file_name));

        let outcome = self
            .extractor
            .extract_to_file(entry, &output_path, progress)
            .await?;

        if verify && outcome.decompressed && !outcome.crc_ok {
            debug!(file = %entry.file_name, "crc verification requested and failed");
        }

        Ok(outcome)
    }

    /// Extract several members, returning one outcome per requested
    /// display index in request order (§6 `extract_bulk`). A failure on
    /// one index doesn't stop the rest.
    pub async fn extract_bulk(
        &self,
        display_indices: &[usize],
        output_dir: &Path,
        verify: bool,
        progress: Option<Arc<Progress>>,
    ) -> Vec<(usize, Result<ExtractionOutcome>)> {
        let mut results = Vec::with_capacity(display_indices.len());
        for &index in display_indices {
            let outcome = self
                .extract(index, output_dir, verify, progress.clone())
                .await;
            results.push((index, outcome));
        }
        results
    }
}

/// Strip path separators and `..`/`.` components from a member name,
/// leaving only the normal path segments to join onto an output root.
fn sanitize_member_path(name: &str) -> PathBuf {
    let mut out = PathBuf::new();
    for component in Path::new(name).components() {
        if let std::path::Component::Normal(segment) = component {
            out.push(segment);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip::LFH_SIZE;
    use async_trait::async_trait;

    #[test]
    fn sanitize_strips_parent_traversal() {
        let sanitized = sanitize_member_path("../../etc/passwd");
        assert_eq!(sanitized, Path::new("etc/passwd"));
    }

    #[test]
    fn sanitize_strips_absolute_root() {
        let sanitized = sanitize_member_path("/etc/passwd");
        assert_eq!(sanitized, Path::new("etc/passwd"));
    }

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
        out.extend_from_slice(b"PK\x03\x04");
        out.extend_from_slice(&20u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&crc32fast::hash(data).to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(data);
        offset
    }

    fn push_cdfh(out: &mut Vec<u8>, name: &str, data: &[u8], lfh_offset: u64) {
        out.extend_from_slice(b"PK\x01\x02");
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&20u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&crc32fast::hash(data).to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&(lfh_offset as u32).to_le_bytes());
        out.extend_from_slice(name.as_bytes());
    }

    fn two_entry_archive() -> (Vec<u8>, &'static [u8], &'static [u8]) {
        let readme = b"hello from readme";
        let payload = b"binary payload bytes";
        let mut buf = Vec::new();

        let readme_lfh = push_lfh(&mut buf, "docs/readme.txt", readme);
        let payload_lfh = push_lfh(&mut buf, "data.bin", payload);

        let cd_offset = buf.len() as u32;
        push_cdfh(&mut buf, "docs/readme.txt", readme, readme_lfh);
        push_cdfh(&mut buf, "data.bin", payload, payload_lfh);
        let cd_size = buf.len() as u32 - cd_offset;

        buf.extend_from_slice(b"PK\x05\x06");
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&2u16.to_le_bytes());
        buf.extend_from_slice(&2u16.to_le_bytes());
        buf.extend_from_slice(&cd_size.to_le_bytes());
        buf.extend_from_slice(&cd_offset.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());

        (buf, readme, payload)
    }

    fn handle_for(buf: Vec<u8>) -> ArchiveHandle<InMemory> {
        ArchiveHandle::from_reader(
            "https://example.invalid/archive.zip".to_string(),
            "https://example.invalid/archive.zip".to_string(),
            Arc::new(InMemory(buf)),
        )
    }

    #[tokio::test]
    async fn list_renumbers_display_indices_each_call() {
        let (buf, _, _) = two_entry_archive();
        let handle = handle_for(buf);

        let all = handle.list(None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].display_index, 1);
        assert_eq!(all[1].display_index, 2);

        let filtered = handle.search("data").await.unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].display_index, 1);
        assert_eq!(filtered[0].name, "data.bin");
    }

    #[tokio::test]
    async fn extract_writes_the_member_selected_by_the_last_listing() {
        let (buf, _readme, payload) = two_entry_archive();
        let handle = handle_for(buf);

        handle.search("data").await.unwrap();

        let out_dir = std::env::temp_dir().join(format!(
            "runzip-archive-test-{}-{}",
            std::process::id(),
            LFH_SIZE
        ));
        tokio::fs::create_dir_all(&out_dir).await.unwrap();

        let outcome = handle.extract(1, &out_dir, true, None).await.unwrap();
        assert_eq!(outcome.bytes, payload);

        let written = tokio::fs::read(out_dir.join("data.bin")).await.unwrap();
        assert_eq!(written, payload);

        let _ = tokio::fs::remove_dir_all(&out_dir).await;
    }

    #[tokio::test]
    async fn extract_with_an_out_of_range_index_is_a_bounds_error() {
        let (buf, _, _) = two_entry_archive();
        let handle = handle_for(buf);
        handle.list(None).await.unwrap();

        let result = handle
            .extract(99, &std::env::temp_dir(), false, None)
            .await;
        assert!(result.is_err());
    }
}
