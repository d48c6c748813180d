//! Main entry point for the runzip CLI application.
//!
//! This binary provides a command-line interface for extracting ZIP files
//! from both local filesystem and remote HTTP URLs. Remote URLs with no
//! file-selection arguments drop into an interactive peek loop; anything
//! else is a one-shot scripted extraction, matching the classic `unzip`
//! flag surface.

use anyhow::{Result, bail};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;

use runzip::{
    ArchiveHandle, Cli, HttpRangeReader, ListedEntry, LocalFileReader, Progress, ReadAt,
    RedirectResolver, UrlResolver, ZipExtractor, ZipFileEntry,
};

/// Application entry point.
///
/// Parses command-line arguments and dispatches to the appropriate
/// handler: the interactive peek loop for a bare remote URL, or a
/// one-shot scripted extraction otherwise.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    if cli.is_http_url() {
        let resolver = RedirectResolver::new();

        if cli.files.is_empty() && !cli.list && !cli.verbose && !cli.pipe {
            let handle = ArchiveHandle::open(&cli.file, &resolver).await?;
            return interactive_loop(&handle, &cli).await;
        }

        let resolved_url = resolver.resolve(&cli.file).await;
        let reader = HttpRangeReader::new(resolved_url).await?;
        let transferred_before = reader.transferred_bytes();
        let reader = Arc::new(reader);

        process_zip(reader.clone(), &cli).await?;

        if !cli.is_quiet() {
            let transferred = reader.transferred_bytes() - transferred_before;
            eprintln!("\nTotal bytes transferred: {}", format_size(transferred));
        }
    } else {
        let reader = Arc::new(LocalFileReader::new(Path::new(&cli.file))?);
        process_zip(reader, &cli).await?;
    }

    Ok(())
}

/// Initialize `tracing` diagnostics. The `-v`/`-q` flags tune the
/// default level; `RUST_LOG` always takes precedence when set.
fn init_tracing(cli: &Cli) {
    let level = if cli.is_very_quiet() {
        "error"
    } else if cli.is_quiet() {
        "warn"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("runzip={level}")));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .try_init();
}

/// The interactive remote-peek loop: a positive integer extracts one
/// member, a comma/dash range expression extracts several, `all`/`a`
/// extracts everything currently listed, `list`/`l` re-lists,
/// `search <pat>`/`s <pat>` filters, `quit`/`q` exits.
async fn interactive_loop(handle: &ArchiveHandle<HttpRangeReader>, cli: &Cli) -> Result<()> {
    let mut listed = handle.list(None).await?;
    print_listing(&listed);

    let output_dir = cli
        .extract_dir
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    let stdin = tokio::io::stdin();
    let mut lines = tokio::io::BufReader::new(stdin).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line {
            "quit" | "q" => break,
            "list" | "l" => {
                listed = handle.list(None).await?;
                print_listing(&listed);
            }
            "all" | "a" => {
                let indices: Vec<usize> = (1..=listed.len()).collect();
                extract_selection(handle, &indices, &output_dir).await;
            }
            _ if line.starts_with("search ") || line.starts_with("s ") => {
                let pattern = line.splitn(2, ' ').nth(1).unwrap_or("").trim();
                listed = handle.search(pattern).await?;
                print_listing(&listed);
            }
            _ => match parse_range(line) {
                Ok(indices) => extract_selection(handle, &indices, &output_dir).await,
                Err(e) => eprintln!("not a recognized command or range: {e}"),
            },
        }
    }

    Ok(())
}

/// Parse a range expression like `1-5,7,10-12` into individual display
/// indices, in the order written.
fn parse_range(input: &str) -> Result<Vec<usize>> {
    let mut indices = Vec::new();
    for part in input.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((start, end)) = part.split_once('-') {
            let start: usize = start.trim().parse()?;
            let end: usize = end.trim().parse()?;
            if start == 0 || end == 0 || start > end {
                bail!("invalid range: {part}");
            }
            indices.extend(start..=end);
        } else {
            indices.push(part.parse()?);
        }
    }
    Ok(indices)
}

fn print_listing(entries: &[ListedEntry]) {
    println!("{:>5}  {:>12}  {:>12}  Name", "#", "Size", "Compressed");
    for entry in entries {
        println!(
            "{:>5}  {:>12}  {:>12}  {}",
            entry.display_index, entry.uncompressed_size, entry.compressed_size, entry.name
        );
    }
}

async fn extract_selection(
    handle: &ArchiveHandle<HttpRangeReader>,
    indices: &[usize],
    output_dir: &Path,
) {
    for &index in indices {
        let progress = Arc::new(Progress::new(0));
        match handle
            .extract(index, output_dir, true, Some(progress))
            .await
        {
            Ok(outcome) => {
                let verdict = if !outcome.decompressed {
                    "unsupported codec, wrote compressed bytes"
                } else if outcome.crc_ok {
                    "ok"
                } else {
                    "crc mismatch"
                };
                println!("  [{index}] {verdict} ({} bytes)", outcome.bytes.len());
            }
            Err(e) => eprintln!("  [{index}] failed: {e}"),
        }
    }
}

/// Process a ZIP archive based on CLI options.
///
/// Handles both listing (`-l`/`-v`) and scripted extraction modes.
async fn process_zip<R: ReadAt + 'static>(reader: Arc<R>, cli: &Cli) -> Result<()> {
    let extractor = ZipExtractor::new(reader);

    if cli.list || cli.verbose {
        return list_files(&extractor, cli.verbose).await;
    }

    let entries = extractor.list_files().await?;

    let files_to_extract: Vec<_> = entries
        .iter()
        .filter(|e| {
            if e.is_directory {
                return false;
            }

            if !cli.files.is_empty() {
                let matches = cli.files.iter().any(|f| {
                    if has_glob_chars(f) {
                        glob_match(f, &e.file_name)
                    } else {
                        let basename = Path::new(&e.file_name)
                            .file_name()
                            .map(|s| s.to_string_lossy())
                            .unwrap_or_default();
                        e.file_name == *f || basename == *f
                    }
                });
                if !matches {
                    return false;
                }
            }

            if cli
                .exclude
                .iter()
                .any(|x| e.file_name.contains(x) || glob_match(x, &e.file_name))
            {
                return false;
            }

            true
        })
        .collect();

    let multiple_files = cli.pipe && files_to_extract.len() > 1;
    for entry in files_to_extract {
        extract_file(&extractor, entry, cli, multiple_files).await?;
    }

    Ok(())
}

/// List files in the ZIP archive, in simple (`-l`) or verbose (`-v`)
/// table format.
async fn list_files<R: ReadAt + 'static>(extractor: &ZipExtractor<R>, verbose: bool) -> Result<()> {
    let entries = extractor.list_files().await?;

    if verbose {
        println!(
            "{:>10}  {:>10}  {:>5}  {:>10}  {:>5}  Name",
            "Length", "Size", "Cmpr", "Date", "Time"
        );
        println!("{}", "-".repeat(70));
    }

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in &entries {
        if verbose {
            let (year, month, day) = entry.mod_date();
            let (hour, minute, _second) = entry.mod_time();

            let ratio = if entry.uncompressed_size > 0 {
                format!(
                    "{:>4}%",
                    100 - (entry.compressed_size * 100 / entry.uncompressed_size)
                )
            } else {
                "  0%".to_string()
            };

            println!(
                "{:>10}  {:>10}  {}  {:04}-{:02}-{:02}  {:02}:{:02}  {}",
                entry.uncompressed_size,
                entry.compressed_size,
                ratio,
                year,
                month,
                day,
                hour,
                minute,
                entry.file_name
            );

            if !entry.is_directory {
                total_uncompressed += entry.uncompressed_size;
                total_compressed += entry.compressed_size;
                file_count += 1;
            }
        } else {
            println!("{}", entry.file_name);
        }
    }

    if verbose {
        println!("{}", "-".repeat(70));
        let total_ratio = if total_uncompressed > 0 {
            format!(
                "{:>4}%",
                100 - (total_compressed * 100 / total_uncompressed)
            )
        } else {
            "  0%".to_string()
        };
        println!(
            "{:>10}  {:>10}  {}  {:>21}  {} files",
            total_uncompressed, total_compressed, total_ratio, "", file_count
        );
    }

    Ok(())
}

/// Extract a single file from the archive, honoring pipe mode, custom
/// output directory, junk-paths, and overwrite control.
async fn extract_file<R: ReadAt + 'static>(
    extractor: &ZipExtractor<R>,
    entry: &ZipFileEntry,
    cli: &Cli,
    show_filename: bool,
) -> Result<()> {
    if cli.pipe {
        if show_filename {
            use tokio::io::AsyncWriteExt;
            let mut stdout = tokio::io::stdout();
            stdout
                .write_all(format!("--- {} ---\n", entry.file_name).as_bytes())
                .await?;
        }
        extractor.extract_to_stdout(entry).await?;
        return Ok(());
    }

    let file_name = if cli.junk_paths {
        Path::new(&entry.file_name)
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| entry.file_name.clone())
    } else {
        entry.file_name.clone()
    };
    let output_path = match &cli.extract_dir {
        Some(dir) => PathBuf::from(dir).join(&file_name),
        None => PathBuf::from(&file_name),
    };

    if output_path.exists() {
        if cli.never_overwrite {
            if !cli.is_quiet() {
                eprintln!("Skipping: {} (file exists)", entry.file_name);
            }
            return Ok(());
        }

        if !cli.overwrite {
            if !cli.is_quiet() {
                eprintln!("Skipping: {} (use -o to overwrite)", entry.file_name);
            }
            return Ok(());
        }
    }

    if !cli.is_quiet() {
        println!("  extracting: {}", entry.file_name);
    }

    extract_with_progress(extractor, entry, &output_path, cli.is_quiet()).await?;

    Ok(())
}

/// Run an extraction with an `indicatif` progress bar driven from the
/// pipeline's shared [`Progress`] telemetry, unless `quiet` suppresses it.
async fn extract_with_progress<R: ReadAt + 'static>(
    extractor: &ZipExtractor<R>,
    entry: &ZipFileEntry,
    output_path: &Path,
    quiet: bool,
) -> Result<()> {
    if quiet || entry.compressed_size == 0 {
        extractor.extract_to_file(entry, output_path, None).await?;
        return Ok(());
    }

    let progress = Arc::new(Progress::new(entry.compressed_size));
    let bar = ProgressBar::new(entry.compressed_size);
    if let Ok(style) =
        ProgressStyle::with_template("{bar:40} {bytes}/{total_bytes} ({bytes_per_sec}, eta {eta})")
    {
        bar.set_style(style);
    }

    let ticker_progress = Arc::clone(&progress);
    let ticker_bar = bar.clone();
    let ticker = tokio::spawn(async move {
        loop {
            let snapshot = ticker_progress.snapshot();
            ticker_bar.set_position(snapshot.bytes_done);
            if snapshot.bytes_done >= snapshot.total {
                break;
            }
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
    });

    let result = extractor
        .extract_to_file(entry, output_path, Some(progress))
        .await;

    ticker.abort();
    bar.finish_and_clear();
    result?;

    Ok(())
}

/// Check if a pattern contains glob wildcard characters.
fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// Simple glob pattern matching supporting `*` and `?` wildcards.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern_chars: Vec<char> = pattern.chars().collect();
    let text_chars: Vec<char> = text.chars().collect();

    fn do_match(pattern: &[char], text: &[char]) -> bool {
        match (pattern.first(), text.first()) {
            (None, None) => true,
            (Some('*'), _) => {
                do_match(&pattern[1..], text) || (!text.is_empty() && do_match(pattern, &text[1..]))
            }
            (Some('?'), Some(_)) => do_match(&pattern[1..], &text[1..]),
            (Some(p), Some(t)) if *p == *t => do_match(&pattern[1..], &text[1..]),
            _ => false,
        }
    }

    do_match(&pattern_chars, &text_chars)
}

/// Format a byte size into a human-readable string.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{size} bytes")
    }
}
