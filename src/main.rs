//! # Butterfly-transfer CLI
//!
//! Command-line interface for the butterfly-transfer library.
//! Copies a file or stdin through the engine with pacing, timeout and a live rate display.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use butterfly_transfer::{Context, RateLimiter, Transfer, TransferOptions};
use clap::Parser;
use log::{debug, error};
use tokio::io::{AsyncRead, AsyncWrite};

mod cli;

/// Command-line interface for butterfly-transfer
#[derive(Parser)]
#[command(name = "butterfly-transfer")]
#[command(about = "Cancelable, rate-observed stream copy")]
#[command(long_about = "Copies a file or stdin to a file or stdout:
  butterfly-transfer planet.osm.pbf copy.osm.pbf      # File to file with progress bar
  butterfly-transfer planet.osm.pbf -                  # Stream file to stdout
  cat data.bin | butterfly-transfer - data.copy        # Stdin to file
  butterfly-transfer big.bin out.bin --limit 10M       # Cap throughput at 10 MiB/s
  butterfly-transfer big.bin out.bin --timeout 60      # Give up after a minute

Sizes accept binary suffixes: 512K, 10M, 1.5G

File Overwrite Behavior:
  Existing destination files are never overwritten by default
  --force                                              # Overwrite without asking")]
#[command(version = env!("BUTTERFLY_VERSION"))]
struct Cli {
    /// Input file path, or "-" for stdin
    source: String,

    /// Output file path, or "-" for stdout
    #[arg(default_value = "-")]
    output: String,

    /// Enable dry-run mode (show what would be copied without copying)
    #[arg(long)]
    dry_run: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Force overwrite existing files
    #[arg(short, long)]
    force: bool,

    /// Bandwidth ceiling in bytes per second (e.g. 512K, 10M)
    #[arg(long, value_parser = parse_size_arg)]
    limit: Option<u64>,

    /// Largest burst the limiter allows (defaults to one second of --limit)
    #[arg(long, value_parser = parse_size_arg, requires = "limit")]
    burst: Option<u64>,

    /// Size of each read/write chunk
    #[arg(long, value_parser = parse_size_arg, default_value = "64K")]
    chunk_size: u64,

    /// Abort the copy after this many seconds
    #[arg(long)]
    timeout: Option<u64>,
}

fn parse_size_arg(s: &str) -> std::result::Result<u64, String> {
    butterfly_transfer::parse_size(s).map_err(|e| e.to_string())
}

/// Input source types
#[derive(Debug, PartialEq)]
enum InputSource {
    File(PathBuf),
    Stdin,
}

/// Output destination types
#[derive(Debug, PartialEq)]
enum OutputDestination {
    File(PathBuf),
    Stdout,
}

fn resolve_input(source: &str) -> InputSource {
    if source == "-" {
        InputSource::Stdin
    } else {
        InputSource::File(PathBuf::from(source))
    }
}

/// Resolve output destination from CLI arguments
fn resolve_output(output: &str) -> OutputDestination {
    if output == "-" || output.is_empty() {
        OutputDestination::Stdout
    } else {
        OutputDestination::File(PathBuf::from(output))
    }
}

fn check_overwrite(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "File already exists: {} (use --force to overwrite)",
            path.display()
        );
    }
    Ok(())
}

fn build_options(cli: &Cli) -> Result<TransferOptions> {
    let options = TransferOptions {
        chunk_size: usize::try_from(cli.chunk_size).context("chunk size does not fit in memory")?,
        rate_limit: cli.limit,
        burst: cli.burst,
        ..Default::default()
    };
    options.validate()?;
    Ok(options)
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("❌ Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging to stderr
    let mut logger = env_logger::Builder::from_default_env();
    logger.target(env_logger::Target::Stderr);
    if cli.verbose {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.init();

    if cli.verbose {
        eprintln!("🦋 Butterfly-transfer v{} starting...", env!("BUTTERFLY_VERSION"));
    }

    let input = resolve_input(&cli.source);
    let output = resolve_output(&cli.output);
    let options = build_options(&cli)?;

    if cli.dry_run {
        eprintln!("🔍 [DRY RUN] Would copy: {input:?} to {output:?}");
        eprintln!(
            "🔍 [DRY RUN] Chunk size: {} bytes, limit: {}",
            options.chunk_size,
            options
                .rate_limit
                .map(|l| format!("{l} B/s"))
                .unwrap_or_else(|| "none".to_string())
        );
        return Ok(());
    }

    let ctx = match cli.timeout {
        Some(secs) => Context::with_timeout(Duration::from_secs(secs)),
        None => Context::background(),
    };

    // Ctrl-C cancels the copy instead of killing the process
    {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n⚠️  Interrupted, stopping transfer...");
                ctx.cancel();
            }
        });
    }

    let (mut src, total_size): (Box<dyn AsyncRead + Unpin + Send>, Option<u64>) = match &input {
        InputSource::File(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;
            let len = file.metadata().await.ok().map(|m| m.len());
            (Box::new(file), len)
        }
        InputSource::Stdin => (Box::new(tokio::io::stdin()), None),
    };

    let (mut dst, show_progress): (Box<dyn AsyncWrite + Unpin + Send>, bool) = match &output {
        OutputDestination::File(path) => {
            check_overwrite(path, cli.force)?;
            eprintln!("📁 Saving to: {}", path.display());
            let file = tokio::fs::File::create(path)
                .await
                .with_context(|| format!("failed to create {}", path.display()))?;
            (Box::new(file), true)
        }
        OutputDestination::Stdout => {
            if cli.verbose {
                eprintln!("📡 Streaming to stdout");
            }
            (Box::new(tokio::io::stdout()), false)
        }
    };

    let limiter = options.limiter();
    let mut transfer = Transfer::new(&ctx, &mut *dst, &mut *src)
        .with_options(&options)
        .with_limiter(limiter.as_ref().map(|l| l as &dyn RateLimiter));
    let monitor = transfer.monitor();

    let progress = show_progress
        .then(|| cli::ProgressManager::new(total_size, &format!("🚚 Copying {}", cli.source)));
    let tracker = progress.as_ref().map(|p| p.track(monitor.clone()));

    debug!("Starting copy with {options:?}");
    let result = transfer.copy().await;

    if let (Some(progress), Some(tracker)) = (progress.as_ref(), tracker) {
        progress.finish(tracker, &monitor, result.is_ok()).await;
    }

    match result {
        Ok(written) => {
            if cli.verbose {
                eprintln!(
                    "✅ Copied {} bytes ({})",
                    written,
                    cli::progress::format_rate(monitor.current_rate())
                );
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("⚠️  Copied {} bytes before stopping", e.written());
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_input() {
        assert_eq!(resolve_input("-"), InputSource::Stdin);
        assert_eq!(
            resolve_input("data/planet.osm.pbf"),
            InputSource::File(PathBuf::from("data/planet.osm.pbf"))
        );
    }

    #[test]
    fn test_resolve_output_stdout() {
        assert_eq!(resolve_output("-"), OutputDestination::Stdout);
        assert_eq!(resolve_output(""), OutputDestination::Stdout);
    }

    #[test]
    fn test_resolve_output_custom_file() {
        let output = resolve_output("my-copy.bin");
        match output {
            OutputDestination::File(path) => {
                assert_eq!(path, PathBuf::from("my-copy.bin"));
            }
            _ => panic!("Expected file output"),
        }
    }

    #[test]
    fn test_check_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");

        assert!(check_overwrite(&path, false).is_ok());

        std::fs::write(&path, b"existing").unwrap();
        let err = check_overwrite(&path, false).unwrap_err();
        assert!(err.to_string().contains("--force"));
        assert!(check_overwrite(&path, true).is_ok());
    }

    #[test]
    fn test_cli_parses_sizes() {
        let cli = Cli::try_parse_from([
            "butterfly-transfer",
            "in.bin",
            "out.bin",
            "--limit",
            "10M",
            "--burst",
            "512K",
            "--chunk-size",
            "1M",
        ])
        .unwrap();

        let options = build_options(&cli).unwrap();
        assert_eq!(options.rate_limit, Some(10 * 1024 * 1024));
        assert_eq!(options.burst, Some(512 * 1024));
        assert_eq!(options.chunk_size, 1024 * 1024);
    }

    #[test]
    fn test_cli_rejects_bad_size() {
        assert!(Cli::try_parse_from(["butterfly-transfer", "in.bin", "--limit", "fast"]).is_err());
        assert!(Cli::try_parse_from(["butterfly-transfer", "in.bin", "--burst", "1M"]).is_err());
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let cli = Cli::try_parse_from(["butterfly-transfer", "in.bin", "--chunk-size", "0"]).unwrap();
        assert!(build_options(&cli).is_err());
    }
}
