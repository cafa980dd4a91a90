//! # Butterfly-transfer Library
//!
//! A cancelable, rate-observed stream copy engine for download clients.
//!
//! ## Features
//!
//! - **Cooperative cancellation**: every chunk checks a caller-supplied [`Context`]
//! - **Lock-free progress**: bytes transferred can be read from any task via a [`Monitor`]
//! - **Smoothed rate**: a background watcher samples progress once per second into a [`BandwidthGauge`]
//! - **Pluggable pacing**: any [`RateLimiter`] can cap throughput; [`TokenBucket`] ships in the box
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use butterfly_transfer::Context;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ctx = Context::background();
//!     let mut src = tokio::fs::File::open("input.bin").await?;
//!     let mut dst = tokio::fs::File::create("output.bin").await?;
//!
//!     let written = butterfly_transfer::copy(&ctx, &mut dst, &mut src).await?;
//!     println!("Copied {} bytes", written);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Progress Tracking
//!
//! ```rust,no_run
//! use butterfly_transfer::{Context, TransferOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ctx = Context::background();
//!     let mut src = tokio::fs::File::open("input.bin").await?;
//!     let mut dst = tokio::fs::File::create("output.bin").await?;
//!     let options = TransferOptions {
//!         rate_limit: Some(1024 * 1024), // 1 MiB/s
//!         ..Default::default()
//!     };
//!
//!     butterfly_transfer::copy_with_progress(
//!         &ctx,
//!         &mut dst,
//!         &mut src,
//!         &options,
//!         |transferred, rate| {
//!             println!("Progress: {} bytes ({:.0} B/s)", transferred, rate);
//!         },
//!     ).await?;
//!
//!     Ok(())
//! }
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::task::AbortOnDropHandle;

// Re-export core types that users might need
pub use crate::core::context::Context;
pub use crate::core::error::{CancelCause, Error, Result, TransferError};
pub use crate::core::gauge::{BandwidthGauge, MovingAverage, SAMPLE_INTERVAL};
pub use crate::core::limiter::{RateLimiter, TokenBucket};
pub use crate::core::options::{parse_size, TransferOptions, DEFAULT_CHUNK_SIZE, DEFAULT_GAUGE_WINDOW};
pub use crate::core::progress::Monitor;
pub use crate::core::transfer::Transfer;

// Internal modules
mod core;

/// How often [`copy_with_progress`] invokes its callback
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Copy everything from `src` to `dst` with default options
///
/// # Examples
/// ```rust
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use butterfly_transfer::Context;
///
/// let ctx = Context::background();
/// let mut src: &[u8] = b"payload";
/// let mut dst = Vec::new();
///
/// let written = butterfly_transfer::copy(&ctx, &mut dst, &mut src).await?;
/// assert_eq!(written, 7);
/// # Ok(())
/// # }
/// ```
pub async fn copy<W, R>(ctx: &Context, dst: &mut W, src: &mut R) -> std::result::Result<u64, TransferError>
where
    W: AsyncWrite + Unpin + ?Sized,
    R: AsyncRead + Unpin + ?Sized,
{
    Transfer::new(ctx, dst, src).copy().await
}

/// Copy with custom options
///
/// Applies chunk size, gauge window and rate limit from `options`.
///
/// # Examples
/// ```rust
/// use butterfly_transfer::{Context, TransferOptions};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let ctx = Context::background();
/// let mut src: &[u8] = &[0u8; 4096];
/// let mut dst = Vec::new();
/// let options = TransferOptions {
///     chunk_size: 1024,              // 1KB chunks
///     rate_limit: Some(1024 * 1024), // 1MB/s ceiling
///     ..Default::default()
/// };
///
/// let written = butterfly_transfer::copy_with_options(&ctx, &mut dst, &mut src, &options).await?;
/// assert_eq!(written, 4096);
/// # Ok(())
/// # }
/// ```
pub async fn copy_with_options<W, R>(
    ctx: &Context,
    dst: &mut W,
    src: &mut R,
    options: &TransferOptions,
) -> std::result::Result<u64, TransferError>
where
    W: AsyncWrite + Unpin + ?Sized,
    R: AsyncRead + Unpin + ?Sized,
{
    options.validate().map_err(|e| TransferError::new(0, e))?;

    let limiter = options.limiter();
    Transfer::new(ctx, dst, src)
        .with_options(options)
        .with_limiter(limiter.as_ref().map(|l| l as &dyn RateLimiter))
        .copy()
        .await
}

/// Copy a file to `dst_path`, creating or truncating the destination
///
/// Failures opening either file are reported with a count of zero.
pub async fn copy_file<P, Q>(
    ctx: &Context,
    src_path: P,
    dst_path: Q,
    options: &TransferOptions,
) -> std::result::Result<u64, TransferError>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let mut src = tokio::fs::File::open(src_path.as_ref())
        .await
        .map_err(|e| TransferError::new(0, Error::Io(e)))?;
    let mut dst = tokio::fs::File::create(dst_path.as_ref())
        .await
        .map_err(|e| TransferError::new(0, Error::Io(e)))?;

    copy_with_options(ctx, &mut dst, &mut src, options).await
}

/// Copy with progress tracking
///
/// `progress` receives `(bytes_transferred, bytes_per_second)` every
/// [`PROGRESS_INTERVAL`] while the copy runs, and once more when it ends.
pub async fn copy_with_progress<W, R, F>(
    ctx: &Context,
    dst: &mut W,
    src: &mut R,
    options: &TransferOptions,
    progress: F,
) -> std::result::Result<u64, TransferError>
where
    W: AsyncWrite + Unpin + ?Sized,
    R: AsyncRead + Unpin + ?Sized,
    F: Fn(u64, f64) + Send + Sync + 'static,
{
    options.validate().map_err(|e| TransferError::new(0, e))?;

    let limiter = options.limiter();
    let mut transfer = Transfer::new(ctx, dst, src)
        .with_options(options)
        .with_limiter(limiter.as_ref().map(|l| l as &dyn RateLimiter));
    let monitor = transfer.monitor();
    let progress = Arc::new(progress);

    let reporter = {
        let monitor = monitor.clone();
        let progress = Arc::clone(&progress);
        // Aborted when this future is dropped
        AbortOnDropHandle::new(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
            loop {
                ticker.tick().await;
                progress(monitor.bytes_transferred(), monitor.current_rate());
            }
        }))
    };

    let result = transfer.copy().await;
    reporter.abort();
    // Wait for the abort so the final report is really the last one
    let _ = reporter.await;
    progress(monitor.bytes_transferred(), monitor.current_rate());

    result
}
