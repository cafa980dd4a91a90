//! The copy loop
//!
//! [`Transfer`] moves bytes from a source to a destination in fixed-size
//! chunks. Before each chunk it checks the bound [`Context`] and asks the rate
//! limiter (if any) for permission; after each chunk it publishes the new total
//! for [`Monitor`]s. A gauge watcher samples that total once per second for the
//! duration of [`Transfer::copy`].
//!
//! Cancellation takes effect at chunk boundaries, while waiting on the rate
//! limiter, and while waiting for the source to produce data. A write that has
//! started is always allowed to finish, so the count never includes bytes the
//! destination did not accept.

use std::io::{self, ErrorKind};
use std::sync::Arc;

use log::{debug, trace};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::core::context::Context;
use crate::core::error::{Error, TransferError};
use crate::core::gauge::{self, BandwidthGauge, MovingAverage, SAMPLE_INTERVAL};
use crate::core::limiter::RateLimiter;
use crate::core::options::{TransferOptions, DEFAULT_CHUNK_SIZE};
use crate::core::progress::{Monitor, Progress};

/// A single cancelable, rate-observed copy from `src` to `dst`.
///
/// Build one per transfer attempt and call [`copy`](Self::copy) once.
///
/// # Examples
///
/// ```rust
/// use butterfly_transfer::{Context, Transfer};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let ctx = Context::background();
/// let mut src: &[u8] = b"hello world";
/// let mut dst = Vec::new();
///
/// let mut transfer = Transfer::new(&ctx, &mut dst, &mut src).with_chunk_size(4);
/// let monitor = transfer.monitor();
///
/// let written = transfer.copy().await?;
/// assert_eq!(written, 11);
/// assert_eq!(monitor.bytes_transferred(), 11);
/// # Ok(())
/// # }
/// ```
pub struct Transfer<'a, W: ?Sized, R: ?Sized> {
    ctx: &'a Context,
    limiter: Option<&'a dyn RateLimiter>,
    dst: &'a mut W,
    src: &'a mut R,
    buf: Option<Vec<u8>>,
    chunk_size: usize,
    progress: Arc<Progress>,
}

impl<'a, W, R> Transfer<'a, W, R>
where
    W: AsyncWrite + Unpin + ?Sized,
    R: AsyncRead + Unpin + ?Sized,
{
    /// Creates a transfer with the default chunk size, no rate limit and a
    /// six-sample moving-average gauge.
    pub fn new(ctx: &'a Context, dst: &'a mut W, src: &'a mut R) -> Self {
        Self {
            ctx,
            limiter: None,
            dst,
            src,
            buf: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            progress: Arc::new(Progress::new(Arc::new(MovingAverage::default()))),
        }
    }

    /// Paces the copy through `limiter`. `None` means unrestricted.
    pub fn with_limiter(mut self, limiter: Option<&'a dyn RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    /// Uses `buf` as the working buffer; its length becomes the chunk size.
    ///
    /// An empty buffer is ignored and one is allocated on first use instead.
    pub fn with_buffer(mut self, buf: Vec<u8>) -> Self {
        if !buf.is_empty() {
            self.chunk_size = buf.len();
            self.buf = Some(buf);
        }
        self
    }

    /// Sets the number of bytes moved per chunk.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Replaces the bandwidth gauge.
    ///
    /// Monitors taken before this call keep observing the old gauge.
    pub fn with_gauge(mut self, gauge: Arc<dyn BandwidthGauge>) -> Self {
        self.progress = Arc::new(Progress::new(gauge));
        self
    }

    /// Applies chunk size and gauge window from `options`.
    ///
    /// The rate limit is not applied here because the limiter is borrowed; pass
    /// `options.limiter()` to [`with_limiter`](Self::with_limiter).
    pub fn with_options(self, options: &TransferOptions) -> Self {
        self.with_chunk_size(options.chunk_size)
            .with_gauge(Arc::new(options.gauge()))
    }

    /// Configured chunk size in bytes.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Returns an observer that stays valid after the transfer is gone.
    pub fn monitor(&self) -> Monitor {
        Monitor::new(Arc::clone(&self.progress))
    }

    /// Bytes written to the destination so far.
    pub fn bytes_transferred(&self) -> u64 {
        self.progress.total()
    }

    /// Smoothed transfer rate in bytes per second.
    pub fn current_rate(&self) -> f64 {
        self.progress.rate()
    }

    /// Copies until the source is exhausted, an I/O error occurs, or the
    /// context is canceled.
    ///
    /// Returns the total bytes written. On failure the error carries the bytes
    /// written before it and the unmodified cause.
    pub async fn copy(&mut self) -> Result<u64, TransferError> {
        let mut written = self.progress.total();

        if self.chunk_size == 0 {
            return Err(TransferError::new(
                written,
                Error::InvalidConfig("chunk size must be greater than zero".to_string()),
            ));
        }

        debug!(
            "transfer started: chunk size {} bytes, {}",
            self.chunk_size,
            if self.limiter.is_some() { "rate limited" } else { "unlimited" }
        );

        let watcher = gauge::watch(self.ctx.child(), Arc::clone(&self.progress), SAMPLE_INTERVAL);
        let result = self.run(&mut written).await;
        watcher.stop().await;

        match result {
            Ok(()) => {
                debug!("transfer complete: {written} bytes");
                Ok(written)
            }
            Err(e) => {
                debug!("transfer stopped after {written} bytes: {e}");
                Err(TransferError::new(written, e))
            }
        }
    }

    async fn run(&mut self, written: &mut u64) -> Result<(), Error> {
        let Self {
            ctx,
            limiter,
            dst,
            src,
            buf,
            chunk_size,
            progress,
        } = self;

        let ctx: &Context = ctx;
        let limiter = *limiter;
        let chunk_size = *chunk_size;
        let buf = buf.get_or_insert_with(Vec::new);
        if buf.len() != chunk_size {
            buf.resize(chunk_size, 0);
        }

        loop {
            if let Some(cause) = ctx.err() {
                return Err(Error::Canceled(cause));
            }

            if let Some(limiter) = limiter {
                limiter.acquire(chunk_size, ctx).await?;
            }

            let fill = fill(ctx, &mut **src, buf).await;

            if fill.len > 0 {
                let (n, result) = write_chunk(&mut **dst, &buf[..fill.len]).await;
                if n > 0 {
                    *written += n as u64;
                    progress.record_total(*written);
                }
                trace!("chunk: {n} bytes, {written} total");
                result?;
            }

            if let Some(err) = fill.stop {
                return Err(err);
            }

            if fill.eof {
                dst.flush().await?;
                return Ok(());
            }
        }
    }
}

/// Outcome of filling the working buffer from the source.
struct Fill {
    len: usize,
    eof: bool,
    stop: Option<Error>,
}

/// Reads until `buf` is full, the source ends, the read fails, or `ctx` is
/// canceled while waiting for data. Bytes already read are reported in every
/// case so they can still be written out.
async fn fill<R>(ctx: &Context, src: &mut R, buf: &mut [u8]) -> Fill
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut len = 0;

    while len < buf.len() {
        let read = tokio::select! {
            biased;
            cause = ctx.done() => {
                return Fill { len, eof: false, stop: Some(Error::Canceled(cause)) };
            }
            read = src.read(&mut buf[len..]) => read,
        };

        match read {
            Ok(0) => return Fill { len, eof: true, stop: None },
            Ok(n) => len += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Fill { len, eof: false, stop: Some(Error::Io(e)) },
        }
    }

    Fill { len, eof: false, stop: None }
}

/// Writes `chunk` in full, returning how many bytes the destination accepted
/// alongside the first error.
async fn write_chunk<W>(dst: &mut W, chunk: &[u8]) -> (usize, io::Result<()>)
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut done = 0;

    while done < chunk.len() {
        match dst.write(&chunk[done..]).await {
            Ok(0) => {
                return (
                    done,
                    Err(io::Error::new(ErrorKind::WriteZero, "failed to write whole chunk")),
                );
            }
            Ok(n) => done += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return (done, Err(e)),
        }
    }

    (done, Ok(()))
}
