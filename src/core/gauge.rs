//! Bandwidth gauges and the background watcher that feeds them
//!
//! A gauge turns periodic samples of a cumulative byte count into a smoothed
//! bytes-per-second estimate. The watcher samples once per [`SAMPLE_INTERVAL`],
//! so the smoothing window is measured in time, not in chunks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{trace, warn};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::core::context::Context;
use crate::core::progress::Progress;

/// Fixed cadence of the gauge watcher
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// How long `copy()` waits for the watcher to wind down before aborting it
const STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// Accumulates byte-count samples and reports a smoothed rate.
///
/// Implementations must keep [`rate`](Self::rate) cheap: it is called from UI
/// threads while a transfer is running and must never block or fail.
pub trait BandwidthGauge: Send + Sync {
    /// Records the cumulative byte count observed now.
    fn record_sample(&self, total: u64);

    /// Current rate estimate in bytes per second, 0.0 if unknown.
    fn rate(&self) -> f64;
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    total: u64,
}

/// Simple moving average over the last `window` samples.
///
/// With the default window of 6 and one sample per second this is a five
/// second average.
#[derive(Debug)]
pub struct MovingAverage {
    window: usize,
    samples: Mutex<VecDeque<Sample>>,
    // f64 bits, so readers never touch the sample lock
    rate: AtomicU64,
}

impl MovingAverage {
    /// Creates a gauge averaging over `window` samples (at least 2).
    pub fn new(window: usize) -> Self {
        let window = window.max(2);
        Self {
            window,
            samples: Mutex::new(VecDeque::with_capacity(window)),
            rate: AtomicU64::new(0f64.to_bits()),
        }
    }

    /// Number of samples the average spans.
    pub fn window(&self) -> usize {
        self.window
    }

    /// Records a sample taken at an explicit instant.
    pub fn sample_at(&self, at: Instant, total: u64) {
        let rate = {
            let mut samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
            samples.push_back(Sample { at, total });
            while samples.len() > self.window {
                samples.pop_front();
            }
            average(&samples)
        };

        self.rate.store(rate.to_bits(), Ordering::Relaxed);
    }
}

impl Default for MovingAverage {
    fn default() -> Self {
        Self::new(crate::core::options::DEFAULT_GAUGE_WINDOW)
    }
}

impl BandwidthGauge for MovingAverage {
    fn record_sample(&self, total: u64) {
        self.sample_at(Instant::now(), total);
    }

    fn rate(&self) -> f64 {
        f64::from_bits(self.rate.load(Ordering::Relaxed))
    }
}

fn average(samples: &VecDeque<Sample>) -> f64 {
    let (Some(oldest), Some(newest)) = (samples.front(), samples.back()) else {
        return 0.0;
    };
    if samples.len() < 2 {
        return 0.0;
    }

    let elapsed = newest.at.saturating_duration_since(oldest.at).as_secs_f64();
    if elapsed <= 0.0 {
        return 0.0;
    }

    newest.total.saturating_sub(oldest.total) as f64 / elapsed
}

/// Handle on a running watcher. Stopping or dropping it ends the task.
pub(crate) struct WatchGuard {
    scope: Context,
    handle: Option<JoinHandle<()>>,
}

impl WatchGuard {
    /// Cancels the watcher's scope and waits (bounded) for the task to exit.
    pub(crate) async fn stop(mut self) {
        self.scope.cancel();

        let Some(mut handle) = self.handle.take() else {
            return;
        };

        match tokio::time::timeout(STOP_TIMEOUT, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("gauge watcher ended abnormally: {e}"),
            Err(_) => {
                warn!("gauge watcher did not stop within {STOP_TIMEOUT:?}, aborting");
                handle.abort();
            }
        }
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        // Reached when the copy future is dropped or unwinds before stop()
        self.scope.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Spawns a task that samples `progress` into its gauge every `interval`
/// until `scope` is canceled.
pub(crate) fn watch(scope: Context, progress: Arc<Progress>, interval: Duration) -> WatchGuard {
    let task_scope = scope.clone();
    let handle = tokio::spawn(async move {
        progress.sample();

        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = task_scope.done() => break,
                _ = ticker.tick() => {
                    progress.sample();
                    trace!(
                        "gauge sample: {} bytes, {:.0} B/s",
                        progress.total(),
                        progress.rate()
                    );
                }
            }
        }
    });

    WatchGuard {
        scope,
        handle: Some(handle),
    }
}
