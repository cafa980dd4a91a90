//! Progress counter and observer handle
//!
//! The copy loop is the only writer of the counter; any number of
//! [`Monitor`]s may read it concurrently.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::core::gauge::BandwidthGauge;

/// Cumulative byte count of one transfer plus the gauge fed from it.
pub(crate) struct Progress {
    written: AtomicU64,
    gauge: Arc<dyn BandwidthGauge>,
}

impl Progress {
    pub(crate) fn new(gauge: Arc<dyn BandwidthGauge>) -> Self {
        Self {
            written: AtomicU64::new(0),
            gauge,
        }
    }

    /// Overwrites the counter with a new cumulative total.
    pub(crate) fn record_total(&self, total: u64) {
        self.written.store(total, Ordering::Release);
    }

    pub(crate) fn total(&self) -> u64 {
        self.written.load(Ordering::Acquire)
    }

    /// Feeds the current total into the gauge.
    pub(crate) fn sample(&self) {
        self.gauge.record_sample(self.total());
    }

    pub(crate) fn rate(&self) -> f64 {
        self.gauge.rate()
    }
}

/// Read-only view of a transfer's progress.
///
/// Cheap to clone and `'static`, so it can be handed to a UI task while the
/// transfer runs. `Monitor::default()` is not attached to any transfer and
/// reports zero for everything.
#[derive(Clone, Default)]
pub struct Monitor {
    progress: Option<Arc<Progress>>,
}

impl Monitor {
    pub(crate) fn new(progress: Arc<Progress>) -> Self {
        Self {
            progress: Some(progress),
        }
    }

    /// Bytes written to the destination so far.
    pub fn bytes_transferred(&self) -> u64 {
        self.progress.as_ref().map_or(0, |p| p.total())
    }

    /// Smoothed transfer rate in bytes per second.
    pub fn current_rate(&self) -> f64 {
        self.progress.as_ref().map_or(0.0, |p| p.rate())
    }

    /// Returns `true` if this monitor observes a transfer.
    pub fn is_attached(&self) -> bool {
        self.progress.is_some()
    }
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("bytes_transferred", &self.bytes_transferred())
            .field("current_rate", &self.current_rate())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::gauge::MovingAverage;

    #[test]
    fn test_detached_monitor_reports_zero() {
        let monitor = Monitor::default();
        assert!(!monitor.is_attached());
        assert_eq!(monitor.bytes_transferred(), 0);
        assert_eq!(monitor.current_rate(), 0.0);
    }

    #[test]
    fn test_record_total_overwrites() {
        let progress = Arc::new(Progress::new(Arc::new(MovingAverage::default())));
        let monitor = Monitor::new(progress.clone());

        progress.record_total(100);
        assert_eq!(monitor.bytes_transferred(), 100);

        progress.record_total(250);
        assert_eq!(monitor.bytes_transferred(), 250);
    }

    #[test]
    fn test_concurrent_readers_see_monotonic_totals() {
        let progress = Arc::new(Progress::new(Arc::new(MovingAverage::default())));
        let monitor = Monitor::new(progress.clone());

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let monitor = monitor.clone();
                std::thread::spawn(move || {
                    let mut last = 0;
                    for _ in 0..10_000 {
                        let now = monitor.bytes_transferred();
                        assert!(now >= last, "counter went backwards: {last} -> {now}");
                        last = now;
                    }
                })
            })
            .collect();

        for total in (0..10_000u64).map(|i| i * 8) {
            progress.record_total(total);
        }

        for reader in readers {
            reader.join().unwrap();
        }
    }
}
