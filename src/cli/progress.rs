//! CLI-specific progress handling for butterfly-transfer
//!
//! Drives an indicatif progress bar from a transfer [`Monitor`].

use std::time::Duration;

use butterfly_transfer::Monitor;
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use tokio_util::task::AbortOnDropHandle;

/// How often the bar is refreshed from the monitor
const REFRESH_INTERVAL: Duration = Duration::from_millis(100);

/// Creates a progress bar for CLI display with enhanced information
///
/// Without a known size (stdin input) a spinner with a running byte count is
/// shown instead of a bar.
pub fn create_progress_bar(total_size: Option<u64>) -> ProgressBar {
    match total_size {
        Some(total) => {
            let pb = ProgressBar::new(total);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({percent}%) {msg} ETA: {eta}")
                    .expect("Failed to create progress style")
                    .progress_chars("#>-")
            );
            pb
        }
        None => {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} [{elapsed_precise}] {bytes} {msg}")
                    .expect("Failed to create spinner style")
            );
            pb
        }
    }
}

/// Formats a smoothed rate for the bar's message slot
pub fn format_rate(bytes_per_sec: f64) -> String {
    if bytes_per_sec <= 0.0 || !bytes_per_sec.is_finite() {
        return "-- B/s".to_string();
    }
    format!("{}/s", HumanBytes(bytes_per_sec as u64))
}

/// Progress manager for a single transfer
pub struct ProgressManager {
    pub pb: ProgressBar,
}

impl ProgressManager {
    /// Create a new progress manager
    pub fn new(total_size: Option<u64>, message: &str) -> Self {
        let pb = create_progress_bar(total_size);

        // Print initial message to stderr
        eprintln!("{}", message);

        Self { pb }
    }

    /// Copies the monitor's counters into the bar until the returned handle
    /// is passed to [`finish`](Self::finish) or dropped
    pub fn track(&self, monitor: Monitor) -> AbortOnDropHandle<()> {
        let pb = self.pb.clone();
        AbortOnDropHandle::new(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(REFRESH_INTERVAL);
            loop {
                ticker.tick().await;
                refresh(&pb, &monitor);
            }
        }))
    }

    /// Stops tracking and leaves the bar at its final position
    pub async fn finish(&self, tracker: AbortOnDropHandle<()>, monitor: &Monitor, success: bool) {
        tracker.abort();
        let _ = tracker.await;
        refresh(&self.pb, monitor);

        if success {
            self.pb.finish_with_message("✅ Transfer completed!");
        } else {
            self.pb.abandon_with_message("❌ Transfer stopped");
        }
    }
}

fn refresh(pb: &ProgressBar, monitor: &Monitor) {
    pb.set_position(monitor.bytes_transferred());
    pb.set_message(format_rate(monitor.current_rate()));
}
