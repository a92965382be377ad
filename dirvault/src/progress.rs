//! Progress tracking for batches of directory operations.
//!
//! Workers report each finished item; the tracker emits a debug event with
//! the processed / total count and the elapsed time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Progress of one batch, shared between worker threads
#[derive(Debug)]
pub struct BatchProgress {
    action: &'static str,
    total: usize,
    processed: AtomicUsize,
    start_time: Instant,
}

impl BatchProgress {
    pub fn new(action: &'static str, total: usize) -> Self {
        Self {
            action,
            total,
            processed: AtomicUsize::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record one finished item and return the new processed count
    pub fn item_done(&self, item: &str) -> usize {
        let processed = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            action = self.action,
            processed,
            total = self.total,
            elapsed = %format_duration(self.elapsed().as_secs()),
            item,
            "Batch progress"
        );
        processed
    }

    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format duration as human-readable string
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_progress_counts() {
        let progress = BatchProgress::new("Compressing", 4);
        assert_eq!(progress.processed(), 0);

        assert_eq!(progress.item_done("root/a/"), 1);
        assert_eq!(progress.item_done("root/b/"), 2);
        assert_eq!(progress.processed(), 2);
    }

    #[test]
    fn test_batch_progress_from_threads() {
        let progress = BatchProgress::new("Verifying", 100);
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..25 {
                        progress.item_done("x");
                    }
                });
            }
        });
        assert_eq!(progress.processed(), 100);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1023), "1023.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00 GB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30), "30s");
        assert_eq!(format_duration(90), "1m 30s");
        assert_eq!(format_duration(3665), "1h 1m");
    }
}
