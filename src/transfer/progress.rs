//! Transfer progress derivation.
//!
//! Progress is derived, never authoritative: it is recomputed on every
//! observed chunk or acknowledgement. Speed is measured against the
//! current transfer attempt's start instant and resets with it; it is
//! never accumulated across transfers.

use std::time::{Duration, Instant};

/// Derived progress of one transfer, from one observer's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TransferProgress {
    /// Bytes transferred so far (clamped to `total_bytes`).
    pub transferred_bytes: u64,
    /// Total bytes in the file.
    pub total_bytes: u64,
    /// `transferred / total × 100`, clamped to `[0, 100]`.
    pub percentage: f64,
    /// Average rate since the current attempt began.
    pub bytes_per_second: f64,
}

impl TransferProgress {
    /// Fresh zeroed progress for a file of `total_bytes`.
    pub fn new(total_bytes: u64) -> Self {
        Self {
            total_bytes,
            ..Self::default()
        }
    }

    /// Recompute from an observed transferred-byte count and the elapsed
    /// time since the attempt started.
    pub fn update(&mut self, transferred: u64, elapsed: Duration) {
        let transferred = transferred.min(self.total_bytes);
        self.transferred_bytes = transferred;
        self.percentage = if self.total_bytes == 0 {
            100.0
        } else {
            (transferred as f64 / self.total_bytes as f64 * 100.0).clamp(0.0, 100.0)
        };
        let secs = elapsed.as_secs_f64();
        self.bytes_per_second = if secs > 0.0 {
            transferred as f64 / secs
        } else {
            0.0
        };
    }

    /// Force the terminal value, so observers never see a stale sub-100%
    /// reading after completion.
    pub fn complete(&mut self) {
        self.transferred_bytes = self.total_bytes;
        self.percentage = 100.0;
    }
}

/// Rate limiter for progress notifications.
///
/// At most one notification per `min_gap` of wall-clock time, except a
/// forced (terminal) notification, which always passes.
#[derive(Debug)]
pub(crate) struct ProgressThrottle {
    min_gap: Duration,
    last: Option<Instant>,
}

impl ProgressThrottle {
    pub(crate) fn new(min_gap: Duration) -> Self {
        Self { min_gap, last: None }
    }

    /// Start a fresh notification window (new transfer attempt).
    pub(crate) fn reset(&mut self) {
        self.last = None;
    }

    /// Whether a notification may fire now. Firing consumes the window.
    pub(crate) fn allow(&mut self, force: bool) -> bool {
        let now = Instant::now();
        let due = force || self.last.map_or(true, |t| now.duration_since(t) >= self.min_gap);
        if due {
            self.last = Some(now);
        }
        due
    }
}

/// Human-readable byte count for log lines and event consumers.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
