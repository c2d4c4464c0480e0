//! Centralized configuration constants for multidrop.
//!
//! All tunable parameters live here so they can be reviewed and adjusted
//! in a single place. Wire-format constants (frame tag bytes) stay in the
//! protocol module.

use std::time::Duration;

// ── Transfer / Chunking ──────────────────────────────────────────────────────

/// Default chunk size in bytes (256 KiB).
///
/// Chunk size is a sender-chosen tunable, not a protocol constant: the
/// receiver learns only `total_chunks` from the metadata record and places
/// chunks by index, so both ends never have to agree on a byte count.
/// Deployments have run anywhere from 16 KiB (conservative SCTP buffers)
/// to 256 KiB (fast LAN links).
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// High-water mark for a channel's outstanding send buffer (bytes).
///
/// When `buffered_amount` exceeds this value the sender pauses chunk
/// emission until the buffer drains below the mark. 16 MiB gives fast
/// links enough headroom to stay saturated while bounding memory growth
/// in the transport's send queue on slow links.
pub const BUFFERED_AMOUNT_HIGH: usize = 16 * 1024 * 1024;

/// Interval between polls of `buffered_amount` while backpressure holds
/// the chunk loop.
pub const BACKPRESSURE_POLL_INTERVAL: Duration = Duration::from_millis(5);

// ── Progress reporting ───────────────────────────────────────────────────────

/// The receiver reports real received-byte progress back to the sender
/// once every this many chunks, so the sender can track acknowledged
/// progress rather than optimistic bytes-sent progress.
pub const PROGRESS_ACK_CHUNK_INTERVAL: u32 = 4;

/// Minimum wall-clock gap between receive-progress notifications.
///
/// The final chunk always notifies immediately so consumers never miss
/// the terminal value.
pub const PROGRESS_NOTIFY_THROTTLE: Duration = Duration::from_millis(50);
