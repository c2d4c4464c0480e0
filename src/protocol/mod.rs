//! Framing model: the pure data layer of the transfer protocol.
//!
//! One transfer on one channel is framed as:
//!
//! ```text
//! sender → receiver:  Metadata, Chunk×N (index is authoritative), Complete
//! receiver → sender:  ProgressAck (periodic), CompleteAck (terminal)
//! ```
//!
//! Chunks are placed by their `index` field, never by arrival order. The
//! channel delivers reliably and in order, but completion is only ever
//! declared by the explicit `Complete` control message, since chunk count alone
//! is not a completion signal.

mod frame;

pub use frame::{decode_frame, encode_chunk_frame, encode_control_frame, DecodedFrame};

use serde::{Deserialize, Serialize};

/// File metadata sent once per transfer, before any chunks.
///
/// Created by the sender from the source file's attributes and consumed
/// exactly once by each receiver to initialize a fresh reassembly state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Declared file name.
    pub name: String,
    /// Total file size in bytes.
    pub size: u64,
    /// MIME type declared by the sender.
    pub mime_type: String,
    /// Number of chunks the file is divided into (`ceil(size / chunk_size)`).
    pub total_chunks: u32,
}

impl FileMetadata {
    /// Build metadata for a file of `size` bytes sliced at `chunk_size`.
    pub fn new(
        name: impl Into<String>,
        size: u64,
        mime_type: impl Into<String>,
        chunk_size: usize,
    ) -> Self {
        Self {
            name: name.into(),
            size,
            mime_type: mime_type.into(),
            total_chunks: total_chunks(size, chunk_size),
        }
    }

    /// Nominal chunk size as seen from the receiving side.
    ///
    /// The receiver never learns the sender's configured chunk size; for
    /// progress estimation it derives `ceil(size / total_chunks)`, which
    /// equals the sender's value for any dense chunking.
    pub fn nominal_chunk_size(&self) -> u64 {
        if self.total_chunks == 0 {
            return 0;
        }
        self.size.div_ceil(self.total_chunks as u64)
    }
}

/// Compute the number of chunks required to cover `size` bytes.
///
/// An empty file has zero chunks: its transfer is just Metadata + Complete.
pub fn total_chunks(size: u64, chunk_size: usize) -> u32 {
    size.div_ceil(chunk_size as u64) as u32
}

/// Byte length of chunk `index` for a file of `size` bytes.
///
/// Every chunk is `chunk_size` bytes except the last, which carries the
/// remainder (`size % chunk_size`, or a full chunk on exact multiples).
pub fn chunk_len(size: u64, chunk_size: usize, index: u32) -> usize {
    let offset = index as u64 * chunk_size as u64;
    (chunk_size as u64).min(size.saturating_sub(offset)) as usize
}

/// Control messages, JSON-serialized behind the control frame tag.
///
/// Bulk data never travels here: chunks use the binary frame layout to
/// avoid JSON/base64 overhead on the hot path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlMessage {
    /// File metadata, sent before chunks.
    Metadata(FileMetadata),
    /// Marks the end of the chunk stream (sender → receiver).
    Complete,
    /// Periodic received-byte report (receiver → sender).
    ProgressAck { transferred_bytes: u64 },
    /// Terminal acknowledgement after successful assembly (receiver → sender).
    CompleteAck,
}
