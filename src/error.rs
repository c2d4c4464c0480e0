//! Error taxonomy for the transfer protocol.

use thiserror::Error;

/// Errors surfaced by the transfer engine and reassembler.
#[derive(Error, Debug)]
pub enum Error {
    /// A send was attempted with zero eligible receivers.
    #[error("no active connections")]
    NoActiveTargets,

    /// The channel refused a frame or failed mid-send.
    #[error("channel error for peer {peer_id}: {reason}")]
    Channel { peer_id: String, reason: String },

    /// Every target channel died before the transfer finished.
    #[error("all {count} target channels failed mid-transfer")]
    AllChannelsFailed { count: usize },

    /// A frame could not be decoded.
    #[error("malformed frame: {0}")]
    Frame(String),

    /// A chunk carried an index outside `[0, total_chunks)`.
    #[error("chunk index {index} out of range (total_chunks = {total})")]
    ChunkIndexOutOfRange { index: u32, total: u32 },

    /// A chunk arrived before any metadata record on this channel.
    #[error("chunk received before metadata")]
    ChunkBeforeMetadata,

    /// The sender declared completion while chunks were still missing.
    #[error("transfer declared complete with {received}/{total} chunks received")]
    IncompleteTransfer { received: u32, total: u32 },

    /// Reading from the file source failed.
    #[error("file source error: {0}")]
    Source(#[from] std::io::Error),
}

/// Crate-local result alias.
pub type Result<T> = std::result::Result<T, Error>;
