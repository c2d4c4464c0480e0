//! The peer-channel boundary.
//!
//! Everything this crate needs from the peer-connection collaborator is a
//! reliable, ordered, binary-capable message pipe with a readable
//! outstanding-buffer metric. Connection setup, signaling, NAT traversal,
//! and channel encryption all live behind this trait; a WebRTC data
//! channel, a QUIC stream, or an in-memory test double are equally valid
//! implementations.
//!
//! Channel *events* flow the other way: the host integration observes its
//! transport's open/message/error/close notifications and calls the
//! matching [`FanoutSender`] handlers.
//!
//! [`FanoutSender`]: crate::transfer::fanout::FanoutSender

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// One reliable, ordered message channel to a single remote peer.
///
/// Implementations must preserve per-channel message order end-to-end and
/// must accept arbitrarily interleaved `send` / `buffered_amount` calls.
#[async_trait]
pub trait PeerChannel: Send + Sync {
    /// Queue one framed message for ordered delivery to the peer.
    ///
    /// A failure should be reported as [`Error::Channel`]; the engine
    /// treats it as fatal for this peer's participation in the current
    /// transfer, never for the other targets.
    ///
    /// [`Error::Channel`]: crate::error::Error::Channel
    async fn send(&self, frame: Bytes) -> Result<()>;

    /// Bytes accepted by [`send`](Self::send) but not yet handed to the
    /// underlying transport. Drives the sender's backpressure pause.
    async fn buffered_amount(&self) -> usize;

    /// Whether the channel is currently open for sending.
    fn is_open(&self) -> bool;
}
