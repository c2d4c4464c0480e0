//! # multidrop
//!
//! Fan-out chunked file transfer over reliable, ordered peer channels.
//!
//! The hard part of moving a file between peers is not the channel (a
//! WebRTC data channel, QUIC stream, or any reliable message pipe will do)
//! but driving it correctly: framing the file into ordered chunks, pacing
//! emission against the channel's send buffer, fanning one file out to N
//! concurrently connected receivers with independent progress tracking,
//! detecting completion through acknowledgements rather than assumption,
//! and reassembling an exact byte-for-byte copy on every receiver.
//!
//! ## Protocol
//!
//! Per transfer, on one channel:
//!
//! ```text
//! sender → receiver:  Metadata, Chunk × N, Complete
//! receiver → sender:  ProgressAck (every 4th chunk), CompleteAck (terminal)
//! ```
//!
//! Chunks are placed by their index field, never by arrival order, and a
//! receiver assembles only on the explicit `Complete` marker. The sender
//! pauses chunk emission whenever any target channel's outstanding buffer
//! exceeds the high-water mark, so the slowest receiver paces the batch.
//!
//! ## Architecture
//!
//! - [`protocol`]: the pure framing model (metadata, chunk, control frames)
//! - [`transfer::Reassembler`]: receiver-side state machine
//! - [`transfer::ChunkSender`]: sender-side flow controller
//! - [`transfer::FanoutSender`]: multi-target scheduler and session pool
//! - [`channel::PeerChannel`] / [`source::FileSource`]: the two external
//!   boundaries, how bytes move and where they come from
//! - [`events::EventBus`]: typed event delivery, subscribers fixed at
//!   construction
//!
//! Connection establishment, signaling, and channel encryption belong to
//! the host; this crate begins where an open channel ends.
//!
//! ```no_run
//! use std::sync::Arc;
//! use multidrop::{EventBus, FanoutSender, MemorySource, PeerChannel};
//!
//! # async fn demo(channel: Arc<dyn PeerChannel>) -> multidrop::Result<()> {
//! let mut bus = EventBus::new();
//! let _events = bus.subscribe();
//! let engine = FanoutSender::new(bus);
//!
//! engine.handle_channel_open("peer-1", channel).await;
//!
//! let file = Arc::new(MemorySource::new("notes.txt", "text/plain", b"hello".to_vec()));
//! engine.send_file(file, None).await?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod events;
pub mod protocol;
pub mod source;
pub mod transfer;

#[cfg(test)]
pub(crate) mod testing;

pub use channel::PeerChannel;
pub use error::{Error, Result};
pub use events::{EventBus, TransferEvent};
pub use protocol::{ControlMessage, FileMetadata};
pub use source::{DiskSource, FileSource, MemorySource, ReceivedFile};
pub use transfer::{ChunkSender, FanoutSender, Reassembler, SessionRegistry, TransferProgress};
