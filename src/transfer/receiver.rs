//! Receiver-side reassembly state machine.
//!
//! One [`Reassembler`] consumes the framed message stream of one channel,
//! rebuilds the file in memory, reports progress back to the sender, and
//! acknowledges completion.
//!
//! # State model
//!
//! All per-transfer state lives in a single [`ReassemblyState`] value that
//! is created whole on a metadata record and consumed whole on assembly,
//! never partially poked from individual handlers. A subsequent transfer
//! on the same channel therefore always starts clean.
//!
//! # Completion
//!
//! The file is assembled only on the sender's explicit `Complete` control
//! message; chunk count alone never triggers assembly. A `Complete` that
//! arrives while chunks are still missing is a protocol violation and is
//! rejected with [`Error::IncompleteTransfer`]; missing ranges are never
//! zero-filled.

use std::sync::Arc;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use tracing::{debug, info, warn};

use crate::channel::PeerChannel;
use crate::config::{PROGRESS_ACK_CHUNK_INTERVAL, PROGRESS_NOTIFY_THROTTLE};
use crate::error::{Error, Result};
use crate::events::{EventBus, TransferEvent};
use crate::protocol::{
    decode_frame, encode_control_frame, ControlMessage, DecodedFrame, FileMetadata,
};
use crate::source::ReceivedFile;
use crate::transfer::progress::{format_bytes, ProgressThrottle, TransferProgress};

// ── Per-transfer state ────────────────────────────────────────────────────────

/// Everything the receiver knows about the in-flight transfer.
#[derive(Debug)]
struct ReassemblyState {
    metadata: FileMetadata,
    /// Sparse chunk table indexed by chunk index; `Some` once received.
    chunk_table: Vec<Option<Bytes>>,
    /// Count of distinct chunks received. Never exceeds `total_chunks`.
    received_count: u32,
    started_at: Instant,
    progress: TransferProgress,
}

impl ReassemblyState {
    fn new(metadata: FileMetadata) -> Self {
        let progress = TransferProgress::new(metadata.size);
        Self {
            chunk_table: vec![None; metadata.total_chunks as usize],
            received_count: 0,
            started_at: Instant::now(),
            progress,
            metadata,
        }
    }

    /// Transferred-byte estimate: `received_count × nominal_chunk_size`,
    /// clamped to the declared size. The nominal chunk size is derived
    /// from the metadata, so the receiver never assumes the sender's
    /// configured value.
    fn estimate(&self) -> u64 {
        (self.received_count as u64 * self.metadata.nominal_chunk_size()).min(self.metadata.size)
    }

    fn is_full(&self) -> bool {
        self.received_count == self.metadata.total_chunks
    }

    /// Concatenate the chunk table in index order. Only called once the
    /// table is full.
    fn assemble(self) -> Bytes {
        let mut data = BytesMut::with_capacity(self.metadata.size as usize);
        for chunk in self.chunk_table.into_iter().flatten() {
            data.extend_from_slice(&chunk);
        }
        data.freeze()
    }
}

// ── Reassembler ───────────────────────────────────────────────────────────────

/// Consumes one channel's framed message stream and rebuilds the file.
///
/// The host integration feeds every incoming frame to
/// [`handle_message`](Self::handle_message); acknowledgements travel back
/// over the same channel the frames arrived on.
pub struct Reassembler {
    channel: Arc<dyn PeerChannel>,
    events: EventBus,
    state: Option<ReassemblyState>,
    throttle: ProgressThrottle,
}

impl Reassembler {
    pub fn new(channel: Arc<dyn PeerChannel>, events: EventBus) -> Self {
        Self {
            channel,
            events,
            state: None,
            throttle: ProgressThrottle::new(PROGRESS_NOTIFY_THROTTLE),
        }
    }

    /// Whether a transfer is currently in flight.
    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    /// Process one incoming frame, mutating reassembly state.
    pub async fn handle_message(&mut self, frame: &Bytes) -> Result<()> {
        match decode_frame(frame)? {
            DecodedFrame::Control(ControlMessage::Metadata(metadata)) => {
                self.on_metadata(metadata);
                Ok(())
            }
            DecodedFrame::Chunk { index, payload } => self.on_chunk(index, payload).await,
            DecodedFrame::Control(ControlMessage::Complete) => self.on_complete().await,
            DecodedFrame::Control(msg) => {
                debug!(event = "unexpected_control_message", ?msg, "Ignoring sender-bound message on receive side");
                Ok(())
            }
        }
    }

    /// Begin a new logical transfer, replacing any previous state whole.
    fn on_metadata(&mut self, metadata: FileMetadata) {
        if let Some(old) = &self.state {
            warn!(
                event = "transfer_superseded",
                name = %old.metadata.name,
                received = old.received_count,
                total = old.metadata.total_chunks,
                "New metadata replaces an unfinished transfer"
            );
        }
        info!(
            event = "transfer_started",
            name = %metadata.name,
            size = %format_bytes(metadata.size),
            total_chunks = metadata.total_chunks,
            mime_type = %metadata.mime_type,
            "Receiving file"
        );
        self.state = Some(ReassemblyState::new(metadata));
        self.throttle.reset();
    }

    async fn on_chunk(&mut self, index: u32, payload: Bytes) -> Result<()> {
        let state = self.state.as_mut().ok_or(Error::ChunkBeforeMetadata)?;

        let total = state.metadata.total_chunks;
        if index >= total {
            return Err(Error::ChunkIndexOutOfRange { index, total });
        }
        if state.chunk_table[index as usize].is_some() {
            warn!(event = "duplicate_chunk", index, "Ignoring duplicate chunk");
            return Ok(());
        }

        state.chunk_table[index as usize] = Some(payload);
        state.received_count += 1;

        let estimate = state.estimate();
        let elapsed = state.started_at.elapsed();
        state.progress.update(estimate, elapsed);

        // The final chunk always notifies so the terminal value is never
        // lost to the throttle window.
        let is_final = state.is_full();
        let progress = state.progress;
        let ack_due = state.received_count % PROGRESS_ACK_CHUNK_INTERVAL == 0;

        if self.throttle.allow(is_final) {
            self.events.emit(TransferEvent::ReceiveProgress { progress });
        }

        if ack_due {
            let frame = encode_control_frame(&ControlMessage::ProgressAck {
                transferred_bytes: estimate,
            })?;
            self.channel.send(frame).await?;
        }

        Ok(())
    }

    async fn on_complete(&mut self) -> Result<()> {
        let state = match self.state.take() {
            None => {
                // A duplicate Complete after the state has been reset must
                // be a no-op, never a partial re-assembly.
                debug!(event = "duplicate_complete", "Complete with no active transfer, ignoring");
                return Ok(());
            }
            Some(state) if !state.is_full() => {
                let err = Error::IncompleteTransfer {
                    received: state.received_count,
                    total: state.metadata.total_chunks,
                };
                // Keep the state: the missing chunks may still arrive.
                self.state = Some(state);
                return Err(err);
            }
            Some(state) => state,
        };
        let metadata = state.metadata.clone();
        let elapsed = state.started_at.elapsed();
        let mut progress = state.progress;
        let data = state.assemble();

        progress.complete();
        self.events.emit(TransferEvent::ReceiveProgress { progress });

        info!(
            event = "file_received",
            name = %metadata.name,
            size = %format_bytes(metadata.size),
            elapsed_ms = elapsed.as_millis() as u64,
            "File reassembled"
        );

        self.events.emit(TransferEvent::FileReceived {
            file: ReceivedFile {
                name: metadata.name,
                mime_type: metadata.mime_type,
                data,
            },
        });

        let ack = encode_control_frame(&ControlMessage::CompleteAck)?;
        self.channel.send(ack).await?;
        self.throttle.reset();
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
