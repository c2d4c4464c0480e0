//! Sender-side flow controller.
//!
//! [`ChunkSender`] slices a file source into chunks and paces emission
//! against every target channel's outstanding send buffer. All targets
//! receive the same chunk payload in lock-step: before each per-channel
//! send the channel's `buffered_amount` is polled against the high-water
//! mark, so the slowest receiver gates the whole batch's cadence rather
//! than letting a fast target race ahead.
//!
//! A channel that fails mid-transfer is marked dead and skipped for the
//! rest of the file; the remaining targets are unaffected. Waiting for
//! completion acknowledgements is the fan-out scheduler's job, not this
//! module's.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::channel::PeerChannel;
use crate::config::{BACKPRESSURE_POLL_INTERVAL, BUFFERED_AMOUNT_HIGH, DEFAULT_CHUNK_SIZE};
use crate::error::{Error, Result};
use crate::protocol::{chunk_len, encode_chunk_frame, encode_control_frame, ControlMessage, FileMetadata};
use crate::source::FileSource;
use crate::transfer::progress::format_bytes;

/// One send target as seen by the flow controller.
pub(crate) type Target = (String, Arc<dyn PeerChannel>);

/// Slices a file into chunks and pushes them over a set of channels.
pub struct ChunkSender {
    chunk_size: usize,
    high_water_mark: usize,
    poll_interval: Duration,
}

impl Default for ChunkSender {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            high_water_mark: BUFFERED_AMOUNT_HIGH,
            poll_interval: BACKPRESSURE_POLL_INTERVAL,
        }
    }
}

impl ChunkSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the sender-chosen chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be non-zero");
        self.chunk_size = chunk_size;
        self
    }

    /// Override the buffered-bytes high-water mark.
    pub fn with_high_water_mark(mut self, bytes: usize) -> Self {
        self.high_water_mark = bytes;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Build the metadata record for `source` under this sender's chunk size.
    pub fn metadata_for(&self, source: &dyn FileSource) -> FileMetadata {
        FileMetadata::new(source.name(), source.len(), source.mime_type(), self.chunk_size)
    }

    /// Push one file to every channel in `targets`: metadata, then chunks
    /// `0..total_chunks` in lock-step, then the completion marker.
    ///
    /// `sent_bytes` receives the cumulative payload bytes emitted so far,
    /// once per chunk; the fan-out layer uses it for optimistic progress
    /// until receiver acknowledgements take over.
    ///
    /// Fails only when the source cannot be read or every target channel
    /// has died; individual channel failures are logged and skipped.
    pub(crate) async fn push(
        &self,
        source: &dyn FileSource,
        metadata: &FileMetadata,
        targets: &[Target],
        sent_bytes: mpsc::UnboundedSender<u64>,
    ) -> Result<()> {
        let mut live: Vec<bool> = vec![true; targets.len()];

        info!(
            event = "file_send_start",
            name = %metadata.name,
            size = %format_bytes(metadata.size),
            total_chunks = metadata.total_chunks,
            targets = targets.len(),
            "Starting chunked send"
        );

        let meta_frame = encode_control_frame(&ControlMessage::Metadata(metadata.clone()))?;
        for (slot, (peer_id, channel)) in targets.iter().enumerate() {
            if let Err(e) = channel.send(meta_frame.clone()).await {
                Self::mark_dead(&mut live, slot, peer_id, &e);
            }
        }
        self.ensure_some_alive(&live, targets)?;

        let mut sent: u64 = 0;
        for index in 0..metadata.total_chunks {
            let offset = index as u64 * self.chunk_size as u64;
            let len = chunk_len(metadata.size, self.chunk_size, index);
            let payload = source.read_range(offset, len).await?;
            let frame = encode_chunk_frame(index, &payload);

            for (slot, (peer_id, channel)) in targets.iter().enumerate() {
                if !live[slot] {
                    continue;
                }
                if let Err(e) = self.wait_for_buffer_space(peer_id, channel.as_ref()).await {
                    Self::mark_dead(&mut live, slot, peer_id, &e);
                    continue;
                }
                if let Err(e) = channel.send(frame.clone()).await {
                    Self::mark_dead(&mut live, slot, peer_id, &e);
                }
            }
            self.ensure_some_alive(&live, targets)?;

            sent += len as u64;
            let _ = sent_bytes.send(sent);
        }

        let complete_frame = encode_control_frame(&ControlMessage::Complete)?;
        for (slot, (peer_id, channel)) in targets.iter().enumerate() {
            if !live[slot] {
                continue;
            }
            if let Err(e) = channel.send(complete_frame.clone()).await {
                Self::mark_dead(&mut live, slot, peer_id, &e);
            }
        }
        self.ensure_some_alive(&live, targets)?;

        debug!(
            event = "file_send_pushed",
            name = %metadata.name,
            total_chunks = metadata.total_chunks,
            survivors = live.iter().filter(|&&l| l).count(),
            "All chunks and completion marker emitted"
        );
        Ok(())
    }

    /// Suspend until `channel`'s outstanding buffer drains below the
    /// high-water mark, polling at a fixed interval.
    async fn wait_for_buffer_space(&self, peer_id: &str, channel: &dyn PeerChannel) -> Result<()> {
        if !channel.is_open() {
            return Err(Error::Channel {
                peer_id: peer_id.to_string(),
                reason: "channel not open".into(),
            });
        }

        let buffered = channel.buffered_amount().await;
        if buffered <= self.high_water_mark {
            return Ok(());
        }

        info!(
            event = "backpressure_engaged",
            peer_id,
            buffered = %format_bytes(buffered as u64),
            high_water_mark = %format_bytes(self.high_water_mark as u64),
            "Pausing chunk emission until the send buffer drains"
        );

        loop {
            tokio::time::sleep(self.poll_interval).await;
            if !channel.is_open() {
                return Err(Error::Channel {
                    peer_id: peer_id.to_string(),
                    reason: "channel closed during backpressure wait".into(),
                });
            }
            if channel.buffered_amount().await <= self.high_water_mark {
                debug!(event = "backpressure_released", peer_id, "Send buffer drained");
                return Ok(());
            }
        }
    }

    fn mark_dead(live: &mut [bool], slot: usize, peer_id: &str, err: &Error) {
        if live[slot] {
            live[slot] = false;
            warn!(
                event = "target_dropped_mid_send",
                peer_id,
                error = %err,
                "Channel failed; continuing with the remaining targets"
            );
        }
    }

    fn ensure_some_alive(&self, live: &[bool], targets: &[Target]) -> Result<()> {
        if live.iter().any(|&l| l) {
            Ok(())
        } else {
            Err(Error::AllChannelsFailed { count: targets.len() })
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use crate::testing::MockChannel;

    const C: usize = 1024;

    fn sender() -> ChunkSender {
        ChunkSender::new().with_chunk_size(C).with_high_water_mark(4 * C)
    }

    fn targets_of(channels: &[Arc<MockChannel>]) -> Vec<Target> {
        channels
            .iter()
            .enumerate()
            .map(|(i, ch)| (format!("peer-{i}"), ch.clone() as Arc<dyn PeerChannel>))
            .collect()
    }

    async fn push(
        sender: &ChunkSender,
        source: &MemorySource,
        targets: &[Target],
    ) -> Result<Vec<u64>> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let metadata = sender.metadata_for(source);
        sender.push(source, &metadata, targets, tx).await?;
        let mut sent = Vec::new();
        while let Ok(n) = rx.try_recv() {
            sent.push(n);
        }
        Ok(sent)
    }

    #[tokio::test]
    async fn frames_every_target_identically() -> anyhow::Result<()> {
        let data: Vec<u8> = (0..(3 * C + 100)).map(|i| (i % 199) as u8).collect();
        let source = MemorySource::new("fan.bin", "application/octet-stream", data.clone());
        let channels = [MockChannel::new("a"), MockChannel::new("b"), MockChannel::new("c")];
        let targets = targets_of(&channels);

        let sent = push(&sender(), &source, &targets).await?;
        assert_eq!(sent.last().copied(), Some(data.len() as u64));

        for ch in &channels {
            let controls = ch.control_frames();
            assert!(matches!(controls.first(), Some(ControlMessage::Metadata(m)) if m.total_chunks == 4));
            assert!(matches!(controls.last(), Some(ControlMessage::Complete)));

            let chunks = ch.chunk_frames();
            assert_eq!(chunks.len(), 4);
            assert_eq!(chunks.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
            assert_eq!(chunks[3].1.len(), 100);

            let rebuilt: Vec<u8> = chunks.iter().flat_map(|(_, p)| p.to_vec()).collect();
            assert_eq!(rebuilt, data);
        }
        Ok(())
    }

    #[tokio::test]
    async fn six_hundred_kib_sends_exactly_three_chunks() -> anyhow::Result<()> {
        let data = vec![0x42u8; 600 * 1024];
        let source = MemorySource::new("big.bin", "application/octet-stream", data);
        let channel = MockChannel::new("only");
        let targets = targets_of(std::slice::from_ref(&channel));

        let sender = ChunkSender::new().with_chunk_size(256 * 1024);
        let (tx, _rx) = mpsc::unbounded_channel();
        let metadata = sender.metadata_for(&source);
        sender.push(&source, &metadata, &targets, tx).await?;

        let chunks = channel.chunk_frames();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].1.len(), 256 * 1024);
        assert_eq!(chunks[1].1.len(), 256 * 1024);
        assert_eq!(chunks[2].1.len(), 88 * 1024);
        Ok(())
    }

    #[tokio::test]
    async fn empty_file_is_metadata_plus_complete_only() -> anyhow::Result<()> {
        let source = MemorySource::new("empty.txt", "text/plain", Vec::<u8>::new());
        let channel = MockChannel::new("only");
        let targets = targets_of(std::slice::from_ref(&channel));

        push(&sender(), &source, &targets).await?;

        assert!(channel.chunk_frames().is_empty());
        let controls = channel.control_frames();
        assert!(matches!(controls[0], ControlMessage::Metadata(ref m) if m.total_chunks == 0));
        assert!(matches!(controls[1], ControlMessage::Complete));
        Ok(())
    }

    #[tokio::test]
    async fn one_slow_channel_gates_every_target() -> anyhow::Result<()> {
        let data = vec![1u8; 6 * C];
        let source = MemorySource::new("slow.bin", "application/octet-stream", data);
        let fast = MockChannel::new("fast");
        let slow = MockChannel::new("slow");
        slow.set_buffered(64 * C);
        let targets = targets_of(&[fast.clone(), slow.clone()]);

        let s = sender();
        let handle = {
            let source = source.clone();
            tokio::spawn(async move {
                let (tx, _rx) = mpsc::unbounded_channel();
                let metadata = s.metadata_for(&source);
                s.push(&source, &metadata, &targets, tx).await
            })
        };

        // Give the send loop time to run into the wall: the slow channel's
        // buffer is above the mark, so no chunk may be emitted anywhere
        // past the first in-flight batch.
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(fast.chunk_frames().len() <= 1);
        assert!(slow.chunk_frames().is_empty());
        assert!(!handle.is_finished());

        slow.set_buffered(0);
        handle.await.unwrap()?;

        assert_eq!(fast.chunk_frames().len(), 6);
        assert_eq!(slow.chunk_frames().len(), 6);
        Ok(())
    }

    #[tokio::test]
    async fn dead_channel_does_not_abort_the_others() -> anyhow::Result<()> {
        let source = MemorySource::new("half.bin", "application/octet-stream", vec![8u8; 4 * C]);
        let healthy = MockChannel::new("healthy");
        let dying = MockChannel::new("dying");
        dying.close();
        let targets = targets_of(&[healthy.clone(), dying.clone()]);

        push(&sender(), &source, &targets).await?;

        assert_eq!(healthy.chunk_frames().len(), 4);
        // Only the metadata attempt reached the dead channel.
        assert!(dying.chunk_frames().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn all_channels_dead_is_an_error() {
        let source = MemorySource::new("void.bin", "application/octet-stream", vec![0u8; C]);
        let a = MockChannel::new("a");
        let b = MockChannel::new("b");
        a.close();
        b.close();
        let targets = targets_of(&[a, b]);

        let err = push(&sender(), &source, &targets).await.unwrap_err();
        assert!(matches!(err, Error::AllChannelsFailed { count: 2 }));
    }
}
