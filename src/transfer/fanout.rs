//! Fan-out scheduler: one logical file to N independent targets.
//!
//! [`FanoutSender`] owns the session pool and coordinates the flow
//! controller across every concurrently connected receiver. Each target
//! is tracked to individual completion: a broadcast resolves only when
//! every targeted receiver has acknowledged full receipt.
//!
//! # Liveness
//!
//! A target that disconnects mid-transfer abandons its progress silently:
//! its completion signal is dropped unfulfilled and
//! [`send_file`](FanoutSender::send_file) keeps waiting on it forever.
//! There is no in-protocol timeout; callers bound the wait themselves
//! (`tokio::time::timeout` around the call) when that guarantee matters.

use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channel::PeerChannel;
use crate::error::{Error, Result};
use crate::events::{EventBus, TransferEvent};
use crate::protocol::{decode_frame, ControlMessage, DecodedFrame};
use crate::source::FileSource;
use crate::transfer::registry::{SessionRegistry, TargetSession};
use crate::transfer::sender::{ChunkSender, Target};

/// Sender-side engine: session pool + fan-out send coordination.
///
/// Cheap to clone; clones share the same session pool, pending-broadcast
/// slot, and subscriber set. The host integration wires its transport's
/// channel events to the `handle_channel_*` methods and every incoming
/// frame to [`handle_message`](Self::handle_message).
#[derive(Clone)]
pub struct FanoutSender {
    registry: Arc<SessionRegistry>,
    chunk_sender: Arc<ChunkSender>,
    events: EventBus,
    /// File recorded by a broadcast that found no targets; dispatched to
    /// the next peer that connects, then cleared.
    pending_broadcast: Arc<RwLock<Option<Arc<dyn FileSource>>>>,
}

impl FanoutSender {
    pub fn new(events: EventBus) -> Self {
        Self::with_chunk_sender(ChunkSender::new(), events)
    }

    /// Build with a specific flow-controller configuration (chunk size,
    /// high-water mark).
    pub fn with_chunk_sender(chunk_sender: ChunkSender, events: EventBus) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            chunk_sender: Arc::new(chunk_sender),
            events,
            pending_broadcast: Arc::new(RwLock::new(None)),
        }
    }

    /// The live session pool.
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    // ── Channel lifecycle ─────────────────────────────────────────────────

    /// A peer's channel reached the open state: register it as a send
    /// target. If a broadcast file is pending, it is dispatched to the
    /// newcomer automatically without disturbing targets mid-transfer.
    pub async fn handle_channel_open(&self, peer_id: impl Into<String>, channel: Arc<dyn PeerChannel>) {
        let peer_id = peer_id.into();
        self.registry
            .insert(TargetSession::new(peer_id.clone(), channel))
            .await;
        info!(event = "peer_attached", peer_id = %peer_id, "Channel open, peer joined the target pool");
        self.events.emit(TransferEvent::PeerConnected {
            peer_id: peer_id.clone(),
        });

        let pending = self.pending_broadcast.write().await.take();
        if let Some(source) = pending {
            info!(
                event = "pending_send_dispatched",
                peer_id = %peer_id,
                name = %source.name(),
                "Dispatching deferred broadcast to newly joined peer"
            );
            let this = self.clone();
            tokio::spawn(async move {
                let targets = vec![peer_id.clone()];
                if let Err(e) = this.send_file(source, Some(targets.as_slice())).await {
                    warn!(event = "pending_send_failed", peer_id = %peer_id, error = %e, "Deferred broadcast failed");
                }
            });
        }
    }

    /// A peer's channel closed: drop its session. Any in-flight progress
    /// toward it is abandoned and its completion signal is never fulfilled.
    pub async fn handle_channel_closed(&self, peer_id: &str) {
        self.detach(peer_id, None).await;
    }

    /// A peer's channel errored: surface the failure, then drop the
    /// session exactly as on close. No automatic retry.
    pub async fn handle_channel_error(&self, peer_id: &str, reason: &str) {
        self.detach(peer_id, Some(reason)).await;
    }

    async fn detach(&self, peer_id: &str, error: Option<&str>) {
        let Some(session) = self.registry.remove(peer_id).await else {
            debug!(event = "detach_unknown_peer", peer_id, "Close/error for a peer with no session");
            return;
        };

        if let Some(reason) = error {
            warn!(event = "peer_channel_error", peer_id, reason, "Channel error, dropping session");
            self.events.emit(TransferEvent::TransferError {
                peer_id: Some(peer_id.to_string()),
                message: reason.to_string(),
            });
        } else {
            info!(event = "peer_detached", peer_id, "Channel closed, peer left the target pool");
        }

        if session.transfer_id().is_some() && session.progress.percentage < 100.0 {
            warn!(
                event = "transfer_abandoned",
                peer_id,
                transferred = session.progress.transferred_bytes,
                total = session.progress.total_bytes,
                "Peer left mid-transfer; its completion will never resolve"
            );
        }

        self.events.emit(TransferEvent::PeerDisconnected {
            peer_id: peer_id.to_string(),
        });
    }

    // ── Incoming acknowledgements ─────────────────────────────────────────

    /// Route one frame received from `peer_id` back into the engine.
    /// Senders only ever expect receiver acknowledgements here.
    pub async fn handle_message(&self, peer_id: &str, frame: &Bytes) -> Result<()> {
        match decode_frame(frame)? {
            DecodedFrame::Control(ControlMessage::ProgressAck { transferred_bytes }) => {
                self.on_progress_ack(peer_id, transferred_bytes).await
            }
            DecodedFrame::Control(ControlMessage::CompleteAck) => self.on_complete_ack(peer_id).await,
            other => {
                debug!(event = "unexpected_frame_on_sender", peer_id, ?other, "Ignoring receiver-bound frame");
                Ok(())
            }
        }
    }

    async fn on_progress_ack(&self, peer_id: &str, transferred_bytes: u64) -> Result<()> {
        let snapshot = self
            .registry
            .with_session(peer_id, |s| {
                s.record_ack(transferred_bytes);
                (s.transfer_id(), s.progress)
            })
            .await;

        match snapshot {
            Some((Some(transfer_id), progress)) => {
                self.events.emit(TransferEvent::SendProgress {
                    transfer_id,
                    peer_id: peer_id.to_string(),
                    progress,
                });
            }
            Some((None, _)) => {
                debug!(event = "stray_progress_ack", peer_id, "Progress ack outside any send operation");
            }
            None => {
                debug!(event = "ack_from_unknown_peer", peer_id, "Progress ack from detached peer");
            }
        }
        Ok(())
    }

    async fn on_complete_ack(&self, peer_id: &str) -> Result<()> {
        let snapshot = self
            .registry
            .with_session(peer_id, |s| {
                let fired = s.complete();
                (fired, s.transfer_id(), s.progress)
            })
            .await;

        match snapshot {
            Some((true, Some(transfer_id), progress)) => {
                info!(event = "target_complete", peer_id, %transfer_id, "Receiver acknowledged full receipt");
                self.events.emit(TransferEvent::SendProgress {
                    transfer_id,
                    peer_id: peer_id.to_string(),
                    progress,
                });
                self.events.emit(TransferEvent::SendComplete {
                    transfer_id,
                    peer_id: peer_id.to_string(),
                });
            }
            _ => {
                debug!(event = "stray_complete_ack", peer_id, "Completion ack outside any send operation");
            }
        }
        Ok(())
    }

    // ── Sending ───────────────────────────────────────────────────────────

    /// Send one file to every attached peer, or to a named subset.
    ///
    /// Subset ids without a live session are silently dropped. A broadcast
    /// (`targets = None`) that finds an empty pool records the file as
    /// pending, so the next connecting peer receives it automatically, and
    /// fails with [`Error::NoActiveTargets`]; an explicit subset never
    /// marks anything pending.
    ///
    /// Resolves only when **every** targeted receiver has acknowledged
    /// completion. A target that disconnects mid-transfer leaves the call
    /// pending forever; see the module docs on liveness.
    pub async fn send_file(
        &self,
        source: Arc<dyn FileSource>,
        targets: Option<&[String]>,
    ) -> Result<()> {
        let transfer_id = Uuid::new_v4();
        let resolved = self.registry.resolve_targets(targets).await;

        if resolved.is_empty() {
            if targets.is_none() {
                warn!(
                    event = "send_deferred_no_targets",
                    name = %source.name(),
                    "No active connections; file recorded for the next peer to connect"
                );
                *self.pending_broadcast.write().await = Some(source);
            }
            return Err(Error::NoActiveTargets);
        }

        let metadata = self.chunk_sender.metadata_for(source.as_ref());

        // Arm each target: fresh progress, fresh start instant, fresh
        // completion signal. A session that vanished between resolution
        // and arming is skipped silently.
        let mut waiters = Vec::with_capacity(resolved.len());
        let mut channels: Vec<Target> = Vec::with_capacity(resolved.len());
        for peer_id in &resolved {
            let armed = self
                .registry
                .with_session(peer_id, |s| {
                    (s.begin_transfer(transfer_id, metadata.size), s.channel.clone())
                })
                .await;
            if let Some((rx, channel)) = armed {
                waiters.push((peer_id.clone(), rx));
                channels.push((peer_id.clone(), channel));
            }
        }
        if channels.is_empty() {
            return Err(Error::NoActiveTargets);
        }

        info!(
            event = "fanout_send_start",
            %transfer_id,
            name = %metadata.name,
            targets = channels.len(),
            "Sending to {} target(s)",
            channels.len()
        );

        // Pump optimistic bytes-sent progress into the sessions while the
        // flow controller runs; receiver acks supersede it per target.
        let (sent_tx, mut sent_rx) = mpsc::unbounded_channel::<u64>();
        let pump = {
            let this = self.clone();
            let peers: Vec<String> = channels.iter().map(|(p, _)| p.clone()).collect();
            tokio::spawn(async move {
                while let Some(sent) = sent_rx.recv().await {
                    for peer_id in &peers {
                        let applied = this
                            .registry
                            .with_session(peer_id, |s| {
                                s.record_sent(sent).then(|| (s.transfer_id(), s.progress))
                            })
                            .await
                            .flatten();
                        if let Some((Some(transfer_id), progress)) = applied {
                            this.events.emit(TransferEvent::SendProgress {
                                transfer_id,
                                peer_id: peer_id.clone(),
                                progress,
                            });
                        }
                    }
                }
            })
        };

        let pushed = self
            .chunk_sender
            .push(source.as_ref(), &metadata, &channels, sent_tx)
            .await;
        let _ = pump.await;
        pushed?;

        // Logical AND across targets: wait for every completion signal. A
        // dropped (abandoned) signal parks its branch forever.
        join_all(waiters.into_iter().map(|(peer_id, rx)| async move {
            match rx.await {
                Ok(()) => debug!(event = "target_join_resolved", peer_id = %peer_id, "Target completion observed"),
                Err(_) => {
                    warn!(
                        event = "target_join_abandoned",
                        peer_id = %peer_id,
                        "Target session went away; waiting forever (caller-side timeout applies)"
                    );
                    std::future::pending::<()>().await
                }
            }
        }))
        .await;

        info!(event = "fanout_send_complete", %transfer_id, name = %metadata.name, "Every target acknowledged completion");
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
