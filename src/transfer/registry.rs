//! Live session tracking: one [`TargetSession`] per connected receiver.
//!
//! Sessions are the sender's view of its peers. They are created when a
//! channel reaches the open state, removed on close or error, and hold
//! the per-target progress and completion signal for the send operation
//! currently in flight. A session removed mid-transfer silently abandons
//! its progress; its completion signal is dropped unfulfilled.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{oneshot, RwLock};
use uuid::Uuid;

use crate::channel::PeerChannel;
use crate::transfer::progress::TransferProgress;

/// One connected receiver, from the sender's perspective.
pub struct TargetSession {
    peer_id: String,
    pub(crate) channel: Arc<dyn PeerChannel>,
    /// Progress of the current send operation toward this target.
    pub progress: TransferProgress,
    started_at: Instant,
    /// Id of the send operation currently in flight, if any.
    transfer_id: Option<Uuid>,
    /// Highest acknowledged byte count for the current operation. Once
    /// set, optimistic bytes-sent progress no longer applies.
    acked_bytes: Option<u64>,
    /// Fulfilled exactly once, by the receiver's completion
    /// acknowledgement. Dropped unfulfilled if the session goes away.
    completion: Option<oneshot::Sender<()>>,
}

impl TargetSession {
    pub(crate) fn new(peer_id: String, channel: Arc<dyn PeerChannel>) -> Self {
        Self {
            peer_id,
            channel,
            progress: TransferProgress::default(),
            started_at: Instant::now(),
            transfer_id: None,
            acked_bytes: None,
            completion: None,
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn transfer_id(&self) -> Option<Uuid> {
        self.transfer_id
    }

    /// Arm the session for a new send operation: reset progress and the
    /// start instant, and install a fresh completion signal.
    pub(crate) fn begin_transfer(
        &mut self,
        transfer_id: Uuid,
        total_bytes: u64,
    ) -> oneshot::Receiver<()> {
        self.progress = TransferProgress::new(total_bytes);
        self.started_at = Instant::now();
        self.transfer_id = Some(transfer_id);
        self.acked_bytes = None;
        let (tx, rx) = oneshot::channel();
        self.completion = Some(tx);
        rx
    }

    /// Optimistic update from bytes handed to the channel. Ignored once
    /// the receiver has started acknowledging real progress; returns
    /// whether the update applied.
    pub(crate) fn record_sent(&mut self, sent_bytes: u64) -> bool {
        if self.acked_bytes.is_none() {
            self.progress.update(sent_bytes, self.started_at.elapsed());
            true
        } else {
            false
        }
    }

    /// Authoritative update from a receiver progress acknowledgement.
    /// Supersedes optimistic progress and never moves backwards.
    pub(crate) fn record_ack(&mut self, transferred_bytes: u64) {
        let acked = self.acked_bytes.unwrap_or(0).max(transferred_bytes);
        self.acked_bytes = Some(acked);
        self.progress.update(acked, self.started_at.elapsed());
    }

    /// Resolve the pending completion signal, forcing terminal progress
    /// first so observers never see a stale sub-100% value.
    ///
    /// Returns false when no send operation was pending (stray ack).
    pub(crate) fn complete(&mut self) -> bool {
        match self.completion.take() {
            Some(tx) => {
                self.progress.complete();
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }
}

/// The pool of currently attached peers, keyed by peer id.
///
/// Mutated only by the channel-lifecycle handlers and read by the fan-out
/// scheduler when resolving send targets.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, TargetSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn insert(&self, session: TargetSession) {
        self.sessions
            .write()
            .await
            .insert(session.peer_id.clone(), session);
    }

    pub(crate) async fn remove(&self, peer_id: &str) -> Option<TargetSession> {
        self.sessions.write().await.remove(peer_id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Ids of every attached peer.
    pub async fn peer_ids(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Snapshot of one session's progress, if the peer is attached.
    pub async fn progress_of(&self, peer_id: &str) -> Option<TransferProgress> {
        self.sessions.read().await.get(peer_id).map(|s| s.progress)
    }

    /// Resolve a send's target set: every attached peer, or the named
    /// subset. Ids without a live session are silently dropped, as are
    /// duplicates (arming one session twice would orphan its first
    /// completion signal).
    pub(crate) async fn resolve_targets(&self, subset: Option<&[String]>) -> Vec<String> {
        let sessions = self.sessions.read().await;
        match subset {
            None => sessions.keys().cloned().collect(),
            Some(ids) => {
                let mut seen = std::collections::HashSet::new();
                ids.iter()
                    .filter(|id| sessions.contains_key(*id) && seen.insert(*id))
                    .cloned()
                    .collect()
            }
        }
    }

    /// Run `f` against one session, if present.
    pub(crate) async fn with_session<R>(
        &self,
        peer_id: &str,
        f: impl FnOnce(&mut TargetSession) -> R,
    ) -> Option<R> {
        self.sessions.write().await.get_mut(peer_id).map(f)
    }
}
