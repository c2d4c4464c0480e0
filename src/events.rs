//! Typed transfer events and their subscription interface.
//!
//! Consumers subscribe **before** the engine or reassembler is built and
//! the subscriber set is fixed from then on; there is no post-hoc handler
//! rebinding, so a "default" handler can never race an "overridden" one.
//! Every subscriber receives every event; subscribers whose receiving end
//! has been dropped are skipped silently.

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::source::ReceivedFile;
use crate::transfer::progress::TransferProgress;

/// Events delivered from the transfer engine and reassembler to the
/// application layer.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// A peer's channel reached the open state and joined the target pool.
    PeerConnected { peer_id: String },
    /// A peer's channel closed or errored; it left the target pool.
    PeerDisconnected { peer_id: String },
    /// Sender-side progress for one target. Optimistic (bytes sent) until
    /// the target's first progress acknowledgement, ack-derived after.
    SendProgress {
        transfer_id: Uuid,
        peer_id: String,
        progress: TransferProgress,
    },
    /// One target acknowledged full receipt of the file.
    SendComplete { transfer_id: Uuid, peer_id: String },
    /// Receiver-side progress for the in-flight incoming file.
    ReceiveProgress { progress: TransferProgress },
    /// An incoming file has been fully reassembled.
    FileReceived { file: ReceivedFile },
    /// A channel-level failure, surfaced rather than retried.
    TransferError {
        peer_id: Option<String>,
        message: String,
    },
}

/// Multicast event outlet with a subscriber set fixed at construction.
///
/// Subscribe while building the application, then hand the bus to the
/// engine/reassembler constructors. Cloning the bus shares the same
/// subscriber set.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    subscribers: Vec<mpsc::UnboundedSender<TransferEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one subscriber and return its receiving end.
    ///
    /// Must be called before the bus is handed to a protocol component;
    /// the subscriber set is immutable afterwards.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<TransferEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber.
    pub(crate) fn emit(&self, event: TransferEvent) {
        for sub in &self.subscribers {
            let _ = sub.send(event.clone());
        }
    }
}
