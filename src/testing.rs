//! In-memory test doubles shared by the transfer tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::channel::PeerChannel;
use crate::error::{Error, Result};
use crate::protocol::{decode_frame, ControlMessage, DecodedFrame};

/// Initialize a test subscriber so `RUST_LOG=debug cargo test` shows the
/// engine's structured logs. Safe to call from every test.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A channel double that records every sent frame, exposes a settable
/// buffered-amount metric, and optionally forwards frames into an mpsc
/// queue so a test can pump them into the other endpoint.
pub(crate) struct MockChannel {
    label: String,
    open: AtomicBool,
    buffered: AtomicUsize,
    sent: Mutex<Vec<Bytes>>,
    deliver: Option<mpsc::UnboundedSender<Bytes>>,
}

impl MockChannel {
    pub(crate) fn new(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            open: AtomicBool::new(true),
            buffered: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            deliver: None,
        })
    }

    /// Like [`new`](Self::new), but every sent frame is also forwarded to
    /// `deliver`, the far endpoint's inbox.
    pub(crate) fn with_deliver(
        label: impl Into<String>,
        deliver: mpsc::UnboundedSender<Bytes>,
    ) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            open: AtomicBool::new(true),
            buffered: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            deliver: Some(deliver),
        })
    }

    pub(crate) fn set_buffered(&self, bytes: usize) {
        self.buffered.store(bytes, Ordering::SeqCst);
    }

    pub(crate) fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    pub(crate) fn sent_frames(&self) -> Vec<Bytes> {
        self.sent.lock().unwrap().clone()
    }

    /// Decoded control messages sent so far, in order.
    pub(crate) fn control_frames(&self) -> Vec<ControlMessage> {
        self.sent_frames()
            .iter()
            .filter_map(|f| match decode_frame(f) {
                Ok(DecodedFrame::Control(msg)) => Some(msg),
                _ => None,
            })
            .collect()
    }

    /// Decoded `(index, payload)` chunk frames sent so far, in order.
    pub(crate) fn chunk_frames(&self) -> Vec<(u32, Bytes)> {
        self.sent_frames()
            .iter()
            .filter_map(|f| match decode_frame(f) {
                Ok(DecodedFrame::Chunk { index, payload }) => Some((index, payload)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl PeerChannel for MockChannel {
    async fn send(&self, frame: Bytes) -> Result<()> {
        if !self.is_open() {
            return Err(Error::Channel {
                peer_id: self.label.clone(),
                reason: "channel closed".into(),
            });
        }
        self.sent.lock().unwrap().push(frame.clone());
        if let Some(tx) = &self.deliver {
            let _ = tx.send(frame);
        }
        Ok(())
    }

    async fn buffered_amount(&self) -> usize {
        self.buffered.load(Ordering::SeqCst)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
