//! Non-owning handles to live peer connections.
//!
//! The socket task owns the connection; sessions only hold a [`PeerHandle`]
//! that queues frames into a bounded outbox. Queueing never waits, so a
//! slow peer can only lose its own frames.

use std::sync::Arc;

use gameshare_common::ServerMessage;
use tokio::sync::mpsc;
use tracing::warn;

/// Opaque connection identifier, also used as `clientId` on the wire.
pub type ConnectionId = String;

/// A text frame ready to go out on the socket.
pub type Frame = Arc<str>;

#[derive(Debug, Clone)]
pub struct PeerHandle {
    id: ConnectionId,
    outbox: mpsc::Sender<Frame>,
    close: mpsc::Sender<()>,
}

/// Receiving half of a [`PeerHandle`], drained by the socket task.
#[derive(Debug)]
pub struct PeerMailbox {
    pub outbox: mpsc::Receiver<Frame>,
    pub close: mpsc::Receiver<()>,
}

impl PeerHandle {
    pub fn channel(id: impl Into<ConnectionId>, capacity: usize) -> (PeerHandle, PeerMailbox) {
        let (outbox_tx, outbox_rx) = mpsc::channel(capacity.max(1));
        let (close_tx, close_rx) = mpsc::channel(1);
        (
            PeerHandle {
                id: id.into(),
                outbox: outbox_tx,
                close: close_tx,
            },
            PeerMailbox {
                outbox: outbox_rx,
                close: close_rx,
            },
        )
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Serialize and queue a server-originated message.
    pub fn send(&self, msg: &ServerMessage) -> bool {
        match msg.to_json() {
            Ok(json) => self.send_raw(Frame::from(json)),
            Err(err) => {
                warn!("failed to encode message for {}: {}", self.id, err);
                false
            }
        }
    }

    /// Queue a frame exactly as given.
    pub fn send_raw(&self, frame: Frame) -> bool {
        if self.outbox.try_send(frame).is_err() {
            warn!("failed to queue signaling frame for {}", self.id);
            return false;
        }
        true
    }

    /// Ask the socket task to shut the connection down. Frames queued
    /// before this call are still written first.
    pub fn close(&self) {
        let _ = self.close.try_send(());
    }

    pub fn is_closed(&self) -> bool {
        self.outbox.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_and_close() {
        let (peer, mut mailbox) = PeerHandle::channel("p1", 4);
        assert!(peer.send(&ServerMessage::HostLeft));
        assert!(peer.send_raw(Frame::from(r#"{"type":"offer","sdp":"v=0"}"#)));

        assert_eq!(&*mailbox.outbox.try_recv().unwrap(), r#"{"type":"host_left"}"#);
        assert_eq!(
            &*mailbox.outbox.try_recv().unwrap(),
            r#"{"type":"offer","sdp":"v=0"}"#
        );
        assert!(mailbox.close.try_recv().is_err());

        peer.close();
        peer.close();
        assert!(mailbox.close.try_recv().is_ok());
    }

    #[test]
    fn test_full_outbox_drops_frames() {
        let (peer, mut mailbox) = PeerHandle::channel("slow", 1);
        assert!(peer.send(&ServerMessage::HostLeft));
        assert!(!peer.send(&ServerMessage::HostLeft));
        assert!(mailbox.outbox.try_recv().is_ok());
        assert!(mailbox.outbox.try_recv().is_err());
    }

    #[test]
    fn test_dropped_mailbox_reports_closed() {
        let (peer, mailbox) = PeerHandle::channel("gone", 1);
        drop(mailbox);
        assert!(peer.is_closed());
        assert!(!peer.send(&ServerMessage::HostLeft));
    }
}
