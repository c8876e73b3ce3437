//! Per-socket connection handling.
//!
//! Each accepted WebSocket gets a reader loop (this task) and a writer
//! task joined by the peer's bounded outbox. The reader decodes frames,
//! tracks the connection's join state and dispatches into the shared
//! relay engine.

use std::net::SocketAddr;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use gameshare_common::{PeerRole, ServerMessage, SignalMessage};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::peer::{Frame, PeerHandle, PeerMailbox};
use crate::relay::SharedRelay;

const MAX_SESSION_ID_BYTES: usize = 256;

/// Join state of a connection. Transitions only move forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Unjoined,
    Joined { session_id: String, role: PeerRole },
    Closed,
}

/// Reasons a frame is rejected. The display text is what the peer sees in
/// the `error` frame.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid message")]
    InvalidMessage(#[source] gameshare_common::Error),
    #[error("Invalid join")]
    InvalidJoin,
    #[error("Already joined")]
    AlreadyJoined,
    #[error("Join required")]
    JoinRequired,
    #[error("Binary messages are not supported")]
    Binary,
    #[error("Connection closed")]
    Closed,
}

pub struct ConnectionHandler {
    peer: PeerHandle,
    relay: SharedRelay,
    state: ConnectionState,
    /// Session named in the upgrade URL (`?session=`), used when a `join`
    /// does not carry its own
    default_session: Option<String>,
}

impl ConnectionHandler {
    pub fn new(peer: PeerHandle, relay: SharedRelay, default_session: Option<String>) -> Self {
        Self {
            peer,
            relay,
            state: ConnectionState::Unjoined,
            default_session,
        }
    }

    pub fn id(&self) -> &str {
        self.peer.id()
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Handle one inbound text frame. Rejections are reported back to the
    /// peer as an `error` frame; the connection stays open either way.
    pub async fn handle_text(&mut self, text: &str) -> Result<(), ProtocolError> {
        let result = self.dispatch(text).await;
        if let Err(err) = &result {
            self.reject(err);
        }
        result
    }

    /// Report a rejected frame to the peer.
    pub fn reject(&self, err: &ProtocolError) {
        match err {
            ProtocolError::InvalidMessage(source) => {
                warn!("invalid frame from {}: {}", self.id(), source)
            }
            other => warn!("rejected frame from {}: {}", self.id(), other),
        }
        self.peer.send(&ServerMessage::error(err.to_string()));
    }

    async fn dispatch(&mut self, text: &str) -> Result<(), ProtocolError> {
        let message = SignalMessage::decode(text).map_err(ProtocolError::InvalidMessage)?;
        debug!("{} from {}", message.kind(), self.id());

        if let SignalMessage::Join {
            session_id,
            client_type,
        } = message
        {
            return self.join(session_id, client_type).await;
        }

        let (session_id, role) = match &self.state {
            ConnectionState::Joined { session_id, role } => (session_id.clone(), *role),
            ConnectionState::Unjoined => return Err(ProtocolError::JoinRequired),
            ConnectionState::Closed => return Err(ProtocolError::Closed),
        };
        if let Some(claimed) = message.session_id() {
            if claimed != session_id {
                debug!(
                    "ignoring sessionId {} on {} from {} joined to {}",
                    claimed,
                    message.kind(),
                    self.id(),
                    session_id
                );
            }
        }

        let frame = Frame::from(text);
        let mut relay = self.relay.lock().await;
        match message {
            SignalMessage::Offer { .. } => {
                relay.on_offer(&self.peer, &session_id, role, frame);
            }
            SignalMessage::Answer { .. } => {
                relay.on_answer(&self.peer, &session_id, role, frame);
            }
            SignalMessage::IceCandidate { target, .. } => {
                relay.on_ice_candidate(&self.peer, &session_id, role, target, frame);
            }
            SignalMessage::Join { .. } => return Err(ProtocolError::AlreadyJoined),
        }
        Ok(())
    }

    async fn join(
        &mut self,
        session_id: Option<String>,
        client_type: Option<String>,
    ) -> Result<(), ProtocolError> {
        match self.state {
            ConnectionState::Unjoined => {}
            ConnectionState::Joined { .. } => return Err(ProtocolError::AlreadyJoined),
            ConnectionState::Closed => return Err(ProtocolError::Closed),
        }

        let session_id = session_id
            .filter(|id| !id.trim().is_empty())
            .or_else(|| self.default_session.clone())
            .filter(|id| id.len() <= MAX_SESSION_ID_BYTES)
            .ok_or(ProtocolError::InvalidJoin)?;
        let role: PeerRole = client_type
            .as_deref()
            .ok_or(ProtocolError::InvalidJoin)?
            .parse()
            .map_err(|_| ProtocolError::InvalidJoin)?;

        self.relay
            .lock()
            .await
            .on_join(&self.peer, &session_id, role);
        self.state = ConnectionState::Joined { session_id, role };
        Ok(())
    }

    /// Run disconnect cleanup. Safe to call more than once.
    pub async fn handle_close(&mut self) {
        let state = std::mem::replace(&mut self.state, ConnectionState::Closed);
        if let ConnectionState::Joined { session_id, role } = state {
            self.relay
                .lock()
                .await
                .on_disconnect(self.peer.id(), &session_id, role);
        }
    }
}

/// Drive one upgraded WebSocket until either side closes it.
pub async fn serve_socket(
    socket: WebSocket,
    relay: SharedRelay,
    outbox_capacity: usize,
    addr: SocketAddr,
    default_session: Option<String>,
) {
    let id = Uuid::new_v4().to_string();
    info!("connection {} opened from {}", id, addr);

    let (peer, mailbox) = PeerHandle::channel(id.clone(), outbox_capacity);
    let PeerMailbox {
        outbox: mut rx,
        close: mut close_rx,
    } = mailbox;
    let (mut sender, mut receiver) = socket.split();
    let (disconnect_tx, mut disconnect_rx) = mpsc::channel::<()>(1);

    // Ends once every handle to this peer is gone, after flushing what
    // was queued, so a forced close still delivers its error frame.
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(Message::Text(frame.to_string())).await.is_err() {
                let _ = disconnect_tx.try_send(());
                return;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    let mut handler = ConnectionHandler::new(peer, relay, default_session);

    loop {
        tokio::select! {
            _ = close_rx.recv() => {
                debug!("closing connection {} on request", id);
                break;
            }
            _ = disconnect_rx.recv() => {
                break;
            }
            msg = receiver.next() => {
                let Some(msg) = msg else { break; };
                let msg = match msg {
                    Ok(msg) => msg,
                    Err(err) => {
                        debug!("transport error on {}: {}", id, err);
                        break;
                    }
                };

                match msg {
                    Message::Text(text) => {
                        let _ = handler.handle_text(&text).await;
                    }
                    Message::Binary(_) => handler.reject(&ProtocolError::Binary),
                    Message::Ping(_) | Message::Pong(_) => continue,
                    Message::Close(_) => break,
                }
            }
        }
    }

    handler.handle_close().await;
    info!("connection {} closed", id);
}
