//! Relay engine: decides where each signaling frame goes.
//!
//! Frames are forwarded verbatim to the opposite role in the sender's
//! session. When that role has nobody joined yet, offers and answers are
//! buffered and replayed to the next peer that joins under it. ICE
//! candidates are fire-and-forget: buffered only for inspection, never
//! replayed. Frames from a connection that no longer holds its role (a
//! displaced host, a departed client) are ignored.

use std::sync::Arc;
use std::time::Duration;

use gameshare_common::{PeerRole, ServerMessage};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::peer::{Frame, PeerHandle};
use crate::session::{BufferKind, BufferedFrame, SessionRegistry};

pub const DEFAULT_MAX_BUFFERED: usize = 16;

/// Relay engine shared by every connection task.
pub type SharedRelay = Arc<Mutex<RelayEngine>>;

/// What happens to buffered offers/answers once they have been delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ReplayPolicy {
    /// Keep them and replay again to every later joiner (at-least-once).
    #[default]
    Keep,
    /// Remove them after the first delivery.
    Drain,
}

#[derive(Debug, Clone, Copy)]
pub struct RelayPolicy {
    /// Per-session, per-kind buffer bound
    pub max_buffered: usize,
    pub replay: ReplayPolicy,
}

impl Default for RelayPolicy {
    fn default() -> Self {
        Self {
            max_buffered: DEFAULT_MAX_BUFFERED,
            replay: ReplayPolicy::Keep,
        }
    }
}

/// Outcome of relaying one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued to this many peers
    Delivered(usize),
    /// Nobody to deliver to; kept for the next joiner
    Buffered,
    /// Nobody to deliver to and not replayable
    Dropped,
    /// Sender's session no longer exists
    NoSession,
    /// Sender no longer holds its role in the session
    NotMember,
}

#[derive(Debug)]
pub struct RelayEngine {
    registry: SessionRegistry,
    policy: RelayPolicy,
}

impl RelayEngine {
    pub fn new(policy: RelayPolicy) -> Self {
        Self {
            registry: SessionRegistry::new(),
            policy,
        }
    }

    pub fn shared(policy: RelayPolicy) -> SharedRelay {
        Arc::new(Mutex::new(Self::new(policy)))
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn policy(&self) -> RelayPolicy {
        self.policy
    }

    /// Attach `peer` to `session_id` under `role`.
    ///
    /// A host join displaces any existing host, which is told why and
    /// disconnected. The joiner gets its `joined` ack followed by every
    /// buffered offer and answer addressed to its role.
    pub fn on_join(&mut self, peer: &PeerHandle, session_id: &str, role: PeerRole) {
        let drain = self.policy.replay == ReplayPolicy::Drain;
        let session = self.registry.get_or_create(session_id);

        match role {
            PeerRole::Host => {
                if let Some(previous) = session.replace_host(peer.clone()) {
                    if previous.id() != peer.id() {
                        info!(
                            "host {} replaced by {} in session {}",
                            previous.id(),
                            peer.id(),
                            session_id
                        );
                        previous.send(&ServerMessage::error("New host connected"));
                        previous.close();
                    }
                }
            }
            PeerRole::Client => session.add_client(peer.clone()),
        }

        peer.send(&ServerMessage::Joined {
            session_id: session_id.to_string(),
            client_type: role,
        });

        let pending = session.pending_for(role, drain);
        if !pending.is_empty() {
            debug!(
                "replaying {} buffered frames to {} {} in session {}",
                pending.len(),
                role,
                peer.id(),
                session_id
            );
        }
        for frame in pending {
            peer.send_raw(frame);
        }

        if role == PeerRole::Client {
            if let Some(host) = session.host() {
                host.send(&ServerMessage::ClientJoined {
                    client_id: peer.id().to_string(),
                });
            }
        }

        info!("{} {} joined session {}", role, peer.id(), session_id);
    }

    pub fn on_offer(
        &mut self,
        sender: &PeerHandle,
        session_id: &str,
        role: PeerRole,
        frame: Frame,
    ) -> Delivery {
        self.relay_description(BufferKind::Offer, sender, session_id, role, frame)
    }

    pub fn on_answer(
        &mut self,
        sender: &PeerHandle,
        session_id: &str,
        role: PeerRole,
        frame: Frame,
    ) -> Delivery {
        self.relay_description(BufferKind::Answer, sender, session_id, role, frame)
    }

    fn relay_description(
        &mut self,
        kind: BufferKind,
        sender: &PeerHandle,
        session_id: &str,
        role: PeerRole,
        frame: Frame,
    ) -> Delivery {
        let policy = self.policy;
        let Some(session) = self.registry.get_mut(session_id) else {
            warn!("session {} not found for {}", session_id, sender.id());
            return Delivery::NoSession;
        };
        if !session.holds_role(sender.id(), role) {
            debug!(
                "ignoring {:?} from {} no longer {} in session {}",
                kind,
                sender.id(),
                role,
                session_id
            );
            return Delivery::NotMember;
        }

        let to = role.opposite();
        let target = match to {
            PeerRole::Host => session.host().cloned(),
            PeerRole::Client => session.primary_client().cloned(),
        };
        let delivered = target
            .as_ref()
            .is_some_and(|target| target.send_raw(frame.clone()));

        if !delivered || policy.replay == ReplayPolicy::Keep {
            session.buffer(
                kind,
                BufferedFrame { to, frame },
                policy.max_buffered,
            );
        } else {
            session.touch();
        }

        if delivered {
            debug!(
                "relayed {:?} from {} {} to {} in session {}",
                kind,
                role,
                sender.id(),
                to,
                session_id
            );
            Delivery::Delivered(1)
        } else {
            debug!(
                "buffered {:?} from {} for absent {} in session {}",
                kind,
                sender.id(),
                to,
                session_id
            );
            Delivery::Buffered
        }
    }

    /// Forward a candidate to `target` (defaulting to the sender's
    /// opposite role). Candidates for an absent target are dropped.
    pub fn on_ice_candidate(
        &mut self,
        sender: &PeerHandle,
        session_id: &str,
        role: PeerRole,
        target: Option<PeerRole>,
        frame: Frame,
    ) -> Delivery {
        let max_buffered = self.policy.max_buffered;
        let Some(session) = self.registry.get_mut(session_id) else {
            warn!("session {} not found for {}", session_id, sender.id());
            return Delivery::NoSession;
        };
        if !session.holds_role(sender.id(), role) {
            debug!(
                "ignoring ice candidate from {} no longer {} in session {}",
                sender.id(),
                role,
                session_id
            );
            return Delivery::NotMember;
        }

        let to = target.unwrap_or_else(|| role.opposite());
        session.buffer(
            BufferKind::IceCandidate,
            BufferedFrame {
                to,
                frame: frame.clone(),
            },
            max_buffered,
        );

        let recipients = session
            .peers()
            .filter(|peer| peer.id() != sender.id())
            .filter(|peer| session.holds_role(peer.id(), to));

        let delivered = recipients
            .filter(|peer| peer.send_raw(frame.clone()))
            .count();

        if delivered == 0 {
            debug!(
                "dropping ice candidate from {} for absent {} in session {}",
                sender.id(),
                to,
                session_id
            );
            return Delivery::Dropped;
        }
        Delivery::Delivered(delivered)
    }

    /// Detach a closed connection and notify whoever remains. Returns
    /// `true` when the session was removed as a result.
    pub fn on_disconnect(&mut self, peer_id: &str, session_id: &str, role: PeerRole) -> bool {
        let Some(session) = self.registry.get_mut(session_id) else {
            return false;
        };

        match role {
            PeerRole::Host => {
                if session.clear_host(peer_id).is_some() {
                    info!("host {} left session {}", peer_id, session_id);
                    for client in session.clients() {
                        client.send(&ServerMessage::HostLeft);
                    }
                }
            }
            PeerRole::Client => {
                if session.remove_client(peer_id).is_some() {
                    info!("client {} left session {}", peer_id, session_id);
                    if let Some(host) = session.host() {
                        host.send(&ServerMessage::ClientLeft {
                            client_id: peer_id.to_string(),
                        });
                    }
                }
            }
        }

        let removed = self.registry.remove_if_empty(session_id);
        if removed {
            info!("removed empty session {}", session_id);
        }
        removed
    }

    /// Expire sessions idle for longer than `ttl`, disconnecting their
    /// peers. Returns how many sessions were removed.
    pub fn evict_idle(&mut self, ttl: Duration) -> usize {
        let evicted = self.registry.evict_idle(ttl);
        for session in &evicted {
            info!("expiring idle session {}", session.id());
            for peer in session.peers() {
                peer.send(&ServerMessage::error("Session expired"));
                peer.close();
            }
        }
        evicted.len()
    }
}

impl Default for RelayEngine {
    fn default() -> Self {
        Self::new(RelayPolicy::default())
    }
}
