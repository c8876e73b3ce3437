//! Session registry.
//!
//! A session is a rendezvous namespace keyed by a client-supplied string.
//! It is created lazily by the first `join` that names it and removed as
//! soon as it has neither a host nor any clients:
//! - EMPTY: only pending buffers, never observable from outside
//! - WAITING_PEER: host or clients present, but not both
//! - PAIRED: host and at least one client present

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use gameshare_common::PeerRole;
use serde::Serialize;

use crate::peer::{Frame, PeerHandle};

/// Kind of buffered signaling frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Offer,
    Answer,
    IceCandidate,
}

/// A relayed frame kept for peers that have not joined yet.
#[derive(Debug, Clone)]
pub struct BufferedFrame {
    /// Role it is addressed to
    pub to: PeerRole,
    /// Original frame text
    pub frame: Frame,
}

#[derive(Debug)]
pub struct Session {
    id: String,
    host: Option<PeerHandle>,
    /// Joined clients in join order; the first one is the primary client
    clients: Vec<PeerHandle>,
    pending_offers: VecDeque<BufferedFrame>,
    pending_answers: VecDeque<BufferedFrame>,
    pending_ice_candidates: VecDeque<BufferedFrame>,
    pub last_activity: Instant,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            host: None,
            clients: Vec::new(),
            pending_offers: VecDeque::new(),
            pending_answers: VecDeque::new(),
            pending_ice_candidates: VecDeque::new(),
            last_activity: Instant::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn host(&self) -> Option<&PeerHandle> {
        self.host.as_ref()
    }

    /// Install a new host, returning the one it displaces.
    pub fn replace_host(&mut self, peer: PeerHandle) -> Option<PeerHandle> {
        self.last_activity = Instant::now();
        self.host.replace(peer)
    }

    /// Vacate the host slot, but only if `id` still holds it. A host that
    /// was already displaced by a newer one must not evict its successor.
    pub fn clear_host(&mut self, id: &str) -> Option<PeerHandle> {
        if self.host.as_ref().is_some_and(|host| host.id() == id) {
            self.last_activity = Instant::now();
            return self.host.take();
        }
        None
    }

    pub fn clients(&self) -> &[PeerHandle] {
        &self.clients
    }

    /// Whether connection `id` currently holds `role` here. A host that was
    /// displaced, or a client that already left, no longer does.
    pub fn holds_role(&self, id: &str, role: PeerRole) -> bool {
        match role {
            PeerRole::Host => self.host.as_ref().is_some_and(|host| host.id() == id),
            PeerRole::Client => self.clients.iter().any(|client| client.id() == id),
        }
    }

    /// Representative client for offers: the earliest joined client whose
    /// connection is still open.
    pub fn primary_client(&self) -> Option<&PeerHandle> {
        self.clients.iter().find(|client| !client.is_closed())
    }

    pub fn add_client(&mut self, peer: PeerHandle) {
        self.last_activity = Instant::now();
        if self.clients.iter().any(|client| client.id() == peer.id()) {
            return;
        }
        self.clients.push(peer);
    }

    pub fn remove_client(&mut self, id: &str) -> Option<PeerHandle> {
        let index = self.clients.iter().position(|client| client.id() == id)?;
        self.last_activity = Instant::now();
        Some(self.clients.remove(index))
    }

    /// Every connection currently attached to the session.
    pub fn peers(&self) -> impl Iterator<Item = &PeerHandle> {
        self.host.iter().chain(self.clients.iter())
    }

    /// No host and no clients: the session is garbage.
    pub fn is_empty(&self) -> bool {
        self.host.is_none() && self.clients.is_empty()
    }

    pub fn pending(&self, kind: BufferKind) -> &VecDeque<BufferedFrame> {
        match kind {
            BufferKind::Offer => &self.pending_offers,
            BufferKind::Answer => &self.pending_answers,
            BufferKind::IceCandidate => &self.pending_ice_candidates,
        }
    }

    fn pending_mut(&mut self, kind: BufferKind) -> &mut VecDeque<BufferedFrame> {
        match kind {
            BufferKind::Offer => &mut self.pending_offers,
            BufferKind::Answer => &mut self.pending_answers,
            BufferKind::IceCandidate => &mut self.pending_ice_candidates,
        }
    }

    /// Append to a buffer, discarding the oldest entry once `cap` is hit.
    /// A `cap` of zero disables buffering for that kind.
    pub fn buffer(&mut self, kind: BufferKind, entry: BufferedFrame, cap: usize) {
        self.last_activity = Instant::now();
        if cap == 0 {
            return;
        }
        let queue = self.pending_mut(kind);
        while queue.len() >= cap {
            queue.pop_front();
        }
        queue.push_back(entry);
    }

    /// Buffered offers, then answers, addressed to `role`, each in arrival
    /// order. With `drain` the returned entries are removed from the
    /// buffers; otherwise they stay for later joiners.
    pub fn pending_for(&mut self, role: PeerRole, drain: bool) -> Vec<Frame> {
        let mut frames = Vec::new();
        for kind in [BufferKind::Offer, BufferKind::Answer] {
            let queue = self.pending_mut(kind);
            frames.extend(
                queue
                    .iter()
                    .filter(|entry| entry.to == role)
                    .map(|entry| entry.frame.clone()),
            );
            if drain {
                queue.retain(|entry| entry.to != role);
            }
        }
        frames
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

/// Registry-wide counters for the health endpoint.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub sessions: usize,
    pub hosts: usize,
    pub clients: usize,
}

/// All live sessions, keyed by session id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get an existing session or create an empty one.
    pub fn get_or_create(&mut self, session_id: &str) -> &mut Session {
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id))
    }

    pub fn get(&self, session_id: &str) -> Option<&Session> {
        self.sessions.get(session_id)
    }

    pub fn get_mut(&mut self, session_id: &str) -> Option<&mut Session> {
        self.sessions.get_mut(session_id)
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Drop the session once nobody is left in it.
    pub fn remove_if_empty(&mut self, session_id: &str) -> bool {
        if self.sessions.get(session_id).is_some_and(Session::is_empty) {
            self.sessions.remove(session_id);
            return true;
        }
        false
    }

    /// Remove sessions with no activity for longer than `ttl`.
    pub fn evict_idle(&mut self, ttl: Duration) -> Vec<Session> {
        let now = Instant::now();
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, session)| now.duration_since(session.last_activity) > ttl)
            .map(|(id, _)| id.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|id| self.sessions.remove(&id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            sessions: self.sessions.len(),
            ..RegistryStats::default()
        };
        for session in self.sessions.values() {
            if session.host.is_some() {
                stats.hosts += 1;
            }
            stats.clients += session.clients.len();
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: &str) -> PeerHandle {
        PeerHandle::channel(id, 8).0
    }

    fn frame(to: PeerRole, text: &str) -> BufferedFrame {
        BufferedFrame {
            to,
            frame: Frame::from(text),
        }
    }

    #[test]
    fn test_get_or_create_reuses_session() {
        let mut registry = SessionRegistry::new();
        registry.get_or_create("abc").add_client(peer("c1"));
        registry.get_or_create("abc").add_client(peer("c2"));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("abc").unwrap().clients().len(), 2);
    }

    #[test]
    fn test_remove_if_empty() {
        let mut registry = SessionRegistry::new();
        registry.get_or_create("abc").replace_host(peer("h1"));

        assert!(!registry.remove_if_empty("abc"));
        assert!(registry
            .get_mut("abc")
            .unwrap()
            .clear_host("h1")
            .is_some());
        assert!(registry.remove_if_empty("abc"));
        assert!(!registry.contains("abc"));
        assert!(!registry.remove_if_empty("abc"));
    }

    #[test]
    fn test_clear_host_ignores_displaced_host() {
        let mut session = Session::new("abc");
        session.replace_host(peer("h1"));
        let old = session.replace_host(peer("h2")).unwrap();
        assert_eq!(old.id(), "h1");

        assert!(session.clear_host("h1").is_none());
        assert_eq!(session.host().unwrap().id(), "h2");
    }

    #[test]
    fn test_holds_role() {
        let mut session = Session::new("abc");
        session.replace_host(peer("h1"));
        session.add_client(peer("c1"));
        assert!(session.holds_role("h1", PeerRole::Host));
        assert!(session.holds_role("c1", PeerRole::Client));
        assert!(!session.holds_role("c1", PeerRole::Host));

        session.replace_host(peer("h2"));
        assert!(!session.holds_role("h1", PeerRole::Host));
        assert!(session.holds_role("h2", PeerRole::Host));

        session.remove_client("c1");
        assert!(!session.holds_role("c1", PeerRole::Client));
    }

    #[test]
    fn test_clients_are_a_set() {
        let mut session = Session::new("abc");
        let (c1, _c1_mailbox) = PeerHandle::channel("c1", 8);
        let (c2, _c2_mailbox) = PeerHandle::channel("c2", 8);
        session.add_client(c1.clone());
        session.add_client(c1);
        session.add_client(c2);
        assert_eq!(session.clients().len(), 2);
        assert_eq!(session.primary_client().unwrap().id(), "c1");

        assert!(session.remove_client("c1").is_some());
        assert!(session.remove_client("c1").is_none());
        assert_eq!(session.primary_client().unwrap().id(), "c2");
    }

    #[test]
    fn test_buffer_is_bounded() {
        let mut session = Session::new("abc");
        for i in 0..5 {
            session.buffer(
                BufferKind::Offer,
                frame(PeerRole::Client, &format!("offer-{i}")),
                3,
            );
        }
        let kept: Vec<&str> = session
            .pending(BufferKind::Offer)
            .iter()
            .map(|entry| &*entry.frame)
            .collect();
        assert_eq!(kept, vec!["offer-2", "offer-3", "offer-4"]);

        session.buffer(BufferKind::Answer, frame(PeerRole::Host, "a"), 0);
        assert!(session.pending(BufferKind::Answer).is_empty());
    }

    #[test]
    fn test_pending_for_orders_and_drains() {
        let mut session = Session::new("abc");
        session.buffer(BufferKind::Answer, frame(PeerRole::Host, "answer"), 8);
        session.buffer(BufferKind::Offer, frame(PeerRole::Host, "offer-1"), 8);
        session.buffer(BufferKind::Offer, frame(PeerRole::Client, "offer-x"), 8);
        session.buffer(BufferKind::Offer, frame(PeerRole::Host, "offer-2"), 8);

        let kept: Vec<String> = session
            .pending_for(PeerRole::Host, false)
            .iter()
            .map(|f| f.to_string())
            .collect();
        assert_eq!(kept, vec!["offer-1", "offer-2", "answer"]);
        assert_eq!(session.pending(BufferKind::Offer).len(), 3);

        let drained = session.pending_for(PeerRole::Host, true);
        assert_eq!(drained.len(), 3);
        assert!(session.pending_for(PeerRole::Host, false).is_empty());
        assert_eq!(session.pending_for(PeerRole::Client, false).len(), 1);
    }

    #[test]
    fn test_evict_idle() {
        let mut registry = SessionRegistry::new();
        registry.get_or_create("stale").add_client(peer("c1"));
        std::thread::sleep(Duration::from_millis(50));
        registry.get_or_create("fresh").add_client(peer("c2"));

        let evicted = registry.evict_idle(Duration::from_millis(25));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id(), "stale");
        assert!(registry.contains("fresh"));
    }

    #[test]
    fn test_stats() {
        let mut registry = SessionRegistry::new();
        registry.get_or_create("a").replace_host(peer("h1"));
        registry.get_or_create("a").add_client(peer("c1"));
        registry.get_or_create("b").add_client(peer("c2"));

        assert_eq!(
            registry.stats(),
            RegistryStats {
                sessions: 2,
                hosts: 1,
                clients: 2,
            }
        );
    }
}
