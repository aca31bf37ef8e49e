//! Tracking of active sessions, keyed by peer identity once known.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::session::PeerSession;

/// All live sessions, plus the identity index for identified ones.
///
/// Identity binding is last-write-wins: the most recent `identify` for a
/// peer id supersedes any prior binding (same session re-identifying or a
/// different session claiming the id) without rejecting the call. Displaced
/// sessions stay connected but become unidentified again.
pub struct ConnectionRegistry {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    /// Every registered session, by connection id.
    sessions: HashMap<String, Arc<PeerSession>>,
    /// Identified sessions: peer id → connection id.
    peers: HashMap<String, String>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Add a new, unidentified session.
    pub fn register(&self, session: Arc<PeerSession>) {
        let mut inner = self.inner.write();
        let _ = inner.sessions.insert(session.conn_id.clone(), session);
    }

    /// Bind a peer identity to a session (last-write-wins).
    ///
    /// Returns the session displaced from the id, if a different one held it.
    pub fn identify(&self, session: &Arc<PeerSession>, peer_id: &str) -> Option<Arc<PeerSession>> {
        let mut inner = self.inner.write();

        // The session may be re-identifying under a new id.
        if let Some(old_id) = session.bind_peer_id(peer_id.to_owned()) {
            if old_id != peer_id
                && inner.peers.get(&old_id).is_some_and(|c| *c == session.conn_id)
            {
                let _ = inner.peers.remove(&old_id);
                debug!(old_id, new_id = peer_id, "session re-identified");
            }
        }

        let prior = inner
            .peers
            .insert(peer_id.to_owned(), session.conn_id.clone());
        let displaced = prior
            .filter(|conn_id| *conn_id != session.conn_id)
            .and_then(|conn_id| inner.sessions.get(&conn_id).cloned());

        if let Some(ref displaced) = displaced {
            let _ = displaced.clear_peer_id();
            debug!(peer_id, conn_id = %displaced.conn_id, "identity binding superseded");
        }
        displaced
    }

    /// Remove a session by peer id. Idempotent: unknown ids are a no-op.
    pub fn unregister(&self, peer_id: &str) -> Option<Arc<PeerSession>> {
        let mut inner = self.inner.write();
        let conn_id = inner.peers.remove(peer_id)?;
        inner.sessions.remove(&conn_id)
    }

    /// Remove a session by connection id (stream-end cleanup, including
    /// sessions that never identified). Idempotent.
    pub fn unregister_session(&self, conn_id: &str) -> Option<Arc<PeerSession>> {
        let mut inner = self.inner.write();
        let session = inner.sessions.remove(conn_id)?;
        if let Some(peer_id) = session.peer_id() {
            if inner.peers.get(&peer_id).is_some_and(|c| *c == conn_id) {
                let _ = inner.peers.remove(&peer_id);
            }
        }
        Some(session)
    }

    /// Find the session currently bound to a peer id.
    pub fn lookup(&self, peer_id: &str) -> Option<Arc<PeerSession>> {
        let inner = self.inner.read();
        let conn_id = inner.peers.get(peer_id)?;
        inner.sessions.get(conn_id).cloned()
    }

    /// Whether a connection id is still registered.
    pub fn contains(&self, conn_id: &str) -> bool {
        self.inner.read().sessions.contains_key(conn_id)
    }

    /// Every live session, identified or not.
    pub fn all(&self) -> Vec<Arc<PeerSession>> {
        self.inner.read().sessions.values().cloned().collect()
    }

    /// Snapshot of the currently identified peer ids.
    pub fn identified_ids(&self) -> Vec<String> {
        self.inner.read().peers.keys().cloned().collect()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.inner.read().sessions.len()
    }

    /// Whether no sessions are registered.
    pub fn is_empty(&self) -> bool {
        self.inner.read().sessions.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshhub_rpc::RpcChannel;

    fn make_session(conn_id: &str) -> Arc<PeerSession> {
        let (local, _remote) = tokio::io::duplex(1024);
        let (handle, _driver) = RpcChannel::new(local, 1024, 8);
        Arc::new(PeerSession::new(conn_id.into(), "test:0".into(), handle))
    }

    #[tokio::test]
    async fn register_and_count() {
        let reg = ConnectionRegistry::new();
        assert!(reg.is_empty());
        reg.register(make_session("c1"));
        reg.register(make_session("c2"));
        assert_eq!(reg.len(), 2);
    }

    #[tokio::test]
    async fn identify_makes_session_visible_to_lookup() {
        let reg = ConnectionRegistry::new();
        let session = make_session("c1");
        reg.register(session.clone());
        assert!(reg.lookup("peer-a").is_none());

        assert!(reg.identify(&session, "peer-a").is_none());
        let found = reg.lookup("peer-a").unwrap();
        assert_eq!(found.conn_id, "c1");
        assert_eq!(reg.identified_ids(), vec!["peer-a"]);
    }

    #[tokio::test]
    async fn reidentify_same_session_moves_binding() {
        let reg = ConnectionRegistry::new();
        let session = make_session("c1");
        reg.register(session.clone());

        let _ = reg.identify(&session, "peer-a");
        let _ = reg.identify(&session, "peer-b");

        assert!(reg.lookup("peer-a").is_none());
        assert_eq!(reg.lookup("peer-b").unwrap().conn_id, "c1");
        assert_eq!(reg.identified_ids(), vec!["peer-b"]);
    }

    #[tokio::test]
    async fn duplicate_id_last_write_wins() {
        let reg = ConnectionRegistry::new();
        let first = make_session("c1");
        let second = make_session("c2");
        reg.register(first.clone());
        reg.register(second.clone());

        let _ = reg.identify(&first, "peer-a");
        let displaced = reg.identify(&second, "peer-a").unwrap();
        assert_eq!(displaced.conn_id, "c1");

        // The newest claimant owns the id; the displaced session lost its
        // binding but remains registered.
        assert_eq!(reg.lookup("peer-a").unwrap().conn_id, "c2");
        assert!(first.peer_id().is_none());
        assert_eq!(reg.len(), 2);
    }

    #[tokio::test]
    async fn identify_same_session_same_id_is_stable() {
        let reg = ConnectionRegistry::new();
        let session = make_session("c1");
        reg.register(session.clone());

        assert!(reg.identify(&session, "peer-a").is_none());
        assert!(reg.identify(&session, "peer-a").is_none());
        assert_eq!(reg.lookup("peer-a").unwrap().conn_id, "c1");
        assert_eq!(session.peer_id().as_deref(), Some("peer-a"));
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let reg = ConnectionRegistry::new();
        let session = make_session("c1");
        reg.register(session.clone());
        let _ = reg.identify(&session, "peer-a");

        assert!(reg.unregister("peer-a").is_some());
        assert!(reg.unregister("peer-a").is_none());
        assert!(reg.lookup("peer-a").is_none());
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn unregister_unknown_is_noop() {
        let reg = ConnectionRegistry::new();
        assert!(reg.unregister("ghost").is_none());
    }

    #[tokio::test]
    async fn unregister_session_cleans_identity_index() {
        let reg = ConnectionRegistry::new();
        let session = make_session("c1");
        reg.register(session.clone());
        let _ = reg.identify(&session, "peer-a");

        assert!(reg.unregister_session("c1").is_some());
        assert!(reg.lookup("peer-a").is_none());
        assert!(reg.identified_ids().is_empty());
        assert!(reg.unregister_session("c1").is_none());
    }

    #[tokio::test]
    async fn unregister_session_of_displaced_session_keeps_new_binding() {
        let reg = ConnectionRegistry::new();
        let first = make_session("c1");
        let second = make_session("c2");
        reg.register(first.clone());
        reg.register(second.clone());
        let _ = reg.identify(&first, "peer-a");
        let _ = reg.identify(&second, "peer-a");

        // Dropping the displaced session must not disturb the new owner.
        let _ = reg.unregister_session("c1");
        assert_eq!(reg.lookup("peer-a").unwrap().conn_id, "c2");
    }

    #[tokio::test]
    async fn all_returns_unidentified_sessions_too() {
        let reg = ConnectionRegistry::new();
        let identified = make_session("c1");
        reg.register(identified.clone());
        reg.register(make_session("c2"));
        let _ = reg.identify(&identified, "peer-a");

        assert_eq!(reg.all().len(), 2);
        assert_eq!(reg.identified_ids().len(), 1);
    }
}
