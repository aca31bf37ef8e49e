//! Per-connection session state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;

use meshhub_rpc::{CallError, ChannelHandle};

/// A connected test node: its RPC channel plus identity and liveness state.
///
/// Lifecycle: created unidentified on connection accept, identified once the
/// node calls `setPeerId`, destroyed on stream end, explicit disconnect, or
/// heartbeat eviction. No transition goes backwards.
pub struct PeerSession {
    /// Unique connection id (assigned by the hub, not the node).
    pub conn_id: String,
    /// Remote origin address as reported by the transport.
    pub addr: String,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Cleared on eviction/disconnect; a dead session never revives.
    pub is_alive: AtomicBool,
    rpc: ChannelHandle,
    peer_id: Mutex<Option<String>>,
    last_seen: Mutex<Instant>,
}

impl PeerSession {
    /// Create a new, unidentified session.
    pub fn new(conn_id: String, addr: String, rpc: ChannelHandle) -> Self {
        let now = Instant::now();
        Self {
            conn_id,
            addr,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            rpc,
            peer_id: Mutex::new(None),
            last_seen: Mutex::new(now),
        }
    }

    /// The session's RPC channel handle.
    pub fn rpc(&self) -> &ChannelHandle {
        &self.rpc
    }

    /// The bound peer identity, if the node has identified itself.
    pub fn peer_id(&self) -> Option<String> {
        self.peer_id.lock().clone()
    }

    /// Bind a peer identity, returning the previous one.
    pub fn bind_peer_id(&self, peer_id: String) -> Option<String> {
        self.peer_id.lock().replace(peer_id)
    }

    /// Drop the identity binding (the session was superseded by a newer
    /// claimant of the same id).
    pub fn clear_peer_id(&self) -> Option<String> {
        self.peer_id.lock().take()
    }

    /// Record activity from this session.
    pub fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the last recorded activity.
    pub fn last_seen_elapsed(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Mark the session dead. Returns whether it was alive before.
    pub fn mark_dead(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Whether the session has not been evicted or disconnected.
    pub fn alive(&self) -> bool {
        self.is_alive.load(Ordering::Relaxed)
    }

    /// Peer id when identified, otherwise a connection-id label.
    pub fn label(&self) -> String {
        self.peer_id()
            .unwrap_or_else(|| format!("#{}", self.conn_id))
    }

    /// Issue a bounded-time liveness probe on this session's channel.
    pub async fn ping(&self, limit: Duration) -> Result<Value, CallError> {
        self.rpc.call_with_timeout("ping", Vec::new(), limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use meshhub_rpc::{MethodHandler, MethodRegistry, RpcChannel, RpcError};
    use serde_json::json;

    fn idle_session() -> PeerSession {
        // A channel with no driver spawned: state-only tests never touch I/O.
        let (local, _remote) = tokio::io::duplex(1024);
        let (handle, _driver) = RpcChannel::new(local, 1024, 8);
        PeerSession::new("conn-1".into(), "127.0.0.1:9".into(), handle)
    }

    #[tokio::test]
    async fn new_session_is_unidentified_and_alive() {
        let session = idle_session();
        assert!(session.peer_id().is_none());
        assert!(session.alive());
        assert_eq!(session.label(), "#conn-1");
    }

    #[tokio::test]
    async fn bind_returns_prior_identity() {
        let session = idle_session();
        assert!(session.bind_peer_id("peer-a".into()).is_none());
        assert_eq!(session.peer_id().as_deref(), Some("peer-a"));
        assert_eq!(session.bind_peer_id("peer-b".into()).as_deref(), Some("peer-a"));
        assert_eq!(session.label(), "peer-b");
    }

    #[tokio::test]
    async fn clear_drops_binding() {
        let session = idle_session();
        let _ = session.bind_peer_id("peer-a".into());
        assert_eq!(session.clear_peer_id().as_deref(), Some("peer-a"));
        assert!(session.peer_id().is_none());
    }

    #[tokio::test]
    async fn touch_resets_last_seen() {
        let session = idle_session();
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert!(session.last_seen_elapsed() >= Duration::from_millis(10));
        session.touch();
        assert!(session.last_seen_elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn mark_dead_is_terminal() {
        let session = idle_session();
        assert!(session.mark_dead());
        assert!(!session.alive());
        assert!(!session.mark_dead());
    }

    struct PongHandler;

    #[async_trait]
    impl MethodHandler<()> for PongHandler {
        async fn handle(&self, _args: Vec<serde_json::Value>, _ctx: &()) -> Result<serde_json::Value, RpcError> {
            Ok(json!("pong"))
        }
    }

    #[tokio::test]
    async fn ping_roundtrip() {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let (handle, driver) = RpcChannel::new(local, 1024 * 1024, 8);
        drop(tokio::spawn(driver.run(
            Arc::new(MethodRegistry::<()>::new()),
            Arc::new(()),
        )));

        let mut node = MethodRegistry::new();
        node.register("ping", PongHandler);
        let (_node_handle, node_driver) = RpcChannel::new(remote, 1024 * 1024, 8);
        drop(tokio::spawn(node_driver.run(Arc::new(node), Arc::new(()))));

        let session = PeerSession::new("conn-2".into(), "10.0.0.1:1".into(), handle);
        let result = session.ping(Duration::from_secs(1)).await.unwrap();
        assert_eq!(result, json!("pong"));
    }

    #[tokio::test]
    async fn ping_times_out_without_remote() {
        let (local, _remote) = tokio::io::duplex(64 * 1024);
        let (handle, driver) = RpcChannel::new(local, 1024 * 1024, 8);
        drop(tokio::spawn(driver.run(
            Arc::new(MethodRegistry::<()>::new()),
            Arc::new(()),
        )));

        let session = PeerSession::new("conn-3".into(), "10.0.0.1:2".into(), handle);
        let err = session.ping(Duration::from_millis(30)).await.unwrap_err();
        assert_eq!(err, CallError::TimedOut);
    }
}
