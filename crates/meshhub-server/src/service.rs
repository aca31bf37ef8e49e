//! `HubService` — the explicit owner of the connection registry and the
//! network-state store, passed to collaborators instead of living in
//! process globals.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use meshhub_core::{NetworkState, PeerReport};
use meshhub_rpc::{MethodRegistry, RpcChannel};

use crate::config::HubConfig;
use crate::dispatch::BroadcastDispatcher;
use crate::handlers;
use crate::handlers::admin::AdminCtx;
use crate::handlers::client::ClientCtx;
use crate::registry::ConnectionRegistry;
use crate::session::PeerSession;
use crate::store::NetworkStateStore;

/// Owns all hub state and drives session lifecycles.
pub struct HubService {
    registry: Arc<ConnectionRegistry>,
    store: NetworkStateStore,
    config: HubConfig,
    client_methods: Arc<MethodRegistry<ClientCtx>>,
    admin_methods: Arc<MethodRegistry<AdminCtx>>,
}

impl HubService {
    /// Create the service with its method tables.
    pub fn new(config: HubConfig) -> Arc<Self> {
        Arc::new(Self {
            registry: Arc::new(ConnectionRegistry::new()),
            store: NetworkStateStore::new(),
            config,
            client_methods: Arc::new(handlers::client::methods()),
            admin_methods: Arc::new(handlers::admin::methods()),
        })
    }

    /// The connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// The network-state store.
    pub fn store(&self) -> &NetworkStateStore {
        &self.store
    }

    /// The hub configuration.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// A dispatcher over this service's live sessions.
    pub fn dispatcher(&self) -> BroadcastDispatcher {
        BroadcastDispatcher::new(self.registry.clone())
    }

    /// Number of live sessions (identified or not).
    pub fn peer_count(&self) -> usize {
        self.registry.len()
    }

    /// Snapshot of the current topology.
    pub fn network_state(&self) -> NetworkState {
        self.store.get()
    }

    /// Accept an ordinary node connection over any duplex byte stream.
    ///
    /// Registers an unidentified session, spawns its channel driver, and
    /// watches for channel teardown: a closed stream unregisters the
    /// session immediately, leaving any store entry for the next
    /// reconciliation sweep.
    pub fn connect_client<S>(self: &Arc<Self>, stream: S, addr: String) -> Arc<PeerSession>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let conn_id = Uuid::now_v7().to_string();
        let (handle, driver) =
            RpcChannel::new(stream, self.config.max_frame_bytes, self.config.channel_buffer);
        let session = Arc::new(PeerSession::new(conn_id, addr, handle));
        self.registry.register(session.clone());

        let ctx = Arc::new(ClientCtx {
            service: self.clone(),
            session: session.clone(),
        });
        drop(tokio::spawn(driver.run(self.client_methods.clone(), ctx)));

        info!(conn_id = %session.conn_id, addr = %session.addr, "peer connected");
        info!(peers = self.registry.len(), "peers connected");

        let service = self.clone();
        let watched = session.clone();
        drop(tokio::spawn(async move {
            watched.rpc().closed().await;
            service.session_closed(&watched);
        }));
        session
    }

    /// Accept a privileged admin connection.
    ///
    /// The admin gets the privileged method table and a store subscription
    /// pushing the full network state on every change; the subscription is
    /// dropped when the channel closes.
    pub fn connect_admin<S>(self: &Arc<Self>, stream: S, addr: String)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (handle, driver) =
            RpcChannel::new(stream, self.config.max_frame_bytes, self.config.channel_buffer);
        let ctx = Arc::new(AdminCtx {
            service: self.clone(),
            dispatcher: self.dispatcher(),
        });
        drop(tokio::spawn(driver.run(self.admin_methods.clone(), ctx)));
        info!(%addr, "admin connected");

        let push = handle.clone();
        let subscription = self.store.subscribe(move |state| {
            match serde_json::to_value(state) {
                Ok(value) => {
                    let _ = push.notify("sendNetworkState", vec![value]);
                }
                Err(e) => warn!(error = %e, "failed to serialize network state"),
            }
        });

        let service = self.clone();
        drop(tokio::spawn(async move {
            handle.closed().await;
            service.store.unsubscribe(subscription);
            info!("admin disconnected");
        }));
    }

    /// Bind a peer identity to a session (last-write-wins) and create its
    /// initial empty store entry.
    pub fn identify(&self, session: &Arc<PeerSession>, peer_id: &str) {
        let displaced = self.registry.identify(session, peer_id);
        if displaced.is_some() {
            warn!(peer_id, "peer id rebound to newer session");
        }
        session.touch();
        self.store.insert_empty(peer_id);
        info!(peer_id, conn_id = %session.conn_id, "peer identified");
    }

    /// Accept a connectivity report from a session.
    ///
    /// Reports from sessions that never identified, or that were already
    /// unregistered, are silently dropped. Returns whether the store was
    /// updated.
    pub fn submit_report(&self, session: &Arc<PeerSession>, report: PeerReport) -> bool {
        let Some(peer_id) = session.peer_id() else {
            debug!(conn_id = %session.conn_id, "dropping report from unidentified session");
            return false;
        };
        if !self.registry.contains(&session.conn_id) {
            debug!(peer_id, "dropping report from unregistered session");
            return false;
        }
        session.touch();
        self.store.update(&peer_id, report);
        true
    }

    /// Tear a session down: unregister it, drop its store entry, close its
    /// channel. Terminal — a node reconnects with a fresh handshake or not
    /// at all.
    pub fn evict(&self, session: &Arc<PeerSession>, reason: &str) {
        let _ = self.registry.unregister_session(&session.conn_id);
        if let Some(peer_id) = session.peer_id() {
            self.store.remove(&peer_id);
        }
        let _ = session.mark_dead();
        session.rpc().close();
        warn!(label = %session.label(), reason, "session evicted");
        info!(peers = self.registry.len(), "peers connected");
    }

    /// Voluntary or admin-driven disconnect by peer id. Unknown ids are
    /// logged and ignored.
    pub fn disconnect_peer(&self, peer_id: &str) -> bool {
        let Some(session) = self.registry.lookup(peer_id) else {
            warn!(peer_id, "disconnect for unknown client");
            return false;
        };
        info!(peer_id, "disconnecting client");
        self.evict(&session, "disconnect requested");
        true
    }

    /// Stream-end cleanup: the session goes away now, its store entry is
    /// reconciled later.
    fn session_closed(&self, session: &Arc<PeerSession>) {
        if self.registry.unregister_session(&session.conn_id).is_some() {
            let _ = session.mark_dead();
            info!(label = %session.label(), "peer disconnected (stream closed)");
            info!(peers = self.registry.len(), "peers connected");
        }
    }

    /// One reconciliation sweep: snapshot the store revision, then the live
    /// identified ids, then remove stale orphans. Entries written after the
    /// revision snapshot are never removed, so a peer identifying mid-sweep
    /// survives.
    pub fn reconcile_once(&self) -> Vec<String> {
        let sweep = self.store.revision();
        let live = self.registry.identified_ids();
        self.store.reconcile(&live, sweep)
    }

    /// Periodic reconciliation loop.
    pub async fn run_reconciler(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let _ = self.reconcile_once();
                }
                () = cancel.cancelled() => return,
            }
        }
    }
}
