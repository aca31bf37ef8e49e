//! Heartbeat liveness monitoring: periodic bounded-time pings with
//! eviction of unresponsive sessions.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::service::HubService;

/// Periodically probes every registered session.
///
/// Each cycle pings all sessions concurrently; every probe is bounded by
/// its own timer, so one dead session never delays the others. A probe
/// failure (timeout, transport, or remote error) evicts that session —
/// terminally, with no automatic reconnection. Per-session failures are
/// contained inside their own future, so the monitor itself only stops on
/// cancellation.
pub struct HeartbeatMonitor {
    service: Arc<HubService>,
    interval: Duration,
    ping_timeout: Duration,
}

impl HeartbeatMonitor {
    /// Create a monitor over the service's registry.
    pub fn new(service: Arc<HubService>, interval: Duration, ping_timeout: Duration) -> Self {
        Self {
            service,
            interval,
            ping_timeout,
        }
    }

    /// Run cycles until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.run_cycle().await,
                () = cancel.cancelled() => return,
            }
        }
    }

    /// Probe every session once, concurrently.
    pub async fn run_cycle(&self) {
        let sessions = self.service.registry().all();
        debug!(sessions = sessions.len(), "heartbeat cycle");

        let probes = sessions.into_iter().map(|session| {
            let service = self.service.clone();
            let timeout = self.ping_timeout;
            async move {
                match session.ping(timeout).await {
                    Ok(_) => session.touch(),
                    Err(err) => {
                        warn!(label = %session.label(), error = %err, "heartbeat failed");
                        service.evict(&session, "heartbeat failure");
                    }
                }
            }
        });
        let _: Vec<()> = join_all(probes).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use crate::handlers::test_support::{fake_node, fake_node_with, SilentHandler};
    use meshhub_rpc::MethodRegistry;

    fn service() -> Arc<HubService> {
        HubService::new(HubConfig::default())
    }

    fn monitor(service: &Arc<HubService>) -> HeartbeatMonitor {
        HeartbeatMonitor::new(
            service.clone(),
            Duration::from_millis(50),
            Duration::from_millis(100),
        )
    }

    #[tokio::test]
    async fn healthy_sessions_survive_and_touch() {
        let service = service();
        let (session, _node) = fake_node(&service);
        tokio::time::sleep(Duration::from_millis(30)).await;

        monitor(&service).run_cycle().await;

        assert_eq!(service.peer_count(), 1);
        assert!(session.alive());
        // The pong refreshed last-seen.
        assert!(session.last_seen_elapsed() < Duration::from_millis(25));
    }

    #[tokio::test]
    async fn dead_session_evicted_others_untouched() {
        let service = service();
        let (healthy_a, _na) = fake_node(&service);
        let mut silent = MethodRegistry::new();
        silent.register("ping", SilentHandler);
        let (dead, _nd) = fake_node_with(&service, silent);
        let (healthy_b, _nb) = fake_node(&service);

        service.identify(&healthy_a, "peer-a");
        service.identify(&dead, "peer-dead");
        service.identify(&healthy_b, "peer-b");

        monitor(&service).run_cycle().await;

        assert_eq!(service.peer_count(), 2);
        assert!(service.registry().lookup("peer-dead").is_none());
        assert!(!dead.alive());
        assert!(dead.rpc().is_closed());
        assert!(healthy_a.alive());
        assert!(healthy_b.alive());
        // Direct eviction also cleared the store entry.
        assert!(!service.network_state().contains_key("peer-dead"));
    }

    #[tokio::test]
    async fn dead_session_does_not_delay_others() {
        let service = service();
        let mut silent = MethodRegistry::new();
        silent.register("ping", SilentHandler);
        let (_dead, _nd) = fake_node_with(&service, silent);
        let (_healthy, _nh) = fake_node(&service);

        // The cycle is bounded by the ping timeout, not by the dead
        // session hanging forever.
        let started = std::time::Instant::now();
        monitor(&service).run_cycle().await;
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(service.peer_count(), 1);
    }

    #[tokio::test]
    async fn eviction_is_terminal() {
        let service = service();
        let mut silent = MethodRegistry::new();
        silent.register("ping", SilentHandler);
        let (dead, _nd) = fake_node_with(&service, silent);
        service.identify(&dead, "peer-dead");

        let monitor = monitor(&service);
        monitor.run_cycle().await;
        assert_eq!(service.peer_count(), 0);

        // A second cycle with no sessions is a quiet no-op.
        monitor.run_cycle().await;
        assert_eq!(service.peer_count(), 0);
    }

    #[tokio::test]
    async fn run_stops_on_cancellation() {
        let service = service();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(monitor(&service).run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("monitor did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn cycles_keep_firing_after_failures() {
        let service = service();
        let mut silent = MethodRegistry::new();
        silent.register("ping", SilentHandler);
        let (_dead, _nd) = fake_node_with(&service, silent);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(monitor(&service).run(cancel.clone()));

        // First cycle evicts; later cycles still run against the healthy node.
        crate::handlers::test_support::wait_for(|| service.peer_count() == 0).await;
        let (healthy, _nh) = fake_node(&service);
        crate::handlers::test_support::wait_for(|| {
            healthy.last_seen_elapsed() < Duration::from_millis(30)
        })
        .await;

        cancel.cancel();
        let _ = handle.await;
    }
}
