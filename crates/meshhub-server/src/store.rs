//! Shared network-state store with change notification and reconciliation.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use meshhub_core::{NetworkState, PeerReport};

/// Subscriber callback, invoked with the full state on every change.
pub type Subscriber = Arc<dyn Fn(&NetworkState) + Send + Sync>;

/// Handle for removing a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscriptionId(u64);

struct Entry {
    report: PeerReport,
    /// Store revision at this entry's last write; reconciliation skips
    /// entries written after the sweep began.
    revision: u64,
}

#[derive(Default)]
struct Inner {
    entries: BTreeMap<String, Entry>,
    revision: u64,
    subscribers: Vec<(u64, Subscriber)>,
    next_subscriber: u64,
}

/// Exclusive owner of the hub-wide topology map.
///
/// All mutation flows through this type's methods (single-writer
/// discipline); readers get snapshots. Subscribers are notified
/// synchronously, in registration order, with the full state after every
/// change.
pub struct NetworkStateStore {
    inner: Mutex<Inner>,
}

impl NetworkStateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Read-only snapshot of the current state.
    pub fn get(&self) -> NetworkState {
        self.inner
            .lock()
            .entries
            .iter()
            .map(|(id, entry)| (id.clone(), entry.report.clone()))
            .collect()
    }

    /// Atomically replace one peer's report and notify subscribers.
    pub fn update(&self, peer_id: &str, report: PeerReport) {
        let (state, subscribers) = {
            let mut inner = self.inner.lock();
            inner.revision += 1;
            let revision = inner.revision;
            let _ = inner.entries.insert(peer_id.to_owned(), Entry { report, revision });
            (snapshot(&inner), inner.subscribers.clone())
        };
        for (_, subscriber) in subscribers {
            subscriber(&state);
        }
    }

    /// Create a peer's initial empty entry (the identify side effect).
    pub fn insert_empty(&self, peer_id: &str) {
        self.update(peer_id, PeerReport::default());
    }

    /// Remove one peer's entry and notify subscribers. No-op when absent.
    pub fn remove(&self, peer_id: &str) {
        let notification = {
            let mut inner = self.inner.lock();
            if inner.entries.remove(peer_id).is_none() {
                return;
            }
            inner.revision += 1;
            Some((snapshot(&inner), inner.subscribers.clone()))
        };
        if let Some((state, subscribers)) = notification {
            for (_, subscriber) in subscribers {
                subscriber(&state);
            }
        }
    }

    /// Register a change subscriber. Callbacks run synchronously inside the
    /// mutating call, in registration order.
    pub fn subscribe(&self, subscriber: impl Fn(&NetworkState) + Send + Sync + 'static) -> SubscriptionId {
        let mut inner = self.inner.lock();
        inner.next_subscriber += 1;
        let id = inner.next_subscriber;
        inner.subscribers.push((id, Arc::new(subscriber)));
        SubscriptionId(id)
    }

    /// Remove a subscriber. Unknown ids are a no-op.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.lock().subscribers.retain(|(sid, _)| *sid != id.0);
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    /// Current store revision; capture before snapshotting live ids so a
    /// sweep can tell fresh entries from stale ones.
    pub fn revision(&self) -> u64 {
        self.inner.lock().revision
    }

    /// Remove entries whose peer is not in `live`, skipping any entry
    /// written after `sweep_revision` (it belongs to a peer that
    /// identified while the sweep was running). Returns the removed ids;
    /// subscribers are notified once if anything was removed.
    pub fn reconcile(&self, live: &[String], sweep_revision: u64) -> Vec<String> {
        let (removed, notification) = {
            let mut inner = self.inner.lock();
            let stale: Vec<String> = inner
                .entries
                .iter()
                .filter(|&(id, entry)| {
                    entry.revision <= sweep_revision && !live.contains(id)
                })
                .map(|(id, _)| id.clone())
                .collect();
            if stale.is_empty() {
                return Vec::new();
            }
            for id in &stale {
                let _ = inner.entries.remove(id);
            }
            inner.revision += 1;
            (stale, (snapshot(&inner), inner.subscribers.clone()))
        };
        for id in &removed {
            info!(peer_id = %id, "removed orphaned network-state entry");
        }
        let (state, subscribers) = notification;
        for (_, subscriber) in subscribers {
            subscriber(&state);
        }
        removed
    }

    /// Number of tracked peers.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }
}

impl Default for NetworkStateStore {
    fn default() -> Self {
        Self::new()
    }
}

fn snapshot(inner: &Inner) -> NetworkState {
    inner
        .entries
        .iter()
        .map(|(id, entry)| (id.clone(), entry.report.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use meshhub_core::RttSample;

    fn report(peer: &str, ms: f64) -> PeerReport {
        let mut peers = BTreeMap::new();
        let _ = peers.insert(peer.to_owned(), RttSample::Millis(ms));
        PeerReport { peers }
    }

    #[test]
    fn update_and_get() {
        let store = NetworkStateStore::new();
        store.update("peer-a", report("peer-b", 12.0));

        let state = store.get();
        assert_eq!(state.len(), 1);
        assert_eq!(state["peer-a"].peers["peer-b"], RttSample::Millis(12.0));
    }

    #[test]
    fn update_replaces_whole_report() {
        let store = NetworkStateStore::new();
        store.update("peer-a", report("peer-b", 12.0));
        store.update("peer-a", report("peer-c", 3.0));

        let state = store.get();
        assert!(!state["peer-a"].peers.contains_key("peer-b"));
        assert_eq!(state["peer-a"].peers["peer-c"], RttSample::Millis(3.0));
    }

    #[test]
    fn insert_empty_creates_blank_entry() {
        let store = NetworkStateStore::new();
        store.insert_empty("peer-a");
        assert!(store.get()["peer-a"].peers.is_empty());
    }

    #[test]
    fn subscribers_see_every_update_in_order() {
        let store = NetworkStateStore::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = seen.clone();
        let _ = store.subscribe(move |state| first.lock().push(("first", state.len())));
        let second = seen.clone();
        let _ = store.subscribe(move |state| second.lock().push(("second", state.len())));

        store.update("peer-a", PeerReport::default());

        let log = seen.lock();
        assert_eq!(*log, vec![("first", 1), ("second", 1)]);
    }

    #[test]
    fn notification_is_synchronous_with_update() {
        let store = NetworkStateStore::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let _ = store.subscribe(move |_| {
            let _ = counter.fetch_add(1, Ordering::SeqCst);
        });

        store.update("peer-a", PeerReport::default());
        // No batching: the callback already ran.
        assert_eq!(count.load(Ordering::SeqCst), 1);
        store.update("peer-b", PeerReport::default());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unsubscribe_stops_notifications() {
        let store = NetworkStateStore::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let id = store.subscribe(move |_| {
            let _ = counter.fetch_add(1, Ordering::SeqCst);
        });

        store.update("peer-a", PeerReport::default());
        store.unsubscribe(id);
        store.update("peer-b", PeerReport::default());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(store.subscriber_count(), 0);
    }

    #[test]
    fn remove_notifies_once() {
        let store = NetworkStateStore::new();
        store.update("peer-a", PeerReport::default());

        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let _ = store.subscribe(move |_| {
            let _ = counter.fetch_add(1, Ordering::SeqCst);
        });

        store.remove("peer-a");
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(store.is_empty());

        // Removing an absent entry does not notify.
        store.remove("peer-a");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reconcile_removes_only_orphans() {
        let store = NetworkStateStore::new();
        store.update("live-peer", PeerReport::default());
        store.update("dead-peer", PeerReport::default());

        let sweep = store.revision();
        let removed = store.reconcile(&["live-peer".to_owned()], sweep);

        assert_eq!(removed, vec!["dead-peer"]);
        let state = store.get();
        assert!(state.contains_key("live-peer"));
        assert!(!state.contains_key("dead-peer"));
    }

    #[test]
    fn reconcile_spares_entries_written_after_sweep_start() {
        let store = NetworkStateStore::new();
        store.update("old-orphan", PeerReport::default());

        let sweep = store.revision();
        // A peer identifies between the sweep snapshot and the removal.
        store.insert_empty("just-connected");

        let removed = store.reconcile(&[], sweep);
        assert_eq!(removed, vec!["old-orphan"]);
        assert!(store.get().contains_key("just-connected"));
    }

    #[test]
    fn reconcile_with_nothing_stale_is_silent() {
        let store = NetworkStateStore::new();
        store.update("peer-a", PeerReport::default());

        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let _ = store.subscribe(move |_| {
            let _ = counter.fetch_add(1, Ordering::SeqCst);
        });

        let sweep = store.revision();
        let removed = store.reconcile(&["peer-a".to_owned()], sweep);
        assert!(removed.is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn reconcile_notifies_on_removal() {
        let store = NetworkStateStore::new();
        store.update("gone", PeerReport::default());

        let last_len = Arc::new(AtomicUsize::new(usize::MAX));
        let observer = last_len.clone();
        let _ = store.subscribe(move |state| observer.store(state.len(), Ordering::SeqCst));

        let sweep = store.revision();
        let _ = store.reconcile(&[], sweep);
        assert_eq!(last_len.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn revision_increments_on_writes() {
        let store = NetworkStateStore::new();
        let r0 = store.revision();
        store.update("peer-a", PeerReport::default());
        assert!(store.revision() > r0);
    }
}
