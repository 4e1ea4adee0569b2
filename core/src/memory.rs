//! In-process coordination store
//!
//! `MemoryStore` implements [`CoordinationStore`] on top of `tokio::time`, so
//! lease expiry follows paused/advanced time in tests. Expired leases are
//! reaped lazily at the start of every operation, and optionally by a
//! background task started with [`MemoryStore::spawn_reaper`].

use crate::traits::{CoordinationStore, KeyValue, LeaseId, StoreError, WatchEvent, WatchStream};

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Single-process store shared by clones
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    entries: BTreeMap<String, Entry>,
    leases: HashMap<LeaseId, Lease>,
    next_lease: i64,
    watchers: Vec<Watcher>,
}

struct Entry {
    value: Vec<u8>,
    lease: Option<LeaseId>,
}

struct Lease {
    deadline: Instant,
    keys: BTreeSet<String>,
}

struct Watcher {
    prefix: String,
    tx: mpsc::UnboundedSender<WatchEvent>,
}

impl State {
    fn emit(&mut self, event: WatchEvent) {
        self.watchers.retain(|w| {
            if event.key().starts_with(w.prefix.as_str()) {
                w.tx.send(event.clone()).is_ok()
            } else {
                !w.tx.is_closed()
            }
        });
    }

    fn remove_key(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                if let Some(lease) = entry.lease.and_then(|id| self.leases.get_mut(&id)) {
                    lease.keys.remove(key);
                }
                self.emit(WatchEvent::Delete {
                    key: key.to_string(),
                });
                true
            }
            None => false,
        }
    }

    fn drop_lease(&mut self, id: LeaseId) -> Option<usize> {
        let lease = self.leases.remove(&id)?;
        let count = lease.keys.len();
        for key in lease.keys {
            if self.entries.remove(&key).is_some() {
                self.emit(WatchEvent::Delete { key });
            }
        }
        Some(count)
    }

    fn purge_expired(&mut self, now: Instant) {
        let expired: Vec<LeaseId> = self
            .leases
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(keys) = self.drop_lease(id) {
                tracing::debug!(lease = %id, keys, "Lease expired");
            }
        }
    }
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.purge_expired(Instant::now());
        state
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the store holds no live key
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reap expired leases every `period` until the store is dropped
    pub fn spawn_reaper(&self, period: Duration) -> JoinHandle<()> {
        let weak: Weak<Mutex<State>> = Arc::downgrade(&self.state);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let Some(state) = weak.upgrade() else {
                    break;
                };
                let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
                state.purge_expired(Instant::now());
            }
        })
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("MemoryStore")
            .field("entries", &state.entries.len())
            .field("leases", &state.leases.len())
            .field("watchers", &state.watchers.len())
            .finish()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    fn backend_name(&self) -> &str {
        "memory"
    }

    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: Option<LeaseId>,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        if let Some(id) = lease {
            if !state.leases.contains_key(&id) {
                return Err(StoreError::LeaseNotFound(id));
            }
        }

        let previous = state.entries.insert(
            key.to_string(),
            Entry {
                value: value.clone(),
                lease,
            },
        );
        if let Some(old) = previous.and_then(|e| e.lease).filter(|old| Some(*old) != lease) {
            if let Some(old_lease) = state.leases.get_mut(&old) {
                old_lease.keys.remove(key);
            }
        }
        if let Some(lease) = lease.and_then(|id| state.leases.get_mut(&id)) {
            lease.keys.insert(key.to_string());
        }

        state.emit(WatchEvent::Put(KeyValue {
            key: key.to_string(),
            value,
            lease,
        }));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<KeyValue>, StoreError> {
        let state = self.lock();
        Ok(state.entries.get(key).map(|entry| KeyValue {
            key: key.to_string(),
            value: entry.value.clone(),
            lease: entry.lease,
        }))
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>, StoreError> {
        let state = self.lock();
        Ok(state
            .entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| KeyValue {
                key: key.clone(),
                value: entry.value.clone(),
                lease: entry.lease,
            })
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.lock().remove_key(key);
        Ok(())
    }

    async fn watch(&self, prefix: &str) -> Result<WatchStream, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().watchers.push(Watcher {
            prefix: prefix.to_string(),
            tx,
        });
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId, StoreError> {
        let mut state = self.lock();
        state.next_lease += 1;
        let id = LeaseId(state.next_lease);
        state.leases.insert(
            id,
            Lease {
                deadline: Instant::now() + ttl,
                keys: BTreeSet::new(),
            },
        );
        Ok(id)
    }

    async fn revoke_lease(&self, lease: LeaseId) -> Result<(), StoreError> {
        let mut state = self.lock();
        match state.drop_lease(lease) {
            Some(keys) => {
                tracing::debug!(lease = %lease, keys, "Lease revoked");
                Ok(())
            }
            None => Err(StoreError::LeaseNotFound(lease)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemoryStore::new();
        store.put("/lt/a", b"1".to_vec(), None).await.unwrap();

        let kv = store.get("/lt/a").await.unwrap().unwrap();
        assert_eq!(kv.value, b"1");
        assert_eq!(kv.lease, None);

        store.delete("/lt/a").await.unwrap();
        assert!(store.get("/lt/a").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_get_prefix_is_ordered_and_bounded() {
        let store = MemoryStore::new();
        for key in ["/lt/test/b", "/lt/test/a", "/lt/server/x", "/lt/testing"] {
            store.put(key, vec![], None).await.unwrap();
        }

        let keys: Vec<String> = store
            .get_prefix("/lt/test/")
            .await
            .unwrap()
            .into_iter()
            .map(|kv| kv.key)
            .collect();
        assert_eq!(keys, vec!["/lt/test/a", "/lt/test/b"]);
    }

    #[tokio::test]
    async fn test_put_with_unknown_lease_is_rejected() {
        let store = MemoryStore::new();
        let result = store.put("/lt/a", vec![], Some(LeaseId(99))).await;
        assert!(matches!(result, Err(StoreError::LeaseNotFound(LeaseId(99)))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_expiry_removes_keys() {
        let store = MemoryStore::new();
        let lease = store.grant_lease(Duration::from_secs(10)).await.unwrap();
        store.put("/lt/test/1", vec![1], Some(lease)).await.unwrap();
        store.put("/lt/plain", vec![2], None).await.unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(store.get("/lt/test/1").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(store.get("/lt/test/1").await.unwrap().is_none());
        assert!(store.get("/lt/plain").await.unwrap().is_some());

        // Expired lease is gone for good
        assert!(store.put("/lt/test/1", vec![], Some(lease)).await.is_err());
    }

    #[tokio::test]
    async fn test_revoke_lease_deletes_attached_keys() {
        let store = MemoryStore::new();
        let lease = store.grant_lease(Duration::from_secs(60)).await.unwrap();
        store.put("/lt/test/1", vec![], Some(lease)).await.unwrap();
        store.put("/lt/results/1/a", vec![], Some(lease)).await.unwrap();

        store.revoke_lease(lease).await.unwrap();
        assert!(store.is_empty());
        assert!(store.revoke_lease(lease).await.is_err());
    }

    #[tokio::test]
    async fn test_rebinding_key_to_new_lease() {
        let store = MemoryStore::new();
        let first = store.grant_lease(Duration::from_secs(60)).await.unwrap();
        let second = store.grant_lease(Duration::from_secs(60)).await.unwrap();
        store.put("/lt/k", vec![], Some(first)).await.unwrap();
        store.put("/lt/k", vec![], Some(second)).await.unwrap();

        store.revoke_lease(first).await.unwrap();
        assert!(store.get("/lt/k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_watch_delivers_prefix_events_in_order() {
        let store = MemoryStore::new();
        let mut events = store.watch("/lt/test/").await.unwrap();

        store.put("/lt/test/1", b"a".to_vec(), None).await.unwrap();
        store.put("/lt/server/x", b"ignored".to_vec(), None).await.unwrap();
        store.put("/lt/test/1", b"b".to_vec(), None).await.unwrap();
        store.delete("/lt/test/1").await.unwrap();

        match events.next().await.unwrap() {
            WatchEvent::Put(kv) => assert_eq!(kv.value, b"a"),
            other => panic!("unexpected event {other:?}"),
        }
        match events.next().await.unwrap() {
            WatchEvent::Put(kv) => assert_eq!(kv.value, b"b"),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(
            events.next().await.unwrap(),
            WatchEvent::Delete {
                key: "/lt/test/1".into()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_emits_expiry_deletes() {
        let store = MemoryStore::new();
        let mut events = store.watch("/lt/").await.unwrap();
        let lease = store.grant_lease(Duration::from_secs(5)).await.unwrap();
        store.put("/lt/test/1", vec![], Some(lease)).await.unwrap();
        let _ = events.next().await;

        let reaper = store.spawn_reaper(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(
            events.next().await.unwrap(),
            WatchEvent::Delete {
                key: "/lt/test/1".into()
            }
        );
        reaper.abort();
    }

    #[tokio::test]
    async fn test_dropped_watchers_are_pruned() {
        let store = MemoryStore::new();
        let events = store.watch("/lt/").await.unwrap();
        drop(events);

        store.put("/lt/a", vec![], None).await.unwrap();
        let state = store.state.lock().unwrap();
        assert!(state.watchers.is_empty());
    }
}
