//! Worker liveness: heartbeats and stale-registration sweeps
//!
//! Registrations carry no lease. Workers rewrite theirs periodically and the
//! coordinator deletes the ones that stopped being refreshed.

use crate::config::{HammerConfig, LivenessConfig};
use crate::error::HammerResult;
use crate::keys::KeySpace;
use crate::model::ServerRegistration;
use crate::traits::CoordinationStore;

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Identity of a worker process, fresh on every start
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerId(String);

impl ServerId {
    /// Generate a random id (`urn:uuid:<v4>`)
    pub fn generate() -> Self {
        Self(Uuid::new_v4().urn().to_string())
    }

    /// Id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ServerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ServerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Heartbeat writer and sweeper over `/<ns>/server/`
#[derive(Clone)]
pub struct ServerRegistry {
    store: Arc<dyn CoordinationStore>,
    keys: KeySpace,
    liveness: LivenessConfig,
}

impl ServerRegistry {
    /// Create a registry from the platform configuration
    pub fn new(store: Arc<dyn CoordinationStore>, config: &HammerConfig) -> Self {
        Self {
            store,
            keys: KeySpace::new(&config.namespace),
            liveness: config.liveness.clone(),
        }
    }

    /// Write a fresh registration for `id`
    pub async fn heartbeat(&self, id: &ServerId) -> HammerResult<()> {
        let registration = ServerRegistration::now(id.as_str());
        let value = serde_json::to_vec(&registration)?;
        self.store
            .put(&self.keys.server(id.as_str()), value, None)
            .await?;
        tracing::debug!(server_id = %id, "Heartbeat written");
        Ok(())
    }

    /// Heartbeat every `heartbeat_interval` until shutdown
    ///
    /// A failed write is logged and retried on the next tick.
    pub async fn run_heartbeat(self, id: ServerId, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.liveness.heartbeat_interval);
        tracing::info!(
            server_id = %id,
            interval = ?self.liveness.heartbeat_interval,
            "Heartbeat started"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    tracing::debug!(server_id = %id, "Heartbeat received shutdown signal");
                    break;
                }

                _ = ticker.tick() => {
                    if let Err(e) = self.heartbeat(&id).await {
                        tracing::warn!(server_id = %id, error = %e, "Heartbeat failed");
                    }
                }
            }
        }
    }

    /// Whether a registration is older than the stale threshold at `now`
    pub fn is_stale(&self, registration: &ServerRegistration, now: DateTime<Utc>) -> bool {
        match registration.age(now).to_std() {
            Ok(age) => age > self.liveness.stale_threshold,
            // Timestamp in the future: clock skew, treat as fresh
            Err(_) => false,
        }
    }

    /// Whether a registration counts as alive at `now`
    pub fn is_alive(&self, registration: &ServerRegistration, now: DateTime<Utc>) -> bool {
        !self.is_stale(registration, now)
    }

    /// Delete stale and undecodable registrations; returns the deleted keys
    pub async fn sweep(&self) -> HammerResult<Vec<String>> {
        self.sweep_at(Utc::now()).await
    }

    /// [`ServerRegistry::sweep`] evaluated at a given instant
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> HammerResult<Vec<String>> {
        let entries = self.store.get_prefix(&self.keys.servers()).await?;
        let mut deleted = Vec::new();

        for kv in entries {
            let stale = match serde_json::from_slice::<ServerRegistration>(&kv.value) {
                Ok(registration) => self.is_stale(&registration, now),
                Err(e) => {
                    tracing::warn!(key = %kv.key, error = %e, "Undecodable registration");
                    true
                }
            };
            if !stale {
                continue;
            }

            match self.store.delete(&kv.key).await {
                Ok(()) => {
                    tracing::info!(key = %kv.key, "Removed stale server registration");
                    deleted.push(kv.key);
                }
                Err(e) => {
                    tracing::warn!(key = %kv.key, error = %e, "Failed to remove registration");
                }
            }
        }

        Ok(deleted)
    }

    /// Sweep every `sweep_interval` until shutdown
    pub async fn run_sweeper(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.liveness.sweep_interval);
        tracing::info!(
            interval = ?self.liveness.sweep_interval,
            stale_threshold = ?self.liveness.stale_threshold,
            "Server sweeper started"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    tracing::debug!("Server sweeper received shutdown signal");
                    break;
                }

                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        tracing::warn!(error = %e, "Server sweep failed");
                    }
                }
            }
        }
    }

    /// Snapshot of current registrations; undecodable entries are skipped
    pub async fn list_servers(&self) -> HammerResult<Vec<ServerRegistration>> {
        let entries = self.store.get_prefix(&self.keys.servers()).await?;
        Ok(entries
            .iter()
            .filter_map(crate::registry::decode_record)
            .collect())
    }
}

impl fmt::Debug for ServerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerRegistry")
            .field("store", &self.store.backend_name())
            .field("keys", &self.keys)
            .field("liveness", &self.liveness)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use std::time::Duration;

    fn registry() -> (MemoryStore, ServerRegistry) {
        let store = MemoryStore::new();
        let registry = ServerRegistry::new(Arc::new(store.clone()), &HammerConfig::default());
        (store, registry)
    }

    async fn register_at(store: &MemoryStore, id: &str, timestamp: DateTime<Utc>) {
        let reg = ServerRegistration {
            id: id.to_string(),
            timestamp,
        };
        store
            .put(
                &format!("/lt/server/{id}"),
                serde_json::to_vec(&reg).unwrap(),
                None,
            )
            .await
            .unwrap();
    }

    #[test]
    fn test_server_id_is_urn_and_unique() {
        let a = ServerId::generate();
        let b = ServerId::generate();
        assert!(a.as_str().starts_with("urn:uuid:"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_heartbeat_writes_unleased_registration() {
        let (store, registry) = registry();
        let id = ServerId::from("urn:uuid:a");
        registry.heartbeat(&id).await.unwrap();

        let kv = store.get("/lt/server/urn:uuid:a").await.unwrap().unwrap();
        assert!(kv.lease.is_none());

        let servers = registry.list_servers().await.unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].id, "urn:uuid:a");
    }

    #[tokio::test]
    async fn test_sweep_removes_only_stale_registrations() {
        let (store, registry) = registry();
        let now = Utc::now();
        register_at(&store, "fresh", now - chrono::Duration::seconds(10)).await;
        register_at(&store, "edge", now - chrono::Duration::seconds(30)).await;
        register_at(&store, "stale", now - chrono::Duration::seconds(31)).await;

        let deleted = registry.sweep_at(now).await.unwrap();
        assert_eq!(deleted, vec!["/lt/server/stale".to_string()]);

        let ids: Vec<String> = registry
            .list_servers()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["edge", "fresh"]);
    }

    #[tokio::test]
    async fn test_sweep_removes_undecodable_registrations() {
        let (store, registry) = registry();
        store.put("/lt/server/garbage", b"nope".to_vec(), None).await.unwrap();

        let deleted = registry.sweep().await.unwrap();
        assert_eq!(deleted, vec!["/lt/server/garbage".to_string()]);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_future_timestamp_is_alive() {
        let (_store, registry) = registry();
        let now = Utc::now();
        let reg = ServerRegistration {
            id: "skewed".into(),
            timestamp: now + chrono::Duration::seconds(60),
        };
        assert!(registry.is_alive(&reg, now));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_loop_stops_on_shutdown() {
        let (store, registry) = registry();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(registry.run_heartbeat(ServerId::from("loop"), shutdown_rx));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(store.get("/lt/server/loop").await.unwrap().is_some());

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("heartbeat loop did not stop")
            .unwrap();
    }
}
