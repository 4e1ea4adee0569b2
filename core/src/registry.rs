//! Lease-bound test records and their results

use crate::config::HammerConfig;
use crate::error::{HammerError, HammerResult};
use crate::keys::KeySpace;
use crate::model::{ResultData, Test, STATE_START};
use crate::traits::{CoordinationStore, KeyValue, LeaseId, StoreError};

use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

/// Decode a stored record; an undecodable record is treated as absent
pub fn decode_record<T: DeserializeOwned>(kv: &KeyValue) -> Option<T> {
    match serde_json::from_slice(&kv.value) {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::warn!(key = %kv.key, error = %e, "Skipping undecodable record");
            None
        }
    }
}

/// Creates and reads test records; source of truth for whether a test exists
#[derive(Clone)]
pub struct TestRegistry {
    store: Arc<dyn CoordinationStore>,
    keys: KeySpace,
    lease_buffer: Duration,
}

impl TestRegistry {
    /// Create a registry using the namespace and lease buffer of `config`
    pub fn new(store: Arc<dyn CoordinationStore>, config: &HammerConfig) -> Self {
        Self {
            store,
            keys: KeySpace::new(&config.namespace),
            lease_buffer: config.lease_buffer,
        }
    }

    /// Key space in use
    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<dyn CoordinationStore> {
        &self.store
    }

    /// Register a test under a fresh lease and return its id (lease hex)
    ///
    /// The lease lives for the test's length plus the lease buffer, so the
    /// record and every result attached to it vanish together afterwards.
    pub async fn create_test(&self, mut test: Test) -> HammerResult<String> {
        let ttl = Duration::from_secs(u64::from(test.length)) + self.lease_buffer;
        let lease = self.store.grant_lease(ttl).await?;

        test.state = STATE_START.to_string();
        test.lease = lease.to_hex();

        let value = serde_json::to_vec(&test)?;
        self.store
            .put(&self.keys.test(&test.lease), value, Some(lease))
            .await?;

        tracing::info!(
            test = %test.lease,
            ttl_secs = ttl.as_secs(),
            virtual_users = test.virtual_users,
            targets = test.targets.len(),
            servers = test.servers.len(),
            "Test created"
        );
        Ok(test.lease)
    }

    /// Read one test, headers stripped
    pub async fn get_test(&self, id: &str) -> HammerResult<Option<Test>> {
        let lease = parse_test_id(id)?;
        let kv = self.store.get(&self.keys.test(&lease.to_hex())).await?;
        Ok(kv
            .as_ref()
            .and_then(decode_record::<Test>)
            .map(Test::redacted))
    }

    /// Read every live test, headers stripped
    pub async fn list_tests(&self) -> HammerResult<Vec<Test>> {
        let entries = self.store.get_prefix(&self.keys.tests()).await?;
        Ok(entries
            .iter()
            .filter_map(decode_record::<Test>)
            .map(Test::redacted)
            .collect())
    }

    /// Read every result record published for a test
    pub async fn list_results(&self, id: &str) -> HammerResult<Vec<ResultData>> {
        let lease = parse_test_id(id)?;
        let entries = self
            .store
            .get_prefix(&self.keys.results(&lease.to_hex()))
            .await?;
        Ok(entries.iter().filter_map(decode_record).collect())
    }

    /// Write a worker's results, bound to the test's lease
    pub async fn publish_results(&self, lease: LeaseId, data: &ResultData) -> HammerResult<()> {
        let key = self.keys.result(&lease.to_hex(), &data.server_id);
        let value = serde_json::to_vec(data)?;
        self.store.put(&key, value, Some(lease)).await?;
        Ok(())
    }

    /// Stop a test early by revoking its lease
    ///
    /// Returns `false` when the test no longer exists.
    pub async fn stop_test(&self, id: &str) -> HammerResult<bool> {
        let lease = parse_test_id(id)?;
        match self.store.revoke_lease(lease).await {
            Ok(()) => {
                tracing::info!(test = %lease, "Test stopped");
                Ok(true)
            }
            Err(StoreError::LeaseNotFound(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for TestRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestRegistry")
            .field("store", &self.store.backend_name())
            .field("keys", &self.keys)
            .field("lease_buffer", &self.lease_buffer)
            .finish()
    }
}

/// Parse a public test id into its lease
pub fn parse_test_id(id: &str) -> HammerResult<LeaseId> {
    LeaseId::from_hex(id).map_err(|_| HammerError::invalid_test_id(id))
}
