//! Shared mocks for unit tests

use crate::memory::MemoryStore;
use crate::model::TestTarget;
use crate::traits::{
    CoordinationStore, KeyValue, LeaseId, StoreError, TargetClient, TargetError, WatchStream,
};

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Mock TargetClient
// ============================================================================

pub(crate) struct MockTargetClient {
    status: u16,
    delay: Option<Duration>,
    fail: bool,
    calls: AtomicUsize,
}

impl MockTargetClient {
    pub(crate) fn new(status: u16) -> Self {
        Self {
            status,
            delay: None,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TargetClient for MockTargetClient {
    fn client_name(&self) -> &str {
        "mock"
    }

    async fn execute(&self, _target: &TestTarget) -> Result<u16, TargetError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail {
            return Err(TargetError::Transport("connection refused".into()));
        }

        Ok(self.status)
    }
}

// ============================================================================
// Store whose first watch calls fail
// ============================================================================

#[derive(Clone)]
pub(crate) struct FlakyWatchStore {
    inner: MemoryStore,
    failures: usize,
    watch_calls: Arc<AtomicUsize>,
}

impl FlakyWatchStore {
    pub(crate) fn new(inner: MemoryStore, failures: usize) -> Self {
        Self {
            inner,
            failures,
            watch_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn watch_calls(&self) -> usize {
        self.watch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CoordinationStore for FlakyWatchStore {
    fn backend_name(&self) -> &str {
        "flaky"
    }

    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: Option<LeaseId>,
    ) -> Result<(), StoreError> {
        self.inner.put(key, value, lease).await
    }

    async fn get(&self, key: &str) -> Result<Option<KeyValue>, StoreError> {
        self.inner.get(key).await
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>, StoreError> {
        self.inner.get_prefix(prefix).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.inner.delete(key).await
    }

    async fn watch(&self, prefix: &str) -> Result<WatchStream, StoreError> {
        let call = self.watch_calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        self.inner.watch(prefix).await
    }

    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId, StoreError> {
        self.inner.grant_lease(ttl).await
    }

    async fn revoke_lease(&self, lease: LeaseId) -> Result<(), StoreError> {
        self.inner.revoke_lease(lease).await
    }
}
