//! Coordination substrate backends
//!
//! This crate turns a [`StoreBackend`] selection into a shared
//! [`CoordinationStore`]:
//!
//! - `memory`: the in-process [`MemoryStore`], for standalone runs and tests
//! - `etcd`: an etcd v3 cluster (cargo feature `etcd`)

#![warn(missing_docs)]
#![warn(clippy::all)]

#[cfg(feature = "etcd")]
mod etcd;

#[cfg(feature = "etcd")]
pub use etcd::EtcdStore;

use hammer_core::{CoordinationStore, MemoryStore, StoreError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Default etcd client endpoint
pub const DEFAULT_ETCD_ENDPOINT: &str = "127.0.0.1:2379";

/// How often the in-memory backend reaps expired leases
const MEMORY_REAP_INTERVAL: Duration = Duration::from_secs(1);

/// Substrate selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreBackend {
    /// Single-process store
    #[default]
    Memory,
    /// etcd v3 cluster
    Etcd {
        /// Client endpoints (`host:port`)
        endpoints: Vec<String>,
    },
}

impl StoreBackend {
    /// etcd backend with the given endpoints, or the default one when empty
    pub fn etcd(endpoints: Vec<String>) -> Self {
        if endpoints.is_empty() {
            Self::Etcd {
                endpoints: vec![DEFAULT_ETCD_ENDPOINT.to_string()],
            }
        } else {
            Self::Etcd { endpoints }
        }
    }

    /// Backend name as used on the command line
    pub fn name(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Etcd { .. } => "etcd",
        }
    }
}

impl FromStr for StoreBackend {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "etcd" => Ok(Self::etcd(Vec::new())),
            other => Err(StoreError::Rejected(format!("unknown store backend: {other}"))),
        }
    }
}

/// Connect to the selected backend
///
/// The memory backend starts its lease reaper, so expiry produces delete
/// events even when nobody touches the store.
pub async fn connect(backend: &StoreBackend) -> Result<Arc<dyn CoordinationStore>, StoreError> {
    match backend {
        StoreBackend::Memory => {
            let store = MemoryStore::new();
            store.spawn_reaper(MEMORY_REAP_INTERVAL);
            tracing::info!(backend = "memory", "Coordination store ready");
            Ok(Arc::new(store))
        }
        StoreBackend::Etcd { endpoints } => connect_etcd(endpoints).await,
    }
}

#[cfg(feature = "etcd")]
async fn connect_etcd(endpoints: &[String]) -> Result<Arc<dyn CoordinationStore>, StoreError> {
    let store = EtcdStore::connect(endpoints).await?;
    tracing::info!(backend = "etcd", endpoints = ?endpoints, "Coordination store ready");
    Ok(Arc::new(store))
}

#[cfg(not(feature = "etcd"))]
async fn connect_etcd(_endpoints: &[String]) -> Result<Arc<dyn CoordinationStore>, StoreError> {
    Err(StoreError::Rejected(
        "etcd backend not available: rebuild with `--features etcd`".into(),
    ))
}
