//! Core traits for the coordination substrate and the target transport
//!
//! These traits are defined in core so that the engine never depends on a
//! concrete backend. Implementations live in `memory` (in-process),
//! `hammer-storage` (etcd) and `hammer-client` (HTTP).

use crate::model::TestTarget;
use async_trait::async_trait;
use futures::Stream;
use std::fmt;
use std::pin::Pin;
use std::time::Duration;

// ============================================================================
// Coordination Store Trait
// ============================================================================

/// Identifier of a TTL-bound lease granted by the substrate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeaseId(pub i64);

impl LeaseId {
    /// Lowercase hex rendering, used as the public test id and key suffix
    pub fn to_hex(&self) -> String {
        format!("{:x}", self.0)
    }

    /// Parse the hex rendering produced by [`LeaseId::to_hex`]
    pub fn from_hex(hex: &str) -> Result<Self, std::num::ParseIntError> {
        i64::from_str_radix(hex, 16).map(LeaseId)
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// A key/value pair read from the substrate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    /// Full key
    pub key: String,
    /// Raw value bytes
    pub value: Vec<u8>,
    /// Lease the key is attached to, if any
    pub lease: Option<LeaseId>,
}

/// A change notification delivered by a watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// Key was created or overwritten
    Put(KeyValue),
    /// Key was deleted, explicitly or by lease expiry
    Delete {
        /// Deleted key
        key: String,
    },
}

impl WatchEvent {
    /// Key the event refers to
    pub fn key(&self) -> &str {
        match self {
            WatchEvent::Put(kv) => &kv.key,
            WatchEvent::Delete { key } => key,
        }
    }
}

/// Ordered, at-least-once stream of watch events
pub type WatchStream = Pin<Box<dyn Stream<Item = WatchEvent> + Send>>;

/// Linearizable key/value store with prefix reads, watches and leases
///
/// All cross-process coordination (test publication and expiry, results,
/// worker discovery) goes through these operations.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Backend identifier (e.g., "memory", "etcd")
    fn backend_name(&self) -> &str;

    /// Write a key, optionally attached to a lease
    async fn put(&self, key: &str, value: Vec<u8>, lease: Option<LeaseId>)
        -> Result<(), StoreError>;

    /// Read a single key
    async fn get(&self, key: &str) -> Result<Option<KeyValue>, StoreError>;

    /// Read every key under a prefix, ordered by key
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>, StoreError>;

    /// Delete a single key
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Subscribe to put/delete events for keys under a prefix
    async fn watch(&self, prefix: &str) -> Result<WatchStream, StoreError>;

    /// Grant a lease; attached keys are deleted once `ttl` elapses
    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId, StoreError>;

    /// Revoke a lease, deleting every attached key immediately
    async fn revoke_lease(&self, lease: LeaseId) -> Result<(), StoreError>;
}

/// Substrate errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Network or connection failure talking to the substrate
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Operation exceeded its deadline
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    /// Lease does not exist or already expired
    #[error("lease not found: {0}")]
    LeaseNotFound(LeaseId),

    /// Backend rejected the request
    #[error("store request rejected: {0}")]
    Rejected(String),
}

impl StoreError {
    /// Check if the operation may succeed on a later attempt
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

// ============================================================================
// Target Client Trait
// ============================================================================

/// Transport used by virtual users to hit a test target
///
/// Returns the response status code. A non-2xx status is a normal outcome;
/// only connection-level failures are errors.
#[async_trait]
pub trait TargetClient: Send + Sync {
    /// Client identifier (e.g., "http")
    fn client_name(&self) -> &str;

    /// Issue one request described by `target`
    async fn execute(&self, target: &TestTarget) -> Result<u16, TargetError>;
}

/// Target transport errors
#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    /// Connection refused, reset, DNS failure, ...
    #[error("transport error: {0}")]
    Transport(String),

    /// Request did not complete in time
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Target could not be turned into a request (bad method, URI, header)
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_id_hex() {
        let lease = LeaseId(0x694d_7a1b_2c3d);
        assert_eq!(lease.to_hex(), "694d7a1b2c3d");
        assert_eq!(lease.to_string(), "694d7a1b2c3d");
        assert_eq!(LeaseId::from_hex("694d7a1b2c3d").unwrap(), lease);
    }

    #[test]
    fn test_lease_id_invalid_hex() {
        assert!(LeaseId::from_hex("not-a-lease").is_err());
        assert!(LeaseId::from_hex("").is_err());
    }

    #[test]
    fn test_watch_event_key() {
        let put = WatchEvent::Put(KeyValue {
            key: "/lt/test/1".into(),
            value: vec![],
            lease: None,
        });
        let delete = WatchEvent::Delete {
            key: "/lt/test/2".into(),
        };
        assert_eq!(put.key(), "/lt/test/1");
        assert_eq!(delete.key(), "/lt/test/2");
    }

    #[test]
    fn test_store_error_transient() {
        assert!(StoreError::Unavailable("reset".into()).is_transient());
        assert!(StoreError::Timeout(Duration::from_secs(5)).is_transient());
        assert!(!StoreError::LeaseNotFound(LeaseId(7)).is_transient());
        assert!(!StoreError::Rejected("too large".into()).is_transient());
    }
}
