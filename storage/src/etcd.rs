//! etcd v3 backend

use async_trait::async_trait;
use etcd_client::{
    Client, EventType, GetOptions, KeyValue as EtcdKeyValue, PutOptions, WatchOptions,
    WatchResponse,
};
use futures::StreamExt;
use hammer_core::{CoordinationStore, KeyValue, LeaseId, StoreError, WatchEvent, WatchStream};
use std::time::Duration;

/// [`CoordinationStore`] over an etcd cluster
///
/// `etcd_client::Client` is a cheap handle over a shared channel; every call
/// works on its own clone.
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
}

impl EtcdStore {
    /// Connect to the given endpoints
    pub async fn connect(endpoints: &[String]) -> Result<Self, StoreError> {
        let client = Client::connect(endpoints, None).await.map_err(map_err)?;
        Ok(Self { client })
    }

    /// Wrap an already connected client
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

impl std::fmt::Debug for EtcdStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtcdStore").finish_non_exhaustive()
    }
}

fn map_err(e: etcd_client::Error) -> StoreError {
    match e {
        etcd_client::Error::TransportError(e) => StoreError::Unavailable(e.to_string()),
        etcd_client::Error::IoError(e) => StoreError::Unavailable(e.to_string()),
        etcd_client::Error::GRpcStatus(status) => StoreError::Rejected(status.message().to_string()),
        other => StoreError::Rejected(other.to_string()),
    }
}

fn convert(kv: &EtcdKeyValue) -> KeyValue {
    KeyValue {
        key: String::from_utf8_lossy(kv.key()).into_owned(),
        value: kv.value().to_vec(),
        lease: (kv.lease() != 0).then_some(LeaseId(kv.lease())),
    }
}

fn events(response: WatchResponse) -> Vec<WatchEvent> {
    response
        .events()
        .iter()
        .filter_map(|event| {
            let kv = event.kv()?;
            Some(match event.event_type() {
                EventType::Put => WatchEvent::Put(convert(kv)),
                EventType::Delete => WatchEvent::Delete {
                    key: String::from_utf8_lossy(kv.key()).into_owned(),
                },
            })
        })
        .collect()
}

#[async_trait]
impl CoordinationStore for EtcdStore {
    fn backend_name(&self) -> &str {
        "etcd"
    }

    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: Option<LeaseId>,
    ) -> Result<(), StoreError> {
        let options = lease.map(|LeaseId(id)| PutOptions::new().with_lease(id));
        let mut client = self.client.clone();
        match client.put(key, value, options).await {
            Ok(_) => Ok(()),
            Err(etcd_client::Error::GRpcStatus(status))
                if status.message().contains("lease not found") =>
            {
                Err(StoreError::LeaseNotFound(lease.unwrap_or(LeaseId(0))))
            }
            Err(e) => Err(map_err(e)),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<KeyValue>, StoreError> {
        let mut client = self.client.clone();
        let response = client.get(key, None).await.map_err(map_err)?;
        Ok(response.kvs().first().map(convert))
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>, StoreError> {
        let mut client = self.client.clone();
        let response = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await
            .map_err(map_err)?;
        Ok(response.kvs().iter().map(convert).collect())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut client = self.client.clone();
        client.delete(key, None).await.map_err(map_err)?;
        Ok(())
    }

    async fn watch(&self, prefix: &str) -> Result<WatchStream, StoreError> {
        let mut client = self.client.clone();
        let (watcher, stream) = client
            .watch(prefix, Some(WatchOptions::new().with_prefix()))
            .await
            .map_err(map_err)?;

        // The watcher must outlive the stream or etcd cancels the watch
        let responses = futures::stream::unfold((watcher, stream), |(watcher, mut stream)| async move {
            match stream.message().await {
                Ok(Some(response)) if !response.canceled() => {
                    Some((futures::stream::iter(events(response)), (watcher, stream)))
                }
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!(error = %e, "etcd watch stream failed");
                    None
                }
            }
        });

        Ok(Box::pin(responses.flatten()))
    }

    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId, StoreError> {
        let mut client = self.client.clone();
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX).max(1);
        let response = client.lease_grant(ttl_secs, None).await.map_err(map_err)?;
        Ok(LeaseId(response.id()))
    }

    async fn revoke_lease(&self, lease: LeaseId) -> Result<(), StoreError> {
        let mut client = self.client.clone();
        match client.lease_revoke(lease.0).await {
            Ok(_) => Ok(()),
            Err(etcd_client::Error::GRpcStatus(status))
                if status.message().contains("lease not found") =>
            {
                Err(StoreError::LeaseNotFound(lease))
            }
            Err(e) => Err(map_err(e)),
        }
    }
}
