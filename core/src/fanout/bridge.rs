//! Forwards registry changes to the fanout hub

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::broadcast;

use crate::config::HammerConfig;
use crate::error::{HammerError, HammerResult};
use crate::keys::{KeyKind, KeySpace};
use crate::model::{ResultData, SocketPayload, SocketResponse, Test};
use crate::registry::decode_record;
use crate::traits::{CoordinationStore, WatchEvent};

use super::hub::HubHandle;

/// Watches the whole namespace and broadcasts test and result updates
///
/// Test payloads are redacted before leaving the process. Worker
/// registrations and deletions are not forwarded.
pub struct RegistryBridge {
    store: Arc<dyn CoordinationStore>,
    keys: KeySpace,
    hub: HubHandle,
    retry_delay: Duration,
}

impl RegistryBridge {
    /// Create a bridge feeding `hub`
    pub fn new(store: Arc<dyn CoordinationStore>, hub: HubHandle, config: &HammerConfig) -> Self {
        Self {
            store,
            keys: KeySpace::new(&config.namespace),
            hub,
            retry_delay: config.watch_retry_delay,
        }
    }

    /// Payload for a watch event, if it is one that gets forwarded
    pub fn payload(&self, event: &WatchEvent) -> Option<SocketPayload> {
        let WatchEvent::Put(kv) = event else {
            return None;
        };
        match self.keys.classify(&kv.key) {
            KeyKind::Test(_) => decode_record::<Test>(kv).map(|t| SocketPayload::Test(t.redacted())),
            KeyKind::Results { .. } => decode_record::<ResultData>(kv).map(SocketPayload::Results),
            KeyKind::Server(_) | KeyKind::Other => None,
        }
    }

    /// Forward one event; returns whether a message was broadcast
    pub async fn forward(&self, event: &WatchEvent) -> HammerResult<bool> {
        match self.payload(event) {
            Some(payload) => {
                tracing::debug!(key = %event.key(), kind = payload.kind(), "Forwarding update");
                self.hub.broadcast(SocketResponse::broadcast(payload)).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Forward updates until shutdown or until the hub stops
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let prefix = self.keys.root().to_string();
        tracing::info!(prefix = %prefix, "Registry bridge started");

        loop {
            match self.store.watch(&prefix).await {
                Ok(mut events) => loop {
                    tokio::select! {
                        biased;

                        _ = shutdown.recv() => {
                            tracing::debug!("Registry bridge received shutdown signal");
                            return;
                        }

                        event = events.next() => match event {
                            Some(event) => {
                                if let Err(HammerError::HubStopped) = self.forward(&event).await {
                                    tracing::warn!("Fanout hub stopped, registry bridge exiting");
                                    return;
                                }
                            }
                            None => {
                                tracing::warn!(prefix = %prefix, "Watch stream ended, resubscribing");
                                break;
                            }
                        }
                    }
                },
                Err(e) => {
                    tracing::warn!(prefix = %prefix, error = %e, "Failed to watch namespace");
                }
            }

            tokio::select! {
                biased;

                _ = shutdown.recv() => return,
                _ = tokio::time::sleep(self.retry_delay) => {}
            }
        }
    }
}

impl std::fmt::Debug for RegistryBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryBridge")
            .field("store", &self.store.backend_name())
            .field("keys", &self.keys)
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}
