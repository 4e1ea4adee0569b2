//! Hub actor and its handle

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::channel::ChannelConfig;
use crate::error::{HammerError, HammerResult};
use crate::model::SocketResponse;

/// Identifier of a registered subscriber
pub type SubscriberId = u64;

/// Delivery counters of the hub
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Currently registered subscribers
    pub subscribers: usize,
    /// Messages queued to a subscriber
    pub delivered: u64,
    /// Messages dropped because a subscriber's buffer was full
    pub dropped: u64,
}

enum Command {
    Register {
        reply: oneshot::Sender<Subscription>,
    },
    Unregister {
        id: SubscriberId,
    },
    Locate {
        id: SubscriberId,
        location: String,
    },
    Broadcast {
        message: Arc<SocketResponse>,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
}

/// Receiving side of one subscriber
///
/// The stream ends once the subscriber is unregistered or the hub stops.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::Receiver<Arc<SocketResponse>>,
}

impl Subscription {
    /// Subscriber id, used for `locate` and `unregister`
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next message, or `None` when the subscription is closed
    pub async fn recv(&mut self) -> Option<Arc<SocketResponse>> {
        self.receiver.recv().await
    }

    /// Next message if one is already queued
    pub fn try_recv(&mut self) -> Option<Arc<SocketResponse>> {
        self.receiver.try_recv().ok()
    }
}

struct Subscriber {
    tx: mpsc::Sender<Arc<SocketResponse>>,
    location: String,
}

/// Single owner of the subscriber set
///
/// All mutations arrive as commands over one channel, so the subscriber map
/// is only ever touched by the hub task.
pub struct Hub {
    commands: mpsc::Receiver<Command>,
    subscribers: HashMap<SubscriberId, Subscriber>,
    next_id: SubscriberId,
    subscriber_buffer: usize,
    stats: HubStats,
}

impl Hub {
    /// Create a hub and the handle used to talk to it
    pub fn new(config: &ChannelConfig) -> (Self, HubHandle) {
        let (tx, commands) = mpsc::channel(config.command_buffer);
        let hub = Self {
            commands,
            subscribers: HashMap::new(),
            next_id: 0,
            subscriber_buffer: config.subscriber_buffer,
            stats: HubStats::default(),
        };
        (hub, HubHandle { tx })
    }

    /// Create a hub and run it on its own task
    pub fn spawn(
        config: &ChannelConfig,
        shutdown: broadcast::Receiver<()>,
    ) -> (HubHandle, JoinHandle<HubStats>) {
        let (hub, handle) = Self::new(config);
        (handle, tokio::spawn(hub.run(shutdown)))
    }

    /// Process commands until shutdown or until every handle is dropped
    ///
    /// Dropping the hub closes every subscription.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> HubStats {
        tracing::info!(
            subscriber_buffer = self.subscriber_buffer,
            "Fanout hub started"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    tracing::debug!("Fanout hub received shutdown signal");
                    break;
                }

                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => {
                        tracing::debug!("All hub handles dropped");
                        break;
                    }
                }
            }
        }

        self.stats.subscribers = self.subscribers.len();
        tracing::info!(
            subscribers = self.stats.subscribers,
            delivered = self.stats.delivered,
            dropped = self.stats.dropped,
            "Fanout hub stopped"
        );
        self.stats
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Register { reply } => {
                self.next_id += 1;
                let id = self.next_id;
                let (tx, receiver) = mpsc::channel(self.subscriber_buffer);
                self.subscribers.insert(
                    id,
                    Subscriber {
                        tx,
                        location: String::new(),
                    },
                );
                if reply.send(Subscription { id, receiver }).is_err() {
                    // Caller went away before getting its subscription
                    self.subscribers.remove(&id);
                    return;
                }
                tracing::debug!(subscriber = id, "Subscriber registered");
            }
            Command::Unregister { id } => {
                if self.subscribers.remove(&id).is_some() {
                    tracing::debug!(subscriber = id, "Subscriber unregistered");
                }
            }
            Command::Locate { id, location } => {
                if let Some(subscriber) = self.subscribers.get_mut(&id) {
                    tracing::debug!(subscriber = id, location = %location, "Subscriber located");
                    subscriber.location = location;
                }
            }
            Command::Broadcast { message } => self.deliver(message),
            Command::Stats { reply } => {
                let mut stats = self.stats;
                stats.subscribers = self.subscribers.len();
                let _ = reply.send(stats);
            }
        }
    }

    /// Empty location floods every subscriber; otherwise only exact tag matches
    fn deliver(&mut self, message: Arc<SocketResponse>) {
        let mut closed = Vec::new();

        for (id, subscriber) in &self.subscribers {
            if !message.is_broadcast() && subscriber.location != message.location {
                continue;
            }
            match subscriber.tx.try_send(Arc::clone(&message)) {
                Ok(()) => self.stats.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    self.stats.dropped += 1;
                    tracing::debug!(subscriber = id, "Subscriber buffer full, message dropped");
                }
                Err(TrySendError::Closed(_)) => closed.push(*id),
            }
        }

        for id in closed {
            self.subscribers.remove(&id);
            tracing::debug!(subscriber = id, "Subscriber gone, removed");
        }
    }
}

/// Cloneable front of the [`Hub`]
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<Command>,
}

impl HubHandle {
    async fn send(&self, command: Command) -> HammerResult<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| HammerError::HubStopped)
    }

    /// Register a new, untagged subscriber
    pub async fn register(&self) -> HammerResult<Subscription> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Register { reply }).await?;
        rx.await.map_err(|_| HammerError::HubStopped)
    }

    /// Remove a subscriber, closing its stream
    pub async fn unregister(&self, id: SubscriberId) -> HammerResult<()> {
        self.send(Command::Unregister { id }).await
    }

    /// Replace a subscriber's location tag; the latest call wins
    pub async fn locate(&self, id: SubscriberId, location: impl Into<String>) -> HammerResult<()> {
        self.send(Command::Locate {
            id,
            location: location.into(),
        })
        .await
    }

    /// Deliver a message to every subscriber matching its location
    pub async fn broadcast(&self, message: SocketResponse) -> HammerResult<()> {
        self.send(Command::Broadcast {
            message: Arc::new(message),
        })
        .await
    }

    /// Current delivery counters
    pub async fn stats(&self) -> HammerResult<HubStats> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stats { reply }).await?;
        rx.await.map_err(|_| HammerError::HubStopped)
    }
}
