//! Real-time fanout of registry changes to observers
//!
//! [`Hub`] owns the subscriber set and runs as a single task; [`HubHandle`]
//! is the cloneable front used to register, locate and broadcast.
//! [`RegistryBridge`] turns substrate watch events into hub broadcasts.

mod bridge;
mod hub;

pub use bridge::RegistryBridge;
pub use hub::{Hub, HubHandle, HubStats, SubscriberId, Subscription};
