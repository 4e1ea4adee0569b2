//! hammer-core: distributed load-testing engine
//!
//! This crate holds everything a coordinator or worker process needs besides
//! the concrete substrate client and HTTP transport:
//!
//! - Records shared through the substrate and their key layout
//! - Core traits (CoordinationStore, TargetClient) and an in-memory store
//! - Test registry, worker liveness and watch-driven dispatch
//! - Test runs: virtual users, windowed aggregation, result publication
//! - Real-time fanout hub
//! - Configuration and error handling

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod fanout;
pub mod keys;
pub mod liveness;
pub mod memory;
pub mod model;
pub mod orchestrator;
pub mod registry;
pub mod traits;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use channel::ChannelConfig;
pub use config::{ConfigError, HammerConfig, LivenessConfig, RunConfig};
pub use dispatcher::{Dispatch, Dispatcher};
pub use error::*;
pub use fanout::{Hub, HubHandle, RegistryBridge, Subscription};
pub use keys::{KeyKind, KeySpace};
pub use liveness::{ServerId, ServerRegistry};
pub use memory::MemoryStore;
pub use model::*;
pub use orchestrator::{RunSummary, TestRun, TestRunBuilder};
pub use registry::TestRegistry;
pub use traits::*;
pub use worker::{VirtualUser, VirtualUserBuilder, VirtualUserStats};
