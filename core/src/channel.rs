//! Channel configuration for the fanout hub

use serde::{Deserialize, Serialize};

/// Channel buffer configuration for fanout communication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Per-subscriber outbound buffer (hub -> subscriber writer)
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,

    /// Command buffer (handles -> hub loop)
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
}

fn default_subscriber_buffer() -> usize {
    256
}

fn default_command_buffer() -> usize {
    1024
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: default_subscriber_buffer(),
            command_buffer: default_command_buffer(),
        }
    }
}

impl ChannelConfig {
    /// Set the per-subscriber buffer size
    pub fn with_subscriber_buffer(mut self, size: usize) -> Self {
        self.subscriber_buffer = size;
        self
    }

    /// Set the hub command buffer size
    pub fn with_command_buffer(mut self, size: usize) -> Self {
        self.command_buffer = size;
        self
    }
}
