//! Platform configuration types

use crate::channel::ChannelConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default key-space namespace
pub const DEFAULT_NAMESPACE: &str = "lt";

/// Top-level configuration shared by coordinator and worker processes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HammerConfig {
    /// Key-space namespace (`/<namespace>/...`)
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Extra lease time on top of a test's length, covering final aggregation
    #[serde(default = "default_lease_buffer", with = "humantime_serde")]
    pub lease_buffer: Duration,

    /// Delay before re-subscribing after a watch stream ends
    #[serde(default = "default_watch_retry_delay", with = "humantime_serde")]
    pub watch_retry_delay: Duration,

    /// Worker heartbeat and sweep timing
    #[serde(default)]
    pub liveness: LivenessConfig,

    /// Per-run execution and aggregation settings
    #[serde(default)]
    pub run: RunConfig,

    /// Fanout buffers
    #[serde(default)]
    pub fanout: ChannelConfig,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_lease_buffer() -> Duration {
    Duration::from_secs(1800)
}

fn default_watch_retry_delay() -> Duration {
    Duration::from_secs(1)
}

impl Default for HammerConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            lease_buffer: default_lease_buffer(),
            watch_retry_delay: default_watch_retry_delay(),
            liveness: LivenessConfig::default(),
            run: RunConfig::default(),
            fanout: ChannelConfig::default(),
        }
    }
}

impl HammerConfig {
    /// Load a JSON configuration file; missing fields take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(format!("{}: {}", path.display(), e)))?;
        let config: Self =
            serde_json::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the lease buffer
    pub fn with_lease_buffer(mut self, buffer: Duration) -> Self {
        self.lease_buffer = buffer;
        self
    }

    /// Set the liveness configuration
    pub fn with_liveness(mut self, liveness: LivenessConfig) -> Self {
        self.liveness = liveness;
        self
    }

    /// Set the run configuration
    pub fn with_run(mut self, run: RunConfig) -> Self {
        self.run = run;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.trim_matches('/').is_empty() {
            return Err(ConfigError::InvalidNamespace(
                "namespace must not be empty".into(),
            ));
        }
        if self.namespace.trim_matches('/').contains('/') {
            return Err(ConfigError::InvalidNamespace(format!(
                "namespace {:?} must be a single path segment",
                self.namespace
            )));
        }
        if self.watch_retry_delay.is_zero() {
            return Err(ConfigError::InvalidDuration("watch_retry_delay"));
        }
        self.liveness.validate()?;
        self.run.validate()?;
        if self.fanout.subscriber_buffer == 0 {
            return Err(ConfigError::InvalidBuffer("fanout.subscriber_buffer"));
        }
        if self.fanout.command_buffer == 0 {
            return Err(ConfigError::InvalidBuffer("fanout.command_buffer"));
        }
        Ok(())
    }
}

/// Worker heartbeat and stale-registration sweep timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessConfig {
    /// How often a worker rewrites its registration
    #[serde(default = "default_heartbeat_interval", with = "humantime_serde")]
    pub heartbeat_interval: Duration,

    /// How often the coordinator sweeps registrations
    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,

    /// Age after which a registration is considered dead
    #[serde(default = "default_stale_threshold", with = "humantime_serde")]
    pub stale_threshold: Duration,
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(15)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_stale_threshold() -> Duration {
    Duration::from_secs(30)
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
            sweep_interval: default_sweep_interval(),
            stale_threshold: default_stale_threshold(),
        }
    }
}

impl LivenessConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::InvalidDuration("liveness.heartbeat_interval"));
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::InvalidDuration("liveness.sweep_interval"));
        }
        if self.stale_threshold <= self.heartbeat_interval {
            return Err(ConfigError::InvalidDuration("liveness.stale_threshold"));
        }
        Ok(())
    }
}

/// Settings for one test run on one worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Period of partial result flushes
    #[serde(default = "default_flush_interval", with = "humantime_serde")]
    pub flush_interval: Duration,

    /// Pause after each request of a virtual user
    #[serde(default = "default_pacing_interval", with = "humantime_serde")]
    pub pacing_interval: Duration,

    /// Upper bound on a single target request
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Capacity of the result channel (virtual users -> aggregator)
    #[serde(default = "default_result_buffer")]
    pub result_buffer: usize,

    /// Largest virtual user count a worker accepts from a test record
    #[serde(default = "default_max_virtual_users")]
    pub max_virtual_users: u32,
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_pacing_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_result_buffer() -> usize {
    50
}

fn default_max_virtual_users() -> u32 {
    i16::MAX as u32
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            flush_interval: default_flush_interval(),
            pacing_interval: default_pacing_interval(),
            request_timeout: default_request_timeout(),
            result_buffer: default_result_buffer(),
            max_virtual_users: default_max_virtual_users(),
        }
    }
}

impl RunConfig {
    /// Set the flush interval
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Set the pacing interval
    pub fn with_pacing_interval(mut self, interval: Duration) -> Self {
        self.pacing_interval = interval;
        self
    }

    /// Set the request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the result channel capacity
    pub fn with_result_buffer(mut self, size: usize) -> Self {
        self.result_buffer = size;
        self
    }

    /// Set the virtual user limit
    pub fn with_max_virtual_users(mut self, max: u32) -> Self {
        self.max_virtual_users = max;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flush_interval.is_zero() {
            return Err(ConfigError::InvalidDuration("run.flush_interval"));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidDuration("run.request_timeout"));
        }
        if self.result_buffer == 0 {
            return Err(ConfigError::InvalidBuffer("run.result_buffer"));
        }
        if self.max_virtual_users == 0 {
            return Err(ConfigError::InvalidBuffer("run.max_virtual_users"));
        }
        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid namespace
    #[error("Invalid namespace: {0}")]
    InvalidNamespace(String),

    /// A duration that must be positive (or ordered) is not
    #[error("Invalid duration: {0}")]
    InvalidDuration(&'static str),

    /// A buffer size that must be positive is zero
    #[error("Invalid buffer size: {0}")]
    InvalidBuffer(&'static str),

    /// Configuration file could not be read
    #[error("Cannot read config: {0}")]
    Read(String),

    /// Configuration file is not valid JSON for this schema
    #[error("Cannot parse config: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = HammerConfig::default();
        assert_eq!(config.namespace, "lt");
        assert_eq!(config.lease_buffer, Duration::from_secs(1800));
        assert_eq!(config.liveness.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(config.liveness.sweep_interval, Duration::from_secs(10));
        assert_eq!(config.liveness.stale_threshold, Duration::from_secs(30));
        assert_eq!(config.run.flush_interval, Duration::from_secs(5));
        assert_eq!(config.run.pacing_interval, Duration::from_secs(1));
        assert_eq!(config.run.result_buffer, 50);
        assert_eq!(config.run.max_virtual_users, 32767);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder_pattern() {
        let config = HammerConfig::default()
            .with_namespace("staging")
            .with_lease_buffer(Duration::from_secs(60))
            .with_run(RunConfig::default().with_result_buffer(10));

        assert_eq!(config.namespace, "staging");
        assert_eq!(config.lease_buffer, Duration::from_secs(60));
        assert_eq!(config.run.result_buffer, 10);
    }

    #[test]
    fn test_config_validation_namespace() {
        assert!(HammerConfig::default().with_namespace("").validate().is_err());
        assert!(HammerConfig::default().with_namespace("a/b").validate().is_err());
        assert!(HammerConfig::default().with_namespace("/lt/").validate().is_ok());
    }

    #[test]
    fn test_config_validation_stale_threshold() {
        let config = HammerConfig::default().with_liveness(LivenessConfig {
            heartbeat_interval: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(10),
            stale_threshold: Duration::from_secs(30),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_buffer() {
        let config = HammerConfig::default().with_run(RunConfig::default().with_result_buffer(0));
        assert!(config.validate().is_err());

        let config =
            HammerConfig::default().with_run(RunConfig::default().with_max_virtual_users(0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_humantime_durations() {
        let raw = r#"{
            "namespace": "perf",
            "lease_buffer": "10m",
            "liveness": {"heartbeat_interval": "5s"},
            "run": {"flush_interval": "2s", "result_buffer": 100}
        }"#;
        let config: HammerConfig = serde_json::from_str(raw).unwrap();

        assert_eq!(config.namespace, "perf");
        assert_eq!(config.lease_buffer, Duration::from_secs(600));
        assert_eq!(config.liveness.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.liveness.stale_threshold, Duration::from_secs(30));
        assert_eq!(config.run.flush_interval, Duration::from_secs(2));
        assert_eq!(config.run.pacing_interval, Duration::from_secs(1));
        assert_eq!(config.run.result_buffer, 100);
    }

    #[test]
    fn test_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"namespace": "filecfg"}}"#).unwrap();

        let config = HammerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.namespace, "filecfg");
        assert_eq!(config.run, RunConfig::default());
    }

    #[test]
    fn test_config_from_file_rejects_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"run": {{"result_buffer": 0}}}}"#).unwrap();
        assert!(matches!(
            HammerConfig::from_file(file.path()),
            Err(ConfigError::InvalidBuffer(_))
        ));

        assert!(matches!(
            HammerConfig::from_file("/nonexistent/hammer.json"),
            Err(ConfigError::Read(_))
        ));
    }
}
