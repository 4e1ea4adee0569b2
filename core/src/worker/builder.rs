//! Builder pattern for VirtualUser construction

use crate::config::RunConfig;
use crate::error::{HammerError, HammerResult};
use crate::model::{TestResult, TestTarget};
use crate::traits::TargetClient;

use super::executor::VirtualUser;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Builder for creating VirtualUser instances
///
/// Pacing and request timeout default to [`RunConfig::default`].
///
/// # Example
/// ```ignore
/// let vu = VirtualUserBuilder::new(0)
///     .client(client)
///     .targets(targets)
///     .results_tx(tx)
///     .run_config(&config.run)
///     .build()?;
/// ```
pub struct VirtualUserBuilder {
    id: usize,
    client: Option<Arc<dyn TargetClient>>,
    targets: Option<Arc<Vec<TestTarget>>>,
    results_tx: Option<mpsc::Sender<TestResult>>,
    pacing: Duration,
    request_timeout: Duration,
}

impl VirtualUserBuilder {
    /// Create a new builder with the given virtual user index
    pub fn new(id: usize) -> Self {
        let defaults = RunConfig::default();
        Self {
            id,
            client: None,
            targets: None,
            results_tx: None,
            pacing: defaults.pacing_interval,
            request_timeout: defaults.request_timeout,
        }
    }

    /// Set the target client
    pub fn client(mut self, client: Arc<dyn TargetClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the targets
    pub fn targets(mut self, targets: Arc<Vec<TestTarget>>) -> Self {
        self.targets = Some(targets);
        self
    }

    /// Set the result channel sender
    pub fn results_tx(mut self, tx: mpsc::Sender<TestResult>) -> Self {
        self.results_tx = Some(tx);
        self
    }

    /// Set the pause after each request
    pub fn pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    /// Set the per-request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Take pacing and request timeout from a run configuration
    pub fn run_config(self, config: &RunConfig) -> Self {
        self.pacing(config.pacing_interval)
            .request_timeout(config.request_timeout)
    }

    /// Build the VirtualUser
    ///
    /// # Errors
    /// Returns an error if any required field is missing.
    pub fn build(self) -> HammerResult<VirtualUser> {
        let client = self.client.ok_or(HammerError::missing_field("client"))?;
        let targets = self.targets.ok_or(HammerError::missing_field("targets"))?;
        let results_tx = self
            .results_tx
            .ok_or(HammerError::missing_field("results_tx"))?;

        Ok(VirtualUser::new(
            self.id,
            client,
            targets,
            results_tx,
            self.pacing,
            self.request_timeout,
        ))
    }
}
