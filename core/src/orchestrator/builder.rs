//! Builder pattern for TestRun construction

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::RunConfig;
use crate::error::{HammerError, HammerResult};
use crate::liveness::ServerId;
use crate::model::Test;
use crate::registry::{parse_test_id, TestRegistry};
use crate::traits::TargetClient;

use super::executor::TestRun;

/// Builder for creating a TestRun with proper configuration
///
/// # Example
///
/// ```ignore
/// let run = TestRunBuilder::new(test)
///     .server_id(server_id)
///     .client(client)
///     .registry(registry)
///     .run_config(config.run.clone())
///     .build()?;
///
/// let summary = run.run().await?;
/// ```
pub struct TestRunBuilder {
    test: Test,
    server_id: Option<ServerId>,
    client: Option<Arc<dyn TargetClient>>,
    registry: Option<TestRegistry>,
    run: RunConfig,
    shutdown: Option<broadcast::Receiver<()>>,
}

impl TestRunBuilder {
    /// Create a builder for the given test record
    pub fn new(test: Test) -> Self {
        Self {
            test,
            server_id: None,
            client: None,
            registry: None,
            run: RunConfig::default(),
            shutdown: None,
        }
    }

    /// Set the identity of the executing worker
    pub fn server_id(mut self, id: ServerId) -> Self {
        self.server_id = Some(id);
        self
    }

    /// Set the target client
    pub fn client(mut self, client: Arc<dyn TargetClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the registry results are published through
    pub fn registry(mut self, registry: TestRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the run configuration
    pub fn run_config(mut self, config: RunConfig) -> Self {
        self.run = config;
        self
    }

    /// End the run early when this signal fires
    pub fn shutdown(mut self, rx: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(rx);
        self
    }

    /// Build the run
    ///
    /// # Errors
    ///
    /// Returns an error if a required field is missing, the run
    /// configuration is invalid, the test asks for more virtual users than
    /// `max_virtual_users`, or the test's lease is not a valid id.
    pub fn build(self) -> HammerResult<TestRun> {
        let server_id = self
            .server_id
            .ok_or_else(|| HammerError::missing_field("server_id"))?;
        let client = self
            .client
            .ok_or_else(|| HammerError::missing_field("client"))?;
        let registry = self
            .registry
            .ok_or_else(|| HammerError::missing_field("registry"))?;

        self.run.validate()?;
        if self.test.virtual_users > self.run.max_virtual_users {
            return Err(HammerError::run(format!(
                "{} virtual users requested, limit is {}",
                self.test.virtual_users, self.run.max_virtual_users
            )));
        }
        let lease = parse_test_id(&self.test.lease)?;

        Ok(TestRun {
            test: self.test,
            lease,
            server_id,
            client,
            registry,
            run: self.run,
            shutdown: self.shutdown,
        })
    }
}
