//! Virtual user execution loop

use crate::model::{TestResult, TestTarget, FAILED_STATUS};
use crate::traits::TargetClient;

use super::stats::VirtualUserStats;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// One concurrent unit of load: request -> report -> pace -> repeat
///
/// Virtual users share the target list and client via Arc and report
/// through the run's bounded result channel. A full channel blocks the
/// virtual user, which is the run's only backpressure.
pub struct VirtualUser {
    /// Index within the run
    id: usize,

    /// Target transport (shared across virtual users)
    client: Arc<dyn TargetClient>,

    /// Ordered targets of the test
    targets: Arc<Vec<TestTarget>>,

    /// Result channel to the run's aggregator
    results_tx: mpsc::Sender<TestResult>,

    /// Pause after each request
    pacing: Duration,

    /// Upper bound on one request
    request_timeout: Duration,
}

impl VirtualUser {
    /// Create a new virtual user
    ///
    /// Use `VirtualUserBuilder` for a more ergonomic construction.
    pub fn new(
        id: usize,
        client: Arc<dyn TargetClient>,
        targets: Arc<Vec<TestTarget>>,
        results_tx: mpsc::Sender<TestResult>,
        pacing: Duration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            id,
            client,
            targets,
            results_tx,
            pacing,
            request_timeout,
        }
    }

    /// Run until cancelled or until the result channel closes
    ///
    /// The cancellation signal is checked once per pass over the targets; a
    /// dropped sender counts as cancellation.
    pub async fn run(self, mut cancel: oneshot::Receiver<()>) -> VirtualUserStats {
        let mut stats = VirtualUserStats::new();
        stats.start();

        tracing::debug!(virtual_user = self.id, "Virtual user started");

        'outer: loop {
            match cancel.try_recv() {
                Ok(()) | Err(TryRecvError::Closed) => {
                    tracing::debug!(virtual_user = self.id, "Virtual user cancelled");
                    break;
                }
                Err(TryRecvError::Empty) => {}
            }

            if self.targets.is_empty() {
                // Nothing to request: wait for the cancellation instead of spinning
                let _ = (&mut cancel).await;
                break;
            }

            for target in self.targets.iter() {
                let result = self.execute_one(target).await;
                stats.record(&result);

                if self.results_tx.send(result).await.is_err() {
                    tracing::debug!(
                        virtual_user = self.id,
                        "Result channel closed, virtual user stopping"
                    );
                    break 'outer;
                }

                tokio::time::sleep(self.pacing).await;
            }
        }

        stats.stop();
        tracing::debug!(
            virtual_user = self.id,
            requests = stats.requests,
            failures = stats.failures,
            elapsed_ms = ?stats.elapsed().map(|d| d.as_millis()),
            "Virtual user finished"
        );

        stats
    }

    /// Issue one request and time it
    ///
    /// Transport errors and timeouts yield [`FAILED_STATUS`].
    async fn execute_one(&self, target: &TestTarget) -> TestResult {
        let start = Instant::now();
        let outcome = tokio::time::timeout(self.request_timeout, self.client.execute(target)).await;
        let elapsed = start.elapsed();

        let status_code = match outcome {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                tracing::debug!(
                    virtual_user = self.id,
                    target = %target.id(),
                    error = %e,
                    "Request failed"
                );
                FAILED_STATUS
            }
            Err(_) => {
                tracing::debug!(
                    virtual_user = self.id,
                    target = %target.id(),
                    timeout = ?self.request_timeout,
                    "Request timed out"
                );
                FAILED_STATUS
            }
        };

        TestResult {
            target: target.id(),
            status_code,
            response_time: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Get the virtual user index
    pub fn id(&self) -> usize {
        self.id
    }
}

impl std::fmt::Debug for VirtualUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualUser")
            .field("id", &self.id)
            .field("client", &self.client.client_name())
            .field("targets", &self.targets.len())
            .field("pacing", &self.pacing)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}
