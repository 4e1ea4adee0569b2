//! Test run execution logic

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;

use crate::config::RunConfig;
use crate::error::HammerResult;
use crate::liveness::ServerId;
use crate::model::{ResultData, Test, TestResult};
use crate::registry::TestRegistry;
use crate::traits::{LeaseId, TargetClient};
use crate::worker::{VirtualUserBuilder, VirtualUserStats};

use super::aggregator::ResultAccumulator;

/// Outcome of one run on one worker
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Test id (lease hex)
    pub lease: String,

    /// Virtual users started
    pub virtual_users: u32,

    /// Cancellation signals sent (one per virtual user)
    pub cancellations_sent: usize,

    /// Flush cycles attempted, final one included
    pub flushes: usize,

    /// Flush cycles that wrote a result record
    pub published: usize,

    /// Flush cycles skipped because a target had no observations
    pub skipped: usize,

    /// Raw results consumed by the aggregator
    pub results_received: u64,

    /// Merged virtual user counters
    pub stats: VirtualUserStats,

    /// Last record written for this run
    pub last_published: Option<ResultData>,

    /// Whether the run ended on the shutdown signal rather than its length
    pub stopped_early: bool,
}

/// Executes one test on this worker: virtual users plus the aggregator loop
///
/// Owns the result channel and the accumulator; both are dropped when the
/// run returns.
pub struct TestRun {
    /// Test being executed (with headers)
    pub(crate) test: Test,

    /// Lease the test and its results are bound to
    pub(crate) lease: LeaseId,

    /// Identity of this worker
    pub(crate) server_id: ServerId,

    /// Target transport (shared across virtual users)
    pub(crate) client: Arc<dyn TargetClient>,

    /// Where results are published
    pub(crate) registry: TestRegistry,

    /// Timing and buffer settings
    pub(crate) run: RunConfig,

    /// Optional process-wide shutdown signal
    pub(crate) shutdown: Option<broadcast::Receiver<()>>,
}

impl TestRun {
    /// Get the test being executed
    pub fn test(&self) -> &Test {
        &self.test
    }

    /// Run for the test's length, then cancel every virtual user and flush
    /// one last time
    pub async fn run(mut self) -> HammerResult<RunSummary> {
        let length = Duration::from_secs(u64::from(self.test.length));
        let lease_hex = self.lease.to_hex();
        let mut summary = RunSummary {
            lease: lease_hex.clone(),
            virtual_users: self.test.virtual_users,
            ..Default::default()
        };

        tracing::info!(
            test = %lease_hex,
            server_id = %self.server_id,
            virtual_users = self.test.virtual_users,
            length_secs = self.test.length,
            targets = self.test.targets.len(),
            "Starting test run"
        );

        let (results_tx, mut results_rx) = mpsc::channel::<TestResult>(self.run.result_buffer);
        let targets = Arc::new(self.test.targets.clone());
        let mut cancels = Vec::with_capacity(self.test.virtual_users as usize);
        let mut handles = Vec::with_capacity(self.test.virtual_users as usize);

        for id in 0..self.test.virtual_users as usize {
            let vu = VirtualUserBuilder::new(id)
                .client(Arc::clone(&self.client))
                .targets(Arc::clone(&targets))
                .results_tx(results_tx.clone())
                .run_config(&self.run)
                .build()?;
            let (cancel_tx, cancel_rx) = oneshot::channel();
            cancels.push(cancel_tx);
            handles.push(tokio::spawn(vu.run(cancel_rx)));
        }
        // Only virtual users hold senders from here on
        drop(results_tx);

        let mut accumulator = ResultAccumulator::new();
        let mut flush =
            tokio::time::interval_at(Instant::now() + self.run.flush_interval, self.run.flush_interval);
        let deadline = tokio::time::sleep(length);
        tokio::pin!(deadline);
        let mut shutdown = self.shutdown.take();

        loop {
            tokio::select! {
                biased;

                _ = &mut deadline => {
                    tracing::debug!(test = %lease_hex, "Test length reached");
                    break;
                }

                _ = wait_for_shutdown(&mut shutdown) => {
                    tracing::info!(test = %lease_hex, "Test run interrupted by shutdown");
                    summary.stopped_early = true;
                    break;
                }

                _ = flush.tick() => {
                    self.flush(&mut accumulator, &mut summary).await;
                }

                Some(result) = results_rx.recv() => {
                    accumulator.record(result);
                }
            }
        }

        for cancel in cancels {
            // A virtual user that already exited has dropped its receiver
            let _ = cancel.send(());
            summary.cancellations_sent += 1;
        }

        self.flush(&mut accumulator, &mut summary).await;
        summary.results_received = accumulator.received();

        // Unblocks virtual users waiting on a full channel
        drop(results_rx);

        for (idx, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(stats) => summary.stats.merge(&stats),
                Err(e) => {
                    tracing::error!(test = %lease_hex, virtual_user = idx, error = %e, "Virtual user task panicked");
                }
            }
        }

        tracing::info!(
            test = %lease_hex,
            requests = summary.stats.requests,
            failures = summary.stats.failures,
            flushes = summary.flushes,
            published = summary.published,
            "Test run finished"
        );

        Ok(summary)
    }

    /// One flush cycle: summarize and publish, or skip
    async fn flush(&self, accumulator: &mut ResultAccumulator, summary: &mut RunSummary) {
        summary.flushes += 1;

        let Some(data) = accumulator.snapshot(self.server_id.as_str(), &summary.lease) else {
            summary.skipped += 1;
            return;
        };

        match self.registry.publish_results(self.lease, &data).await {
            Ok(()) => {
                tracing::debug!(
                    test = %summary.lease,
                    targets = data.results.len(),
                    received = accumulator.received(),
                    "Published results"
                );
                summary.published += 1;
                summary.last_published = Some(data);
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(test = %summary.lease, error = %e, "Failed to publish results, retrying next cycle");
            }
            Err(e) => {
                tracing::error!(test = %summary.lease, error = %e, "Results rejected by the store");
            }
        }
    }
}

async fn wait_for_shutdown(shutdown: &mut Option<broadcast::Receiver<()>>) {
    match shutdown {
        Some(rx) => {
            let _ = rx.recv().await;
        }
        None => std::future::pending::<()>().await,
    }
}

impl std::fmt::Debug for TestRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestRun")
            .field("lease", &self.lease)
            .field("server_id", &self.server_id)
            .field("client", &self.client.client_name())
            .field("virtual_users", &self.test.virtual_users)
            .field("length", &self.test.length)
            .field("run", &self.run)
            .finish()
    }
}
