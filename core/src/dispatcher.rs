//! Watch-driven dispatch of tests to this worker

use crate::config::{HammerConfig, RunConfig};
use crate::error::HammerError;
use crate::keys::KeyKind;
use crate::liveness::ServerId;
use crate::orchestrator::{RunSummary, TestRunBuilder};
use crate::registry::{decode_record, TestRegistry};
use crate::traits::{KeyValue, TargetClient, WatchEvent};
use crate::model::Test;

use dashmap::DashSet;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Outcome of handling one watch event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// A run was started
    Started,
    /// The test is not assigned to this worker
    NotAssigned,
    /// A run for this test already happened or is in progress
    Duplicate,
    /// The record could not be decoded or turned into a run
    Rejected,
    /// The record was deleted and its guard released
    Released,
    /// Nothing to do
    Ignored,
}

/// Watches `/<ns>/test/` and starts a [`TestRun`](crate::orchestrator::TestRun)
/// for every test assigned to this worker
///
/// At most one run per test record is started: the record key is held in an
/// in-flight set until the substrate reports its deletion.
pub struct Dispatcher {
    server_id: ServerId,
    registry: TestRegistry,
    client: Arc<dyn TargetClient>,
    run: RunConfig,
    retry_delay: Duration,
    in_flight: Arc<DashSet<String>>,
    reports: Option<mpsc::UnboundedSender<RunSummary>>,
}

impl Dispatcher {
    /// Create a dispatcher for the worker `server_id`
    pub fn new(
        server_id: ServerId,
        registry: TestRegistry,
        client: Arc<dyn TargetClient>,
        config: &HammerConfig,
    ) -> Self {
        Self {
            server_id,
            registry,
            client,
            run: config.run.clone(),
            retry_delay: config.watch_retry_delay,
            in_flight: Arc::new(DashSet::new()),
            reports: None,
        }
    }

    /// Send the summary of every finished run to `tx`
    pub fn with_run_reports(mut self, tx: mpsc::UnboundedSender<RunSummary>) -> Self {
        self.reports = Some(tx);
        self
    }

    /// Identity this dispatcher matches tests against
    pub fn server_id(&self) -> &ServerId {
        &self.server_id
    }

    /// Number of test records currently guarded
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Watch for tests until shutdown, re-subscribing whenever the watch
    /// stream ends or cannot be opened
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let prefix = self.registry.keys().tests();
        tracing::info!(server_id = %self.server_id, prefix = %prefix, "Dispatcher started");

        loop {
            match self.registry.store().watch(&prefix).await {
                Ok(mut events) => {
                    tracing::debug!(prefix = %prefix, "Watching for tests");
                    self.catch_up(&prefix, &shutdown).await;
                    loop {
                        tokio::select! {
                            biased;

                            _ = shutdown.recv() => {
                                tracing::info!(server_id = %self.server_id, "Dispatcher received shutdown signal");
                                return;
                            }

                            event = events.next() => match event {
                                Some(event) => {
                                    self.handle_event(event, &shutdown);
                                }
                                None => {
                                    tracing::warn!(prefix = %prefix, "Watch stream ended, resubscribing");
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(prefix = %prefix, error = %e, "Failed to watch tests");
                }
            }

            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    tracing::info!(server_id = %self.server_id, "Dispatcher received shutdown signal");
                    return;
                }

                _ = tokio::time::sleep(self.retry_delay) => {}
            }
        }
    }

    /// Dispatch records written while no watch was open
    ///
    /// Runs after every successful subscribe. Records also delivered by the
    /// new watch are caught by the in-flight guard.
    async fn catch_up(&self, prefix: &str, shutdown: &broadcast::Receiver<()>) -> usize {
        let entries = match self.registry.store().get_prefix(prefix).await {
            Ok(entries) => entries,
            Err(e) => {
                let e = HammerError::from(e);
                if e.is_transient() {
                    tracing::warn!(prefix = %prefix, error = %e, "Cannot list existing tests, relying on the watch");
                } else {
                    tracing::error!(prefix = %prefix, error = %e, "Listing existing tests rejected");
                }
                return 0;
            }
        };

        let started = entries
            .into_iter()
            .map(|kv| self.handle_event(WatchEvent::Put(kv), shutdown))
            .filter(|outcome| *outcome == Dispatch::Started)
            .count();
        if started > 0 {
            tracing::info!(started, "Started runs for existing tests");
        }
        started
    }

    /// React to one watch event
    pub fn handle_event(&self, event: WatchEvent, shutdown: &broadcast::Receiver<()>) -> Dispatch {
        match event {
            WatchEvent::Delete { key } => {
                if self.in_flight.remove(&key).is_some() {
                    tracing::debug!(key = %key, "Test record deleted, guard released");
                    Dispatch::Released
                } else {
                    Dispatch::Ignored
                }
            }
            WatchEvent::Put(kv) => self.dispatch(kv, shutdown),
        }
    }

    fn dispatch(&self, kv: KeyValue, shutdown: &broadcast::Receiver<()>) -> Dispatch {
        let Some(mut test) = decode_record::<Test>(&kv) else {
            return Dispatch::Rejected;
        };
        if test.lease.is_empty() {
            if let KeyKind::Test(lease) = self.registry.keys().classify(&kv.key) {
                test.lease = lease.to_string();
            }
        }

        if !test.is_assigned_to(self.server_id.as_str()) {
            tracing::debug!(test = %test.lease, "Test not assigned to this worker");
            return Dispatch::NotAssigned;
        }

        if !self.in_flight.insert(kv.key.clone()) {
            tracing::debug!(test = %test.lease, "Duplicate delivery ignored");
            return Dispatch::Duplicate;
        }

        let run = TestRunBuilder::new(test)
            .server_id(self.server_id.clone())
            .client(Arc::clone(&self.client))
            .registry(self.registry.clone())
            .run_config(self.run.clone())
            .shutdown(shutdown.resubscribe())
            .build();

        match run {
            Ok(run) => {
                self.spawn_run(run.test().lease.clone(), run.run());
                Dispatch::Started
            }
            Err(e) => {
                tracing::warn!(key = %kv.key, error = %e, "Cannot start test run");
                self.in_flight.remove(&kv.key);
                Dispatch::Rejected
            }
        }
    }

    fn spawn_run<F>(&self, lease: String, run: F) -> JoinHandle<()>
    where
        F: std::future::Future<Output = crate::error::HammerResult<RunSummary>> + Send + 'static,
    {
        let reports = self.reports.clone();
        tokio::spawn(async move {
            match run.await {
                Ok(summary) => {
                    if let Some(reports) = reports {
                        let _ = reports.send(summary);
                    }
                }
                Err(e) => {
                    tracing::error!(test = %lease, error = %e, "Test run failed");
                }
            }
        })
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("server_id", &self.server_id)
            .field("client", &self.client.client_name())
            .field("in_flight", &self.in_flight.len())
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}
