//! Long-running roles: worker, coordinator and the single-process standalone mode

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use hammer_client::{HttpConfig, HttpTargetClient};
use hammer_core::{
    CoordinationStore, Dispatcher, HammerConfig, Hub, HubHandle, RegistryBridge, RunSummary,
    ServerId, ServerRegistry, SocketPayload, Subscription, Test, TestRegistry,
};
use hammer_storage::StoreBackend;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use super::{load_test, print_json};

/// Time given to freshly spawned watchers to subscribe before tests are submitted
const STARTUP_GRACE: Duration = Duration::from_millis(100);

/// Broadcast shutdown on Ctrl+C
fn shutdown_on_ctrl_c() -> broadcast::Sender<()> {
    let (tx, _) = broadcast::channel(1);
    let signal_tx = tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl+C, shutting down");
            let _ = signal_tx.send(());
        }
    });
    tx
}

async fn join_all(tasks: Vec<JoinHandle<()>>) {
    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Service task failed");
        }
    }
}

fn spawn_worker(
    store: Arc<dyn CoordinationStore>,
    config: &HammerConfig,
    server_id: ServerId,
    shutdown: &broadcast::Sender<()>,
    reports: Option<mpsc::UnboundedSender<RunSummary>>,
) -> Result<Vec<JoinHandle<()>>> {
    let http = HttpConfig::default().with_request_timeout(config.run.request_timeout);
    let client = HttpTargetClient::new(http).context("failed to build HTTP client")?;

    let heartbeat = ServerRegistry::new(Arc::clone(&store), config);
    let mut dispatcher = Dispatcher::new(
        server_id.clone(),
        TestRegistry::new(store, config),
        Arc::new(client),
        config,
    );
    if let Some(tx) = reports {
        dispatcher = dispatcher.with_run_reports(tx);
    }

    tracing::info!(server_id = %server_id, "Worker starting");
    Ok(vec![
        tokio::spawn(heartbeat.run_heartbeat(server_id, shutdown.subscribe())),
        tokio::spawn(dispatcher.run(shutdown.subscribe())),
    ])
}

async fn spawn_coordinator(
    store: Arc<dyn CoordinationStore>,
    config: &HammerConfig,
    shutdown: &broadcast::Sender<()>,
) -> Result<Vec<JoinHandle<()>>> {
    let sweeper = ServerRegistry::new(Arc::clone(&store), config);
    let (hub, hub_task) = Hub::spawn(&config.fanout, shutdown.subscribe());
    let subscription = hub
        .register()
        .await
        .context("fanout hub stopped during startup")?;
    let bridge = RegistryBridge::new(store, hub.clone(), config);

    tracing::info!(namespace = %config.namespace, "Coordinator starting");
    Ok(vec![
        tokio::spawn(sweeper.run_sweeper(shutdown.subscribe())),
        tokio::spawn(bridge.run(shutdown.subscribe())),
        tokio::spawn(observe(hub, subscription)),
        tokio::spawn(async move {
            if let Ok(stats) = hub_task.await {
                tracing::debug!(
                    delivered = stats.delivered,
                    dropped = stats.dropped,
                    "Fanout hub finished"
                );
            }
        }),
    ])
}

/// Logs every fanout message until the subscription closes
async fn observe(hub: HubHandle, mut subscription: Subscription) {
    while let Some(message) = subscription.recv().await {
        match &message.payload {
            SocketPayload::Test(test) => tracing::info!(
                test = %test.lease,
                state = %test.state,
                virtual_users = test.virtual_users,
                length = test.length,
                "Test updated"
            ),
            SocketPayload::Results(data) => tracing::info!(
                test = %data.lease,
                server_id = %data.server_id,
                targets = data.results.len(),
                "Results published"
            ),
        }
    }
    // Best effort; the hub may already be gone
    let _ = hub.unregister(subscription.id()).await;
}

/// `hammer worker`
pub async fn worker(store: Arc<dyn CoordinationStore>, config: HammerConfig) -> Result<()> {
    let shutdown = shutdown_on_ctrl_c();
    let tasks = spawn_worker(store, &config, ServerId::generate(), &shutdown, None)?;
    join_all(tasks).await;
    Ok(())
}

/// `hammer coordinator`
pub async fn coordinator(store: Arc<dyn CoordinationStore>, config: HammerConfig) -> Result<()> {
    let shutdown = shutdown_on_ctrl_c();
    let tasks = spawn_coordinator(store, &config, &shutdown).await?;
    join_all(tasks).await;
    Ok(())
}

/// Submit tests, assigning `local` to every test without workers
///
/// Returns the ids of the submitted tests and how many of them `local` runs.
pub async fn submit_all(
    registry: &TestRegistry,
    tests: Vec<Test>,
    local: &ServerId,
) -> Result<(Vec<String>, usize)> {
    let mut ids = Vec::with_capacity(tests.len());
    let mut local_runs = 0;

    for mut test in tests {
        if test.servers.is_empty() {
            test = test.with_server(local.as_str());
        }
        if test.is_assigned_to(local.as_str()) {
            local_runs += 1;
        }
        ids.push(registry.create_test(test).await?);
    }
    Ok((ids, local_runs))
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct StandaloneReport {
    #[serde(rename = "ID")]
    id: String,
    test: Option<Test>,
    results: Vec<hammer_core::ResultData>,
}

/// `hammer standalone`
pub async fn standalone(config: HammerConfig, paths: &[PathBuf]) -> Result<()> {
    let tests = paths
        .iter()
        .map(|path| load_test(path))
        .collect::<Result<Vec<_>>>()?;

    let store = hammer_storage::connect(&StoreBackend::Memory)
        .await
        .context("failed to start in-memory store")?;
    let shutdown = shutdown_on_ctrl_c();
    let server_id = ServerId::generate();
    let (reports_tx, mut reports_rx) = mpsc::unbounded_channel();

    let mut tasks = spawn_coordinator(Arc::clone(&store), &config, &shutdown).await?;
    tasks.extend(spawn_worker(
        Arc::clone(&store),
        &config,
        server_id.clone(),
        &shutdown,
        Some(reports_tx),
    )?);
    tokio::time::sleep(STARTUP_GRACE).await;

    let registry = TestRegistry::new(store, &config);
    let (ids, expected) = submit_all(&registry, tests, &server_id).await?;
    tracing::info!(tests = ids.len(), local_runs = expected, "Tests submitted");

    let mut interrupted = shutdown.subscribe();
    let mut finished = 0;
    while finished < expected {
        tokio::select! {
            biased;

            _ = interrupted.recv() => break,

            summary = reports_rx.recv() => match summary {
                Some(summary) => {
                    finished += 1;
                    tracing::info!(
                        test = %summary.lease,
                        requests = summary.stats.requests,
                        failures = summary.stats.failures,
                        published = summary.published,
                        stopped_early = summary.stopped_early,
                        "Run finished"
                    );
                }
                None => break,
            }
        }
    }

    let mut report = Vec::with_capacity(ids.len());
    for id in ids {
        report.push(StandaloneReport {
            test: registry.get_test(&id).await?,
            results: registry.list_results(&id).await?,
            id,
        });
    }
    print_json(&report)?;

    let _ = shutdown.send(());
    join_all(tasks).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hammer_core::{MemoryStore, TestTarget};

    #[tokio::test]
    async fn test_submit_all_assigns_local_worker() {
        let config = HammerConfig::default();
        let registry = TestRegistry::new(Arc::new(MemoryStore::new()), &config);
        let local = ServerId::from("urn:uuid:local");

        let target = TestTarget::new("GET", "http://localhost/");
        let unassigned = Test::new(5, 1).with_target(target.clone());
        let remote = Test::new(5, 1).with_target(target).with_server("urn:uuid:remote");

        let (ids, local_runs) = submit_all(&registry, vec![unassigned, remote], &local)
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(local_runs, 1);

        let first = registry.get_test(&ids[0]).await.unwrap().unwrap();
        assert_eq!(first.servers, vec!["urn:uuid:local".to_string()]);
        let second = registry.get_test(&ids[1]).await.unwrap().unwrap();
        assert_eq!(second.servers, vec!["urn:uuid:remote".to_string()]);
    }
}
