//! Orchestration Jobs
//!
//! Bulk start on boot and bulk stop on shutdown. A failing entry is logged
//! and skipped; it never blocks the rest of the batch.

use crate::application::listener_registry::ListenOptions;
use crate::application::sync_engine::SyncEngine;
use crate::domain::entities::ExternalServer;
use crate::domain::errors::SyncError;
use crate::domain::value_objects::ServerStatus;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Default number of stop calls in flight during auto-stop.
pub const DEFAULT_AUTO_STOP_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Default)]
pub struct AutoStartConfig {
    pub enabled: bool,
    /// Queries resolved against the server list
    pub servers: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AutoStopConfig {
    pub enabled: bool,
    pub servers: Vec<String>,
    /// Upper bound on concurrent stop calls
    pub concurrency: usize,
}

impl Default for AutoStopConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            servers: Vec::new(),
            concurrency: DEFAULT_AUTO_STOP_CONCURRENCY,
        }
    }
}

/// What auto-start did with each configured entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AutoStartReport {
    /// Start was requested
    pub started: Vec<String>,
    /// Already online or on its way; only watched
    pub watching: Vec<String>,
    /// Not found or in a status that cannot be started
    pub skipped: Vec<String>,
    /// Errored
    pub failed: Vec<String>,
}

enum StartStep {
    Started,
    Watching,
    Skipped,
}

pub struct Orchestrator {
    engine: Arc<SyncEngine>,
    auto_start: AutoStartConfig,
    auto_stop: AutoStopConfig,
}

impl Orchestrator {
    pub fn new(engine: Arc<SyncEngine>, auto_start: AutoStartConfig, auto_stop: AutoStopConfig) -> Self {
        Self {
            engine,
            auto_start,
            auto_stop,
        }
    }

    /// Start every configured server that is stopped, one after the other.
    ///
    /// Start requests are not awaited beyond the API call; backends get
    /// registered by the sync worker once the servers report ONLINE.
    pub async fn run_auto_start(&self) -> AutoStartReport {
        let mut report = AutoStartReport::default();
        if !self.auto_start.enabled {
            return report;
        }

        for query in &self.auto_start.servers {
            match self.auto_start_one(query).await {
                Ok(StartStep::Started) => report.started.push(query.clone()),
                Ok(StartStep::Watching) => report.watching.push(query.clone()),
                Ok(StartStep::Skipped) => report.skipped.push(query.clone()),
                Err(e) => {
                    tracing::error!("failed to auto-start {}: {}", query, e);
                    report.failed.push(query.clone());
                }
            }
        }

        tracing::info!(
            "auto-start: {} started, {} watching, {} skipped, {} failed",
            report.started.len(),
            report.watching.len(),
            report.skipped.len(),
            report.failed.len()
        );
        report
    }

    async fn auto_start_one(&self, query: &str) -> Result<StartStep, SyncError> {
        let server = match self.engine.resolve(query, false).await {
            Ok(server) => server,
            Err(SyncError::NotFound(_)) => {
                tracing::warn!("auto-start: server {} not found", query);
                return Ok(StartStep::Skipped);
            }
            Err(e) => return Err(e),
        };

        match server.status {
            ServerStatus::Online => {
                let handle = self.engine.listen(&server, ListenOptions::new()).await?;
                let name = handle.name_for(&server);
                match self.engine.attach(name, server).await {
                    Ok(_) => Ok(StartStep::Watching),
                    Err(e) if e.is_reconcile_warning() => Ok(StartStep::Watching),
                    Err(e) => Err(e),
                }
            }
            status if status.is_starting() => {
                tracing::info!("auto-start: {} is already {}", server.name, status);
                self.engine.listen(&server, ListenOptions::new()).await?;
                Ok(StartStep::Watching)
            }
            status if !status.is_stopped() => {
                tracing::warn!("auto-start: cannot start {} while it is {}", server.name, status);
                Ok(StartStep::Skipped)
            }
            _ => {
                self.engine.listen(&server, ListenOptions::new()).await?;
                self.engine.api().start(&server.id).await?;
                tracing::info!("auto-start: starting {} ({})", server.name, server.id);
                Ok(StartStep::Started)
            }
        }
    }

    /// Stop every configured server that is online.
    ///
    /// At most `concurrency` stop calls run at once. Returns how many stops
    /// succeeded. Cancelling `cancel` aborts the remaining batch, which is
    /// reported once as `Interrupted`.
    pub async fn run_auto_stop(&self, cancel: &CancellationToken) -> Result<usize, SyncError> {
        if !self.auto_stop.enabled {
            return Ok(0);
        }

        // Stop decisions need the current state, not a cached one
        self.engine.cache().get(true).await?;

        let mut targets = Vec::new();
        for query in &self.auto_stop.servers {
            let server = match self.engine.resolve(query, false).await {
                Ok(server) => server,
                Err(e) => {
                    tracing::warn!("auto-stop: skipping {}: {}", query, e);
                    continue;
                }
            };

            match server.status {
                ServerStatus::Online => targets.push(server),
                status if status.is_stopped() || status.is_stopping() => {
                    tracing::debug!("auto-stop: {} is already {}", server.name, status);
                }
                status => {
                    tracing::error!("auto-stop: cannot stop {} while it is {}", server.name, status);
                }
            }
        }

        let total = targets.len();
        let mut queued = targets.into_iter();
        let mut in_flight = FuturesUnordered::new();
        let mut stopped = 0;

        for server in queued.by_ref().take(self.auto_stop.concurrency.max(1)) {
            in_flight.push(self.stop_one(server));
        }

        while !in_flight.is_empty() {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    let remaining = in_flight.len() + queued.len();
                    tracing::warn!(
                        "auto-stop interrupted: {} of {} stops done, {} abandoned",
                        stopped,
                        total,
                        remaining
                    );
                    return Err(SyncError::Interrupted(format!(
                        "auto-stop cancelled with {} stops outstanding",
                        remaining
                    )));
                }

                Some(result) = in_flight.next() => {
                    match result {
                        Ok(name) => {
                            tracing::info!("auto-stop: stopped {}", name);
                            stopped += 1;
                        }
                        Err(e) => tracing::error!("auto-stop: {}", e),
                    }

                    if let Some(server) = queued.next() {
                        in_flight.push(self.stop_one(server));
                    }
                }
            }
        }

        tracing::info!("auto-stop: stopped {} of {} servers", stopped, total);
        Ok(stopped)
    }

    async fn stop_one(&self, server: ExternalServer) -> Result<String, SyncError> {
        self.engine.api().stop(&server.id).await?;
        Ok(server.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::testing::{server, spawn_engine, MockDirectory, MockHostingApi};
    use crate::domain::entities::Backend;
    use crate::domain::ports::{BackendDirectory, HostingApi};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn orchestrator(
        api: Arc<dyn HostingApi>,
        directory: Arc<MockDirectory>,
        start: &[&str],
        stop: &[&str],
        shutdown: &CancellationToken,
    ) -> Orchestrator {
        let engine = spawn_engine(api, directory, shutdown);
        Orchestrator::new(
            engine,
            AutoStartConfig {
                enabled: true,
                servers: start.iter().map(|s| s.to_string()).collect(),
            },
            AutoStopConfig {
                enabled: true,
                servers: stop.iter().map(|s| s.to_string()).collect(),
                concurrency: 2,
            },
        )
    }

    /// Stops take a while and never overlap more than the window allows.
    #[derive(Default)]
    struct SlowStopApi {
        servers: Vec<ExternalServer>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        hang: bool,
    }

    #[async_trait]
    impl HostingApi for SlowStopApi {
        async fn list_servers(&self) -> Result<Vec<ExternalServer>, SyncError> {
            Ok(self.servers.clone())
        }

        async fn start(&self, _server_id: &str) -> Result<(), SyncError> {
            Ok(())
        }

        async fn stop(&self, _server_id: &str) -> Result<(), SyncError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }

        async fn restart(&self, _server_id: &str) -> Result<(), SyncError> {
            Ok(())
        }
    }

    // ===== Auto-Start Tests =====

    #[tokio::test]
    async fn test_auto_start_classifies_entries() {
        let api = Arc::new(MockHostingApi::with_servers(vec![
            server("a1", "lobby", ServerStatus::Offline),
            server("b2", "arena", ServerStatus::Online),
            server("c3", "build", ServerStatus::Loading),
            server("d4", "event", ServerStatus::Saving),
            server("e5", "creative", ServerStatus::Crashed),
        ]));
        let directory = Arc::new(MockDirectory::default());
        let shutdown = CancellationToken::new();
        let orchestrator = orchestrator(
            api.clone(),
            directory.clone(),
            &["lobby", "arena", "build", "event", "creative", "missing"],
            &[],
            &shutdown,
        );

        let report = orchestrator.run_auto_start().await;

        assert_eq!(report.started, vec!["lobby", "creative"]);
        assert_eq!(report.watching, vec!["arena", "build"]);
        assert_eq!(report.skipped, vec!["event", "missing"]);
        assert!(report.failed.is_empty());
        assert_eq!(*api.started.lock(), vec!["a1".to_string(), "e5".to_string()]);
        assert_eq!(directory.names(), vec!["arena".to_string()]);

        let registry = orchestrator.engine.registry();
        assert!(registry.contains("a1"));
        assert!(registry.contains("c3"));
        assert!(!registry.contains("d4"));
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_auto_start_online_with_taken_name_still_watches() {
        let api = Arc::new(MockHostingApi::with_servers(vec![server(
            "b2",
            "arena",
            ServerStatus::Online,
        )]));
        let directory = Arc::new(MockDirectory::with_backends(vec![Backend::new(
            "arena", "10.0.0.9", 25565,
        )]));
        let shutdown = CancellationToken::new();
        let orchestrator = orchestrator(api, directory.clone(), &["arena"], &[], &shutdown);

        let report = orchestrator.run_auto_start().await;

        assert_eq!(report.watching, vec!["arena"]);
        assert_eq!(directory.get("arena").await.unwrap().host, "10.0.0.9");
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_auto_start_disabled_does_nothing() {
        let api = Arc::new(MockHostingApi::with_servers(vec![server(
            "a1",
            "lobby",
            ServerStatus::Offline,
        )]));
        let shutdown = CancellationToken::new();
        let engine = spawn_engine(api.clone(), Arc::new(MockDirectory::default()), &shutdown);
        let orchestrator = Orchestrator::new(
            engine,
            AutoStartConfig {
                enabled: false,
                servers: vec!["lobby".to_string()],
            },
            AutoStopConfig::default(),
        );

        assert_eq!(orchestrator.run_auto_start().await, AutoStartReport::default());
        assert_eq!(api.list_calls(), 0);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_auto_start_api_failure_marks_all_failed() {
        let api = Arc::new(MockHostingApi::default());
        api.fail_list.store(true, Ordering::SeqCst);
        let shutdown = CancellationToken::new();
        let orchestrator = orchestrator(
            api,
            Arc::new(MockDirectory::default()),
            &["lobby", "arena"],
            &[],
            &shutdown,
        );

        let report = orchestrator.run_auto_start().await;
        assert_eq!(report.failed, vec!["lobby", "arena"]);
        shutdown.cancel();
    }

    // ===== Auto-Stop Tests =====

    #[tokio::test]
    async fn test_auto_stop_counts_successes_only() {
        let api = Arc::new(MockHostingApi::with_servers(vec![
            server("a1", "lobby", ServerStatus::Online),
            server("b2", "arena", ServerStatus::Online),
            server("c3", "build", ServerStatus::Online),
            server("d4", "event", ServerStatus::Offline),
            server("e5", "creative", ServerStatus::Stopping),
            server("f6", "minigames", ServerStatus::Starting),
        ]));
        api.failing_stops.lock().insert("b2".to_string());
        let shutdown = CancellationToken::new();
        let orchestrator = orchestrator(
            api.clone(),
            Arc::new(MockDirectory::default()),
            &[],
            &["lobby", "arena", "build", "event", "creative", "minigames", "missing"],
            &shutdown,
        );

        let stopped = orchestrator
            .run_auto_stop(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stopped, 2);
        let mut ids = api.stopped.lock().clone();
        ids.sort();
        assert_eq!(ids, vec!["a1".to_string(), "c3".to_string()]);
        shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_stop_bounds_concurrency() {
        let api = Arc::new(SlowStopApi {
            servers: (0..5)
                .map(|i| server(&format!("s{}", i), &format!("node{}", i), ServerStatus::Online))
                .collect(),
            ..SlowStopApi::default()
        });
        let shutdown = CancellationToken::new();
        let orchestrator = orchestrator(
            api.clone(),
            Arc::new(MockDirectory::default()),
            &[],
            &["node0", "node1", "node2", "node3", "node4"],
            &shutdown,
        );

        let stopped = orchestrator
            .run_auto_stop(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stopped, 5);
        assert_eq!(api.max_in_flight.load(Ordering::SeqCst), 2);
        shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_stop_cancel_interrupts_batch() {
        let api = Arc::new(SlowStopApi {
            servers: vec![
                server("a1", "lobby", ServerStatus::Online),
                server("b2", "arena", ServerStatus::Online),
                server("c3", "build", ServerStatus::Online),
            ],
            hang: true,
            ..SlowStopApi::default()
        });
        let shutdown = CancellationToken::new();
        let orchestrator = orchestrator(
            api,
            Arc::new(MockDirectory::default()),
            &[],
            &["lobby", "arena", "build"],
            &shutdown,
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = orchestrator.run_auto_stop(&cancel).await.unwrap_err();

        assert_eq!(
            err,
            SyncError::Interrupted("auto-stop cancelled with 3 stops outstanding".to_string())
        );
        shutdown.cancel();
    }
}
