//! edge-sync - Backend directory sync for on-demand servers
//!
//! This is the composition root that wires together all the components.

use edge_sync::adapters::inbound::{AdminServer, AdminState};
use edge_sync::adapters::outbound::{DashMapBackendDirectory, HttpHostingApi, PollingStatusSource};
use edge_sync::application::{
    event_queue, AutoStartConfig, AutoStopConfig, EngineSettings, Orchestrator, SyncEngine,
};
use edge_sync::config::load_config;
use edge_sync::domain::entities::Backend;
use edge_sync::domain::ports::HostingApi;
use edge_sync::domain::services::ServerResolver;
use edge_sync::infrastructure::{shutdown_signal, ShutdownController};
use std::sync::Arc;
use std::time::Duration;

/// Port assumed for configured servers given without one.
const DEFAULT_BACKEND_PORT: u16 = 25565;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from environment
    let cfg = load_config()?;

    // Setup logging
    let log_level = if cfg.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt().with_max_level(log_level).init();

    cfg.validate()?;

    tracing::info!(
        "starting edge-sync api={} servers={} admin={}",
        cfg.api_url,
        cfg.servers.len(),
        cfg.admin_enabled
    );

    let shutdown = ShutdownController::new();

    // ===== COMPOSITION ROOT =====

    // 1. Create outbound adapters

    // Hosting API (reqwest)
    let api: Arc<dyn HostingApi> = Arc::new(HttpHostingApi::new(
        cfg.api_url.clone(),
        cfg.token(),
        Duration::from_secs(cfg.api_timeout_secs),
    )?);

    // Backend directory (DashMap), seeded with the configured servers
    let directory = Arc::new(DashMapBackendDirectory::with_backends(
        cfg.static_backends(DEFAULT_BACKEND_PORT)
            .into_iter()
            .map(|(name, host, port)| Backend::new(name, host, port)),
    ));

    // Status source (polling), feeding the sync queue
    let (sink, queue) = event_queue(cfg.queue_capacity);
    let status_source = PollingStatusSource::new(api.clone(), Arc::new(sink.clone()));
    let poller = status_source.start(Duration::from_secs(cfg.poll_secs), shutdown.token());

    // 2. Create application services
    let engine = Arc::new(SyncEngine::new(
        api,
        Arc::new(status_source),
        directory,
        ServerResolver::new(cfg.servers.clone()),
        sink,
        EngineSettings {
            cache_ttl: Duration::from_secs(cfg.cache_ttl_secs),
            hosted_domain: cfg.hosted_domain.clone(),
        },
    ));

    let worker = tokio::spawn(
        engine
            .worker(queue, Duration::from_secs(cfg.wait_purge_secs))
            .run(shutdown.token()),
    );

    let orchestrator = Arc::new(Orchestrator::new(
        engine.clone(),
        AutoStartConfig {
            enabled: cfg.auto_start_enabled,
            servers: cfg.auto_start_servers.clone(),
        },
        AutoStopConfig {
            enabled: cfg.auto_stop_enabled,
            servers: cfg.auto_stop_servers.clone(),
            concurrency: cfg.auto_stop_concurrency,
        },
    ));

    if cfg.watch_servers {
        if let Err(e) = engine.watch_servers().await {
            tracing::error!("failed to watch configured servers: {}", e);
        }
    }

    orchestrator.run_auto_start().await;

    // 3. Create inbound adapter
    let admin = if cfg.admin_enabled {
        let server = AdminServer::new(
            cfg.admin_listen_addr.clone(),
            AdminState {
                engine: engine.clone(),
                orchestrator: orchestrator.clone(),
                shutdown: shutdown.token(),
            },
        );
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                tracing::error!("admin API failed: {:?}", e);
            }
        }))
    } else {
        None
    };

    shutdown_signal().await;

    // Stop servers before tearing down; a second signal abandons the batch
    let batch = shutdown.child_token();
    let interrupt = batch.clone();
    let second_signal = tokio::spawn(async move {
        shutdown_signal().await;
        interrupt.cancel();
    });

    match orchestrator.run_auto_stop(&batch).await {
        Ok(0) => {}
        Ok(stopped) => tracing::info!("stopped {} servers", stopped),
        Err(e) => tracing::warn!("auto-stop did not complete: {}", e),
    }
    second_signal.abort();

    shutdown.shutdown();
    let _ = worker.await;
    let _ = poller.await;
    if let Some(admin) = admin {
        let _ = admin.await;
    }

    tracing::info!("edge-sync stopped");
    Ok(())
}
