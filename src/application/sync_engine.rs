//! Sync Engine
//!
//! Ties the cache, resolver, listener registry and reconciler together.
//!
//! Push callbacks and directory-mutating commands share one bounded queue.
//! A single [`SyncWorker`] drains it, which makes the worker the only writer
//! of the backend directory.

use crate::application::listener_registry::{ListenOptions, ListenerHandle, ListenerRegistry};
use crate::application::reconciler::{Outcome, Reconciler};
use crate::application::server_cache::{ServerCache, DEFAULT_CACHE_TTL};
use crate::domain::entities::{ExternalServer, StatusEvent};
use crate::domain::errors::SyncError;
use crate::domain::ports::{
    BackendDirectory, HostingApi, Notice, StatusChangeHandler, StatusObserver, StatusPushSource,
};
use crate::domain::services::ServerResolver;
use crate::domain::value_objects::ServerStatus;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

type Reply = oneshot::Sender<Result<Outcome, SyncError>>;

/// Work items processed by the sync worker, in arrival order.
pub enum SyncCommand {
    /// A status change from the push source
    Update(StatusEvent),
    /// Register an ONLINE server under a name
    Attach {
        name: String,
        server: ExternalServer,
        reply: Reply,
    },
    /// Take over a static directory entry for a watched server
    Adopt {
        name: String,
        server: ExternalServer,
        reply: Reply,
    },
    /// Drop a name from the directory
    Release { name: String, reply: Reply },
    /// Answered once everything queued before it was processed
    Flush(oneshot::Sender<()>),
}

/// Producer side of the sync queue, handed to the push source.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<SyncCommand>,
}

impl EventSink {
    /// Enqueue a status change without waiting.
    pub fn try_deliver(&self, event: StatusEvent) -> Result<(), SyncError> {
        self.tx
            .try_send(SyncCommand::Update(event))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SyncError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => SyncError::EngineClosed,
            })
    }

    /// Enqueue a status change, waiting for a free slot.
    pub async fn deliver(&self, event: StatusEvent) -> Result<(), SyncError> {
        self.send(SyncCommand::Update(event)).await
    }

    async fn send(&self, command: SyncCommand) -> Result<(), SyncError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| SyncError::EngineClosed)
    }

    async fn request(&self, build: impl FnOnce(Reply) -> SyncCommand) -> Result<Outcome, SyncError> {
        let (tx, rx) = oneshot::channel();
        self.send(build(tx)).await?;
        rx.await.map_err(|_| SyncError::EngineClosed)?
    }
}

impl StatusChangeHandler for EventSink {
    fn on_change(&self, event: StatusEvent) -> Result<(), SyncError> {
        let server_id = event.server_id.clone();
        self.try_deliver(event).map_err(|e| {
            tracing::error!("dropping status change of {}: {}", server_id, e);
            e
        })
    }
}

/// Consumer side of the sync queue, owned by the worker.
pub struct EventQueue {
    rx: mpsc::Receiver<SyncCommand>,
}

/// Create the bounded sync queue.
pub fn event_queue(capacity: usize) -> (EventSink, EventQueue) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventSink { tx }, EventQueue { rx })
}

/// Engine settings.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// How long a fetched server list is reused
    pub cache_ttl: Duration,
    /// Directory entries whose host is under this domain are watched
    pub hosted_domain: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            hosted_domain: "exaroton.me".to_string(),
        }
    }
}

pub struct SyncEngine {
    api: Arc<dyn HostingApi>,
    cache: Arc<ServerCache>,
    resolver: ServerResolver,
    registry: Arc<ListenerRegistry>,
    reconciler: Arc<Reconciler>,
    sink: EventSink,
    hosted_domain: String,
}

impl SyncEngine {
    pub fn new(
        api: Arc<dyn HostingApi>,
        push_source: Arc<dyn StatusPushSource>,
        directory: Arc<dyn BackendDirectory>,
        resolver: ServerResolver,
        sink: EventSink,
        settings: EngineSettings,
    ) -> Self {
        Self {
            cache: Arc::new(ServerCache::new(api.clone(), settings.cache_ttl)),
            api,
            resolver,
            registry: Arc::new(ListenerRegistry::new(push_source)),
            reconciler: Arc::new(Reconciler::new(directory)),
            sink,
            hosted_domain: settings.hosted_domain,
        }
    }

    /// Build the worker that drains `queue`.
    pub fn worker(&self, queue: EventQueue, purge_interval: Duration) -> SyncWorker {
        SyncWorker {
            queue,
            cache: self.cache.clone(),
            registry: self.registry.clone(),
            reconciler: self.reconciler.clone(),
            purge_interval,
        }
    }

    pub fn api(&self) -> &Arc<dyn HostingApi> {
        &self.api
    }

    pub fn cache(&self) -> &Arc<ServerCache> {
        &self.cache
    }

    pub fn resolver(&self) -> &ServerResolver {
        &self.resolver
    }

    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.registry
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn sink(&self) -> &EventSink {
        &self.sink
    }

    /// Resolve a query to a single server.
    pub async fn resolve(&self, query: &str, force: bool) -> Result<ExternalServer, SyncError> {
        let snapshot = self.cache.get(force).await?;
        let mut server = self.resolver.resolve(snapshot.servers(), query)?.clone();
        server.subscribed = self.registry.contains(&server.id);
        Ok(server)
    }

    /// Completion candidates for a partial query.
    pub async fn completions(
        &self,
        prefix: &str,
        status: Option<ServerStatus>,
    ) -> Result<Vec<String>, SyncError> {
        let snapshot = self.cache.get(false).await?;
        Ok(self
            .resolver
            .completions(snapshot.servers(), prefix, status))
    }

    /// Completions limited to servers not yet registered in the proxy.
    pub async fn completions_not_in_proxy(&self, prefix: &str) -> Result<Vec<String>, SyncError> {
        let snapshot = self.cache.get(false).await?;
        let registered: HashSet<String> = self
            .reconciler
            .directory()
            .list()
            .await
            .into_iter()
            .map(|b| b.name)
            .collect();

        let candidates: Vec<ExternalServer> = snapshot
            .servers()
            .iter()
            .filter(|s| !registered.contains(self.proxy_name(s)))
            .cloned()
            .collect();

        Ok(self.resolver.completions(&candidates, prefix, None))
    }

    /// Name a server is registered under unless a listener says otherwise.
    pub fn proxy_name<'a>(&'a self, server: &'a ExternalServer) -> &'a str {
        self.resolver
            .proxy_name_for(&server.address)
            .unwrap_or(&server.name)
    }

    /// Watch a resolved server.
    ///
    /// Without an explicit backend name the alias configured for the
    /// server's address is used.
    pub async fn listen(
        &self,
        server: &ExternalServer,
        options: ListenOptions,
    ) -> Result<ListenerHandle, SyncError> {
        let options = match options.backend_name {
            Some(_) => options,
            None => {
                let alias = self
                    .resolver
                    .proxy_name_for(&server.address)
                    .map(str::to_string);
                options.maybe_backend_name(alias)
            }
        };

        let handle = self.registry.listen(&server.id, options).await?;
        if self.registry.last_status(&server.id).is_none() {
            self.registry.set_last_status(&server.id, server.status);
        }
        Ok(handle)
    }

    /// Resolve a query and watch the server.
    pub async fn watch(
        &self,
        query: &str,
        options: ListenOptions,
    ) -> Result<ListenerHandle, SyncError> {
        let server = self.resolve(query, false).await?;
        self.listen(&server, options).await
    }

    /// Stop watching the server a query resolves to.
    pub async fn unsubscribe(&self, query: &str) -> Result<bool, SyncError> {
        let server = self.resolve(query, false).await?;
        self.registry.unsubscribe(&server.id).await
    }

    /// Start a stopped server and register it once it is online.
    pub async fn start(
        &self,
        query: &str,
        observer: Option<Arc<dyn StatusObserver>>,
    ) -> Result<ExternalServer, SyncError> {
        let server = self.resolve(query, true).await?;
        if !server.status.is_stopped() {
            return Err(invalid_state(&server, "start"));
        }

        self.listen(&server, observe(observer, ServerStatus::Online))
            .await?;
        self.api.start(&server.id).await?;
        tracing::info!("starting {} ({})", server.name, server.id);
        Ok(server)
    }

    /// Stop an online server; its backend is removed as it goes down.
    pub async fn stop(
        &self,
        query: &str,
        observer: Option<Arc<dyn StatusObserver>>,
    ) -> Result<ExternalServer, SyncError> {
        let server = self.resolve(query, true).await?;
        if !server.has_status(ServerStatus::Online) {
            return Err(invalid_state(&server, "stop"));
        }

        self.listen(&server, observe(observer, ServerStatus::Offline))
            .await?;
        self.api.stop(&server.id).await?;
        tracing::info!("stopping {} ({})", server.name, server.id);
        Ok(server)
    }

    pub async fn restart(
        &self,
        query: &str,
        observer: Option<Arc<dyn StatusObserver>>,
    ) -> Result<ExternalServer, SyncError> {
        let server = self.resolve(query, true).await?;
        if !server.has_status(ServerStatus::Online) {
            return Err(invalid_state(&server, "restart"));
        }

        self.listen(&server, observe(observer, ServerStatus::Online))
            .await?;
        self.api.restart(&server.id).await?;
        tracing::info!("restarting {} ({})", server.name, server.id);
        Ok(server)
    }

    /// Watch a server and register it right away if it is online.
    pub async fn add(
        &self,
        query: &str,
        observer: Option<Arc<dyn StatusObserver>>,
    ) -> Result<Outcome, SyncError> {
        let server = self.resolve(query, true).await?;
        let handle = self
            .listen(&server, observe(observer, ServerStatus::Online))
            .await?;

        if !server.has_status(ServerStatus::Online) {
            return Ok(Outcome::Unchanged);
        }
        self.attach(handle.name_for(&server), server).await
    }

    /// Register an ONLINE server under `name` through the worker.
    pub async fn attach(&self, name: String, server: ExternalServer) -> Result<Outcome, SyncError> {
        self.sink
            .request(|reply| SyncCommand::Attach {
                name,
                server,
                reply,
            })
            .await
    }

    /// Remove a backend from the proxy and stop watching its server.
    pub async fn remove(&self, name: &str) -> Result<Outcome, SyncError> {
        if self.reconciler.directory().get(name).await.is_none() {
            return Err(SyncError::NotFound(name.to_string()));
        }

        let owner = self
            .reconciler
            .owner_of(name)
            .or_else(|| self.listener_for(name));
        if let Some(server_id) = owner {
            self.registry.unsubscribe(&server_id).await?;
        }

        self.sink
            .request(|reply| SyncCommand::Release {
                name: name.to_string(),
                reply,
            })
            .await
    }

    fn listener_for(&self, name: &str) -> Option<String> {
        self.registry
            .server_ids()
            .into_iter()
            .find(|id| self.registry.backend_name(id).as_deref() == Some(name))
    }

    /// Take over every directory entry pointing at the hosted domain.
    ///
    /// Returns how many entries are now watched. Entries whose server
    /// cannot be resolved are skipped.
    pub async fn watch_servers(&self) -> Result<usize, SyncError> {
        let suffix = format!(".{}", self.hosted_domain);
        let mut watched = 0;

        for backend in self.reconciler.directory().list().await {
            if !backend.host.ends_with(&suffix) {
                continue;
            }

            let server = match self.resolve(&backend.host, false).await {
                Ok(server) => server,
                Err(e @ SyncError::RemoteApi(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!("not watching backend {}: {}", backend.name, e);
                    continue;
                }
            };

            self.listen(&server, ListenOptions::new().backend_name(&backend.name))
                .await?;
            let name = backend.name;
            match self
                .sink
                .request(|reply| SyncCommand::Adopt {
                    name: name.clone(),
                    server,
                    reply,
                })
                .await
            {
                Ok(_) => watched += 1,
                Err(e) if e.is_reconcile_warning() => {
                    tracing::warn!("not watching backend {}: {}", name, e);
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!("watching {} hosted backends", watched);
        Ok(watched)
    }

    /// Wait until every command queued before this call was processed.
    pub async fn flush(&self) -> Result<(), SyncError> {
        let (tx, rx) = oneshot::channel();
        self.sink.send(SyncCommand::Flush(tx)).await?;
        rx.await.map_err(|_| SyncError::EngineClosed)
    }
}

fn observe(observer: Option<Arc<dyn StatusObserver>>, expected: ServerStatus) -> ListenOptions {
    match observer {
        Some(observer) => ListenOptions::new().observer(observer, Some(expected)),
        None => ListenOptions::new(),
    }
}

fn invalid_state(server: &ExternalServer, action: &'static str) -> SyncError {
    SyncError::InvalidState {
        server: server.name.clone(),
        status: server.status,
        action,
    }
}

/// Drains the sync queue. The only writer of the backend directory.
pub struct SyncWorker {
    queue: EventQueue,
    cache: Arc<ServerCache>,
    registry: Arc<ListenerRegistry>,
    reconciler: Arc<Reconciler>,
    purge_interval: Duration,
}

impl SyncWorker {
    /// Process commands until shutdown or until every sink is dropped.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut purge = tokio::time::interval(self.purge_interval);
        purge.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!("sync worker started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                command = self.queue.rx.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                _ = purge.tick() => {
                    self.registry.purge_abandoned();
                }
            }
        }
        tracing::info!("sync worker stopped");
    }

    async fn handle(&self, command: SyncCommand) {
        match command {
            SyncCommand::Update(event) => self.apply(event).await,
            SyncCommand::Attach {
                name,
                server,
                reply,
            } => {
                let result = self.attach(&name, &server).await;
                let _ = reply.send(result);
            }
            SyncCommand::Adopt {
                name,
                server,
                reply,
            } => {
                self.registry.set_last_status(&server.id, server.status);
                let result = self.reconciler.adopt(&name, &server).await;
                if let Err(e) = &result {
                    tracing::warn!("cannot adopt backend {}: {}", name, e);
                }
                let _ = reply.send(result);
            }
            SyncCommand::Release { name, reply } => {
                let _ = reply.send(self.reconciler.release(&name).await);
            }
            SyncCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    /// Register a server the caller resolved as ONLINE.
    ///
    /// The payload may predate updates this worker already applied, so a
    /// status observed through the push stream takes precedence over it.
    async fn attach(&self, name: &str, server: &ExternalServer) -> Result<Outcome, SyncError> {
        match self.registry.last_status(&server.id) {
            Some(observed) if observed != ServerStatus::Online => {
                tracing::debug!(
                    "not attaching {} ({}): last observed status is {}",
                    name,
                    server.id,
                    observed
                );
                return Ok(Outcome::Unchanged);
            }
            Some(_) => {}
            None => self.registry.set_last_status(&server.id, server.status),
        }

        let result = self.reconciler.register(name, server).await;
        self.report(server, name, &result);
        result
    }

    async fn apply(&self, event: StatusEvent) {
        let current = event.current;
        self.cache.patch(&current);

        let Some(target) = self.registry.on_update(&current) else {
            tracing::debug!("status of unwatched server {} is {}", current.id, current.status);
            return;
        };

        // A status already observed wins over the event's own view, which
        // makes duplicated and replayed events no-ops.
        let previous = target.previous.unwrap_or(event.previous.status);
        tracing::debug!(
            "{} ({}) {} -> {}",
            target.name,
            current.id,
            previous,
            current.status
        );

        let result = self
            .reconciler
            .reconcile(&target.name, previous, &current)
            .await;
        self.report(&current, &target.name, &result);
    }

    fn report(&self, server: &ExternalServer, name: &str, result: &Result<Outcome, SyncError>) {
        let notice = match result {
            Ok(Outcome::Registered(_)) => Notice::Registered {
                name: name.to_string(),
                server: server.clone(),
            },
            Ok(Outcome::Unregistered(_)) => Notice::Unregistered {
                name: name.to_string(),
                server: server.clone(),
            },
            Ok(Outcome::Unchanged) => return,
            Err(e) => {
                if e.is_reconcile_warning() {
                    tracing::warn!("{}", e);
                } else {
                    tracing::error!("failed to reconcile {}: {}", server.id, e);
                }
                Notice::Failed(e.clone())
            }
        };
        self.registry.notify(&server.id, notice);
    }
}
