//! Mock port implementations shared by the application tests.

use crate::application::sync_engine::{event_queue, EngineSettings, SyncEngine};
use crate::domain::entities::{Backend, ExternalServer};
use crate::domain::errors::SyncError;
use crate::domain::ports::{BackendDirectory, HostingApi, StatusPushSource};
use crate::domain::services::ServerResolver;
use crate::domain::value_objects::ServerStatus;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub(crate) fn server(id: &str, name: &str, status: ServerStatus) -> ExternalServer {
    ExternalServer {
        id: id.to_string(),
        name: name.to_string(),
        address: format!("{}.example.me", name),
        host: Some(format!("{}.node.example.me", id)),
        port: Some(25565),
        status,
        subscribed: false,
    }
}

#[derive(Default)]
pub(crate) struct MockHostingApi {
    pub servers: Mutex<Vec<ExternalServer>>,
    pub list_calls: AtomicUsize,
    pub fail_list: AtomicBool,
    pub failing_stops: Mutex<HashSet<String>>,
    pub started: Mutex<Vec<String>>,
    pub stopped: Mutex<Vec<String>>,
    pub restarted: Mutex<Vec<String>>,
}

impl MockHostingApi {
    pub fn with_servers(servers: Vec<ExternalServer>) -> Self {
        Self {
            servers: Mutex::new(servers),
            ..Self::default()
        }
    }

    pub fn set_status(&self, id: &str, status: ServerStatus) {
        for s in self.servers.lock().iter_mut() {
            if s.id == id {
                s.status = status;
            }
        }
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HostingApi for MockHostingApi {
    async fn list_servers(&self) -> Result<Vec<ExternalServer>, SyncError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(SyncError::RemoteApi("connection refused".to_string()));
        }
        Ok(self.servers.lock().clone())
    }

    async fn start(&self, server_id: &str) -> Result<(), SyncError> {
        self.started.lock().push(server_id.to_string());
        Ok(())
    }

    async fn stop(&self, server_id: &str) -> Result<(), SyncError> {
        if self.failing_stops.lock().contains(server_id) {
            return Err(SyncError::RemoteApi(format!("stop {} rejected", server_id)));
        }
        self.stopped.lock().push(server_id.to_string());
        Ok(())
    }

    async fn restart(&self, server_id: &str) -> Result<(), SyncError> {
        self.restarted.lock().push(server_id.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MockPushSource {
    pub subscribed: Mutex<Vec<String>>,
    pub unsubscribed: Mutex<Vec<String>>,
    pub reject: AtomicBool,
    pub reject_unsubscribe: AtomicBool,
}

#[async_trait]
impl StatusPushSource for MockPushSource {
    async fn subscribe(&self, server_id: &str) -> Result<(), SyncError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(SyncError::RemoteApi("socket closed".to_string()));
        }
        self.subscribed.lock().push(server_id.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, server_id: &str) -> Result<(), SyncError> {
        if self.reject_unsubscribe.load(Ordering::SeqCst) {
            return Err(SyncError::RemoteApi("socket closed".to_string()));
        }
        self.unsubscribed.lock().push(server_id.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MockDirectory {
    pub backends: Mutex<BTreeMap<String, Backend>>,
}

impl MockDirectory {
    pub fn with_backends(backends: Vec<Backend>) -> Self {
        Self {
            backends: Mutex::new(backends.into_iter().map(|b| (b.name.clone(), b)).collect()),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.backends.lock().keys().cloned().collect()
    }
}

#[async_trait]
impl BackendDirectory for MockDirectory {
    async fn list(&self) -> Vec<Backend> {
        self.backends.lock().values().cloned().collect()
    }

    async fn get(&self, name: &str) -> Option<Backend> {
        self.backends.lock().get(name).cloned()
    }

    async fn register(&self, backend: Backend) {
        self.backends.lock().insert(backend.name.clone(), backend);
    }

    async fn unregister(&self, name: &str) -> Option<Backend> {
        self.backends.lock().remove(name)
    }
}

/// An engine over mock ports with its worker running until `shutdown`.
pub(crate) fn spawn_engine(
    api: Arc<dyn HostingApi>,
    directory: Arc<MockDirectory>,
    shutdown: &CancellationToken,
) -> Arc<SyncEngine> {
    let (sink, queue) = event_queue(16);
    let engine = Arc::new(SyncEngine::new(
        api,
        Arc::new(MockPushSource::default()),
        directory,
        ServerResolver::default(),
        sink,
        EngineSettings::default(),
    ));
    tokio::spawn(
        engine
            .worker(queue, Duration::from_secs(30))
            .run(shutdown.clone()),
    );
    engine
}
