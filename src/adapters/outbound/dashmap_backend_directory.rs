//! DashMap Backend Directory
//!
//! Implements BackendDirectory using DashMap. This is the proxy's live
//! routing table when edge-sync runs standalone.

use crate::domain::entities::Backend;
use crate::domain::ports::BackendDirectory;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// DashMap-backed backend directory, keyed by backend name.
#[derive(Clone, Default)]
pub struct DashMapBackendDirectory {
    backends: Arc<DashMap<String, Backend>>,
}

impl DashMapBackendDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a directory seeded with statically configured backends.
    pub fn with_backends(backends: impl IntoIterator<Item = Backend>) -> Self {
        let directory = Self::new();
        for backend in backends {
            directory.backends.insert(backend.name.clone(), backend);
        }
        directory
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

#[async_trait]
impl BackendDirectory for DashMapBackendDirectory {
    async fn list(&self) -> Vec<Backend> {
        let mut backends: Vec<Backend> = self.backends.iter().map(|e| e.value().clone()).collect();
        backends.sort_by(|a, b| a.name.cmp(&b.name));
        backends
    }

    async fn get(&self, name: &str) -> Option<Backend> {
        self.backends.get(name).map(|e| e.value().clone())
    }

    async fn register(&self, backend: Backend) {
        self.backends.insert(backend.name.clone(), backend);
    }

    async fn unregister(&self, name: &str) -> Option<Backend> {
        self.backends.remove(name).map(|(_, backend)| backend)
    }
}
