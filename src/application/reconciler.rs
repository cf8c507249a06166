//! Reconciler
//!
//! Applies status transitions to the proxy's backend directory and keeps
//! track of which external server owns each registered name.
//!
//! Only the sync worker calls into the reconciler, so directory reads and
//! writes here never interleave with each other.

use crate::domain::entities::{Backend, ExternalServer};
use crate::domain::errors::SyncError;
use crate::domain::ports::BackendDirectory;
use crate::domain::services::Transition;
use crate::domain::value_objects::ServerStatus;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Directory side effect of a reconciliation step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "backend", rename_all = "snake_case")]
pub enum Outcome {
    Registered(Backend),
    Unregistered(Backend),
    Unchanged,
}

pub struct Reconciler {
    directory: Arc<dyn BackendDirectory>,
    /// backend name -> external server id
    owners: Mutex<HashMap<String, String>>,
}

impl Reconciler {
    pub fn new(directory: Arc<dyn BackendDirectory>) -> Self {
        Self {
            directory,
            owners: Mutex::new(HashMap::new()),
        }
    }

    pub fn directory(&self) -> &Arc<dyn BackendDirectory> {
        &self.directory
    }

    /// External server currently registered under a name.
    pub fn owner_of(&self, name: &str) -> Option<String> {
        self.owners.lock().get(name).cloned()
    }

    /// Apply the transition from `previous` to the status of `current`.
    pub async fn reconcile(
        &self,
        name: &str,
        previous: ServerStatus,
        current: &ExternalServer,
    ) -> Result<Outcome, SyncError> {
        match Transition::between(previous, current.status) {
            Transition::Register => self.register(name, current).await,
            Transition::Unregister => self.unregister(name, &current.id).await,
            Transition::None => Ok(Outcome::Unchanged),
        }
    }

    /// Register a server's endpoint under `name`.
    ///
    /// A name already taken by another server, or by an entry nobody owns,
    /// is a conflict. Re-registering the current owner changes nothing.
    pub async fn register(&self, name: &str, server: &ExternalServer) -> Result<Outcome, SyncError> {
        if self.directory.get(name).await.is_some() {
            return match self.owner_of(name) {
                Some(owner) if owner == server.id => Ok(Outcome::Unchanged),
                _ => Err(SyncError::RegistrationConflict {
                    name: name.to_string(),
                    server_id: server.id.clone(),
                }),
            };
        }

        let backend = Backend::for_server(name, server).ok_or_else(|| {
            SyncError::RemoteApi(format!("server {} is online without an endpoint", server.id))
        })?;

        self.directory.register(backend.clone()).await;
        self.owners
            .lock()
            .insert(name.to_string(), server.id.clone());
        tracing::info!(
            "registered backend {} -> {}:{} ({})",
            backend.name,
            backend.host,
            backend.port,
            server.id
        );
        Ok(Outcome::Registered(backend))
    }

    /// Remove the backend `name` if `server_id` owns it.
    pub async fn unregister(&self, name: &str, server_id: &str) -> Result<Outcome, SyncError> {
        let owned = self.owner_of(name).as_deref() == Some(server_id);
        if !owned || self.directory.get(name).await.is_none() {
            return Err(SyncError::StaleRegistration {
                name: name.to_string(),
            });
        }

        self.owners.lock().remove(name);
        match self.directory.unregister(name).await {
            Some(backend) => {
                tracing::info!("unregistered backend {} ({})", name, server_id);
                Ok(Outcome::Unregistered(backend))
            }
            None => Err(SyncError::StaleRegistration {
                name: name.to_string(),
            }),
        }
    }

    /// Take over a statically configured entry for a watched server.
    ///
    /// While the server is ONLINE the entry is replaced with its live
    /// endpoint; otherwise the entry is removed until it comes online.
    pub async fn adopt(&self, name: &str, server: &ExternalServer) -> Result<Outcome, SyncError> {
        if let Some(owner) = self.owner_of(name) {
            if owner != server.id {
                return Err(SyncError::RegistrationConflict {
                    name: name.to_string(),
                    server_id: server.id.clone(),
                });
            }
        }

        if server.has_status(ServerStatus::Online) {
            if let Some(backend) = Backend::for_server(name, server) {
                self.directory.register(backend.clone()).await;
                self.owners
                    .lock()
                    .insert(name.to_string(), server.id.clone());
                tracing::info!(
                    "adopted backend {} -> {}:{} ({})",
                    name,
                    backend.host,
                    backend.port,
                    server.id
                );
                return Ok(Outcome::Registered(backend));
            }
        }

        self.owners.lock().remove(name);
        Ok(match self.directory.unregister(name).await {
            Some(backend) => {
                tracing::info!(
                    "removed backend {} until {} is online",
                    name,
                    server.id
                );
                Outcome::Unregistered(backend)
            }
            None => Outcome::Unchanged,
        })
    }

    /// Remove a name from the directory regardless of its owner.
    pub async fn release(&self, name: &str) -> Result<Outcome, SyncError> {
        self.owners.lock().remove(name);
        match self.directory.unregister(name).await {
            Some(backend) => {
                tracing::info!("released backend {}", name);
                Ok(Outcome::Unregistered(backend))
            }
            None => Err(SyncError::NotFound(name.to_string())),
        }
    }
}
