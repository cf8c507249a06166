//! Backend Directory Port
//!
//! Defines the interface to the proxy's list of named upstream endpoints.

use crate::domain::entities::Backend;
use async_trait::async_trait;

/// The proxy's backend directory.
///
/// This is an outbound port: the reconciler registers and unregisters
/// backends here without knowing how the proxy stores them.
#[async_trait]
pub trait BackendDirectory: Send + Sync {
    /// All registered backends.
    async fn list(&self) -> Vec<Backend>;

    /// Get a backend by name.
    async fn get(&self, name: &str) -> Option<Backend>;

    /// Register a backend, replacing any entry with the same name.
    async fn register(&self, backend: Backend);

    /// Remove a backend. Returns the removed entry, if any.
    async fn unregister(&self, name: &str) -> Option<Backend>;
}
