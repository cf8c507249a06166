//! Hosting API Port
//!
//! Defines the interface to the remote hosting control plane.

use crate::domain::entities::ExternalServer;
use crate::domain::errors::SyncError;
use async_trait::async_trait;

/// Client for the remote hosting control plane.
///
/// Lifecycle calls only acknowledge the request. Their effect is observed
/// later through the status push source, never through the return value.
#[async_trait]
pub trait HostingApi: Send + Sync {
    /// Fetch the full list of servers visible to this account.
    async fn list_servers(&self) -> Result<Vec<ExternalServer>, SyncError>;

    /// Request a server start.
    async fn start(&self, server_id: &str) -> Result<(), SyncError>;

    /// Request a server stop.
    async fn stop(&self, server_id: &str) -> Result<(), SyncError>;

    /// Request a server restart.
    async fn restart(&self, server_id: &str) -> Result<(), SyncError>;
}
