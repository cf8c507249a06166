//! Status Push Source Port
//!
//! Defines how status subscriptions are opened and how changes come back.

use crate::domain::entities::StatusEvent;
use crate::domain::errors::SyncError;
use async_trait::async_trait;

/// Source of asynchronous status-change notifications.
///
/// Implementations deliver every change for a subscribed server to the
/// [`StatusChangeHandler`] they were built with.
#[async_trait]
pub trait StatusPushSource: Send + Sync {
    /// Start receiving changes for a server.
    async fn subscribe(&self, server_id: &str) -> Result<(), SyncError>;

    /// Stop receiving changes for a server.
    async fn unsubscribe(&self, server_id: &str) -> Result<(), SyncError>;
}

/// Receiver side of the push source.
///
/// Called on the push source's own execution context, so implementations
/// must not block.
pub trait StatusChangeHandler: Send + Sync {
    fn on_change(&self, event: StatusEvent) -> Result<(), SyncError>;
}
