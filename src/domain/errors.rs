//! Domain Errors
//!
//! Error taxonomy shared by every layer of the synchronization core.

use crate::domain::value_objects::ServerStatus;

/// Errors raised while resolving, watching or reconciling external servers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// The resolver found no server for the query.
    #[error("server not found: {0}")]
    NotFound(String),

    /// A hosting API call failed.
    #[error("hosting API request failed: {0}")]
    RemoteApi(String),

    /// The backend name is already bound to a different external server.
    #[error("backend {name} already exists in the proxy and is not owned by server {server_id}")]
    RegistrationConflict { name: String, server_id: String },

    /// Unregister attempted on a name with no current binding.
    #[error("backend {name} is not registered in the proxy")]
    StaleRegistration { name: String },

    /// The requested action is incompatible with the server's status.
    #[error("cannot {action} {server}: server is {status}")]
    InvalidState {
        server: String,
        status: ServerStatus,
        action: &'static str,
    },

    /// A status wait reached its deadline.
    #[error("timed out waiting for {server_id} to become {status}")]
    WaitTimedOut { server_id: String, status: ServerStatus },

    /// A status wait was cancelled by its caller.
    #[error("wait for {server_id} to become {status} was cancelled")]
    WaitCancelled { server_id: String, status: ServerStatus },

    /// The listener was removed while a wait was pending.
    #[error("listener for {0} was removed")]
    ListenerClosed(String),

    /// A batch job was interrupted as a whole.
    #[error("batch interrupted: {0}")]
    Interrupted(String),

    /// The bounded status event queue has no free slot.
    #[error("status event queue is full")]
    QueueFull,

    /// The sync worker is no longer running.
    #[error("sync engine is shut down")]
    EngineClosed,
}

impl SyncError {
    /// Conflict and stale registrations are reported, never escalated.
    pub fn is_reconcile_warning(&self) -> bool {
        matches!(
            self,
            Self::RegistrationConflict { .. } | Self::StaleRegistration { .. }
        )
    }
}
