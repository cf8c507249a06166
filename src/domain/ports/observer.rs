//! Status Observer Port
//!
//! Whoever asked for a server to be watched (an operator, an admin request)
//! can attach an observer to hear about the resulting registrations.

use crate::domain::entities::ExternalServer;
use crate::domain::errors::SyncError;
use tokio::sync::mpsc;

/// Outcome of a reconciliation step, as seen by an observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The server came online and was added to the proxy
    Registered { name: String, server: ExternalServer },
    /// The server went offline and was removed from the proxy
    Unregistered { name: String, server: ExternalServer },
    /// Reconciliation could not be applied
    Failed(SyncError),
}

/// Receives reconciliation notices for a watched server.
///
/// Called from the sync worker; implementations must not block.
pub trait StatusObserver: Send + Sync {
    fn notify(&self, notice: Notice);
}

impl StatusObserver for mpsc::UnboundedSender<Notice> {
    fn notify(&self, notice: Notice) {
        // Receiver gone means nobody is listening anymore.
        let _ = self.send(notice);
    }
}
