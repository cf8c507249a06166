//! Domain Entities - Core business objects
//!
//! These entities represent the external servers reported by the hosting
//! control plane and the backends the proxy routes to.

use crate::domain::value_objects::ServerStatus;
use serde::{Deserialize, Serialize};

/// A remotely hosted, on-demand server as reported by the hosting API.
///
/// Host and port are only known while the server is running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalServer {
    /// Immutable identifier assigned by the hosting control plane
    pub id: String,
    /// Display name
    pub name: String,
    /// Public address (e.g. lobby.example.me)
    pub address: String,
    /// Node host name the server currently runs on
    #[serde(default)]
    pub host: Option<String>,
    /// Port the server currently listens on
    #[serde(default)]
    pub port: Option<u16>,
    /// Current lifecycle status
    pub status: ServerStatus,
    /// Whether a status subscription is active for this server
    #[serde(skip)]
    pub subscribed: bool,
}

impl ExternalServer {
    /// Check whether the server currently has the given status.
    pub fn has_status(&self, status: ServerStatus) -> bool {
        self.status == status
    }

    /// Host and port, if both are known.
    pub fn endpoint(&self) -> Option<(&str, u16)> {
        match (&self.host, self.port) {
            (Some(host), Some(port)) => Some((host.as_str(), port)),
            _ => None,
        }
    }

    /// Copy of this server with a different status.
    pub fn with_status(&self, status: ServerStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }
}

/// A named upstream endpoint in the proxy's backend directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backend {
    /// Proxy-visible name clients are routed by
    pub name: String,
    /// Upstream host
    pub host: String,
    /// Upstream port
    pub port: u16,
}

impl Backend {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
        }
    }

    /// Build a backend for an external server, if its endpoint is known.
    pub fn for_server(name: impl Into<String>, server: &ExternalServer) -> Option<Self> {
        server
            .endpoint()
            .map(|(host, port)| Self::new(name, host, port))
    }
}

/// A status change delivered by the push source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    /// Server the change belongs to
    pub server_id: String,
    /// Payload before the change
    pub previous: ExternalServer,
    /// Payload after the change
    pub current: ExternalServer,
}

impl StatusEvent {
    pub fn new(previous: ExternalServer, current: ExternalServer) -> Self {
        Self {
            server_id: current.id.clone(),
            previous,
            current,
        }
    }
}
