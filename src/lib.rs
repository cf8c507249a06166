//! edge-sync Library
//!
//! Keeps a reverse proxy's backend directory in step with on-demand servers
//! run by a remote hosting control plane. Exposed as a library for
//! integration tests and for proxies that embed the engine.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use application::{Orchestrator, SyncEngine};
pub use config::load_config;
pub use domain::entities::{Backend, ExternalServer, StatusEvent};
pub use domain::errors::SyncError;
pub use domain::ports::{BackendDirectory, HostingApi, StatusObserver, StatusPushSource};
pub use domain::services::ServerResolver;
pub use domain::value_objects::ServerStatus;
