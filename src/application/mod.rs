//! Application Layer
//!
//! Stateful services built on the domain ports: the server cache, the
//! listener registry, the reconciler, the sync engine and the batch jobs.

pub mod listener_registry;
pub mod orchestration;
pub mod reconciler;
pub mod server_cache;
pub mod sync_engine;

#[cfg(test)]
pub(crate) mod testing;

pub use listener_registry::{ListenOptions, ListenerHandle, ListenerRegistry, StatusWait};
pub use orchestration::{AutoStartConfig, AutoStartReport, AutoStopConfig, Orchestrator};
pub use reconciler::{Outcome, Reconciler};
pub use server_cache::{CacheSnapshot, ServerCache};
pub use sync_engine::{event_queue, EngineSettings, EventQueue, EventSink, SyncEngine, SyncWorker};
