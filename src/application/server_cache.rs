//! Server Cache
//!
//! Holds the last server list fetched from the hosting API. Snapshots are
//! immutable and swapped as a whole, so readers never see a half-applied
//! refresh or patch.

use crate::domain::entities::ExternalServer;
use crate::domain::errors::SyncError;
use crate::domain::ports::HostingApi;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// How long a fetched server list stays valid.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

/// An ordered server list, valid until its expiry instant.
#[derive(Debug, Clone)]
pub struct CacheSnapshot {
    servers: Vec<ExternalServer>,
    fetched_at: Instant,
    expires_at: Instant,
}

impl CacheSnapshot {
    fn new(servers: Vec<ExternalServer>, ttl: Duration) -> Self {
        let fetched_at = Instant::now();
        Self {
            servers,
            fetched_at,
            expires_at: fetched_at + ttl,
        }
    }

    /// Servers in the order the hosting API listed them.
    pub fn servers(&self) -> &[ExternalServer] {
        &self.servers
    }

    /// Find a server by id.
    pub fn get(&self, server_id: &str) -> Option<&ExternalServer> {
        self.servers.iter().find(|s| s.id == server_id)
    }

    pub fn fetched_at(&self) -> Instant {
        self.fetched_at
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Copy with one entry replaced. `None` when the id is unknown.
    fn patched(&self, server: &ExternalServer) -> Option<Self> {
        let index = self.servers.iter().position(|s| s.id == server.id)?;
        let mut next = self.clone();
        next.servers[index] = server.clone();
        Some(next)
    }
}

#[derive(Default)]
struct CacheState {
    snapshot: Option<Arc<CacheSnapshot>>,
    /// A fetch is waiting on the hosting API
    fetching: bool,
    /// Patches applied while a fetch was in flight, replayed on its result
    patches: Vec<ExternalServer>,
}

/// TTL cache of the hosting API's server list.
///
/// Concurrent fetches are single-flight: a caller that queued behind a
/// running fetch reuses its result instead of calling the API again.
pub struct ServerCache {
    api: Arc<dyn HostingApi>,
    ttl: Duration,
    state: RwLock<CacheState>,
    fetch_lock: Mutex<()>,
    /// Bumped after every successful fetch
    generation: AtomicU64,
}

impl ServerCache {
    pub fn new(api: Arc<dyn HostingApi>, ttl: Duration) -> Self {
        Self {
            api,
            ttl,
            state: RwLock::new(CacheState::default()),
            fetch_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// The current snapshot, expired or not.
    pub fn current(&self) -> Option<Arc<CacheSnapshot>> {
        self.state.read().snapshot.clone()
    }

    /// Number of successful fetches so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Return the cached snapshot, fetching when absent, expired or forced.
    pub async fn get(&self, force: bool) -> Result<Arc<CacheSnapshot>, SyncError> {
        if !force {
            if let Some(snapshot) = self.current().filter(|s| !s.is_expired()) {
                return Ok(snapshot);
            }
        }
        self.fetch().await
    }

    /// Fetch the full server list and replace the snapshot.
    ///
    /// On failure the previous snapshot is kept.
    pub async fn fetch(&self) -> Result<Arc<CacheSnapshot>, SyncError> {
        let seen = self.generation();
        let _guard = self.fetch_lock.lock().await;

        if self.generation() != seen {
            if let Some(snapshot) = self.current() {
                tracing::debug!("server list fetch coalesced with a concurrent refresh");
                return Ok(snapshot);
            }
        }

        {
            let mut state = self.state.write();
            state.fetching = true;
            state.patches.clear();
        }

        let result = self.api.list_servers().await;

        let mut state = self.state.write();
        state.fetching = false;
        let patches = std::mem::take(&mut state.patches);

        let mut servers = match result {
            Ok(servers) => servers,
            Err(e) => {
                tracing::error!("failed to fetch server list: {}", e);
                return Err(e);
            }
        };

        // A push update newer than this response may have landed meanwhile.
        for patch in patches {
            if let Some(entry) = servers.iter_mut().find(|s| s.id == patch.id) {
                *entry = patch;
            }
        }

        let snapshot = Arc::new(CacheSnapshot::new(servers, self.ttl));
        state.snapshot = Some(snapshot.clone());
        drop(state);

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(
            "server cache refreshed, generation={} servers={}",
            generation,
            snapshot.servers().len()
        );
        Ok(snapshot)
    }

    /// Replace one server in the current snapshot.
    ///
    /// Returns false when there is no snapshot or the server is not in it.
    pub fn patch(&self, server: &ExternalServer) -> bool {
        let mut state = self.state.write();
        if state.fetching {
            state.patches.push(server.clone());
        }
        let next = match state.snapshot.as_ref().and_then(|s| s.patched(server)) {
            Some(next) => next,
            None => return false,
        };
        state.snapshot = Some(Arc::new(next));
        true
    }

    /// Drop the snapshot so the next `get` fetches.
    pub fn invalidate(&self) {
        self.state.write().snapshot = None;
    }
}
