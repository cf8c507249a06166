//! Status Listener Registry
//!
//! One listener per watched external server. Any number of callers can
//! watch the same server; their requests are merged into a single push
//! subscription and a single listener.

use crate::domain::entities::ExternalServer;
use crate::domain::errors::SyncError;
use crate::domain::ports::{Notice, StatusObserver, StatusPushSource};
use crate::domain::value_objects::ServerStatus;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Keep the value that was set first.
pub fn keep_first<T>(old: Option<T>, new: Option<T>) -> Option<T> {
    old.or(new)
}

/// Let a newly supplied value replace the old one.
pub fn take_latest<T>(old: Option<T>, new: Option<T>) -> Option<T> {
    new.or(old)
}

/// An observer together with the status it is waiting for.
#[derive(Clone)]
pub struct ObserverSlot {
    pub observer: Arc<dyn StatusObserver>,
    pub expected_status: Option<ServerStatus>,
}

impl ObserverSlot {
    /// Whether a notice settles what the observer was waiting for.
    fn settled_by(&self, notice: &Notice) -> bool {
        match notice {
            Notice::Failed(_) => true,
            Notice::Registered { .. } => self.expected_status == Some(ServerStatus::Online),
            Notice::Unregistered { .. } => self
                .expected_status
                .map_or(false, |status| status != ServerStatus::Online),
        }
    }
}

/// What a caller contributes when it starts watching a server.
///
/// Absent fields leave the listener untouched.
#[derive(Clone, Default)]
pub struct ListenOptions {
    pub backend_name: Option<String>,
    pub observer: Option<ObserverSlot>,
}

impl ListenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the backend under this proxy name.
    pub fn backend_name(mut self, name: impl Into<String>) -> Self {
        self.backend_name = Some(name.into());
        self
    }

    /// Like [`backend_name`](Self::backend_name) but accepts an optional name.
    pub fn maybe_backend_name(mut self, name: Option<String>) -> Self {
        self.backend_name = name;
        self
    }

    /// Report reconciliation outcomes to an observer until `expected_status`
    /// is reached.
    pub fn observer(
        mut self,
        observer: Arc<dyn StatusObserver>,
        expected_status: Option<ServerStatus>,
    ) -> Self {
        self.observer = Some(ObserverSlot {
            observer,
            expected_status,
        });
        self
    }
}

struct Waiter {
    id: u64,
    deadline: Option<Instant>,
    tx: oneshot::Sender<ExternalServer>,
}

impl Waiter {
    fn is_abandoned(&self, now: Instant) -> bool {
        self.tx.is_closed() || self.deadline.map_or(false, |d| d <= now)
    }
}

/// State of the push subscription a listener was created with.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Subscription {
    Pending,
    Active,
    Failed(SyncError),
}

/// How a `listen` call relates to the listener it found or created.
enum Role {
    Joined(watch::Receiver<Subscription>),
    Created(watch::Sender<Subscription>),
}

/// Per-server aggregation point for observers and status waits.
struct StatusListener {
    backend_name: Option<String>,
    observer: Option<ObserverSlot>,
    last_status: Option<ServerStatus>,
    waiters: HashMap<ServerStatus, Vec<Waiter>>,
    subscription: watch::Receiver<Subscription>,
}

impl StatusListener {
    fn new(subscription: watch::Receiver<Subscription>) -> Self {
        Self {
            backend_name: None,
            observer: None,
            last_status: None,
            waiters: HashMap::new(),
            subscription,
        }
    }

    fn merge(&mut self, options: ListenOptions) {
        self.backend_name = keep_first(self.backend_name.take(), options.backend_name);
        self.observer = take_latest(self.observer.take(), options.observer);
    }
}

/// Reconciliation input extracted from a listener when an update arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateTarget {
    /// Backend name the server is registered under
    pub name: String,
    /// Status the listener saw before this update, if any
    pub previous: Option<ServerStatus>,
}

/// Removes a listener whose push subscription never completed.
struct PendingListener<'a> {
    listeners: &'a DashMap<String, StatusListener>,
    server_id: &'a str,
    armed: bool,
}

impl Drop for PendingListener<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.listeners.remove(self.server_id);
        }
    }
}

/// Registry of status listeners, keyed by external server id.
pub struct ListenerRegistry {
    listeners: DashMap<String, StatusListener>,
    push_source: Arc<dyn StatusPushSource>,
    next_waiter: AtomicU64,
}

impl ListenerRegistry {
    pub fn new(push_source: Arc<dyn StatusPushSource>) -> Self {
        Self {
            listeners: DashMap::new(),
            push_source,
            next_waiter: AtomicU64::new(0),
        }
    }

    /// Watch a server, creating its listener on first use.
    ///
    /// The push source is subscribed only when the listener is created.
    /// Later calls merge their options into the existing listener and wait
    /// for that subscription; if it fails, every caller gets the error.
    pub async fn listen(
        self: &Arc<Self>,
        server_id: &str,
        options: ListenOptions,
    ) -> Result<ListenerHandle, SyncError> {
        let role = match self.listeners.entry(server_id.to_string()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().merge(options);
                Role::Joined(entry.get().subscription.clone())
            }
            Entry::Vacant(entry) => {
                let (tx, rx) = watch::channel(Subscription::Pending);
                let mut listener = StatusListener::new(rx);
                listener.merge(options);
                entry.insert(listener);
                Role::Created(tx)
            }
        };

        match role {
            Role::Joined(subscription) => self.await_subscription(server_id, subscription).await?,
            Role::Created(tx) => self.subscribe_push(server_id, tx).await?,
        }

        Ok(ListenerHandle {
            server_id: server_id.to_string(),
            registry: Arc::clone(self),
        })
    }

    async fn subscribe_push(
        &self,
        server_id: &str,
        tx: watch::Sender<Subscription>,
    ) -> Result<(), SyncError> {
        // Dropped mid-call: the listener must not stay pending forever
        let mut guard = PendingListener {
            listeners: &self.listeners,
            server_id,
            armed: true,
        };

        let result = self.push_source.subscribe(server_id).await;
        guard.armed = false;

        match result {
            Ok(()) => {
                tx.send_replace(Subscription::Active);
                tracing::info!("watching status changes of {}", server_id);
                Ok(())
            }
            Err(e) => {
                tracing::error!("failed to subscribe to {}: {}", server_id, e);
                self.listeners.remove(server_id);
                tx.send_replace(Subscription::Failed(e.clone()));
                Err(e)
            }
        }
    }

    async fn await_subscription(
        &self,
        server_id: &str,
        mut subscription: watch::Receiver<Subscription>,
    ) -> Result<(), SyncError> {
        let _ = subscription
            .wait_for(|state| *state != Subscription::Pending)
            .await;
        let state = subscription.borrow().clone();
        match state {
            Subscription::Active => Ok(()),
            Subscription::Failed(e) => Err(e),
            Subscription::Pending => Err(SyncError::ListenerClosed(server_id.to_string())),
        }
    }

    /// Watch a server without contributing a name or observer.
    pub async fn subscribe(self: &Arc<Self>, server_id: &str) -> Result<ListenerHandle, SyncError> {
        self.listen(server_id, ListenOptions::new()).await
    }

    /// Stop watching a server. Returns false for unknown ids.
    ///
    /// The listener is kept when the push source refuses to unsubscribe.
    /// Pending waits of a removed listener fail with `ListenerClosed`.
    pub async fn unsubscribe(&self, server_id: &str) -> Result<bool, SyncError> {
        if !self.listeners.contains_key(server_id) {
            return Ok(false);
        }
        if let Err(e) = self.push_source.unsubscribe(server_id).await {
            tracing::error!("failed to unsubscribe from {}: {}", server_id, e);
            return Err(e);
        }
        if self.listeners.remove(server_id).is_none() {
            return Ok(false);
        }
        tracing::info!("stopped watching {}", server_id);
        Ok(true)
    }

    pub fn contains(&self, server_id: &str) -> bool {
        self.listeners.contains_key(server_id)
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Ids of every watched server.
    pub fn server_ids(&self) -> Vec<String> {
        self.listeners.iter().map(|e| e.key().clone()).collect()
    }

    /// Backend name a listener was given, if any.
    pub fn backend_name(&self, server_id: &str) -> Option<String> {
        self.listeners
            .get(server_id)
            .and_then(|l| l.backend_name.clone())
    }

    /// Last status the listener observed.
    pub fn last_status(&self, server_id: &str) -> Option<ServerStatus> {
        self.listeners.get(server_id).and_then(|l| l.last_status)
    }

    /// Record a status observed outside the push stream.
    pub fn set_last_status(&self, server_id: &str, status: ServerStatus) {
        if let Some(mut listener) = self.listeners.get_mut(server_id) {
            listener.last_status = Some(status);
        }
    }

    /// Apply an update to the server's listener.
    ///
    /// Resolves every wait registered for the new status, records the new
    /// status and returns what reconciliation needs. `None` when the server
    /// is not watched.
    pub fn on_update(&self, server: &ExternalServer) -> Option<UpdateTarget> {
        let mut listener = self.listeners.get_mut(&server.id)?;

        if let Some(waiters) = listener.waiters.remove(&server.status) {
            for waiter in waiters {
                let _ = waiter.tx.send(server.clone());
            }
        }

        let previous = listener.last_status.replace(server.status);
        let name = listener
            .backend_name
            .clone()
            .unwrap_or_else(|| server.name.clone());

        Some(UpdateTarget { name, previous })
    }

    /// Deliver a notice to the server's observer.
    ///
    /// The observer is detached once the notice settles what it was
    /// waiting for, or when reconciliation failed.
    pub fn notify(&self, server_id: &str, notice: Notice) {
        let slot = {
            let Some(mut listener) = self.listeners.get_mut(server_id) else {
                return;
            };
            let settled = listener
                .observer
                .as_ref()
                .map(|slot| slot.settled_by(&notice));
            match settled {
                Some(true) => listener.observer.take(),
                Some(false) => listener.observer.clone(),
                None => None,
            }
        };

        if let Some(slot) = slot {
            slot.observer.notify(notice);
        }
    }

    /// Whether an observer is currently attached.
    pub fn has_observer(&self, server_id: &str) -> bool {
        self.listeners
            .get(server_id)
            .map_or(false, |l| l.observer.is_some())
    }

    /// Wait for the next update with the given status.
    ///
    /// With `timeout == None` the wait never ends on its own if the status
    /// is never reached; callers should then cancel it through the token
    /// passed to [`StatusWait::wait`].
    pub fn wait_for_status(
        self: &Arc<Self>,
        server_id: &str,
        status: ServerStatus,
        timeout: Option<Duration>,
    ) -> StatusWait {
        let (tx, rx) = oneshot::channel();
        let id = self.next_waiter.fetch_add(1, Ordering::SeqCst);
        let deadline = timeout.map(|t| Instant::now() + t);

        // Unknown server: tx is dropped and the wait fails with ListenerClosed.
        if let Some(mut listener) = self.listeners.get_mut(server_id) {
            listener
                .waiters
                .entry(status)
                .or_default()
                .push(Waiter { id, deadline, tx });
        }

        StatusWait {
            server_id: server_id.to_string(),
            status,
            waiter_id: id,
            deadline,
            rx,
            registry: Arc::clone(self),
        }
    }

    /// Number of pending waits across all listeners.
    pub fn pending_waits(&self) -> usize {
        self.listeners
            .iter()
            .map(|l| l.waiters.values().map(Vec::len).sum::<usize>())
            .sum()
    }

    fn cancel_wait(&self, server_id: &str, status: ServerStatus, waiter_id: u64) {
        if let Some(mut listener) = self.listeners.get_mut(server_id) {
            if let Some(waiters) = listener.waiters.get_mut(&status) {
                waiters.retain(|w| w.id != waiter_id);
                if waiters.is_empty() {
                    listener.waiters.remove(&status);
                }
            }
        }
    }

    /// Drop waits whose caller went away or whose deadline passed.
    pub fn purge_abandoned(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;

        for mut listener in self.listeners.iter_mut() {
            for waiters in listener.waiters.values_mut() {
                let before = waiters.len();
                waiters.retain(|w| !w.is_abandoned(now));
                removed += before - waiters.len();
            }
            listener.waiters.retain(|_, waiters| !waiters.is_empty());
        }

        if removed > 0 {
            tracing::debug!("purged {} abandoned status waits", removed);
        }
        removed
    }
}

/// A caller's reference to a watched server.
#[derive(Clone)]
pub struct ListenerHandle {
    server_id: String,
    registry: Arc<ListenerRegistry>,
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("server_id", &self.server_id)
            .finish_non_exhaustive()
    }
}

impl ListenerHandle {
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Name the backend is registered under, once known.
    pub fn backend_name(&self) -> Option<String> {
        self.registry.backend_name(&self.server_id)
    }

    /// Name the backend will be registered under for this payload.
    pub fn name_for(&self, server: &ExternalServer) -> String {
        self.backend_name().unwrap_or_else(|| server.name.clone())
    }

    pub fn wait_for_status(&self, status: ServerStatus, timeout: Option<Duration>) -> StatusWait {
        self.registry
            .wait_for_status(&self.server_id, status, timeout)
    }
}

/// A pending wait for a server to reach a status.
pub struct StatusWait {
    server_id: String,
    status: ServerStatus,
    waiter_id: u64,
    deadline: Option<Instant>,
    rx: oneshot::Receiver<ExternalServer>,
    registry: Arc<ListenerRegistry>,
}

impl StatusWait {
    pub fn status(&self) -> ServerStatus {
        self.status
    }

    /// Resolve with the payload of the matching update.
    ///
    /// Timed-out and cancelled waits are removed from the registry right
    /// away.
    pub async fn wait(self, cancel: &CancellationToken) -> Result<ExternalServer, SyncError> {
        let StatusWait {
            server_id,
            status,
            waiter_id,
            deadline,
            rx,
            registry,
        } = self;

        let expiry = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;

            result = rx => match result {
                Ok(server) => Ok(server),
                Err(_) if deadline.map_or(false, |d| d <= Instant::now()) => {
                    Err(SyncError::WaitTimedOut { server_id, status })
                }
                Err(_) => Err(SyncError::ListenerClosed(server_id)),
            },
            _ = cancel.cancelled() => {
                registry.cancel_wait(&server_id, status, waiter_id);
                Err(SyncError::WaitCancelled { server_id, status })
            }
            _ = expiry => {
                registry.cancel_wait(&server_id, status, waiter_id);
                Err(SyncError::WaitTimedOut { server_id, status })
            }
        }
    }
}
