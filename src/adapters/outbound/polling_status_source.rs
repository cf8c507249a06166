//! Polling Status Source
//!
//! Implements StatusPushSource on top of the hosting API's server list for
//! deployments without a push transport. Watched servers are compared
//! against the previous poll and every status change is handed to the
//! change handler.

use crate::domain::entities::{ExternalServer, StatusEvent};
use crate::domain::errors::SyncError;
use crate::domain::ports::{HostingApi, StatusChangeHandler, StatusPushSource};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Poll-based status source.
#[derive(Clone)]
pub struct PollingStatusSource {
    api: Arc<dyn HostingApi>,
    handler: Arc<dyn StatusChangeHandler>,
    /// server id -> payload seen by the last poll
    watched: Arc<DashMap<String, Option<ExternalServer>>>,
}

impl PollingStatusSource {
    pub fn new(api: Arc<dyn HostingApi>, handler: Arc<dyn StatusChangeHandler>) -> Self {
        Self {
            api,
            handler,
            watched: Arc::new(DashMap::new()),
        }
    }

    pub fn watched(&self) -> usize {
        self.watched.len()
    }

    /// Start the background polling task.
    pub fn start(&self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let source = self.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = source.poll_once().await {
                            tracing::error!("status poll failed: {}", e);
                        }
                    }
                }
            }
            tracing::debug!("status polling stopped");
        })
    }

    /// Poll once and report changes. Returns the number of events emitted.
    ///
    /// The first poll after a subscription always reports the server, so a
    /// change that happened before it is not lost.
    pub async fn poll_once(&self) -> Result<usize, SyncError> {
        if self.watched.is_empty() {
            return Ok(0);
        }

        let servers = self.api.list_servers().await?;
        let mut events = Vec::new();

        for server in servers {
            let Some(mut seen) = self.watched.get_mut(&server.id) else {
                continue;
            };
            let previous = match seen.value() {
                Some(previous) if previous.status == server.status => continue,
                Some(previous) => previous.clone(),
                None => server.clone(),
            };
            *seen.value_mut() = Some(server.clone());
            events.push(StatusEvent::new(previous, server));
        }

        let count = events.len();
        for event in events {
            // The handler logs its own failures; one full queue must not
            // hide the other changes.
            let _ = self.handler.on_change(event);
        }
        Ok(count)
    }
}

#[async_trait]
impl StatusPushSource for PollingStatusSource {
    async fn subscribe(&self, server_id: &str) -> Result<(), SyncError> {
        self.watched.entry(server_id.to_string()).or_insert(None);
        Ok(())
    }

    async fn unsubscribe(&self, server_id: &str) -> Result<(), SyncError> {
        self.watched.remove(server_id);
        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::application::testing::{server, MockHostingApi};
    use crate::domain::value_objects::ServerStatus;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<StatusEvent>>);

    impl StatusChangeHandler for Collect {
        fn on_change(&self, event: StatusEvent) -> Result<(), SyncError> {
            self.0.lock().push(event);
            Ok(())
        }
    }

    fn source(api: Arc<MockHostingApi>) -> (Arc<Collect>, PollingStatusSource) {
        let handler = Arc::new(Collect::default());
        (handler.clone(), PollingStatusSource::new(api, handler))
    }

    #[tokio::test]
    async fn test_no_watched_servers_skips_api() {
        let api = Arc::new(MockHostingApi::with_servers(vec![server(
            "a1",
            "lobby",
            ServerStatus::Offline,
        )]));
        let (_events, source) = source(api.clone());

        assert_eq!(source.poll_once().await.unwrap(), 0);
        assert_eq!(api.list_calls(), 0);
    }

    #[tokio::test]
    async fn test_first_poll_reports_current_status() {
        let api = Arc::new(MockHostingApi::with_servers(vec![
            server("a1", "lobby", ServerStatus::Online),
            server("b2", "arena", ServerStatus::Offline),
        ]));
        let (events, source) = source(api);
        source.subscribe("a1").await.unwrap();

        assert_eq!(source.poll_once().await.unwrap(), 1);

        let events = events.0.lock();
        assert_eq!(events[0].server_id, "a1");
        assert_eq!(events[0].current.status, ServerStatus::Online);
    }

    #[tokio::test]
    async fn test_only_changes_are_reported() {
        let api = Arc::new(MockHostingApi::with_servers(vec![server(
            "a1",
            "lobby",
            ServerStatus::Offline,
        )]));
        let (events, source) = source(api.clone());
        source.subscribe("a1").await.unwrap();
        source.poll_once().await.unwrap();

        assert_eq!(source.poll_once().await.unwrap(), 0);

        api.set_status("a1", ServerStatus::Starting);
        assert_eq!(source.poll_once().await.unwrap(), 1);

        let events = events.0.lock();
        assert_eq!(events[1].previous.status, ServerStatus::Offline);
        assert_eq!(events[1].current.status, ServerStatus::Starting);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_reports() {
        let api = Arc::new(MockHostingApi::with_servers(vec![server(
            "a1",
            "lobby",
            ServerStatus::Offline,
        )]));
        let (events, source) = source(api.clone());
        source.subscribe("a1").await.unwrap();
        source.poll_once().await.unwrap();

        source.unsubscribe("a1").await.unwrap();
        api.set_status("a1", ServerStatus::Starting);

        assert_eq!(source.poll_once().await.unwrap(), 0);
        assert_eq!(events.0.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_polling_until_shutdown() {
        let api = Arc::new(MockHostingApi::with_servers(vec![server(
            "a1",
            "lobby",
            ServerStatus::Offline,
        )]));
        let (_events, source) = source(api.clone());
        source.subscribe("a1").await.unwrap();

        let shutdown = CancellationToken::new();
        let task = source.start(Duration::from_secs(5), shutdown.clone());

        tokio::time::sleep(Duration::from_secs(11)).await;
        shutdown.cancel();
        task.await.unwrap();

        // Ticks at 0s, 5s and 10s
        assert_eq!(api.list_calls(), 3);
    }
}
