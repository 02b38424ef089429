//! Client channels and event fan-out.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::debug;

use crate::protocol::Event;
use crate::watch::WatchTracker;

/// Unique client identifier
pub type ClientId = u64;

/// Channel for sending wire lines to a client
pub type ClientSender = mpsc::UnboundedSender<String>;

/// Registry of connected client channels.
pub struct ClientHub {
    clients: RwLock<HashMap<ClientId, ClientSender>>,
    next_client_id: Mutex<ClientId>,
}

impl ClientHub {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            next_client_id: Mutex::new(1),
        }
    }

    /// Register a new client, returning its ID and event receiver
    pub async fn register(&self) -> (ClientId, mpsc::UnboundedReceiver<String>) {
        let mut id = self.next_client_id.lock().await;
        let client_id = *id;
        *id += 1;

        let (tx, rx) = mpsc::unbounded_channel();
        self.clients.write().await.insert(client_id, tx);

        (client_id, rx)
    }

    pub async fn unregister(&self, client_id: ClientId) {
        self.clients.write().await.remove(&client_id);
    }

    pub async fn send_to(&self, client_id: ClientId, line: String) {
        if let Some(tx) = self.clients.read().await.get(&client_id) {
            let _ = tx.send(line);
        }
    }

    pub async fn broadcast(&self, line: String) -> usize {
        let clients = self.clients.read().await;
        for tx in clients.values() {
            let _ = tx.send(line.clone());
        }
        clients.len()
    }
}

impl Default for ClientHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Narrow event-publishing interface handed to the orchestration core.
///
/// Session-scoped events fan out to the session's watchers; delivery to
/// the wire is the connection layer's concern.
#[derive(Clone)]
pub struct Publisher {
    hub: Arc<ClientHub>,
    watches: Arc<WatchTracker>,
}

impl Publisher {
    pub fn new(hub: Arc<ClientHub>, watches: Arc<WatchTracker>) -> Self {
        Self { hub, watches }
    }

    /// Emit an event to every client watching the session.
    pub async fn session_event(&self, session_id: &str, event: Event) {
        let watchers = self.watches.watchers_of(session_id).await;
        if watchers.is_empty() {
            return;
        }
        let line = event.to_line();
        debug!(
            "[events] {} → {} watcher(s) of {}",
            event.method,
            watchers.len(),
            session_id
        );
        for client_id in watchers {
            self.hub.send_to(client_id, line.clone()).await;
        }
    }

    /// Emit an event to one specific client.
    pub async fn client_event(&self, client_id: ClientId, event: Event) {
        self.hub.send_to(client_id, event.to_line()).await;
    }

    /// Emit an event to every connected client.
    pub async fn broadcast(&self, event: Event) {
        self.hub.broadcast(event.to_line()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::{ClientHub, Publisher};
    use crate::protocol::Event;
    use crate::watch::WatchTracker;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn session_events_reach_only_watchers() {
        let hub = Arc::new(ClientHub::new());
        let watches = Arc::new(WatchTracker::new());
        let publisher = Publisher::new(hub.clone(), watches.clone());

        let (watcher, mut watcher_rx) = hub.register().await;
        let (_other, mut other_rx) = hub.register().await;
        watches.watch(watcher, "/ws".into(), "sess".into()).await;

        publisher
            .session_event("sess", Event::new("agent_state", json!({"state": "running"})))
            .await;

        let line = watcher_rx.recv().await.expect("watcher got event");
        assert!(line.contains("agent_state"));
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_reaches_all_clients() {
        let hub = Arc::new(ClientHub::new());
        let watches = Arc::new(WatchTracker::new());
        let publisher = Publisher::new(hub.clone(), watches);

        let (_a, mut rx_a) = hub.register().await;
        let (_b, mut rx_b) = hub.register().await;

        publisher.broadcast(Event::new("agent_state", json!({}))).await;
        assert!(rx_a.recv().await.is_some());
        assert!(rx_b.recv().await.is_some());
    }

    #[tokio::test]
    async fn unregistered_client_gets_nothing() {
        let hub = Arc::new(ClientHub::new());
        let (id, mut rx) = hub.register().await;
        hub.unregister(id).await;
        hub.send_to(id, "line".to_string()).await;
        assert!(rx.try_recv().is_err());
    }
}
