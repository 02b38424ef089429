//! Client watch/focus tracking.
//!
//! Maps each connected client to the (workspace, session) pairs it is
//! observing. A session may have any number of simultaneous watchers;
//! the last watcher leaving never terminates the session.

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::events::ClientId;

/// One client→session binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchInfo {
    pub workspace_id: String,
    pub session_id: String,
    pub watching: bool,
}

#[derive(Default)]
pub struct WatchTracker {
    bindings: Mutex<HashMap<ClientId, Vec<WatchInfo>>>,
}

impl WatchTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or refresh) a binding; the newest binding is the client's focus.
    pub async fn watch(&self, client_id: ClientId, workspace_id: String, session_id: String) {
        let mut bindings = self.bindings.lock().await;
        let list = bindings.entry(client_id).or_default();
        list.retain(|w| w.session_id != session_id);
        list.push(WatchInfo {
            workspace_id,
            session_id,
            watching: true,
        });
    }

    /// Remove a binding. Without a target, the client's oldest binding is
    /// removed; with one, only that binding. Returns the removed binding.
    pub async fn unwatch(
        &self,
        client_id: ClientId,
        session_id: Option<&str>,
    ) -> Option<WatchInfo> {
        let mut bindings = self.bindings.lock().await;
        let list = bindings.get_mut(&client_id)?;
        let index = match session_id {
            Some(target) => list.iter().position(|w| w.session_id == target)?,
            None => {
                if list.is_empty() {
                    return None;
                }
                0
            }
        };
        let removed = list.remove(index);
        if list.is_empty() {
            bindings.remove(&client_id);
        }
        Some(removed)
    }

    /// Clients currently watching a session
    pub async fn watchers_of(&self, session_id: &str) -> Vec<ClientId> {
        let bindings = self.bindings.lock().await;
        bindings
            .iter()
            .filter(|(_, list)| {
                list.iter()
                    .any(|w| w.watching && w.session_id == session_id)
            })
            .map(|(client_id, _)| *client_id)
            .collect()
    }

    /// The client's current focus: its most recent binding.
    pub async fn focus(&self, client_id: ClientId) -> Option<WatchInfo> {
        let bindings = self.bindings.lock().await;
        bindings.get(&client_id)?.last().cloned()
    }

    /// Move bindings from a temporary session identity to its resolved one.
    pub async fn remap_session(&self, old_session_id: &str, new_session_id: &str) {
        let mut bindings = self.bindings.lock().await;
        for list in bindings.values_mut() {
            for info in list.iter_mut() {
                if info.session_id == old_session_id {
                    info.session_id = new_session_id.to_string();
                }
            }
        }
    }

    /// Drop every binding that points at a dead session.
    pub async fn remove_session(&self, session_id: &str) {
        let mut bindings = self.bindings.lock().await;
        bindings.retain(|_, list| {
            list.retain(|w| w.session_id != session_id);
            !list.is_empty()
        });
    }

    /// Drop all bindings for a disconnected client.
    pub async fn remove_client(&self, client_id: ClientId) {
        self.bindings.lock().await.remove(&client_id);
    }
}

#[cfg(test)]
mod tests {
    use super::WatchTracker;

    #[tokio::test]
    async fn multiple_watchers_per_session() {
        let tracker = WatchTracker::new();
        tracker.watch(1, "/ws".into(), "sess".into()).await;
        tracker.watch(2, "/ws".into(), "sess".into()).await;

        let mut watchers = tracker.watchers_of("sess").await;
        watchers.sort_unstable();
        assert_eq!(watchers, [1, 2]);
    }

    #[tokio::test]
    async fn untargeted_unwatch_removes_one_binding_only() {
        let tracker = WatchTracker::new();
        tracker.watch(1, "/ws".into(), "sess".into()).await;
        tracker.watch(2, "/ws".into(), "sess".into()).await;

        let removed = tracker.unwatch(1, None).await.expect("binding removed");
        assert_eq!(removed.session_id, "sess");

        // Client 2's binding is untouched
        assert_eq!(tracker.watchers_of("sess").await, [2]);
        assert!(tracker.unwatch(1, None).await.is_none());
    }

    #[tokio::test]
    async fn targeted_unwatch_leaves_other_bindings() {
        let tracker = WatchTracker::new();
        tracker.watch(1, "/ws".into(), "a".into()).await;
        tracker.watch(1, "/ws".into(), "b".into()).await;

        tracker.unwatch(1, Some("a")).await.expect("removed a");
        assert!(tracker.watchers_of("a").await.is_empty());
        assert_eq!(tracker.watchers_of("b").await, [1]);
    }

    #[tokio::test]
    async fn focus_is_most_recent_binding() {
        let tracker = WatchTracker::new();
        tracker.watch(1, "/ws".into(), "a".into()).await;
        tracker.watch(1, "/ws".into(), "b".into()).await;

        let focus = tracker.focus(1).await.expect("focus set");
        assert_eq!(focus.session_id, "b");
    }

    #[tokio::test]
    async fn remap_moves_bindings_to_resolved_identity() {
        let tracker = WatchTracker::new();
        tracker.watch(1, "/ws".into(), "pending-x".into()).await;

        tracker.remap_session("pending-x", "real-id").await;
        assert!(tracker.watchers_of("pending-x").await.is_empty());
        assert_eq!(tracker.watchers_of("real-id").await, [1]);
    }

    #[tokio::test]
    async fn remove_session_drops_all_bindings() {
        let tracker = WatchTracker::new();
        tracker.watch(1, "/ws".into(), "sess".into()).await;
        tracker.watch(2, "/ws".into(), "sess".into()).await;
        tracker.watch(2, "/ws".into(), "other".into()).await;

        tracker.remove_session("sess").await;
        assert!(tracker.watchers_of("sess").await.is_empty());
        assert_eq!(tracker.watchers_of("other").await, [2]);
    }
}
