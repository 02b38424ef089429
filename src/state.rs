use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use crate::events::{ClientHub, ClientId};
use crate::history::HistoryIndex;
use crate::protocol::WorkspaceInfo;
use crate::session::registry::SessionRegistry;
use crate::watch::WatchTracker;

/// Daemon-wide shared state
pub struct DaemonState {
    /// Token for authentication (None if auth disabled)
    pub token: Option<String>,

    /// Configured workspaces (path → WorkspaceInfo)
    pub workspaces: RwLock<HashMap<String, WorkspaceInfo>>,

    /// Connected client channels
    pub hub: Arc<ClientHub>,

    /// Client watch/focus bindings
    pub watches: Arc<WatchTracker>,

    /// The session orchestration core
    pub registry: Arc<SessionRegistry>,

    /// On-disk session history
    pub history: Arc<HistoryIndex>,
}

impl DaemonState {
    pub fn new(
        token: Option<String>,
        workspaces: Vec<WorkspaceInfo>,
        hub: Arc<ClientHub>,
        watches: Arc<WatchTracker>,
        registry: Arc<SessionRegistry>,
        history: Arc<HistoryIndex>,
    ) -> Self {
        let workspaces_map: HashMap<String, WorkspaceInfo> = workspaces
            .into_iter()
            .map(|w| (w.path.clone(), w))
            .collect();

        Self {
            token,
            workspaces: RwLock::new(workspaces_map),
            hub,
            watches,
            registry,
            history,
        }
    }

    /// Register a new client, returning its ID and event receiver
    pub async fn register_client(&self) -> (ClientId, mpsc::UnboundedReceiver<String>) {
        self.hub.register().await
    }

    /// Unregister a client and drop its watch bindings
    pub async fn unregister_client(&self, client_id: ClientId) {
        self.hub.unregister(client_id).await;
        self.watches.remove_client(client_id).await;
    }

    /// Get workspace info by identity
    pub async fn get_workspace(&self, workspace_id: &str) -> Option<WorkspaceInfo> {
        self.workspaces.read().await.get(workspace_id).cloned()
    }

    /// Filesystem path for a configured workspace
    pub async fn workspace_path(&self, workspace_id: &str) -> Option<PathBuf> {
        self.get_workspace(workspace_id)
            .await
            .map(|w| PathBuf::from(w.path))
    }

    /// List all workspaces
    pub async fn list_workspaces(&self) -> Vec<WorkspaceInfo> {
        let mut all: Vec<WorkspaceInfo> =
            self.workspaces.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.path.cmp(&b.path));
        all
    }
}
