//! Agent session data model.

pub mod adapter;
pub mod input;
pub mod interactive;
pub mod registry;
pub mod resolver;
pub mod structured;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use adapter::SessionAdapter;

/// Which subprocess integration model a session uses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Framed JSON message exchange over the child's stdio
    Structured,
    /// Raw pseudo-terminal emulation
    #[default]
    Interactive,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Structured => write!(f, "structured"),
            Self::Interactive => write!(f, "interactive"),
        }
    }
}

/// Delivery mode for `agent_send`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendMode {
    /// Create a session when none matches
    #[default]
    New,
    /// Resume the workspace's latest historical session; fails without one
    Continue,
}

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Starting,
    Running,
    WaitingPermission,
    WaitingQuestion,
    Idle,
    Stopped,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

/// One selectable entry of a permission dialog
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PermissionOption {
    pub key: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub selected: bool,
}

/// Snapshot of an interactive prompt awaiting a user decision.
///
/// At most one exists per session; it is cleared the moment a response is
/// accepted, and re-broadcast verbatim to clients that start watching
/// while it is outstanding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingPermission {
    pub kind: String,
    pub target: Option<String>,
    pub description: String,
    pub preview: Option<String>,
    pub options: Vec<PermissionOption>,
}

/// A live agent session, exclusively owned by the registry.
pub struct Session {
    pub id: String,
    pub workspace_id: String,
    pub workspace_path: PathBuf,
    pub backend: BackendKind,
    pub status: SessionStatus,
    pub pending_permission: Option<PendingPermission>,
    /// Exactly one adapter per live session; dropped on process exit
    pub adapter: Option<SessionAdapter>,
    /// Set once `stop` has signalled the process, making a second stop a no-op
    pub stopping: bool,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        id: String,
        workspace_id: String,
        workspace_path: PathBuf,
        backend: BackendKind,
        adapter: SessionAdapter,
    ) -> Self {
        Self {
            id,
            workspace_id,
            workspace_path,
            backend,
            status: SessionStatus::Starting,
            pending_permission: None,
            adapter: Some(adapter),
            stopping: false,
            created_at: Utc::now(),
        }
    }

    /// A session record with no live backend, for registry tests.
    #[cfg(test)]
    pub(crate) fn new_detached(
        id: String,
        workspace_id: String,
        workspace_path: PathBuf,
        backend: BackendKind,
    ) -> Self {
        Self {
            id,
            workspace_id,
            workspace_path,
            backend,
            status: SessionStatus::Running,
            pending_permission: None,
            adapter: None,
            stopping: false,
            created_at: Utc::now(),
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id.clone(),
            workspace_id: self.workspace_id.clone(),
            backend: self.backend,
            status: self.status,
            created_at: self.created_at,
            has_pending_permission: self.pending_permission.is_some(),
        }
    }
}

/// Wire-facing view of a session for `agent_list`
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub workspace_id: String,
    pub backend: BackendKind,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub has_pending_permission: bool,
}

/// Outcome of a backend process exit, produced by the adapter's wait task.
#[derive(Debug, Clone)]
pub struct ExitOutcome {
    pub exit_code: Option<i32>,
    /// Human-readable cause for abnormal exits
    pub cause: Option<String>,
}

impl ExitOutcome {
    pub fn is_failure(&self) -> bool {
        self.cause.is_some() || self.exit_code.map(|code| code != 0).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::{BackendKind, ExitOutcome, SendMode, SessionStatus};

    #[test]
    fn backend_kind_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(BackendKind::Interactive).unwrap(),
            serde_json::json!("interactive")
        );
        let parsed: BackendKind = serde_json::from_str("\"structured\"").unwrap();
        assert_eq!(parsed, BackendKind::Structured);
    }

    #[test]
    fn send_mode_parses() {
        let parsed: SendMode = serde_json::from_str("\"continue\"").unwrap();
        assert_eq!(parsed, SendMode::Continue);
    }

    #[test]
    fn terminal_statuses() {
        assert!(SessionStatus::Stopped.is_terminal());
        assert!(SessionStatus::Failed.is_terminal());
        assert!(!SessionStatus::WaitingPermission.is_terminal());
    }

    #[test]
    fn clean_exit_is_not_failure() {
        let ok = ExitOutcome {
            exit_code: Some(0),
            cause: None,
        };
        assert!(!ok.is_failure());
        let signalled = ExitOutcome {
            exit_code: None,
            cause: Some("killed".to_string()),
        };
        assert!(signalled.is_failure());
    }
}
