//! Session identity resolution.
//!
//! An interactive agent only persists its durable session identity some
//! time after the process starts, as a new transcript in the history
//! store. The resolver snapshots the identities known at spawn time and
//! diffs against later scans: the first identity that was not in the
//! snapshot belongs to the new process. A bounded variant lets the
//! spawning request opportunistically return the real identity; the
//! cancellable background watcher covers the slow path.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::history::HistoryIndex;
use crate::session::registry::SessionRegistry;

/// Interval between history scans
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Overall budget for the bounded resolve at start/send time
pub const BOUNDED_TIMEOUT: Duration = Duration::from_secs(10);

/// Identities known for a workspace at spawn time.
#[derive(Debug, Clone)]
pub struct IdentitySnapshot {
    ids: HashSet<String>,
}

impl IdentitySnapshot {
    pub fn take(history: &HistoryIndex, workspace: &Path) -> Self {
        Self {
            ids: history.list_ids(workspace),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }
}

/// One scan: any identity on disk that was not in the snapshot.
pub fn resolve_once(
    history: &HistoryIndex,
    workspace: &Path,
    snapshot: &IdentitySnapshot,
) -> Option<String> {
    history
        .list_ids(workspace)
        .into_iter()
        .find(|id| !snapshot.contains(id))
}

/// Poll until a new identity appears or the budget runs out.
///
/// A timeout is not an error: the caller falls back to the temporary
/// identity and leaves the background watcher running.
pub async fn resolve_bounded(
    history: &HistoryIndex,
    workspace: &Path,
    snapshot: &IdentitySnapshot,
    timeout: Duration,
) -> Option<String> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(id) = resolve_once(history, workspace, snapshot) {
            return Some(id);
        }
        if Instant::now() + POLL_INTERVAL > deadline {
            return None;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Background watcher for a session still holding its temporary identity.
///
/// Exits when a new identity appears (remapping the session) or when the
/// session's adapter is gone: a process that died without ever
/// registering an identity stays permanently unresolved. The handle is
/// stored in the registry's resolver map; cancel-and-remove happens only
/// in the process-exit handler.
pub fn spawn_watcher(
    registry: Arc<SessionRegistry>,
    history: Arc<HistoryIndex>,
    temp_id: String,
    workspace: PathBuf,
    snapshot: IdentitySnapshot,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(POLL_INTERVAL).await;

            if registry.session_adapter(&temp_id).await.is_none() {
                debug!(
                    "[resolver] Adapter gone for {}, leaving identity unresolved",
                    temp_id
                );
                return;
            }

            if let Some(new_id) = resolve_once(&history, &workspace, &snapshot) {
                info!("[resolver] Resolved {} → {}", temp_id, new_id);
                registry.remap_session(&temp_id, &new_id).await;
                return;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::{resolve_bounded, resolve_once, IdentitySnapshot};
    use crate::history::HistoryIndex;
    use std::path::Path;
    use std::time::Duration;

    fn write_transcript(index: &HistoryIndex, workspace: &Path, id: &str) {
        let dir = index.project_dir(workspace);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(format!("{id}.jsonl")),
            r#"{"type":"user"}"#,
        )
        .unwrap();
    }

    #[test]
    fn snapshot_diff_finds_new_identity() {
        let tmp = tempfile::tempdir().unwrap();
        let history = HistoryIndex::new(tmp.path().to_path_buf());
        let ws = Path::new("/home/dev/project");

        write_transcript(&history, ws, "old");
        let snapshot = IdentitySnapshot::take(&history, ws);
        assert!(resolve_once(&history, ws, &snapshot).is_none());

        write_transcript(&history, ws, "fresh");
        assert_eq!(
            resolve_once(&history, ws, &snapshot).as_deref(),
            Some("fresh")
        );
    }

    #[test]
    fn preexisting_identities_never_resolve() {
        let tmp = tempfile::tempdir().unwrap();
        let history = HistoryIndex::new(tmp.path().to_path_buf());
        let ws = Path::new("/home/dev/project");

        write_transcript(&history, ws, "a");
        write_transcript(&history, ws, "b");
        let snapshot = IdentitySnapshot::take(&history, ws);
        assert!(resolve_once(&history, ws, &snapshot).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_resolve_times_out_quietly() {
        let tmp = tempfile::tempdir().unwrap();
        let history = HistoryIndex::new(tmp.path().to_path_buf());
        let ws = Path::new("/home/dev/project");
        let snapshot = IdentitySnapshot::take(&history, ws);

        let resolved =
            resolve_bounded(&history, ws, &snapshot, Duration::from_secs(2)).await;
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn bounded_resolve_returns_immediately_on_hit() {
        let tmp = tempfile::tempdir().unwrap();
        let history = HistoryIndex::new(tmp.path().to_path_buf());
        let ws = Path::new("/home/dev/project");
        let snapshot = IdentitySnapshot::take(&history, ws);

        write_transcript(&history, ws, "quick");
        let resolved =
            resolve_bounded(&history, ws, &snapshot, Duration::from_secs(2)).await;
        assert_eq!(resolved.as_deref(), Some("quick"));
    }
}
