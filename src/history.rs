//! On-disk session history index.
//!
//! The interactive agent persists one JSONL transcript per session under a
//! per-workspace directory: `<root>/<munged-workspace-path>/<session>.jsonl`,
//! where the file stem is the backend-issued session identity. This index
//! lists those identities with metadata, finds a transcript by identity,
//! and caches per-workspace listings until invalidated.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// Metadata for one historical session
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub message_count: usize,
    pub modified_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

/// Result of a find-by-identity lookup
#[derive(Debug, Clone)]
pub struct HistoryHit {
    pub entry: HistoryEntry,
    /// Workspace path recorded in the transcript, when present
    pub workspace_path: Option<PathBuf>,
}

pub struct HistoryIndex {
    root: PathBuf,
    cache: RwLock<HashMap<PathBuf, Vec<HistoryEntry>>>,
}

impl HistoryIndex {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Default transcript root: `$HOME/.claude/projects`
    pub fn default_root() -> PathBuf {
        std::env::var("HOME")
            .map(|h| PathBuf::from(h).join(".claude").join("projects"))
            .unwrap_or_else(|_| PathBuf::from("/tmp/.claude/projects"))
    }

    /// Transcript directory for a workspace path
    pub fn project_dir(&self, workspace: &Path) -> PathBuf {
        let munged = workspace
            .to_string_lossy()
            .replace(['/', '.', '_'], "-");
        self.root.join(munged)
    }

    /// Identities currently on disk for a workspace. Never cached: the
    /// resolver polls this while waiting for a new transcript to appear.
    pub fn list_ids(&self, workspace: &Path) -> HashSet<String> {
        let dir = self.project_dir(workspace);
        let mut ids = HashSet::new();
        let Ok(entries) = fs::read_dir(&dir) else {
            return ids;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.insert(stem.to_string());
                }
            }
        }
        ids
    }

    /// Sessions for a workspace with metadata, newest first. Cached until
    /// `invalidate` is called for the path.
    pub fn list_entries(&self, workspace: &Path) -> Vec<HistoryEntry> {
        if let Some(cached) = self
            .cache
            .read()
            .ok()
            .and_then(|c| c.get(workspace).cloned())
        {
            return cached;
        }

        let mut entries = Vec::new();
        let dir = self.project_dir(workspace);
        if let Ok(dir_entries) = fs::read_dir(&dir) {
            for file in dir_entries.flatten() {
                let path = file.path();
                if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                    continue;
                }
                if let Some(entry) = read_entry(&path) {
                    entries.push(entry);
                }
            }
        }
        entries.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));

        if let Ok(mut cache) = self.cache.write() {
            cache.insert(workspace.to_path_buf(), entries.clone());
        }
        entries
    }

    /// Most recently modified session identity for a workspace
    pub fn latest_id(&self, workspace: &Path) -> Option<String> {
        self.list_entries(workspace).first().map(|e| e.id.clone())
    }

    /// Locate a session transcript by identity across all workspaces.
    pub fn find(&self, session_id: &str) -> Option<HistoryHit> {
        let file_name = format!("{session_id}.jsonl");
        let dirs = fs::read_dir(&self.root).ok()?;
        for dir in dirs.flatten() {
            let candidate = dir.path().join(&file_name);
            if !candidate.is_file() {
                continue;
            }
            let entry = read_entry(&candidate)?;
            let workspace_path = read_cwd(&candidate);
            return Some(HistoryHit {
                entry,
                workspace_path,
            });
        }
        None
    }

    /// Drop the cached listing for a workspace, forcing a rescan.
    pub fn invalidate(&self, workspace: &Path) {
        if let Ok(mut cache) = self.cache.write() {
            cache.remove(workspace);
        }
        debug!("History cache invalidated: {}", workspace.display());
    }
}

/// Parse one transcript into metadata. Tolerant of malformed lines.
fn read_entry(path: &Path) -> Option<HistoryEntry> {
    let id = path.file_stem()?.to_str()?.to_string();
    let modified_at = fs::metadata(path)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());

    let content = fs::read_to_string(path).ok()?;
    let mut summary = None;
    let mut branch = None;
    let mut message_count = 0usize;

    for line in content.lines() {
        let Ok(record) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        match record.get("type").and_then(|t| t.as_str()) {
            Some("summary") => {
                if summary.is_none() {
                    summary = record
                        .get("summary")
                        .and_then(|s| s.as_str())
                        .map(|s| s.to_string());
                }
            }
            Some("user") | Some("assistant") => message_count += 1,
            _ => {}
        }
        if branch.is_none() {
            branch = record
                .get("gitBranch")
                .and_then(|b| b.as_str())
                .filter(|b| !b.is_empty())
                .map(|b| b.to_string());
        }
    }

    Some(HistoryEntry {
        id,
        summary,
        message_count,
        modified_at,
        branch,
    })
}

/// Workspace path recorded in the transcript's first records
fn read_cwd(path: &Path) -> Option<PathBuf> {
    let content = fs::read_to_string(path).ok()?;
    for line in content.lines().take(20) {
        if let Ok(record) = serde_json::from_str::<Value>(line) {
            if let Some(cwd) = record.get("cwd").and_then(|c| c.as_str()) {
                return Some(PathBuf::from(cwd));
            }
        }
    }
    None
}

/// True when one path equals, contains, or is contained by the other.
pub fn paths_related(a: &Path, b: &Path) -> bool {
    a == b || a.starts_with(b) || b.starts_with(a)
}

#[cfg(test)]
mod tests {
    use super::{paths_related, HistoryIndex};
    use std::path::Path;

    fn write_transcript(index: &HistoryIndex, workspace: &Path, id: &str, lines: &[&str]) {
        let dir = index.project_dir(workspace);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(format!("{id}.jsonl")), lines.join("\n")).unwrap();
    }

    #[test]
    fn lists_transcript_identities() {
        let tmp = tempfile::tempdir().unwrap();
        let index = HistoryIndex::new(tmp.path().to_path_buf());
        let ws = Path::new("/home/dev/project");

        write_transcript(&index, ws, "aaa", &[r#"{"type":"user","cwd":"/home/dev/project"}"#]);
        write_transcript(&index, ws, "bbb", &[r#"{"type":"user"}"#]);

        let ids = index.list_ids(ws);
        assert_eq!(ids.len(), 2);
        assert!(ids.contains("aaa") && ids.contains("bbb"));
    }

    #[test]
    fn entry_metadata_is_extracted() {
        let tmp = tempfile::tempdir().unwrap();
        let index = HistoryIndex::new(tmp.path().to_path_buf());
        let ws = Path::new("/home/dev/project");

        write_transcript(
            &index,
            ws,
            "sess-1",
            &[
                r#"{"type":"summary","summary":"Fix the parser"}"#,
                r#"{"type":"user","gitBranch":"main","cwd":"/home/dev/project"}"#,
                r#"{"type":"assistant"}"#,
                "not json",
            ],
        );

        let entries = index.list_entries(ws);
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.id, "sess-1");
        assert_eq!(entry.summary.as_deref(), Some("Fix the parser"));
        assert_eq!(entry.message_count, 2);
        assert_eq!(entry.branch.as_deref(), Some("main"));
    }

    #[test]
    fn find_returns_recorded_workspace() {
        let tmp = tempfile::tempdir().unwrap();
        let index = HistoryIndex::new(tmp.path().to_path_buf());
        let ws = Path::new("/home/dev/project");

        write_transcript(&index, ws, "findme", &[r#"{"type":"user","cwd":"/home/dev/project"}"#]);

        let hit = index.find("findme").expect("transcript found");
        assert_eq!(hit.entry.id, "findme");
        assert_eq!(
            hit.workspace_path.as_deref(),
            Some(Path::new("/home/dev/project"))
        );
        assert!(index.find("missing").is_none());
    }

    #[test]
    fn invalidate_forces_rescan() {
        let tmp = tempfile::tempdir().unwrap();
        let index = HistoryIndex::new(tmp.path().to_path_buf());
        let ws = Path::new("/home/dev/project");

        write_transcript(&index, ws, "one", &[r#"{"type":"user"}"#]);
        assert_eq!(index.list_entries(ws).len(), 1);

        // A new transcript is invisible until the cache is invalidated
        write_transcript(&index, ws, "two", &[r#"{"type":"user"}"#]);
        assert_eq!(index.list_entries(ws).len(), 1);
        index.invalidate(ws);
        assert_eq!(index.list_entries(ws).len(), 2);
    }

    #[test]
    fn empty_workspace_has_no_history() {
        let tmp = tempfile::tempdir().unwrap();
        let index = HistoryIndex::new(tmp.path().to_path_buf());
        let ws = Path::new("/nowhere/at/all");
        assert!(index.list_ids(ws).is_empty());
        assert!(index.latest_id(ws).is_none());
    }

    #[test]
    fn path_relationship_covers_ancestors() {
        let ws = Path::new("/home/dev/project");
        assert!(paths_related(ws, ws));
        assert!(paths_related(Path::new("/home/dev/project/sub"), ws));
        assert!(paths_related(ws, Path::new("/home/dev")));
        assert!(!paths_related(ws, Path::new("/srv/other")));
    }
}
