use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

use crate::history::HistoryIndex;
use crate::protocol::WorkspaceInfo;
use crate::session::registry::BackendConfig;

/// Conduit daemon - remote agent sessions and git operations
#[derive(Parser, Debug)]
#[command(name = "conduit-daemon")]
pub struct Args {
    /// Bind address
    #[arg(long, default_value = "127.0.0.1:4732")]
    pub listen: String,

    /// Auth token (or set CONDUIT_DAEMON_TOKEN env var)
    #[arg(long, env = "CONDUIT_DAEMON_TOKEN")]
    pub token: Option<String>,

    /// Data directory
    #[arg(long, env = "CONDUIT_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Disable auth (dev only)
    #[arg(long)]
    pub insecure_no_auth: bool,

    /// Structured agent executable
    #[arg(long, env = "CONDUIT_STRUCTURED_AGENT", default_value = "codex")]
    pub structured_agent: String,

    /// Interactive agent executable
    #[arg(long, env = "CONDUIT_INTERACTIVE_AGENT", default_value = "claude")]
    pub interactive_agent: String,

    /// Session transcript root (defaults to the interactive agent's)
    #[arg(long, env = "CONDUIT_HISTORY_DIR")]
    pub history_dir: Option<PathBuf>,
}

impl Args {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| dirs_data_dir().join("conduit"))
    }

    pub fn require_auth(&self) -> bool {
        !self.insecure_no_auth
    }

    pub fn history_root(&self) -> PathBuf {
        self.history_dir
            .clone()
            .unwrap_or_else(HistoryIndex::default_root)
    }

    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig {
            structured_bin: self.structured_agent.clone(),
            interactive_bin: self.interactive_agent.clone(),
            ..BackendConfig::default()
        }
    }
}

fn dirs_data_dir() -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(".local/share"))
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

/// workspaces.json format
#[derive(Debug, Deserialize)]
pub struct WorkspacesConfig {
    pub workspaces: Vec<WorkspaceEntry>,
}

#[derive(Debug, Deserialize)]
pub struct WorkspaceEntry {
    pub path: String,
    pub name: Option<String>,
}

impl WorkspacesConfig {
    pub fn load(data_dir: &PathBuf) -> Result<Self, String> {
        let path = data_dir.join("workspaces.json");
        if !path.exists() {
            return Ok(WorkspacesConfig { workspaces: vec![] });
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| format!("Failed to read workspaces.json: {e}"))?;

        serde_json::from_str(&content).map_err(|e| format!("Failed to parse workspaces.json: {e}"))
    }

    pub fn to_workspace_infos(&self) -> Vec<WorkspaceInfo> {
        self.workspaces
            .iter()
            .map(|e| WorkspaceInfo {
                path: e.path.clone(),
                name: e.name.clone().unwrap_or_else(|| {
                    PathBuf::from(&e.path)
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_else(|| e.path.clone())
                }),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::WorkspacesConfig;

    #[test]
    fn workspace_name_defaults_to_directory_name() {
        let config: WorkspacesConfig = serde_json::from_str(
            r#"{"workspaces":[{"path":"/home/dev/project"},{"path":"/srv/api","name":"API"}]}"#,
        )
        .unwrap();
        let infos = config.to_workspace_infos();
        assert_eq!(infos[0].name, "project");
        assert_eq!(infos[1].name, "API");
    }

    #[test]
    fn missing_config_yields_empty_list() {
        let tmp = tempfile::tempdir().unwrap();
        let config = WorkspacesConfig::load(&tmp.path().to_path_buf()).unwrap();
        assert!(config.workspaces.is_empty());
    }
}
