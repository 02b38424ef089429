//! Structured backend adapter.
//!
//! Spawns the structured agent executable with piped stdio and exchanges
//! framed JSON, one message per line. Input and output are already framed,
//! so nothing here touches the sanitizer or coalescer. The backend reports
//! its own session identity in an early message; the reader lifts it out
//! and asks the registry to remap.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::session::registry::SessionRegistry;
use crate::session::ExitOutcome;

pub struct StructuredAdapter {
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Option<Child>>,
    pid: Option<u32>,
}

impl StructuredAdapter {
    /// Spawn the structured agent in the workspace directory.
    pub fn spawn(bin: &str, workspace: &Path) -> Result<(Self, ChildStdout), String> {
        info!(
            "[structured] Spawning {} in {}",
            bin,
            workspace.display()
        );

        let mut child = Command::new(bin)
            .current_dir(workspace)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("Failed to spawn structured agent: {e}"))?;

        let stdin = child
            .stdin
            .take()
            .ok_or("Failed to capture structured agent stdin")?;
        let stdout = child
            .stdout
            .take()
            .ok_or("Failed to capture structured agent stdout")?;

        let pid = child.id();
        debug!("[structured] Agent process started pid={:?}", pid);

        Ok((
            Self {
                stdin: Mutex::new(Some(stdin)),
                child: Mutex::new(Some(child)),
                pid,
            },
            stdout,
        ))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Send a framed user message.
    pub async fn send_user_input(&self, text: &str) -> Result<(), String> {
        self.send_frame(&json!({"type": "user_input", "text": text}))
            .await
    }

    /// Graceful interrupt: an interrupt frame, so the agent can abort the
    /// current turn and checkpoint.
    pub async fn interrupt(&self) -> Result<(), String> {
        self.send_frame(&json!({"type": "interrupt"})).await
    }

    /// Forced termination.
    pub async fn kill(&self) {
        // Dropping stdin first signals EOF for agents that exit on it
        self.stdin.lock().await.take();
        if let Some(child) = self.child.lock().await.as_mut() {
            let _ = child.start_kill();
        }
    }

    pub async fn try_wait(&self) -> Option<Option<i32>> {
        let mut guard = self.child.lock().await;
        let child = guard.as_mut()?;
        match child.try_wait() {
            Ok(Some(status)) => Some(status.code()),
            Ok(None) => None,
            Err(_) => Some(None),
        }
    }

    async fn send_frame(&self, frame: &Value) -> Result<(), String> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or("Structured agent stdin is closed")?;
        let mut line = frame.to_string();
        line.push('\n');
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| format!("Failed to write to structured agent: {e}"))?;
        stdin
            .flush()
            .await
            .map_err(|e| format!("Failed to flush structured agent stdin: {e}"))
    }
}

/// Read framed messages until EOF, then report the exit outcome.
///
/// The task holds the session's spawn-time identity; the registry resolves
/// remapped identities internally.
pub fn start_reader(
    registry: Arc<SessionRegistry>,
    session_id: String,
    stdout: ChildStdout,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        let mut announced_id: Option<String> = None;

        while let Ok(Some(line)) = lines.next_line().await {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let message: Value = match serde_json::from_str(trimmed) {
                Ok(v) => v,
                Err(e) => {
                    debug!("[structured] Unparseable frame for {session_id}: {e}");
                    continue;
                }
            };

            // The backend announces its durable identity once; remap the
            // temporary key as soon as it appears.
            if announced_id.is_none() {
                if let Some(real_id) = message.get("session_id").and_then(|v| v.as_str()) {
                    announced_id = Some(real_id.to_string());
                    if real_id != session_id {
                        registry.remap_session(&session_id, real_id).await;
                    }
                }
            }

            registry.handle_structured_message(&session_id, message).await;
        }

        // Stream closed: collect the exit status
        let outcome = match registry.session_adapter(&session_id).await {
            Some(adapter) => {
                let mut exit_code = None;
                for _ in 0..20 {
                    if let Some(code) = adapter.try_wait().await {
                        exit_code = code;
                        break;
                    }
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
                let cause = match exit_code {
                    Some(0) => None,
                    Some(code) => Some(format!("structured agent exited with status {code}")),
                    None => Some("structured agent terminated by signal".to_string()),
                };
                ExitOutcome { exit_code, cause }
            }
            None => ExitOutcome {
                exit_code: None,
                cause: None,
            },
        };

        if outcome.cause.is_some() {
            warn!(
                "[structured] Session {} ended: {:?}",
                session_id, outcome.cause
            );
        }
        registry.handle_exit(&session_id, outcome).await;
    });
}
