//! The session registry: single source of truth for live agent sessions.
//!
//! All session state lives in one mutex-guarded map owned by this object;
//! adapters are exclusively owned by their session and manipulated only by
//! their own tasks plus registry-mediated calls. The existing-session
//! check and session creation happen under one lock acquisition, so two
//! concurrent starts for a workspace cannot both create a session.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{classify_launch_error, CoreError, Result};
use crate::events::{ClientId, Publisher};
use crate::history::{paths_related, HistoryIndex};
use crate::protocol::{
    AgentExitedParams, AgentMessageParams, AgentOutputParams, AgentPermissionParams,
    AgentPermissionResolvedParams, AgentSessionResolvedParams, AgentStartResult,
    AgentStateParams, Event, StartStatus, EVENT_AGENT_EXITED, EVENT_AGENT_MESSAGE,
    EVENT_AGENT_OUTPUT, EVENT_AGENT_PERMISSION, EVENT_AGENT_PERMISSION_RESOLVED,
    EVENT_AGENT_SESSION_RESOLVED, EVENT_AGENT_STATE,
};
use crate::session::adapter::SessionAdapter;
use crate::session::input::{
    encode_raw_text, encode_special_key, normalize_permission_response,
};
use crate::session::resolver::{self, IdentitySnapshot};
use crate::session::{
    interactive, structured, BackendKind, ExitOutcome, PendingPermission, SendMode, Session,
    SessionStatus, SessionSummary,
};
use crate::watch::WatchTracker;

/// Prefix of locally-generated placeholder identities
const TEMP_ID_PREFIX: &str = "pending-";

/// Grace period between interrupt and forced kill on `stop`
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Backend launch configuration
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub structured_bin: String,
    pub interactive_bin: String,
    /// Budget for the bounded identity resolve at start/send time
    pub resolve_timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            structured_bin: "codex".to_string(),
            interactive_bin: "claude".to_string(),
            resolve_timeout: resolver::BOUNDED_TIMEOUT,
        }
    }
}

/// IO handles produced by a spawn, consumed by the post-insert task setup
enum SpawnedIo {
    Structured(tokio::process::ChildStdout),
    Interactive(Box<dyn std::io::Read + Send>),
}

pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Session>>,
    /// Temporary identity → resolved identity. An entry here is permanent
    /// for the registry's lifetime of the session: a remapped temporary
    /// identity is never handed out again.
    aliases: Mutex<HashMap<String, String>>,
    /// Session → last diagnostic log line, for redraw spam suppression
    dedup: Mutex<HashMap<String, String>>,
    /// Session → background identity-resolution watcher
    resolvers: Mutex<HashMap<String, JoinHandle<()>>>,
    history: Arc<HistoryIndex>,
    publisher: Publisher,
    watches: Arc<WatchTracker>,
    config: BackendConfig,
}

impl SessionRegistry {
    pub fn new(
        history: Arc<HistoryIndex>,
        publisher: Publisher,
        watches: Arc<WatchTracker>,
        config: BackendConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            aliases: Mutex::new(HashMap::new()),
            dedup: Mutex::new(HashMap::new()),
            resolvers: Mutex::new(HashMap::new()),
            history,
            publisher,
            watches,
            config,
        })
    }

    fn temp_id() -> String {
        format!("{TEMP_ID_PREFIX}{}", uuid::Uuid::new_v4())
    }

    fn is_temp_id(id: &str) -> bool {
        id.starts_with(TEMP_ID_PREFIX)
    }

    /// Follow the alias table so callers holding a pre-resolution identity
    /// keep reaching the session.
    pub async fn resolve_id(&self, id: &str) -> String {
        let aliases = self.aliases.lock().await;
        aliases.get(id).cloned().unwrap_or_else(|| id.to_string())
    }

    pub async fn session_adapter(&self, id: &str) -> Option<SessionAdapter> {
        let rid = self.resolve_id(id).await;
        let sessions = self.sessions.lock().await;
        sessions.get(&rid).and_then(|s| s.adapter.clone())
    }

    pub async fn list(&self) -> Vec<SessionSummary> {
        let sessions = self.sessions.lock().await;
        let mut summaries: Vec<SessionSummary> =
            sessions.values().map(|s| s.summary()).collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        summaries
    }

    // --- start / send ---

    /// `agent_start`: attach to a live or historical session, or spawn.
    pub async fn start(
        self: &Arc<Self>,
        workspace_id: &str,
        workspace_path: &Path,
        backend: BackendKind,
        existing: Option<String>,
    ) -> Result<AgentStartResult> {
        if let Some(existing_id) = existing {
            let rid = self.resolve_id(&existing_id).await;
            if self.is_live(&rid).await {
                return Ok(AgentStartResult {
                    status: StartStatus::Attached,
                    resolved: !Self::is_temp_id(&rid),
                    session_id: Some(rid),
                });
            }
            if backend == BackendKind::Interactive && self.history.find(&rid).is_some() {
                let (session_id, _, _) = self
                    .ensure_session(workspace_id, workspace_path, backend, Some(rid))
                    .await?;
                return Ok(AgentStartResult {
                    status: StartStatus::Attached,
                    session_id: Some(session_id),
                    resolved: true,
                });
            }
            // Not live, not in history: report without error so the caller
            // can fall back to history selection.
            return Ok(AgentStartResult {
                status: StartStatus::NotFound,
                session_id: None,
                resolved: false,
            });
        }

        if let Some(session_id) = self.live_session_for(workspace_path, backend).await {
            return Ok(AgentStartResult {
                status: StartStatus::Attached,
                resolved: !Self::is_temp_id(&session_id),
                session_id: Some(session_id),
            });
        }

        if backend == BackendKind::Interactive {
            if let Some(latest) = self.history.latest_id(workspace_path) {
                let (session_id, _, _) = self
                    .ensure_session(workspace_id, workspace_path, backend, Some(latest))
                    .await?;
                return Ok(AgentStartResult {
                    status: StartStatus::Attached,
                    session_id: Some(session_id),
                    resolved: true,
                });
            }
        }

        let (session_id, _, snapshot) = self
            .ensure_session(workspace_id, workspace_path, backend, None)
            .await?;
        let session_id = self
            .try_bounded_resolve(session_id, workspace_path, snapshot)
            .await;
        let resolved = !Self::is_temp_id(&session_id);
        Ok(AgentStartResult {
            status: StartStatus::Spawned,
            session_id: Some(session_id),
            resolved,
        })
    }

    /// `agent_send`: deliver a prompt, creating or resuming as needed.
    pub async fn send(
        self: &Arc<Self>,
        workspace_id: &str,
        workspace_path: &Path,
        identity: Option<String>,
        prompt: &str,
        mode: SendMode,
        backend: BackendKind,
    ) -> Result<(String, bool)> {
        match mode {
            SendMode::Continue => {
                if backend == BackendKind::Structured {
                    return Err(CoreError::invalid_params(
                        "mode \"continue\" is not supported for the structured backend",
                    ));
                }
                let target = match identity {
                    Some(id) => id,
                    None => self.history.latest_id(workspace_path).ok_or_else(|| {
                        CoreError::session_not_found(format!(
                            "no session history for workspace {workspace_id}"
                        ))
                    })?,
                };
                let rid = self.resolve_id(&target).await;
                if self.is_live(&rid).await {
                    self.deliver_prompt(&rid, prompt).await?;
                    return Ok((rid, false));
                }
                if self.history.find(&rid).is_none() {
                    return Err(CoreError::session_not_found(rid));
                }
                let (session_id, created, _) = self
                    .ensure_session(workspace_id, workspace_path, backend, Some(rid))
                    .await?;
                self.deliver_prompt(&session_id, prompt).await?;
                Ok((session_id, created))
            }
            SendMode::New => {
                if let Some(existing_id) = identity {
                    let rid = self.resolve_id(&existing_id).await;
                    if let Some(session_path) = self.session_workspace(&rid).await {
                        if paths_related(&session_path, workspace_path) {
                            self.deliver_prompt(&rid, prompt).await?;
                            return Ok((rid, false));
                        }
                        warn!(
                            "[registry] Session {} belongs to {}, not {}; creating a new session",
                            rid,
                            session_path.display(),
                            workspace_path.display()
                        );
                    } else if backend == BackendKind::Interactive {
                        match self.history.find(&rid) {
                            Some(hit)
                                if hit
                                    .workspace_path
                                    .as_deref()
                                    .map(|p| paths_related(p, workspace_path))
                                    .unwrap_or(false) =>
                            {
                                let (session_id, created, _) = self
                                    .ensure_session(
                                        workspace_id,
                                        workspace_path,
                                        backend,
                                        Some(rid),
                                    )
                                    .await?;
                                self.deliver_prompt(&session_id, prompt).await?;
                                return Ok((session_id, created));
                            }
                            Some(hit) => {
                                warn!(
                                    "[registry] Session {} ({} messages) belongs elsewhere; \
                                     creating a new session for {}",
                                    rid, hit.entry.message_count, workspace_id
                                );
                            }
                            None => {
                                warn!(
                                    "[registry] Session {} not found for workspace {}; \
                                     creating a new session",
                                    rid, workspace_id
                                );
                            }
                        }
                    }
                }

                let (session_id, created, snapshot) = self
                    .ensure_session(workspace_id, workspace_path, backend, None)
                    .await?;
                self.deliver_prompt(&session_id, prompt).await?;
                let session_id = self
                    .try_bounded_resolve(session_id, workspace_path, snapshot)
                    .await;
                Ok((session_id, created))
            }
        }
    }

    /// `agent_stop`: idempotent interrupt with a timed hard-kill fallback.
    pub async fn stop(&self, id: &str) -> Result<()> {
        let rid = self.resolve_id(id).await;
        let adapter = {
            let mut sessions = self.sessions.lock().await;
            let Some(session) = sessions.get_mut(&rid) else {
                return Ok(());
            };
            if session.stopping {
                // Second stop is a no-op; the first escalation is running
                return Ok(());
            }
            session.stopping = true;
            session.adapter.clone()
        };

        let Some(adapter) = adapter else {
            return Ok(());
        };

        info!("[registry] Stopping session {}", rid);
        if let Err(e) = adapter.interrupt().await {
            debug!("[registry] Interrupt failed for {}: {}", rid, e);
        }

        // Escalate after the grace period if the process ignored the
        // interrupt. Exit cleanup itself happens in the wait task.
        let escalate = adapter.clone();
        let escalate_id = rid.clone();
        tokio::spawn(async move {
            tokio::time::sleep(STOP_GRACE).await;
            if escalate.try_wait().await.is_none() {
                warn!(
                    "[registry] Session {} ignored interrupt, killing",
                    escalate_id
                );
                escalate.kill().await;
            }
        });

        Ok(())
    }

    /// `agent_input`: encoded keystrokes or raw text to the terminal.
    pub async fn input(
        &self,
        id: &str,
        text: Option<String>,
        key: Option<String>,
    ) -> Result<()> {
        let bytes = match (text, key) {
            (Some(_), Some(_)) => {
                return Err(CoreError::invalid_params(
                    "provide either \"text\" or \"key\", not both",
                ))
            }
            (None, None) => {
                return Err(CoreError::invalid_params(
                    "one of \"text\" or \"key\" is required",
                ))
            }
            (Some(text), None) => encode_raw_text(&text),
            (None, Some(key)) => encode_special_key(&key)
                .ok_or_else(|| {
                    CoreError::invalid_params(format!("unknown special key: {key}"))
                })?
                .to_vec(),
        };

        let rid = self.resolve_id(id).await;
        let adapter = self
            .session_adapter(&rid)
            .await
            .ok_or_else(|| CoreError::session_not_found(rid.clone()))?;
        adapter
            .deliver_bytes(&bytes)
            .await
            .map_err(CoreError::internal)
    }

    /// `agent_respond`: answer a permission or question prompt.
    ///
    /// The pending permission is always cleared before the response is
    /// forwarded to the backend.
    pub async fn respond(
        &self,
        id: &str,
        kind: &str,
        response: &str,
        client_id: ClientId,
    ) -> Result<()> {
        let rid = self.resolve_id(id).await;

        let bytes: Vec<u8> = match kind {
            "permission" => {
                let answer = normalize_permission_response(response).ok_or_else(|| {
                    CoreError::invalid_params(format!(
                        "unrecognized permission response: {response}"
                    ))
                })?;
                answer.keystroke().to_vec()
            }
            "question" => encode_raw_text(response),
            other => {
                return Err(CoreError::invalid_params(format!(
                    "unknown respond type: {other}"
                )))
            }
        };

        let adapter = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions
                .get_mut(&rid)
                .ok_or_else(|| CoreError::session_not_found(rid.clone()))?;
            session.pending_permission = None;
            session.status = SessionStatus::Running;
            session.adapter.clone()
        };

        self.publisher
            .session_event(
                &rid,
                Event::new(
                    EVENT_AGENT_PERMISSION_RESOLVED,
                    AgentPermissionResolvedParams {
                        session_id: rid.clone(),
                        client_id,
                        input: response.to_string(),
                    },
                ),
            )
            .await;
        self.publish_state(&rid, SessionStatus::Running).await;

        let adapter = adapter.ok_or_else(|| {
            CoreError::internal(format!("session {rid} has no live backend"))
        })?;
        adapter
            .deliver_bytes(&bytes)
            .await
            .map_err(CoreError::internal)
    }

    /// `agent_watch`: subscribe a client and replay any outstanding prompt.
    pub async fn watch(
        &self,
        client_id: ClientId,
        workspace_id: &str,
        id: &str,
    ) -> Result<String> {
        let rid = self.resolve_id(id).await;
        let pending = {
            let sessions = self.sessions.lock().await;
            let session = sessions
                .get(&rid)
                .ok_or_else(|| CoreError::session_not_found(rid.clone()))?;
            session.pending_permission.clone()
        };

        self.watches
            .watch(client_id, workspace_id.to_string(), rid.clone())
            .await;

        // A watcher arriving mid-prompt sees the same dialog
        if let Some(permission) = pending {
            self.publisher
                .client_event(client_id, permission_event(&rid, &permission))
                .await;
        }

        Ok(rid)
    }

    pub async fn unwatch(&self, client_id: ClientId, id: Option<&str>) {
        let resolved;
        let target = match id {
            Some(raw) => {
                resolved = self.resolve_id(raw).await;
                Some(resolved.as_str())
            }
            None => None,
        };
        self.watches.unwatch(client_id, target).await;
    }

    // --- identity resolution ---

    /// Atomically move a session from its temporary key to the resolved
    /// key. Safe to call more than once per temporary identity: once the
    /// alias exists, further calls are no-ops.
    pub async fn remap_session(&self, old_id: &str, new_id: &str) {
        if old_id == new_id {
            return;
        }
        let (workspace_id, workspace_path) = {
            let mut sessions = self.sessions.lock().await;
            if sessions.contains_key(new_id) {
                return;
            }
            let Some(mut session) = sessions.remove(old_id) else {
                return;
            };
            session.id = new_id.to_string();
            let info = (session.workspace_id.clone(), session.workspace_path.clone());
            sessions.insert(new_id.to_string(), session);
            info
        };

        self.aliases
            .lock()
            .await
            .insert(old_id.to_string(), new_id.to_string());

        // Dedup state and the resolver handle follow the session
        {
            let mut dedup = self.dedup.lock().await;
            if let Some(last) = dedup.remove(old_id) {
                dedup.insert(new_id.to_string(), last);
            }
        }
        {
            let mut resolvers = self.resolvers.lock().await;
            if let Some(handle) = resolvers.remove(old_id) {
                resolvers.insert(new_id.to_string(), handle);
            }
        }
        self.watches.remap_session(old_id, new_id).await;
        self.history.invalidate(&workspace_path);

        info!("[registry] Session {} resolved as {}", old_id, new_id);
        self.publisher
            .session_event(
                new_id,
                Event::new(
                    EVENT_AGENT_SESSION_RESOLVED,
                    AgentSessionResolvedParams {
                        old_session_id: old_id.to_string(),
                        new_session_id: new_id.to_string(),
                        workspace_id,
                        path: workspace_path.to_string_lossy().to_string(),
                    },
                ),
            )
            .await;
    }

    // --- adapter callbacks ---

    /// Process exit: tear down everything the session owns, as one unit.
    pub async fn handle_exit(&self, id: &str, outcome: ExitOutcome) {
        let rid = self.resolve_id(id).await;
        let session = {
            let mut sessions = self.sessions.lock().await;
            sessions.remove(&rid)
        };
        let Some(session) = session else {
            return;
        };

        self.dedup.lock().await.remove(&rid);
        if let Some(handle) = self.resolvers.lock().await.remove(&rid) {
            handle.abort();
        }

        let failed = outcome.is_failure() && !session.stopping;
        let status = if failed {
            SessionStatus::Failed
        } else {
            SessionStatus::Stopped
        };
        if failed {
            warn!(
                "[registry] Session {} failed: {:?} (exit_code={:?})",
                rid, outcome.cause, outcome.exit_code
            );
        } else {
            info!("[registry] Session {} stopped", rid);
        }

        self.publish_state(&rid, status).await;
        // Exit notices go to every client, not just watchers: a client
        // holding a session list needs to drop the dead entry.
        self.publisher
            .broadcast(Event::new(
                EVENT_AGENT_EXITED,
                AgentExitedParams {
                    session_id: rid.clone(),
                    exit_code: outcome.exit_code,
                    cause: outcome.cause,
                },
            ))
            .await;

        self.watches.remove_session(&rid).await;
        self.aliases.lock().await.retain(|_, v| v != &rid);
        self.history.invalidate(&session.workspace_path);
    }

    /// Sanitized, coalesced terminal output from the interactive pump.
    pub async fn publish_output(&self, id: &str, text: String, raw_text: String) {
        let rid = self.resolve_id(id).await;
        let (current, changed) = {
            let mut sessions = self.sessions.lock().await;
            let Some(session) = sessions.get_mut(&rid) else {
                return;
            };
            if matches!(
                session.status,
                SessionStatus::Starting | SessionStatus::Idle
            ) {
                session.status = SessionStatus::Running;
                (SessionStatus::Running, true)
            } else {
                (session.status, false)
            }
        };

        if changed {
            self.publish_state(&rid, current).await;
        }

        // Suppress diagnostic spam from repeated redraw lines; the event
        // stream itself is never filtered.
        if let Some(first_line) = text.lines().find(|l| !l.trim().is_empty()) {
            let mut dedup = self.dedup.lock().await;
            if dedup.get(&rid).map(|s| s.as_str()) != Some(first_line) {
                dedup.insert(rid.clone(), first_line.to_string());
                debug!("[output {}] {}", rid, first_line);
            }
        }

        self.publisher
            .session_event(
                &rid,
                Event::new(
                    EVENT_AGENT_OUTPUT,
                    AgentOutputParams {
                        session_id: rid.clone(),
                        text,
                        raw_text,
                        state: current,
                    },
                ),
            )
            .await;
    }

    /// A framed message from the structured backend.
    pub async fn handle_structured_message(&self, id: &str, message: Value) {
        let rid = self.resolve_id(id).await;

        let new_status = match message.get("type").and_then(|t| t.as_str()) {
            Some("task_started") => Some(SessionStatus::Running),
            Some("task_complete") | Some("idle") => Some(SessionStatus::Idle),
            _ => None,
        };
        if let Some(status) = new_status {
            let updated = {
                let mut sessions = self.sessions.lock().await;
                match sessions.get_mut(&rid) {
                    Some(session) if session.status != status => {
                        session.status = status;
                        true
                    }
                    _ => false,
                }
            };
            if updated {
                self.publish_state(&rid, status).await;
            }
        }

        self.publisher
            .session_event(
                &rid,
                Event::new(
                    EVENT_AGENT_MESSAGE,
                    AgentMessageParams {
                        session_id: rid.clone(),
                        message,
                    },
                ),
            )
            .await;
    }

    /// Prompt detector hit: a permission dialog is on screen.
    pub async fn set_pending_permission(&self, id: &str, permission: PendingPermission) {
        let rid = self.resolve_id(id).await;
        {
            let mut sessions = self.sessions.lock().await;
            let Some(session) = sessions.get_mut(&rid) else {
                return;
            };
            session.pending_permission = Some(permission.clone());
            session.status = SessionStatus::WaitingPermission;
        }
        self.publisher
            .session_event(&rid, permission_event(&rid, &permission))
            .await;
        self.publish_state(&rid, SessionStatus::WaitingPermission)
            .await;
    }

    /// Prompt detector hit: a free-form question awaits an answer.
    pub async fn set_waiting_question(&self, id: &str, question: String) {
        let rid = self.resolve_id(id).await;
        let updated = {
            let mut sessions = self.sessions.lock().await;
            match sessions.get_mut(&rid) {
                Some(session) if session.status != SessionStatus::WaitingQuestion => {
                    session.status = SessionStatus::WaitingQuestion;
                    true
                }
                _ => false,
            }
        };
        if updated {
            debug!("[registry] Session {} waiting on question: {}", rid, question);
            self.publish_state(&rid, SessionStatus::WaitingQuestion).await;
        }
    }

    /// Synthesized assistant text for a failure that never produced a
    /// structured message (e.g. context-window exhaustion on the terminal).
    pub async fn publish_synthetic_message(&self, id: &str, text: String) {
        let rid = self.resolve_id(id).await;
        self.publisher
            .session_event(
                &rid,
                Event::new(
                    EVENT_AGENT_MESSAGE,
                    AgentMessageParams {
                        session_id: rid.clone(),
                        message: json!({
                            "role": "assistant",
                            "content": text,
                            "synthetic": true,
                        }),
                    },
                ),
            )
            .await;
    }

    /// Quiescence: a Running session with no output for the idle window.
    pub async fn mark_idle(&self, id: &str) {
        let rid = self.resolve_id(id).await;
        let updated = {
            let mut sessions = self.sessions.lock().await;
            match sessions.get_mut(&rid) {
                Some(session) if session.status == SessionStatus::Running => {
                    session.status = SessionStatus::Idle;
                    true
                }
                _ => false,
            }
        };
        if updated {
            self.publish_state(&rid, SessionStatus::Idle).await;
        }
    }

    // --- internals ---

    async fn is_live(&self, id: &str) -> bool {
        let sessions = self.sessions.lock().await;
        sessions
            .get(id)
            .map(|s| !s.status.is_terminal())
            .unwrap_or(false)
    }

    async fn session_workspace(&self, id: &str) -> Option<PathBuf> {
        let sessions = self.sessions.lock().await;
        sessions.get(id).map(|s| s.workspace_path.clone())
    }

    async fn live_session_for(&self, path: &Path, backend: BackendKind) -> Option<String> {
        let sessions = self.sessions.lock().await;
        sessions
            .values()
            .find(|s| {
                s.backend == backend && s.workspace_path == path && !s.status.is_terminal()
            })
            .map(|s| s.id.clone())
    }

    async fn deliver_prompt(&self, id: &str, prompt: &str) -> Result<()> {
        let adapter = self
            .session_adapter(id)
            .await
            .ok_or_else(|| CoreError::session_not_found(id.to_string()))?;
        adapter
            .deliver_prompt(prompt)
            .await
            .map_err(CoreError::internal)
    }

    /// Find-or-create under one lock acquisition. Returns the session id,
    /// whether it was created, and (for fresh interactive spawns) the
    /// identity snapshot taken before the spawn.
    async fn ensure_session(
        self: &Arc<Self>,
        workspace_id: &str,
        workspace_path: &Path,
        backend: BackendKind,
        resume: Option<String>,
    ) -> Result<(String, bool, Option<IdentitySnapshot>)> {
        let mut sessions = self.sessions.lock().await;

        match &resume {
            Some(resume_id) => {
                if let Some(session) = sessions.get(resume_id) {
                    if !session.status.is_terminal() {
                        return Ok((resume_id.clone(), false, None));
                    }
                }
            }
            None => {
                if let Some(session) = sessions.values().find(|s| {
                    s.backend == backend
                        && s.workspace_path == workspace_path
                        && !s.status.is_terminal()
                }) {
                    return Ok((session.id.clone(), false, None));
                }
            }
        }

        // Snapshot before the spawn: everything on disk now predates the
        // new process.
        let snapshot = (backend == BackendKind::Interactive && resume.is_none())
            .then(|| IdentitySnapshot::take(&self.history, workspace_path));

        let (adapter, io) = self.spawn_adapter(backend, workspace_path, resume.as_deref())?;
        let session_id = resume.unwrap_or_else(Self::temp_id);
        let session = Session::new(
            session_id.clone(),
            workspace_id.to_string(),
            workspace_path.to_path_buf(),
            backend,
            adapter.clone(),
        );
        sessions.insert(session_id.clone(), session);
        drop(sessions);

        info!(
            "[registry] Session {} created ({} backend, pid={:?})",
            session_id,
            adapter.kind(),
            adapter.pid()
        );

        match io {
            SpawnedIo::Structured(stdout) => {
                structured::start_reader(self.clone(), session_id.clone(), stdout);
            }
            SpawnedIo::Interactive(reader) => {
                interactive::start_io(self.clone(), session_id.clone(), reader);
                if let SessionAdapter::Interactive(pty) = &adapter {
                    interactive::start_wait(self.clone(), session_id.clone(), pty.clone());
                }
            }
        }

        if let Some(snapshot) = &snapshot {
            // One immediate pass; the background watcher covers the rest
            if let Some(new_id) =
                resolver::resolve_once(&self.history, workspace_path, snapshot)
            {
                self.remap_session(&session_id, &new_id).await;
                return Ok((new_id, true, None));
            }
            let handle = resolver::spawn_watcher(
                self.clone(),
                self.history.clone(),
                session_id.clone(),
                workspace_path.to_path_buf(),
                snapshot.clone(),
            );
            self.resolvers
                .lock()
                .await
                .insert(session_id.clone(), handle);
        }

        self.publish_state(&session_id, SessionStatus::Starting).await;
        Ok((session_id, true, snapshot))
    }

    fn spawn_adapter(
        &self,
        backend: BackendKind,
        workspace_path: &Path,
        resume: Option<&str>,
    ) -> Result<(SessionAdapter, SpawnedIo)> {
        match backend {
            BackendKind::Structured => {
                let (adapter, stdout) =
                    structured::StructuredAdapter::spawn(&self.config.structured_bin, workspace_path)
                        .map_err(|e| {
                            classify_launch_error(backend, &self.config.structured_bin, e)
                        })?;
                Ok((
                    SessionAdapter::Structured(Arc::new(adapter)),
                    SpawnedIo::Structured(stdout),
                ))
            }
            BackendKind::Interactive => {
                let (adapter, reader) = interactive::InteractiveAdapter::spawn(
                    &self.config.interactive_bin,
                    workspace_path,
                    resume,
                )
                .map_err(|e| {
                    classify_launch_error(backend, &self.config.interactive_bin, e)
                })?;
                Ok((
                    SessionAdapter::Interactive(Arc::new(adapter)),
                    SpawnedIo::Interactive(reader),
                ))
            }
        }
    }

    /// Bounded resolve after a fresh interactive spawn, so the response
    /// can carry the real identity when it appears quickly. A timeout is
    /// recovered locally: the temporary identity is returned and the
    /// background watcher keeps polling.
    async fn try_bounded_resolve(
        &self,
        session_id: String,
        workspace_path: &Path,
        snapshot: Option<IdentitySnapshot>,
    ) -> String {
        let Some(snapshot) = snapshot else {
            return session_id;
        };
        match resolver::resolve_bounded(
            &self.history,
            workspace_path,
            &snapshot,
            self.config.resolve_timeout,
        )
        .await
        {
            Some(new_id) => {
                self.remap_session(&session_id, &new_id).await;
                new_id
            }
            None => session_id,
        }
    }

    async fn publish_state(&self, session_id: &str, status: SessionStatus) {
        self.publisher
            .session_event(
                session_id,
                Event::new(
                    EVENT_AGENT_STATE,
                    AgentStateParams {
                        session_id: session_id.to_string(),
                        state: status,
                    },
                ),
            )
            .await;
    }

    #[cfg(test)]
    pub(crate) async fn insert_test_session(
        &self,
        id: &str,
        workspace_id: &str,
        workspace_path: &Path,
        backend: BackendKind,
    ) {
        let mut sessions = self.sessions.lock().await;
        sessions.insert(
            id.to_string(),
            Session::new_detached(
                id.to_string(),
                workspace_id.to_string(),
                workspace_path.to_path_buf(),
                backend,
            ),
        );
    }

    #[cfg(test)]
    pub(crate) async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    #[cfg(test)]
    pub(crate) async fn pending_permission(&self, id: &str) -> Option<PendingPermission> {
        let rid = self.resolve_id(id).await;
        let sessions = self.sessions.lock().await;
        sessions.get(&rid).and_then(|s| s.pending_permission.clone())
    }

    #[cfg(test)]
    pub(crate) async fn contains(&self, id: &str) -> bool {
        self.sessions.lock().await.contains_key(id)
    }
}

fn permission_event(session_id: &str, permission: &PendingPermission) -> Event {
    Event::new(
        EVENT_AGENT_PERMISSION,
        AgentPermissionParams {
            session_id: session_id.to_string(),
            kind: permission.kind.clone(),
            target: permission.target.clone(),
            description: permission.description.clone(),
            preview: permission.preview.clone(),
            options: permission.options.clone(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::{BackendConfig, SessionRegistry};
    use crate::error::CoreError;
    use crate::events::{ClientHub, Publisher};
    use crate::history::HistoryIndex;
    use crate::protocol::StartStatus;
    use crate::session::{BackendKind, PendingPermission, PermissionOption, SendMode};
    use crate::watch::WatchTracker;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;

    struct Fixture {
        registry: Arc<SessionRegistry>,
        hub: Arc<ClientHub>,
        history: Arc<HistoryIndex>,
        workspace: PathBuf,
        _tmp: tempfile::TempDir,
    }

    fn fixture(config: BackendConfig) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let workspace = tmp.path().join("ws");
        std::fs::create_dir_all(&workspace).unwrap();

        let history = Arc::new(HistoryIndex::new(tmp.path().join("history")));
        let hub = Arc::new(ClientHub::new());
        let watches = Arc::new(WatchTracker::new());
        let publisher = Publisher::new(hub.clone(), watches.clone());
        let registry = SessionRegistry::new(history.clone(), publisher, watches, config);

        Fixture {
            registry,
            hub,
            history,
            workspace,
            _tmp: tmp,
        }
    }

    fn fast_config() -> BackendConfig {
        BackendConfig {
            structured_bin: "cat".to_string(),
            interactive_bin: "cat".to_string(),
            resolve_timeout: Duration::ZERO,
        }
    }

    fn sample_permission() -> PendingPermission {
        PendingPermission {
            kind: "command".to_string(),
            target: Some("cargo test".to_string()),
            description: "Do you want to run `cargo test`?".to_string(),
            preview: None,
            options: vec![
                PermissionOption {
                    key: "1".to_string(),
                    label: "Yes".to_string(),
                    description: None,
                    selected: true,
                },
                PermissionOption {
                    key: "2".to_string(),
                    label: "No".to_string(),
                    description: None,
                    selected: false,
                },
            ],
        }
    }

    #[tokio::test]
    async fn remap_is_idempotent() {
        let f = fixture(fast_config());
        f.registry
            .insert_test_session("pending-x", "/ws", Path::new("/ws"), BackendKind::Interactive)
            .await;

        f.registry.remap_session("pending-x", "real-id").await;
        f.registry.remap_session("pending-x", "real-id").await;

        assert_eq!(f.registry.session_count().await, 1);
        assert!(f.registry.contains("real-id").await);
        assert!(!f.registry.contains("pending-x").await);
        assert_eq!(f.registry.resolve_id("pending-x").await, "real-id");
    }

    #[tokio::test]
    async fn stop_twice_is_a_noop() {
        let f = fixture(fast_config());
        f.registry
            .insert_test_session("sess", "/ws", Path::new("/ws"), BackendKind::Interactive)
            .await;

        f.registry.stop("sess").await.unwrap();
        f.registry.stop("sess").await.unwrap();
        // Stopping an unknown identity is also fine
        f.registry.stop("never-existed").await.unwrap();
    }

    #[tokio::test]
    async fn respond_clears_pending_before_forwarding() {
        let f = fixture(fast_config());
        f.registry
            .insert_test_session("sess", "/ws", Path::new("/ws"), BackendKind::Interactive)
            .await;
        f.registry
            .set_pending_permission("sess", sample_permission())
            .await;
        assert!(f.registry.pending_permission("sess").await.is_some());

        // The detached test session has no backend to forward to; the
        // pending permission must be gone regardless.
        let result = f.registry.respond("sess", "permission", "yes", 7).await;
        assert!(matches!(result, Err(CoreError::Internal(_))));
        assert!(f.registry.pending_permission("sess").await.is_none());
    }

    #[tokio::test]
    async fn respond_rejects_unknown_type() {
        let f = fixture(fast_config());
        f.registry
            .insert_test_session("sess", "/ws", Path::new("/ws"), BackendKind::Interactive)
            .await;
        let result = f.registry.respond("sess", "telepathy", "yes", 1).await;
        assert!(matches!(result, Err(CoreError::InvalidParams(_))));
    }

    #[tokio::test]
    async fn watch_replays_outstanding_permission() {
        let f = fixture(fast_config());
        f.registry
            .insert_test_session("sess", "/ws", Path::new("/ws"), BackendKind::Interactive)
            .await;
        f.registry
            .set_pending_permission("sess", sample_permission())
            .await;

        let (client_id, mut rx) = f.hub.register().await;
        f.registry.watch(client_id, "/ws", "sess").await.unwrap();

        let line = rx.recv().await.expect("replayed permission");
        assert!(line.contains("agent_permission"));
        assert!(line.contains("cargo test"));
    }

    #[tokio::test]
    async fn start_with_unknown_identity_reports_not_found() {
        let f = fixture(fast_config());
        let result = f
            .registry
            .start(
                "/ws",
                &f.workspace,
                BackendKind::Interactive,
                Some("no-such-session".to_string()),
            )
            .await
            .unwrap();

        assert_eq!(result.status, StartStatus::NotFound);
        assert!(result.session_id.is_none());
        assert_eq!(f.registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn concurrent_sends_share_one_session() {
        let f = fixture(fast_config());

        let (a, b) = tokio::join!(
            f.registry.send(
                "/ws",
                &f.workspace,
                None,
                "first prompt",
                SendMode::New,
                BackendKind::Structured,
            ),
            f.registry.send(
                "/ws",
                &f.workspace,
                None,
                "second prompt",
                SendMode::New,
                BackendKind::Structured,
            ),
        );

        let (id_a, created_a) = a.unwrap();
        let (id_b, created_b) = b.unwrap();
        assert_eq!(id_a, id_b);
        assert_eq!(f.registry.session_count().await, 1);
        // Exactly one of the calls created the session
        assert!(created_a ^ created_b);
    }

    #[tokio::test]
    async fn continue_without_history_fails_explicitly() {
        let f = fixture(fast_config());
        let result = f
            .registry
            .send(
                "/ws",
                &f.workspace,
                None,
                "prompt",
                SendMode::Continue,
                BackendKind::Interactive,
            )
            .await;
        assert!(matches!(result, Err(CoreError::SessionNotFound(_))));
        assert_eq!(f.registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn missing_backend_is_agent_not_configured() {
        let mut config = fast_config();
        config.structured_bin = "definitely-not-installed-43b1".to_string();
        let f = fixture(config);

        let result = f
            .registry
            .start("/ws", &f.workspace, BackendKind::Structured, None)
            .await;
        assert!(matches!(
            result,
            Err(CoreError::AgentNotConfigured { .. })
        ));
        assert_eq!(f.registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn interactive_spawn_resolves_identity_from_history() {
        let f = fixture(fast_config());

        let result = f
            .registry
            .start("/ws", &f.workspace, BackendKind::Interactive, None)
            .await
            .unwrap();
        assert_eq!(result.status, StartStatus::Spawned);
        let temp_id = result.session_id.unwrap();
        assert!(!result.resolved);

        // The agent writes its transcript; the background watcher picks
        // the new identity up on its next poll.
        let dir = f.history.project_dir(&f.workspace);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("real-abc.jsonl"), r#"{"type":"user"}"#).unwrap();

        let mut resolved = String::new();
        for _ in 0..12 {
            tokio::time::sleep(Duration::from_millis(250)).await;
            resolved = f.registry.resolve_id(&temp_id).await;
            if resolved != temp_id {
                break;
            }
        }
        assert_eq!(resolved, "real-abc");
        assert!(f.registry.contains("real-abc").await);
        assert!(!f.registry.contains(&temp_id).await);

        // Teardown: stop escalates interrupt → kill; the wait task
        // removes the session once the process exits.
        f.registry.stop("real-abc").await.unwrap();
        let mut gone = false;
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(250)).await;
            if !f.registry.contains("real-abc").await {
                gone = true;
                break;
            }
        }
        assert!(gone, "session survived stop");
    }
}
