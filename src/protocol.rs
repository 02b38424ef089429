use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::{BackendKind, PermissionOption, SendMode, SessionStatus};

/// JSON-RPC request from client
#[derive(Debug, Deserialize)]
pub struct Request {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// JSON-RPC success response
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub id: u64,
    pub result: Value,
}

/// JSON-RPC error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub id: u64,
    pub error: RpcError,
}

/// Error details
#[derive(Debug, Serialize)]
pub struct RpcError {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Server→Client event (no id)
#[derive(Debug, Serialize)]
pub struct Event {
    pub method: &'static str,
    pub params: Value,
}

// Error codes
pub const AUTH_REQUIRED: &str = "auth_required";
pub const AUTH_FAILED: &str = "auth_failed";
pub const INVALID_PARAMS: &str = "invalid_params";
pub const WORKSPACE_NOT_FOUND: &str = "workspace_not_found";
pub const SESSION_NOT_FOUND: &str = "session_not_found";
pub const AGENT_NOT_CONFIGURED: &str = "agent_not_configured";
pub const GIT_ERROR: &str = "git_error";
pub const INTERNAL_ERROR: &str = "internal_error";

// Method names
pub const METHOD_AUTH: &str = "auth";
pub const METHOD_WORKSPACE_LIST: &str = "workspace_list";
pub const METHOD_WORKSPACE_INFO: &str = "workspace_info";
pub const METHOD_AGENT_START: &str = "agent_start";
pub const METHOD_AGENT_SEND: &str = "agent_send";
pub const METHOD_AGENT_STOP: &str = "agent_stop";
pub const METHOD_AGENT_INPUT: &str = "agent_input";
pub const METHOD_AGENT_RESPOND: &str = "agent_respond";
pub const METHOD_AGENT_WATCH: &str = "agent_watch";
pub const METHOD_AGENT_UNWATCH: &str = "agent_unwatch";
pub const METHOD_AGENT_LIST: &str = "agent_list";
pub const METHOD_HISTORY_LIST: &str = "history_list";
pub const METHOD_GIT_STATUS: &str = "git_status";
pub const METHOD_GIT_DIFF: &str = "git_diff";
pub const METHOD_GIT_LOG: &str = "git_log";
pub const METHOD_FILE_LIST: &str = "file_list";

// Event names
pub const EVENT_AGENT_OUTPUT: &str = "agent_output";
pub const EVENT_AGENT_STATE: &str = "agent_state";
pub const EVENT_AGENT_PERMISSION: &str = "agent_permission";
pub const EVENT_AGENT_PERMISSION_RESOLVED: &str = "agent_permission_resolved";
pub const EVENT_AGENT_SESSION_RESOLVED: &str = "agent_session_resolved";
pub const EVENT_AGENT_MESSAGE: &str = "agent_message";
pub const EVENT_AGENT_EXITED: &str = "agent_exited";

// --- Request params ---

#[derive(Debug, Deserialize)]
pub struct AuthParams {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct WorkspaceIdParams {
    pub workspace_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AgentStartParams {
    pub workspace_id: String,
    #[serde(default)]
    pub backend: BackendKind,
    /// Existing session identity to attach to, if known
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AgentSendParams {
    pub workspace_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    pub prompt: String,
    #[serde(default)]
    pub mode: SendMode,
    #[serde(default)]
    pub backend: BackendKind,
}

#[derive(Debug, Deserialize)]
pub struct AgentStopParams {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AgentInputParams {
    pub session_id: String,
    /// Raw text input (a trailing carriage return is appended when missing)
    #[serde(default)]
    pub text: Option<String>,
    /// Named special key ("up", "escape", "tab", ...)
    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AgentRespondParams {
    pub session_id: String,
    /// "permission" or "question"
    #[serde(rename = "type")]
    pub kind: String,
    pub response: String,
}

#[derive(Debug, Deserialize)]
pub struct AgentWatchParams {
    pub workspace_id: String,
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AgentUnwatchParams {
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GitLogParams {
    pub workspace_id: String,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct FileListParams {
    pub workspace_id: String,
    /// Subdirectory relative to the workspace root
    #[serde(default)]
    pub path: Option<String>,
}

// --- Response types ---

#[derive(Debug, Serialize)]
pub struct AuthResult {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceInfo {
    pub path: String,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct WorkspaceInfoResult {
    pub path: String,
    pub name: String,
    pub has_git: bool,
}

/// Outcome tag for `agent_start`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartStatus {
    Attached,
    Spawned,
    NotFound,
}

#[derive(Debug, Serialize)]
pub struct AgentStartResult {
    pub status: StartStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// True when the backend-issued identity was resolved before returning
    pub resolved: bool,
}

#[derive(Debug, Serialize)]
pub struct AgentSendResult {
    pub session_id: String,
    pub created: bool,
}

#[derive(Debug, Serialize)]
pub struct AgentWatchResult {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GitFileStatus {
    pub path: String,
    pub status: String,
    pub additions: i32,
    pub deletions: i32,
}

#[derive(Debug, Serialize)]
pub struct GitStatusResult {
    pub branch_name: String,
    pub staged_files: Vec<GitFileStatus>,
    pub unstaged_files: Vec<GitFileStatus>,
    pub total_additions: i32,
    pub total_deletions: i32,
}

#[derive(Debug, Serialize)]
pub struct GitFileDiff {
    pub path: String,
    pub diff: String,
}

#[derive(Debug, Serialize)]
pub struct GitDiffResult {
    pub files: Vec<GitFileDiff>,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub truncated_files: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct GitLogEntry {
    pub sha: String,
    pub summary: String,
    pub author: String,
    pub timestamp: i64,
}

#[derive(Debug, Serialize)]
pub struct GitLogResult {
    pub entries: Vec<GitLogEntry>,
    pub ahead: i32,
    pub behind: i32,
    pub upstream: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub kind: String,
    pub size: u64,
}

#[derive(Debug, Serialize)]
pub struct FileListResult {
    pub entries: Vec<FileEntry>,
}

// --- Event params ---

#[derive(Debug, Serialize)]
pub struct AgentOutputParams {
    pub session_id: String,
    pub text: String,
    pub raw_text: String,
    pub state: SessionStatus,
}

#[derive(Debug, Serialize)]
pub struct AgentStateParams {
    pub session_id: String,
    pub state: SessionStatus,
}

#[derive(Debug, Serialize)]
pub struct AgentPermissionParams {
    pub session_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
    pub options: Vec<PermissionOption>,
}

#[derive(Debug, Serialize)]
pub struct AgentPermissionResolvedParams {
    pub session_id: String,
    pub client_id: u64,
    pub input: String,
}

#[derive(Debug, Serialize)]
pub struct AgentSessionResolvedParams {
    pub old_session_id: String,
    pub new_session_id: String,
    pub workspace_id: String,
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct AgentMessageParams {
    pub session_id: String,
    pub message: Value,
}

#[derive(Debug, Serialize)]
pub struct AgentExitedParams {
    pub session_id: String,
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

// --- Helpers ---

impl SuccessResponse {
    pub fn new<T: Serialize>(id: u64, result: T) -> Self {
        Self {
            id,
            result: serde_json::to_value(result).unwrap_or(Value::Null),
        }
    }
}

impl ErrorResponse {
    pub fn new(id: u64, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            id,
            error: RpcError {
                code,
                message: message.into(),
                data: None,
            },
        }
    }

    pub fn with_data(id: u64, code: &'static str, message: impl Into<String>, data: Value) -> Self {
        Self {
            id,
            error: RpcError {
                code,
                message: message.into(),
                data: Some(data),
            },
        }
    }
}

impl Event {
    pub fn new<T: Serialize>(method: &'static str, params: T) -> Self {
        Self {
            method,
            params: serde_json::to_value(params).unwrap_or(Value::Null),
        }
    }

    /// Serialize for the newline-delimited wire format
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        AgentSendParams, AgentStartResult, ErrorResponse, Event, Request, StartStatus,
        SuccessResponse, AUTH_FAILED, EVENT_AGENT_OUTPUT,
    };
    use crate::session::SendMode;
    use serde_json::json;

    #[test]
    fn request_defaults_params_to_null() {
        let request: Request =
            serde_json::from_str(r#"{"id":1,"method":"auth"}"#).expect("request to parse");
        assert_eq!(request.id, 1);
        assert_eq!(request.method, "auth");
        assert_eq!(request.params, json!(null));
    }

    #[test]
    fn success_response_serializes_result() {
        let response = SuccessResponse::new(2, json!({"ok": true}));
        let value = serde_json::to_value(response).expect("response to serialize");
        assert_eq!(value.get("id"), Some(&json!(2)));
        assert_eq!(value.get("result"), Some(&json!({"ok": true})));
    }

    #[test]
    fn error_response_omits_empty_data() {
        let response = ErrorResponse::new(3, AUTH_FAILED, "nope");
        let value = serde_json::to_value(response).expect("error to serialize");
        let error = value.get("error").expect("error field");
        assert_eq!(error.get("code"), Some(&json!(AUTH_FAILED)));
        assert!(error.get("data").is_none());
    }

    #[test]
    fn error_response_carries_data_payload() {
        let response = ErrorResponse::with_data(
            4,
            super::AGENT_NOT_CONFIGURED,
            "claude not installed",
            json!({"method": "agent_start", "backend": "interactive"}),
        );
        let value = serde_json::to_value(response).expect("error to serialize");
        let data = value
            .get("error")
            .and_then(|e| e.get("data"))
            .expect("data payload");
        assert_eq!(data.get("backend"), Some(&json!("interactive")));
    }

    #[test]
    fn event_serializes_params() {
        let event = Event::new(EVENT_AGENT_OUTPUT, json!({"text": "hi"}));
        let value = serde_json::to_value(event).expect("event to serialize");
        assert_eq!(value.get("method"), Some(&json!(EVENT_AGENT_OUTPUT)));
        assert_eq!(value.get("params"), Some(&json!({"text": "hi"})));
    }

    #[test]
    fn send_params_default_mode_is_new() {
        let params: AgentSendParams = serde_json::from_value(json!({
            "workspace_id": "/tmp/ws",
            "prompt": "hello"
        }))
        .expect("params to parse");
        assert_eq!(params.mode, SendMode::New);
        assert!(params.session_id.is_none());
    }

    #[test]
    fn start_result_omits_missing_session_id() {
        let result = AgentStartResult {
            status: StartStatus::NotFound,
            session_id: None,
            resolved: false,
        };
        let value = serde_json::to_value(result).expect("result to serialize");
        assert_eq!(value.get("status"), Some(&json!("not_found")));
        assert!(value.get("session_id").is_none());
    }
}
