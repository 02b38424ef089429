//! Classified errors for the session orchestration core

use serde_json::{json, Value};
use thiserror::Error;

use crate::protocol;
use crate::session::BackendKind;

/// Errors returned synchronously from registry operations.
///
/// Asynchronous backend failures (process exit, write failures on a dead
/// terminal) are not represented here; they become session state
/// transitions and events instead.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Missing or malformed request fields
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// Backend executable absent, so the session can never start
    #[error("{backend} agent not configured: {message}")]
    AgentNotConfigured {
        backend: BackendKind,
        message: String,
    },

    /// Identity does not resolve to a live or historical session
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Process launch / I-O failures not otherwise classified
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::InvalidParams(msg.into())
    }

    pub fn session_not_found(id: impl Into<String>) -> Self {
        Self::SessionNotFound(id.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Wire error code for this error
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidParams(_) => protocol::INVALID_PARAMS,
            Self::AgentNotConfigured { .. } => protocol::AGENT_NOT_CONFIGURED,
            Self::SessionNotFound(_) => protocol::SESSION_NOT_FOUND,
            Self::Internal(_) => protocol::INTERNAL_ERROR,
        }
    }

    /// Structured payload attached to the wire error, if any.
    ///
    /// `AgentNotConfigured` names the method and backend so a client can
    /// tell "tool not installed" apart from a transient fault.
    pub fn data(&self, method: &str) -> Option<Value> {
        match self {
            Self::AgentNotConfigured { backend, .. } => Some(json!({
                "method": method,
                "backend": backend,
            })),
            _ => None,
        }
    }
}

/// Classify a process launch failure.
///
/// Executable-not-found causes become `AgentNotConfigured`; everything
/// else stays `Internal`. The remediation differs: install the tool vs.
/// retry.
pub fn classify_launch_error(backend: BackendKind, bin: &str, message: String) -> CoreError {
    let lower = message.to_lowercase();
    let missing = lower.contains("no such file")
        || lower.contains("not found")
        || lower.contains("cannot find")
        || which::which(bin).is_err();

    if missing {
        CoreError::AgentNotConfigured {
            backend,
            message: format!("executable '{bin}' not found: {message}"),
        }
    } else {
        CoreError::Internal(message)
    }
}

#[cfg(test)]
mod tests {
    use super::{classify_launch_error, CoreError};
    use crate::session::BackendKind;

    #[test]
    fn missing_executable_is_reclassified() {
        let err = classify_launch_error(
            BackendKind::Interactive,
            "definitely-not-a-real-binary-9f2d",
            "No such file or directory (os error 2)".to_string(),
        );
        assert!(matches!(err, CoreError::AgentNotConfigured { .. }));
        assert_eq!(err.code(), crate::protocol::AGENT_NOT_CONFIGURED);
    }

    #[test]
    fn not_configured_data_names_method_and_backend() {
        let err = CoreError::AgentNotConfigured {
            backend: BackendKind::Structured,
            message: "missing".to_string(),
        };
        let data = err.data("agent_send").expect("data payload");
        assert_eq!(data["method"], "agent_send");
        assert_eq!(data["backend"], "structured");
    }

    #[test]
    fn invalid_params_has_no_data() {
        let err = CoreError::invalid_params("bad");
        assert!(err.data("agent_start").is_none());
        assert_eq!(err.code(), crate::protocol::INVALID_PARAMS);
    }
}
