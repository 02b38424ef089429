//! The closed set of backend adapters.
//!
//! Two subprocess integration models behind one capability surface:
//! deliver input, interrupt, kill. Selection happens once per session by
//! an explicit kind tag, not open-ended plugin dispatch.

use std::sync::Arc;

use super::interactive::InteractiveAdapter;
use super::structured::StructuredAdapter;
use super::BackendKind;

#[derive(Clone)]
pub enum SessionAdapter {
    Structured(Arc<StructuredAdapter>),
    Interactive(Arc<InteractiveAdapter>),
}

impl SessionAdapter {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Structured(_) => BackendKind::Structured,
            Self::Interactive(_) => BackendKind::Interactive,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        match self {
            Self::Structured(a) => a.pid(),
            Self::Interactive(a) => a.pid(),
        }
    }

    /// Deliver a user prompt in the backend's native form: a framed JSON
    /// message for the structured backend, a bracketed paste for the PTY.
    pub async fn deliver_prompt(&self, prompt: &str) -> Result<(), String> {
        match self {
            Self::Structured(a) => a.send_user_input(prompt).await,
            Self::Interactive(a) => a.write(&super::input::encode_prompt(prompt)).await,
        }
    }

    /// Deliver raw terminal bytes. Only meaningful for the PTY backend;
    /// the structured backend has no keyboard.
    pub async fn deliver_bytes(&self, bytes: &[u8]) -> Result<(), String> {
        match self {
            Self::Structured(_) => {
                Err("raw input is not supported by the structured backend".to_string())
            }
            Self::Interactive(a) => a.write(bytes).await,
        }
    }

    /// Graceful interrupt; `kill` is the timed escalation.
    pub async fn interrupt(&self) -> Result<(), String> {
        match self {
            Self::Structured(a) => a.interrupt().await,
            Self::Interactive(a) => a.interrupt().await,
        }
    }

    pub async fn kill(&self) {
        match self {
            Self::Structured(a) => a.kill().await,
            Self::Interactive(a) => a.kill().await,
        }
    }

    /// Non-blocking exit probe: `Some(code)` once the process has exited.
    pub async fn try_wait(&self) -> Option<Option<i32>> {
        match self {
            Self::Structured(a) => a.try_wait().await,
            Self::Interactive(a) => a.try_wait().await,
        }
    }
}
