use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LauncherError {
    #[error("failed to spawn '{binary}': {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse log line: {source}\n  line: {line}")]
    Parse {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("process error: {0}")]
    Process(String),

    #[error("binary '{name}' not found: {source}")]
    BinaryNotFound {
        name: String,
        #[source]
        source: which::Error,
    },
}

// ─── Failure ──────────────────────────────────────────────────────────────

/// Machine-readable classification of a [`Failure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The command was cancelled before or while running.
    Cancelled,
    /// The process exited with a non-zero code.
    Exit,
    /// The process could not be started.
    Spawn,
    /// Output could not be decoded.
    Parse,
    /// Anything else: I/O errors, panicked tasks.
    Internal,
}

/// The failure half of every fallible settlement in podshell.
///
/// Unlike [`LauncherError`] this is a plain value: it is `Clone` so one
/// settlement can be handed to every observer of a shared operation, and it
/// serialises into action history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct Failure {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<FailureKind>,
}

impl Failure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            reason: None,
            kind: None,
        }
    }

    pub fn with_kind(mut self, kind: FailureKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(message).with_kind(FailureKind::Cancelled)
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == Some(FailureKind::Cancelled)
    }
}

impl From<LauncherError> for Failure {
    fn from(err: LauncherError) -> Self {
        let kind = match &err {
            LauncherError::Spawn { .. } | LauncherError::BinaryNotFound { .. } => {
                FailureKind::Spawn
            }
            LauncherError::Parse { .. } => FailureKind::Parse,
            LauncherError::Io(_) | LauncherError::Process(_) => FailureKind::Internal,
        };
        Failure::new(err.to_string()).with_kind(kind)
    }
}
