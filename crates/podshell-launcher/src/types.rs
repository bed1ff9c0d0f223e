use serde::{Deserialize, Serialize};

/// One structured log record emitted by the workspace CLI.
///
/// Only `message` is required; `level` and `time` are present on every line
/// the CLI writes with `--log-output=json`. Anything else is kept verbatim in
/// `fields` so it survives a round trip through the action log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl LogLine {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            level: None,
            message: message.into(),
            time: None,
            fields: serde_json::Map::new(),
        }
    }

    pub fn at(mut self, time: impl Into<String>) -> Self {
        self.time = Some(time.into());
        self
    }
}

/// A single event of a streamed command: stdout lines are `data`, stderr
/// lines are `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Data { data: LogLine },
    Error { error: LogLine },
}

impl StreamEvent {
    pub fn log(&self) -> &LogLine {
        match self {
            StreamEvent::Data { data } => data,
            StreamEvent::Error { error } => error,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, StreamEvent::Error { .. })
    }
}

/// Captured output of a command executed to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn is_ok(&self) -> bool {
        self.code == Some(0)
    }
}
