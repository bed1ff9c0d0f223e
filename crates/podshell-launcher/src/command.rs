use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::process::Command;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::process::{parse_line, spawn_piped, ExitTail, OutputLine, Parsed};
use crate::types::{ProcessOutput, StreamEvent};
use crate::{Failure, LauncherError, Result};

/// Set on every spawned process so the CLI knows it is driven by a UI.
pub const UI_ENV_VAR: &str = "DEVPOD_UI";
pub const DEBUG_FLAG: &str = "--debug";

/// Receives every event of a streamed command, in emission order.
pub type EventSink = Box<dyn FnMut(StreamEvent) + Send>;

// ─── Operation ────────────────────────────────────────────────────────────

/// A long-running external operation whose output can be streamed.
///
/// [`CliCommand`] is the production implementation; the command cache only
/// ever sees this trait.
pub trait Operation: Send + Sync {
    /// Start the operation and deliver its events to `sink` until it settles.
    fn stream(&self, sink: EventSink) -> BoxFuture<'_, std::result::Result<(), Failure>>;

    /// Ask the operation to stop. Best-effort.
    fn cancel(&self) -> BoxFuture<'_, std::result::Result<(), Failure>>;
}

// ─── LaunchConfig ─────────────────────────────────────────────────────────

/// Everything needed to start the external CLI, shared by all commands.
#[derive(Debug, Clone, Default)]
pub struct LaunchConfig {
    pub binary: PathBuf,
    /// Append `--debug` to commands that support it.
    pub debug: bool,
    /// Additional environment variables for every process.
    pub env: Vec<(String, String)>,
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
    pub no_proxy: Option<String>,
}

impl LaunchConfig {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            ..Default::default()
        }
    }

    /// Resolve a binary name against `PATH`. Anything containing a path
    /// separator is taken as-is.
    pub fn resolve_binary(name: &Path) -> Result<PathBuf> {
        if name.components().count() > 1 {
            return Ok(name.to_path_buf());
        }
        which::which(name).map_err(|source| LauncherError::BinaryNotFound {
            name: name.display().to_string(),
            source,
        })
    }

    /// Add `KEY=VALUE` pairs from a comma-separated list. Malformed entries
    /// are ignored.
    pub fn with_additional_env(mut self, raw: &str) -> Self {
        self.env.extend(parse_env_pairs(raw));
        self
    }

    fn environment(&self) -> Vec<(String, String)> {
        let mut env = self.env.clone();
        let proxies = [
            ("HTTP_PROXY", &self.http_proxy),
            ("HTTPS_PROXY", &self.https_proxy),
            ("NO_PROXY", &self.no_proxy),
        ];
        for (key, value) in proxies {
            if let Some(value) = value.as_ref().filter(|v| !v.is_empty()) {
                env.push((key.to_string(), value.clone()));
            }
        }
        env.push((UI_ENV_VAR.to_string(), "true".to_string()));
        env
    }
}

pub fn parse_env_pairs(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

// ─── CliCommand ───────────────────────────────────────────────────────────

/// One invocation of the external CLI.
///
/// A command is either executed to completion with [`CliCommand::run`] or
/// streamed with [`CliCommand::stream`]. Cancellation only affects streamed
/// commands: the child is killed and the stream settles as cancelled.
pub struct CliCommand {
    config: Arc<LaunchConfig>,
    args: Vec<String>,
    cancelled: AtomicBool,
    cancel_signal: Notify,
}

impl CliCommand {
    pub fn new(config: Arc<LaunchConfig>, args: Vec<String>) -> Self {
        Self {
            config,
            args,
            cancelled: AtomicBool::new(false),
            cancel_signal: Notify::new(),
        }
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    fn binary_name(&self) -> String {
        self.config.binary.display().to_string()
    }

    fn build(&self) -> Command {
        let mut cmd = Command::new(&self.config.binary);
        cmd.args(&self.args);
        for (key, value) in self.config.environment() {
            cmd.env(key, value);
        }
        cmd
    }

    /// Execute the command to completion and capture its output.
    ///
    /// A non-zero exit is *not* a failure here; callers inspect
    /// [`ProcessOutput::is_ok`] themselves.
    pub async fn run(&self) -> std::result::Result<ProcessOutput, Failure> {
        debug!(args = ?self.args, "running command");
        let output = self
            .build()
            .output()
            .await
            .map_err(|source| LauncherError::Spawn {
                binary: self.binary_name(),
                source,
            })?;

        let result = ProcessOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(args = ?self.args, code = ?result.code, "command finished");
        Ok(result)
    }

    /// Spawn the command and forward every parsed log line to `sink`.
    ///
    /// Malformed lines are logged and skipped. Resolves when the process
    /// exits, when it reports `{"done": "true"}`, or when it is cancelled.
    pub async fn stream(&self, mut sink: EventSink) -> std::result::Result<(), Failure> {
        if self.is_cancelled() {
            return Err(Failure::cancelled("command already cancelled"));
        }

        debug!(args = ?self.args, "streaming command");
        let mut piped = spawn_piped(self.build(), &self.binary_name())?;
        let mut tail = ExitTail::default();

        loop {
            tokio::select! {
                _ = self.cancel_signal.notified() => {
                    let _ = piped.child.kill().await;
                    debug!(args = ?self.args, "command cancelled");
                    return Err(Failure::cancelled("command cancelled"));
                }
                line = piped.lines.recv() => {
                    let Some(line) = line else { break };
                    let event = match line {
                        OutputLine::Stdout(text) => match parse_line(&text) {
                            Ok(Parsed::Done) => {
                                debug!(args = ?self.args, "command reported done");
                                return Ok(());
                            }
                            Ok(Parsed::Log(data)) => StreamEvent::Data { data },
                            Ok(Parsed::Blank) => continue,
                            Err(e) => {
                                warn!(error = %e, "failed to parse stdout message");
                                continue;
                            }
                        },
                        OutputLine::Stderr(text) => match parse_line(&text) {
                            Ok(Parsed::Log(error)) => StreamEvent::Error { error },
                            Ok(_) => continue,
                            Err(e) => {
                                warn!(error = %e, "failed to parse stderr message");
                                continue;
                            }
                        },
                    };
                    tail.record(&event);
                    sink(event);
                }
            }
        }

        let status = piped.child.wait().await.map_err(LauncherError::Io)?;
        if self.is_cancelled() {
            return Err(Failure::cancelled("command cancelled"));
        }
        if status.success() {
            Ok(())
        } else {
            let failure = tail.into_failure(status.code());
            debug!(args = ?self.args, code = ?status.code(), "command failed");
            Err(failure)
        }
    }

    /// Mark the command cancelled and kill the child if one is streaming.
    pub fn cancel_now(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.cancel_signal.notify_one();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Operation for CliCommand {
    fn stream(&self, sink: EventSink) -> BoxFuture<'_, std::result::Result<(), Failure>> {
        Box::pin(CliCommand::stream(self, sink))
    }

    fn cancel(&self) -> BoxFuture<'_, std::result::Result<(), Failure>> {
        self.cancel_now();
        Box::pin(async { Ok(()) })
    }
}
