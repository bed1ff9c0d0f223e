use std::collections::VecDeque;
use std::process::Stdio;

use chrono::{DateTime, FixedOffset};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::warn;

use crate::types::{LogLine, StreamEvent};
use crate::{Failure, FailureKind, LauncherError, Result};

/// How many trailing log messages are kept to explain a non-zero exit.
const TAIL_LINES: usize = 10;

// ─── Line parsing ─────────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
pub(crate) enum Parsed {
    Blank,
    /// The CLI signals `{"done": "true"}` when it stays alive (e.g. port
    /// forwarding) but has nothing more to report.
    Done,
    Log(LogLine),
}

pub(crate) fn parse_line(line: &str) -> Result<Parsed> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(Parsed::Blank);
    }
    let parse_err = |source| LauncherError::Parse {
        line: trimmed.to_owned(),
        source,
    };
    let value: serde_json::Value = serde_json::from_str(trimmed).map_err(parse_err)?;
    if value.get("done").and_then(serde_json::Value::as_str) == Some("true") {
        return Ok(Parsed::Done);
    }
    let log = serde_json::from_value(value).map_err(parse_err)?;
    Ok(Parsed::Log(log))
}

// ─── PipedChild ───────────────────────────────────────────────────────────

#[derive(Debug)]
pub(crate) enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// A spawned child whose stdout and stderr are merged, line by line, into a
/// single channel. Each pipe is drained by its own background task; the
/// channel closes once both pipes hit EOF.
pub(crate) struct PipedChild {
    pub(crate) child: Child,
    pub(crate) lines: mpsc::UnboundedReceiver<OutputLine>,
}

pub(crate) fn spawn_piped(mut cmd: Command, binary: &str) -> Result<PipedChild> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|source| LauncherError::Spawn {
        binary: binary.to_owned(),
        source,
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| LauncherError::Process("stdout not captured".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| LauncherError::Process("stderr not captured".into()))?;

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(drain(stdout, tx.clone(), OutputLine::Stdout));
    tokio::spawn(drain(stderr, tx, OutputLine::Stderr));

    Ok(PipedChild { child, lines: rx })
}

/// Forward every line of `pipe` until EOF. Bytes that are not UTF-8 are
/// replaced rather than ending the read, so the pipe never fills up and
/// later lines still arrive.
async fn drain<R>(
    pipe: R,
    tx: mpsc::UnboundedSender<OutputLine>,
    wrap: fn(String) -> OutputLine,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                if tx.send(wrap(line.to_owned())).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to read command output");
                break;
            }
        }
    }
}

// ─── ExitTail ─────────────────────────────────────────────────────────────

/// The last meaningful messages of each pipe, used to describe a failed run.
#[derive(Debug, Default)]
pub(crate) struct ExitTail {
    stdout: VecDeque<LogLine>,
    stderr: VecDeque<LogLine>,
}

impl ExitTail {
    pub(crate) fn record(&mut self, event: &StreamEvent) {
        let (buf, log) = match event {
            StreamEvent::Data { data } => (&mut self.stdout, data),
            StreamEvent::Error { error } => (&mut self.stderr, error),
        };
        if log.message.trim().is_empty() {
            return;
        }
        if buf.len() == TAIL_LINES {
            buf.pop_front();
        }
        buf.push_back(log.clone());
    }

    /// Build the failure for a non-zero exit. Stderr wins over stdout; lines
    /// are ordered by their timestamp when every line has an RFC 3339 one,
    /// otherwise they keep emission order.
    pub(crate) fn into_failure(self, code: Option<i32>) -> Failure {
        let mut lines: Vec<LogLine> = if self.stderr.is_empty() {
            self.stdout.into()
        } else {
            self.stderr.into()
        };
        let times: Option<Vec<DateTime<FixedOffset>>> = lines
            .iter()
            .map(|l| DateTime::parse_from_rfc3339(l.time.as_deref()?).ok())
            .collect();
        if let Some(times) = times {
            let mut timed: Vec<_> = times.into_iter().zip(lines).collect();
            timed.sort_by_key(|(time, _)| *time);
            lines = timed.into_iter().map(|(_, line)| line).collect();
        }

        let exit = match code {
            Some(code) => format!("exit code: {code}"),
            None => "terminated by signal".to_string(),
        };
        let message = if lines.is_empty() {
            exit.clone()
        } else {
            lines
                .iter()
                .map(|l| l.message.trim())
                .collect::<Vec<_>>()
                .join("\n")
        };

        Failure::new(message)
            .with_kind(FailureKind::Exit)
            .with_reason(exit)
    }
}
