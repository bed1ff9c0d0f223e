use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use podshell_launcher::StreamEvent;
use tracing::{debug, info, warn};

use crate::action::ActionId;
use crate::error::Result;

const LOG_EXTENSION: &str = "log";

/// One NDJSON file of [`StreamEvent`]s per action, `<dir>/<action_id>.log`.
#[derive(Debug, Clone)]
pub struct ActionLogs {
    dir: PathBuf,
}

impl ActionLogs {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the directory and drop logs older than `retention`.
    pub fn setup(&self, retention: Duration) -> Result<usize> {
        std::fs::create_dir_all(&self.dir)?;
        self.prune(retention)
    }

    pub fn path(&self, action_id: &ActionId) -> PathBuf {
        self.dir.join(format!("{action_id}.{LOG_EXTENSION}"))
    }

    pub fn write(&self, action_id: &ActionId, event: &StreamEvent) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(action_id))?;
        file.write_all(&line)?;
        Ok(())
    }

    /// Every event recorded for `action_id`. A missing log is empty;
    /// unparseable lines are skipped.
    pub fn read(&self, action_id: &ActionId) -> Result<Vec<StreamEvent>> {
        let path = self.path(action_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(std::fs::File::open(&path)?);
        let mut events = Vec::new();
        for (n, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(event) => events.push(event),
                Err(e) => warn!(path = %path.display(), line = n + 1, error = %e, "skipping malformed action log line"),
            }
        }
        Ok(events)
    }

    /// Delete logs last modified more than `max_age` ago. Returns how many
    /// were removed.
    pub fn prune(&self, max_age: Duration) -> Result<usize> {
        if !self.dir.exists() {
            return Ok(0);
        }
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut removed = 0;
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(LOG_EXTENSION) {
                continue;
            }
            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "cannot read log mtime");
                    continue;
                }
            };
            if modified <= cutoff {
                match std::fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(path = %path.display(), error = %e, "failed to remove old action log"),
                }
            }
        }
        if removed > 0 {
            info!(removed, dir = %self.dir.display(), "pruned old action logs");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use podshell_launcher::LogLine;
    use tempfile::TempDir;

    fn event(message: &str) -> StreamEvent {
        StreamEvent::Data {
            data: LogLine::new(message),
        }
    }

    #[test]
    fn write_then_read_in_order() {
        let dir = TempDir::new().unwrap();
        let logs = ActionLogs::new(dir.path().join("action_logs"));
        let id = ActionId::new();

        logs.write(&id, &event("pulling image")).unwrap();
        logs.write(
            &id,
            &StreamEvent::Error {
                error: LogLine::new("warning"),
            },
        )
        .unwrap();

        let events = logs.read(&id).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].log().message, "pulling image");
        assert!(events[1].is_error());
        assert!(logs.path(&id).ends_with(format!("{id}.log")));
    }

    #[test]
    fn read_missing_log_is_empty() {
        let dir = TempDir::new().unwrap();
        let logs = ActionLogs::new(dir.path());
        assert!(logs.read(&ActionId::new()).unwrap().is_empty());
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let logs = ActionLogs::new(dir.path());
        let id = ActionId::new();
        logs.write(&id, &event("ok")).unwrap();
        let mut file = OpenOptions::new().append(true).open(logs.path(&id)).unwrap();
        writeln!(file, "{{not json").unwrap();
        logs.write(&id, &event("still ok")).unwrap();

        let messages: Vec<_> = logs
            .read(&id)
            .unwrap()
            .into_iter()
            .map(|e| e.log().message.clone())
            .collect();
        assert_eq!(messages, ["ok", "still ok"]);
    }

    #[test]
    fn prune_removes_only_logs_past_retention() {
        let dir = TempDir::new().unwrap();
        let logs = ActionLogs::new(dir.path());
        let id = ActionId::new();
        logs.write(&id, &event("x")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "keep").unwrap();

        assert_eq!(logs.prune(Duration::from_secs(3600)).unwrap(), 0);
        assert!(logs.path(&id).exists());

        assert_eq!(logs.setup(Duration::ZERO).unwrap(), 1);
        assert!(!logs.path(&id).exists());
        assert!(dir.path().join("notes.txt").exists());
    }
}
