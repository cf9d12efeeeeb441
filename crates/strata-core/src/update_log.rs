//! Append-only update log
//!
//! One JSON line per finished update job. Appends take an exclusive file
//! lock so that concurrent writers (a manual run racing a timer-triggered
//! one that already lost the job lock) never interleave partial lines.

use crate::error::Result;
use crate::version::VersionRef;
use chrono::{DateTime, Utc};
use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// How an update job ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogOutcome {
    /// The installation moved to a new version
    Updated,
    /// The job failed and the installation was restored from its backup
    RolledBack,
    /// The job failed; the installation may need attention
    Failed,
    /// A manual rollback to an existing backup
    Restored,
}

impl std::fmt::Display for LogOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Updated => "updated",
            Self::RolledBack => "rolled-back",
            Self::Failed => "failed",
            Self::Restored => "restored",
        };
        f.write_str(s)
    }
}

/// A single line of the update log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub outcome: LogOutcome,
    /// Version installed when the job ended
    pub version: VersionRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_version: Option<VersionRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<String>,
    /// Job phase the error occurred in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LogEntry {
    pub fn new(outcome: LogOutcome, version: VersionRef) -> Self {
        Self {
            timestamp: Utc::now(),
            outcome,
            version,
            from_version: None,
            backup_id: None,
            phase: None,
            error: None,
        }
    }

    pub fn with_from(mut self, from: VersionRef) -> Self {
        self.from_version = Some(from);
        self
    }

    pub fn with_backup(mut self, backup_id: Option<String>) -> Self {
        self.backup_id = backup_id;
        self
    }

    pub fn with_error(mut self, phase: impl Into<String>, error: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self.error = Some(error.into());
        self
    }
}

/// The update log file
#[derive(Debug, Clone)]
pub struct UpdateLog {
    path: PathBuf,
}

impl UpdateLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry (file-locked, synced)
    pub fn append(&self, entry: &LogEntry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        // Released when `file` is dropped
        file.lock_exclusive()?;

        let line = serde_json::to_string(entry)?;
        writeln!(file, "{}", line)?;
        file.sync_all()?;
        Ok(())
    }

    /// All entries, oldest first. Lines that fail to parse are skipped.
    pub fn entries(&self) -> Result<Vec<LogEntry>> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LogEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(
                    "Skipping malformed update log line {} in {}: {}",
                    index + 1,
                    self.path.display(),
                    e
                ),
            }
        }
        Ok(entries)
    }

    /// The most recent `limit` entries, oldest first
    pub fn tail(&self, limit: usize) -> Result<Vec<LogEntry>> {
        let mut entries = self.entries()?;
        if entries.len() > limit {
            entries = entries.split_off(entries.len() - limit);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    fn create_test_log() -> (UpdateLog, TempDir) {
        let temp = TempDir::new().unwrap();
        let log = UpdateLog::new(temp.path().join("update.log"));
        (log, temp)
    }

    #[test]
    fn test_empty_log() {
        let (log, _temp) = create_test_log();
        assert!(log.entries().unwrap().is_empty());
        assert!(log.tail(5).unwrap().is_empty());
    }

    #[test]
    fn test_append_one_line_per_entry() {
        let (log, _temp) = create_test_log();
        log.append(
            &LogEntry::new(LogOutcome::Updated, VersionRef::from("v1.3.0"))
                .with_from(VersionRef::from("v1.2.0"))
                .with_backup(Some("20261019-101500-000".to_string())),
        )
        .unwrap();
        log.append(
            &LogEntry::new(LogOutcome::Failed, VersionRef::from("v1.3.0"))
                .with_error("applying", "hook failed"),
        )
        .unwrap();

        let content = fs::read_to_string(log.path()).unwrap();
        assert_eq!(content.lines().count(), 2);

        let entries = log.entries().unwrap();
        assert_eq!(entries[0].outcome, LogOutcome::Updated);
        assert_eq!(entries[0].from_version, Some(VersionRef::from("v1.2.0")));
        assert_eq!(entries[1].phase.as_deref(), Some("applying"));
    }

    #[test]
    fn test_tail_returns_most_recent() {
        let (log, _temp) = create_test_log();
        for i in 0..5 {
            log.append(&LogEntry::new(
                LogOutcome::Updated,
                VersionRef::new(format!("v1.{}.0", i)),
            ))
            .unwrap();
        }

        let tail = log.tail(2).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].version.as_str(), "v1.3.0");
        assert_eq!(tail[1].version.as_str(), "v1.4.0");
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let (log, _temp) = create_test_log();
        log.append(&LogEntry::new(LogOutcome::Updated, VersionRef::from("v1")))
            .unwrap();
        let mut file = OpenOptions::new().append(true).open(log.path()).unwrap();
        writeln!(file, "garbage").unwrap();

        assert_eq!(log.entries().unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_appends() {
        let (log, _temp) = create_test_log();
        let log = Arc::new(log);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    log.append(&LogEntry::new(
                        LogOutcome::Updated,
                        VersionRef::new(format!("v{}", i)),
                    ))
                    .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(log.entries().unwrap().len(), 8);
    }
}
