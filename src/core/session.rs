// Records what happened in a session
//
// Two independent writes: an append to the history file, which is the real
// record, and a rewrite of the latest-state snapshot, which is just a cache.
// Neither one can fail the caller.

use crate::core::catalog::BackupCatalog;
use crate::core::timing::{TimingEvaluator, TimingThresholds};
use crate::error::Result;
use crate::store::layout::write_atomic;
use crate::store::{LatestStateSnapshot, ProjectLayout, SessionLogEntry};
use chrono::{DateTime, Utc};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};

const HISTORY_HEADER: &str = "# Session History\n\n";

// Action labels end up in markdown headings, keep them short
const MAX_ACTION_LENGTH: usize = 120;

/// What `record` managed to write
#[derive(Debug, Clone)]
pub struct RecordOutcome {
    pub entry: SessionLogEntry,
    pub history_written: bool,
    pub snapshot_written: bool,
}

pub struct SessionRecorder {
    layout: ProjectLayout,
    thresholds: TimingThresholds,
}

impl SessionRecorder {
    pub fn new(layout: ProjectLayout, thresholds: TimingThresholds) -> Self {
        Self { layout, thresholds }
    }

    pub fn record(&self, action: &str, detail: &str) -> RecordOutcome {
        self.record_at(action, detail, &[], Utc::now())
    }

    pub fn record_with_next_steps(
        &self,
        action: &str,
        detail: &str,
        next_steps: &[String],
    ) -> RecordOutcome {
        self.record_at(action, detail, next_steps, Utc::now())
    }

    // Main recording function. Append to history, then rewrite the snapshot.
    pub fn record_at(
        &self,
        action: &str,
        detail: &str,
        next_steps: &[String],
        now: DateTime<Utc>,
    ) -> RecordOutcome {
        let entry = SessionLogEntry {
            timestamp: now,
            action: self.sanitize_action(action),
            detail: detail.replace('\0', ""),
        };

        let history_written = match self.append_history(&entry) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "failed to append session history");
                false
            }
        };

        let snapshot_written = match self.write_snapshot(&entry, next_steps) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "failed to write latest state");
                false
            }
        };

        RecordOutcome {
            entry,
            history_written,
            snapshot_written,
        }
    }

    /// Read back the latest-state snapshot, if there is a readable one
    pub fn latest_state(&self) -> Option<LatestStateSnapshot> {
        let content = fs::read_to_string(self.layout.latest_state()).ok()?;
        serde_json::from_str(&content).ok()
    }

    fn append_history(&self, entry: &SessionLogEntry) -> io::Result<()> {
        let path = self.layout.session_history();
        let section = entry.to_markdown();

        // create_new so two first-time writers can't both add the header. The
        // creator appends header and section in one write so a concurrent
        // appender can't land in between and be overwritten.
        match OpenOptions::new().append(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let first = format!("{}{}", HISTORY_HEADER, section);
                file.write_all(first.as_bytes())
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let mut file = OpenOptions::new().append(true).open(&path)?;
                file.write_all(section.as_bytes())
            }
            Err(e) => Err(e),
        }
    }

    fn write_snapshot(&self, entry: &SessionLogEntry, next_steps: &[String]) -> Result<()> {
        let due = TimingEvaluator::evaluate_at(&self.layout, &self.thresholds, entry.timestamp.into())
            .flags();

        let (latest_backup, retained_backups) = match BackupCatalog::scan(&self.layout) {
            Ok(catalog) => (
                catalog.latest().map(|r| r.version.to_string()),
                catalog.len(),
            ),
            Err(e) => {
                tracing::warn!(error = %e, "could not list backups for latest state");
                (None, 0)
            }
        };

        let snapshot = LatestStateSnapshot {
            timestamp: entry.timestamp,
            last_action: entry.action.clone(),
            detail: entry.detail.clone(),
            next_steps: next_steps.to_vec(),
            latest_backup,
            retained_backups,
            due,
        };

        let json = serde_json::to_string_pretty(&snapshot)?;
        write_atomic(&self.layout.latest_state(), json.as_bytes())?;

        Ok(())
    }

    /// Single line, no null bytes, collapsed whitespace, bounded length
    fn sanitize_action(&self, action: &str) -> String {
        let cleaned = action
            .replace('\0', "")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");

        if cleaned.is_empty() {
            return "note".to_string();
        }

        cleaned.chars().take(MAX_ACTION_LENGTH).collect()
    }
}
