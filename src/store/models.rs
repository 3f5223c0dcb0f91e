/// Data models for persisted project state
///
/// Everything tidemark writes to disk is described here and serialized with serde.

use crate::error::{Result, TidemarkError};
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::SystemTime;

/// `YYYY-MM-DD_v<N>`
const VERSION_PATTERN: &str = r"^(\d{4}-\d{2}-\d{2})_v(\d+)$";

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(VERSION_PATTERN).expect("version pattern is valid"))
}

/// Identifies one backup snapshot
///
/// Field order matters: the derived `Ord` compares date first, then sequence,
/// so `2025-06-17_v10` sorts after `2025-06-17_v9`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BackupVersion {
    pub date: NaiveDate,
    pub sequence: u32,
}

impl BackupVersion {
    pub fn new(date: NaiveDate, sequence: u32) -> Self {
        Self { date, sequence }
    }

    /// The version that follows this one on the same day, if the sequence
    /// has room left
    pub fn next(&self) -> Option<Self> {
        self.sequence
            .checked_add(1)
            .map(|sequence| Self::new(self.date, sequence))
    }
}

impl fmt::Display for BackupVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_v{}", self.date.format("%Y-%m-%d"), self.sequence)
    }
}

impl FromStr for BackupVersion {
    type Err = TidemarkError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || TidemarkError::InvalidVersion(s.to_string());

        let caps = version_regex().captures(s).ok_or_else(invalid)?;
        let date = NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d").map_err(|_| invalid())?;
        let sequence: u32 = caps[2].parse().map_err(|_| invalid())?;
        if sequence == 0 {
            return Err(invalid());
        }

        Ok(Self { date, sequence })
    }
}

/// Which file set a backup covers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackupKind {
    Standard,
    Full,
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackupKind::Standard => "standard",
            BackupKind::Full => "full",
        };
        f.pad(s)
    }
}

/// One copied file inside a backup
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Path relative to the project root, `/`-separated
    pub path: String,
    pub size: u64,
    pub sha256: String,
}

/// A file that existed but could not be copied
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MissingFile {
    pub path: String,
    pub error: String,
}

/// Contents of `manifest.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupManifest {
    pub version: String,
    pub kind: BackupKind,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub files: Vec<ManifestEntry>,
    #[serde(default)]
    pub missing: Vec<MissingFile>,
}

impl BackupManifest {
    /// Total bytes copied
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    pub fn is_partial(&self) -> bool {
        !self.missing.is_empty()
    }
}

/// A valid backup found on disk
#[derive(Debug, Clone)]
pub struct BackupRecord {
    pub version: BackupVersion,
    pub path: PathBuf,
    pub manifest: BackupManifest,
}

/// One entry of the session history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub detail: String,
}

impl SessionLogEntry {
    /// Markdown section appended to the history file
    pub fn to_markdown(&self) -> String {
        let mut section = format!(
            "## {} - {}\n\n",
            self.timestamp.format("%Y-%m-%dT%H:%M:%SZ"),
            self.action
        );
        if !self.detail.trim().is_empty() {
            section.push_str(self.detail.trim_end());
            section.push_str("\n\n");
        }
        section
    }
}

/// Due flags as last seen by the timing evaluator
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DueFlags {
    pub task_list: bool,
    pub backup: bool,
}

/// Contents of `latest_state.json`, rewritten on every record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatestStateSnapshot {
    pub timestamp: DateTime<Utc>,
    pub last_action: String,
    pub detail: String,
    #[serde(default)]
    pub next_steps: Vec<String>,
    pub latest_backup: Option<String>,
    pub retained_backups: usize,
    pub due: DueFlags,
}

/// A tracked file and its modification time when it was looked at
#[derive(Debug, Clone)]
pub struct ArtifactState {
    pub path: PathBuf,
    pub modified: Option<SystemTime>,
}

impl ArtifactState {
    /// Read the artifact's mtime. Anything unreadable counts as absent.
    pub fn capture(path: PathBuf) -> Self {
        let modified = std::fs::metadata(&path)
            .ok()
            .filter(|m| m.is_file())
            .and_then(|m| m.modified().ok());
        Self { path, modified }
    }

    pub fn exists(&self) -> bool {
        self.modified.is_some()
    }
}
