/// Retention pruning
///
/// Keeps the newest `max_kept` backups and deletes the rest. Deletion is
/// best-effort: one stubborn directory never stops the others from going, and
/// never fails the backup that triggered the prune.
///
/// Version directories without a manifest are left alone on the day they are
/// named for, since a concurrent run may still be filling one. From the next
/// day on they can only be leftovers of a crashed run and are reclaimed.

use crate::core::catalog::BackupCatalog;
use crate::error::Result;
use crate::store::{BackupRecord, BackupVersion, ProjectLayout};
use chrono::NaiveDate;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    max_kept: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { max_kept: 5 }
    }
}

/// What a prune did
#[derive(Debug, Default, Clone)]
pub struct PruneReport {
    pub kept: Vec<BackupVersion>,
    pub removed: Vec<BackupVersion>,
    pub failed: Vec<(BackupVersion, String)>,
    /// Incomplete directories from earlier days that were deleted
    pub reclaimed: Vec<BackupVersion>,
}

impl RetentionPolicy {
    /// A policy keeping at least one backup
    pub fn new(max_kept: usize) -> Self {
        Self {
            max_kept: max_kept.max(1),
        }
    }

    pub fn max_kept(&self) -> usize {
        self.max_kept
    }

    /// Scan the project's backups and prune them as of `today`
    ///
    /// Only a failed scan is an error. Deletion problems land in the report.
    pub fn prune(&self, layout: &ProjectLayout, today: NaiveDate) -> Result<PruneReport> {
        let catalog = BackupCatalog::scan(layout)?;
        let mut report = self.prune_records(catalog.records);
        reclaim_incomplete(&catalog.corrupt, today, &mut report);
        Ok(report)
    }

    /// Prune an already scanned set of records
    pub fn prune_records(&self, mut records: Vec<BackupRecord>) -> PruneReport {
        // Newest first, by (date, sequence)
        records.sort_by(|a, b| b.version.cmp(&a.version));

        let split_at = self.max_kept.min(records.len());
        let expired = records.split_off(split_at);

        let mut report = PruneReport {
            kept: records.iter().map(|r| r.version).collect(),
            ..Default::default()
        };

        for record in expired {
            match remove_version_dir(&record.path) {
                Ok(()) => {
                    tracing::info!(version = %record.version, "pruned old backup");
                    report.removed.push(record.version);
                }
                Err(e) => {
                    tracing::warn!(
                        version = %record.version,
                        error = %e,
                        "failed to prune old backup"
                    );
                    report.failed.push((record.version, e.to_string()));
                }
            }
        }

        report
    }
}

fn reclaim_incomplete(dirs: &[PathBuf], today: NaiveDate, report: &mut PruneReport) {
    for dir in dirs {
        let Some(version) = dir
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.parse::<BackupVersion>().ok())
        else {
            continue;
        };
        if version.date >= today {
            continue;
        }

        match remove_version_dir(dir) {
            Ok(()) => {
                tracing::info!(%version, "reclaimed incomplete backup directory");
                report.reclaimed.push(version);
            }
            Err(e) => {
                tracing::warn!(%version, error = %e, "failed to reclaim incomplete backup");
                report.failed.push((version, e.to_string()));
            }
        }
    }
}

/// Someone else removing it first counts as success
fn remove_version_dir(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        result => result,
    }
}
