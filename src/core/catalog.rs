/// Backup catalog
///
/// Enumerates version directories under `backups/`. A directory only counts as
/// a backup once its manifest is on disk and parses; anything else is reported
/// as corrupt. Retention reclaims corrupt directories from earlier days.

use crate::error::Result;
use crate::store::layout::MANIFEST_FILE;
use crate::store::{BackupManifest, BackupRecord, BackupVersion, ProjectLayout};
use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Default)]
pub struct BackupCatalog {
    /// Valid backups, newest first
    pub records: Vec<BackupRecord>,
    /// Version-named directories without a readable manifest
    pub corrupt: Vec<PathBuf>,
}

impl BackupCatalog {
    /// Scan the backups directory of a project
    ///
    /// A missing `backups/` is just an empty catalog.
    pub fn scan(layout: &ProjectLayout) -> Result<Self> {
        let dir = layout.backups_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };

        let mut catalog = Self::default();

        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }

            let name = entry.file_name();
            let Some(version) = name.to_str().and_then(|n| n.parse::<BackupVersion>().ok())
            else {
                continue;
            };

            let path = entry.path();
            match read_manifest(&path) {
                Some(manifest) => catalog.records.push(BackupRecord {
                    version,
                    path,
                    manifest,
                }),
                None => {
                    tracing::debug!(dir = %path.display(), "ignoring backup without manifest");
                    catalog.corrupt.push(path);
                }
            }
        }

        catalog.records.sort_by(|a, b| b.version.cmp(&a.version));
        catalog.corrupt.sort();

        Ok(catalog)
    }

    pub fn latest(&self) -> Option<&BackupRecord> {
        self.records.first()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Highest valid sequence number on a given day
    pub fn max_sequence_on(&self, date: NaiveDate) -> Option<u32> {
        self.records
            .iter()
            .filter(|r| r.version.date == date)
            .map(|r| r.version.sequence)
            .max()
    }

    pub fn find(&self, version: &BackupVersion) -> Option<&BackupRecord> {
        self.records.iter().find(|r| &r.version == version)
    }

    pub fn versions(&self) -> Vec<BackupVersion> {
        self.records.iter().map(|r| r.version).collect()
    }
}

fn read_manifest(dir: &Path) -> Option<BackupManifest> {
    let content = fs::read_to_string(dir.join(MANIFEST_FILE)).ok()?;
    serde_json::from_str(&content).ok()
}
