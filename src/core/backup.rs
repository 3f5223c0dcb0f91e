/// Versioned backups
///
/// Creates `backups/<date>_v<N>/` snapshots of the configured file set under
/// `files/`, writes an integrity manifest beside them, logs the backup, refreshes the "last backup" marker
/// and applies the retention policy.
///
/// The manifest is the commit point. A version directory without one does not
/// exist as far as the catalog is concerned, so a crash mid-copy never yields a
/// half backup that looks valid.

use crate::config::{BackupConfig, Config};
use crate::core::catalog::BackupCatalog;
use crate::core::retention::{PruneReport, RetentionPolicy};
use crate::error::{Result, TidemarkError};
use crate::store::layout::{write_atomic, BACKUP_INFO_FILE, MANIFEST_FILE, PAYLOAD_DIR};
use crate::store::{
    BackupKind, BackupManifest, BackupRecord, BackupVersion, ManifestEntry, MissingFile,
    ProjectLayout,
};
use chrono::{DateTime, Local, NaiveDate, Utc};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// Result of a successful backup
#[derive(Debug)]
pub struct BackupOutcome {
    pub record: BackupRecord,
    pub prune: PruneReport,
}

/// Result of re-hashing a backup against its manifest
#[derive(Debug, Default)]
pub struct VerifyReport {
    pub version: Option<BackupVersion>,
    pub verified: usize,
    pub mismatched: Vec<String>,
    pub missing: Vec<String>,
}

impl VerifyReport {
    pub fn is_intact(&self) -> bool {
        self.mismatched.is_empty() && self.missing.is_empty()
    }
}

/// Creates, verifies and prunes backups for one project
pub struct BackupManager {
    layout: ProjectLayout,
    config: BackupConfig,
    retention: RetentionPolicy,
}

impl BackupManager {
    pub fn new(layout: ProjectLayout, config: &Config) -> Self {
        Self {
            layout,
            config: config.backup.clone(),
            retention: config.retention(),
        }
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    /// Create a backup stamped with the current local time
    pub fn create_backup(&self, reason: &str, scope: BackupKind) -> Result<BackupOutcome> {
        self.create_backup_at(reason, scope, Local::now())
    }

    /// Create a backup as of `now`
    ///
    /// Fatal errors leave no version directory behind. Per-file copy
    /// failures are recorded in the manifest and the backup still succeeds.
    pub fn create_backup_at(
        &self,
        reason: &str,
        scope: BackupKind,
        now: DateTime<Local>,
    ) -> Result<BackupOutcome> {
        self.layout.ensure_backups_dir()?;

        let created_at = now.with_timezone(&Utc);
        let (version, dir) = self.allocate_version(now.date_naive())?;
        tracing::debug!(%version, dir = %dir.display(), "allocated backup version");

        let manifest = self.populate_or_discard(&dir, &version, reason, scope, created_at)?;

        tracing::info!(
            %version,
            %scope,
            files = manifest.files.len(),
            missing = manifest.missing.len(),
            "backup created"
        );

        // The backup is valid from here on; bookkeeping failures only warn
        if let Err(e) = self.append_log(&version, scope, reason, created_at) {
            tracing::warn!(error = %e, "failed to append backup log");
        }
        if let Err(e) = self.touch_marker(created_at) {
            tracing::warn!(error = %e, "failed to update last backup marker");
        }

        let prune = self
            .retention
            .prune(&self.layout, now.date_naive())
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "failed to scan backups for pruning");
                PruneReport::default()
            });

        Ok(BackupOutcome {
            record: BackupRecord {
                version,
                path: dir,
                manifest,
            },
            prune,
        })
    }

    /// Claim the next free version directory for `date`
    ///
    /// Scan, then `create_dir` (which fails if the name exists). A concurrent
    /// run may hold a directory whose manifest isn't written yet and is invisible
    /// to the scan, so each retry moves past the number that collided.
    fn allocate_version(&self, date: NaiveDate) -> Result<(BackupVersion, PathBuf)> {
        let attempts = self.config.max_collision_retries.max(1);
        let mut collided: Option<BackupVersion> = None;

        for _ in 0..attempts {
            let catalog = BackupCatalog::scan(&self.layout)?;
            let scanned = match catalog.max_sequence_on(date) {
                Some(max) => BackupVersion::new(date, max).next(),
                None => Some(BackupVersion::new(date, 1)),
            };

            let version = match (scanned, collided.map(|v| v.next())) {
                (Some(scanned), None) => scanned,
                (Some(scanned), Some(Some(past))) => scanned.max(past),
                _ => return Err(TidemarkError::SequenceExhausted { date }),
            };
            let dir = self.layout.version_dir(&version);

            match fs::create_dir(&dir) {
                Ok(()) => return Ok((version, dir)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    tracing::debug!(%version, "backup version taken, retrying");
                    collided = Some(version);
                }
                Err(source) => return Err(TidemarkError::CreateVersionDir { path: dir, source }),
            }
        }

        Err(TidemarkError::VersionCollision { attempts })
    }

    /// Populate `dir`, removing it again if that fails
    fn populate_or_discard(
        &self,
        dir: &Path,
        version: &BackupVersion,
        reason: &str,
        scope: BackupKind,
        created_at: DateTime<Utc>,
    ) -> Result<BackupManifest> {
        self.populate(dir, version, reason, scope, created_at)
            .inspect_err(|_| {
                if let Err(cleanup) = fs::remove_dir_all(dir) {
                    tracing::warn!(
                        dir = %dir.display(),
                        error = %cleanup,
                        "failed to remove incomplete backup"
                    );
                }
            })
    }

    /// Copy the scope into `dir/files`, then write the summary and the manifest
    fn populate(
        &self,
        dir: &Path,
        version: &BackupVersion,
        reason: &str,
        scope: BackupKind,
        created_at: DateTime<Utc>,
    ) -> Result<BackupManifest> {
        let mut files = Vec::new();
        let mut missing = Vec::new();
        let payload = self.layout.payload_dir(version);

        for rel in self.scope_paths(scope) {
            self.copy_path(rel, &payload, &mut files, &mut missing);
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));

        let manifest = BackupManifest {
            version: version.to_string(),
            kind: scope,
            reason: reason.to_string(),
            created_at,
            files,
            missing,
        };

        let info_path = dir.join(BACKUP_INFO_FILE);
        fs::write(&info_path, render_info(&manifest)).map_err(|source| {
            TidemarkError::WriteManifest {
                path: info_path.clone(),
                source,
            }
        })?;

        let manifest_file = dir.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(&manifest)?;
        write_atomic(&manifest_file, json.as_bytes()).map_err(|source| {
            TidemarkError::WriteManifest {
                path: manifest_file.clone(),
                source,
            }
        })?;

        Ok(manifest)
    }

    fn scope_paths(&self, scope: BackupKind) -> Vec<&str> {
        let mut paths: Vec<&str> = self.config.standard_files.iter().map(String::as_str).collect();
        if scope == BackupKind::Full {
            paths.extend(self.config.full_extra_paths.iter().map(String::as_str));
        }
        paths
    }

    /// Copy one configured path (file or directory tree) into the backup
    fn copy_path(
        &self,
        rel: &str,
        dest_root: &Path,
        files: &mut Vec<ManifestEntry>,
        missing: &mut Vec<MissingFile>,
    ) {
        let rel_path = Path::new(rel);
        if !is_contained(rel_path) {
            tracing::warn!(path = rel, "backup path escapes the project root, skipping");
            missing.push(MissingFile {
                path: rel.to_string(),
                error: "path is outside the project root".to_string(),
            });
            return;
        }

        let src = self.layout.root().join(rel_path);
        let meta = match fs::symlink_metadata(&src) {
            Ok(meta) => meta,
            // Optional files are allowed to be absent
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = rel, "not present, skipping");
                return;
            }
            Err(e) => {
                missing.push(MissingFile {
                    path: rel.to_string(),
                    error: e.to_string(),
                });
                return;
            }
        };

        if meta.is_file() {
            self.copy_one(&src, rel_path, dest_root, files, missing);
            return;
        }

        if !meta.is_dir() {
            tracing::debug!(path = rel, "not a regular file or directory, skipping");
            return;
        }

        let backups_dir = self.layout.backups_dir();
        let walker = WalkDir::new(&src)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.path() != backups_dir);

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e
                        .path()
                        .and_then(|p| p.strip_prefix(self.layout.root()).ok())
                        .map(manifest_path)
                        .unwrap_or_else(|| rel.to_string());
                    missing.push(MissingFile {
                        path,
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            match entry.path().strip_prefix(self.layout.root()) {
                Ok(entry_rel) => self.copy_one(entry.path(), entry_rel, dest_root, files, missing),
                Err(_) => continue,
            }
        }
    }

    fn copy_one(
        &self,
        src: &Path,
        rel: &Path,
        dest_root: &Path,
        files: &mut Vec<ManifestEntry>,
        missing: &mut Vec<MissingFile>,
    ) {
        let path = manifest_path(rel);
        match copy_with_checksum(src, &dest_root.join(rel)) {
            Ok((size, sha256)) => files.push(ManifestEntry { path, size, sha256 }),
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "could not copy file into backup");
                missing.push(MissingFile {
                    path,
                    error: e.to_string(),
                });
            }
        }
    }

    /// `[<UTC timestamp>] <version> - <kind> - <reason>`
    fn append_log(
        &self,
        version: &BackupVersion,
        scope: BackupKind,
        reason: &str,
        created_at: DateTime<Utc>,
    ) -> io::Result<()> {
        let line = format!(
            "[{}] {} - {} - {}\n",
            created_at.format("%Y-%m-%dT%H:%M:%SZ"),
            version,
            scope,
            single_line(reason)
        );

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.layout.backup_log())?;
        file.write_all(line.as_bytes())
    }

    fn touch_marker(&self, at: DateTime<Utc>) -> io::Result<()> {
        let path = self.layout.last_backup_marker();
        fs::write(&path, format!("{}\n", at.to_rfc3339()))?;
        File::options()
            .write(true)
            .open(&path)?
            .set_modified(SystemTime::from(at))
    }

    /// Re-hash a backup (the latest when `version` is `None`) against its manifest
    pub fn verify(&self, version: Option<&BackupVersion>) -> Result<VerifyReport> {
        let catalog = BackupCatalog::scan(&self.layout)?;
        let record = match version {
            Some(v) => catalog.find(v),
            None => catalog.latest(),
        }
        .ok_or_else(|| {
            TidemarkError::BackupNotFound(
                version.map_or_else(|| "latest".to_string(), |v| v.to_string()),
            )
        })?;

        let mut report = VerifyReport {
            version: Some(record.version),
            ..Default::default()
        };

        let payload = record.path.join(PAYLOAD_DIR);
        for entry in &record.manifest.files {
            let path = payload.join(entry.path.as_str());
            match hash_file(&path) {
                Ok((size, sha256)) if size == entry.size && sha256 == entry.sha256 => {
                    report.verified += 1
                }
                Ok(_) => report.mismatched.push(entry.path.clone()),
                Err(_) => report.missing.push(entry.path.clone()),
            }
        }

        Ok(report)
    }
}

/// Forwards writes while hashing them
struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Copy `src` to `dest`, returning the byte count and the SHA-256 of what was written
fn copy_with_checksum(src: &Path, dest: &Path) -> io::Result<(u64, String)> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut reader = File::open(src)?;
    let mut writer = HashingWriter {
        inner: File::create(dest)?,
        hasher: Sha256::new(),
    };
    let size = io::copy(&mut reader, &mut writer)?;
    writer.flush()?;

    Ok((size, format!("{:x}", writer.hasher.finalize())))
}

fn hash_file(path: &Path) -> io::Result<(u64, String)> {
    let mut reader = File::open(path)?;
    let mut writer = HashingWriter {
        inner: io::sink(),
        hasher: Sha256::new(),
    };
    let size = io::copy(&mut reader, &mut writer)?;
    Ok((size, format!("{:x}", writer.hasher.finalize())))
}

/// Relative, and never climbs out with `..`
fn is_contained(rel: &Path) -> bool {
    rel.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn manifest_path(rel: &Path) -> String {
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn render_info(manifest: &BackupManifest) -> String {
    let mut info = format!(
        "Backup: {}\nKind: {}\nReason: {}\nCreated: {}\nFiles: {}\nBytes: {}\nMissing: {}\n",
        manifest.version,
        manifest.kind,
        single_line(&manifest.reason),
        manifest.created_at.to_rfc3339(),
        manifest.files.len(),
        manifest.total_size(),
        manifest.missing.len()
    );

    if !manifest.files.is_empty() {
        info.push_str("\nContents:\n");
        for file in &manifest.files {
            info.push_str(&format!("  {} ({} bytes)\n", file.path, file.size));
        }
    }
    if manifest.is_partial() {
        info.push_str("\nNot copied:\n");
        for file in &manifest.missing {
            info.push_str(&format!("  {}: {}\n", file.path, file.error));
        }
    }

    info
}
