/// On-disk layout of a project
///
/// Every path tidemark touches is derived from the resolved project root here,
/// so nothing else needs to know file names.

use crate::error::{Result, TidemarkError};
use crate::store::BackupVersion;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Marker file that identifies a project root. Doubles as project config.
pub const MARKER_FILE: &str = "tidemark.json";
pub const TASK_LIST_FILE: &str = "TODO.md";
pub const BACKUPS_DIR: &str = "backups";
pub const LAST_BACKUP_MARKER: &str = ".last_scheduled_backup";
pub const BACKUP_LOG_FILE: &str = "backup_log.txt";
pub const SESSION_HISTORY_FILE: &str = "session_history.md";
pub const LATEST_STATE_FILE: &str = "latest_state.json";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const BACKUP_INFO_FILE: &str = "backup_info.txt";
/// Copied project files live here, apart from the backup's own metadata
pub const PAYLOAD_DIR: &str = "files";

const DEFAULT_TASK_LIST: &str = "# TODO\n\n## In Progress\n\n## Next Up\n\n## Done\n";

/// Paths for one project root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn marker_file(&self) -> PathBuf {
        self.root.join(MARKER_FILE)
    }

    pub fn task_list(&self) -> PathBuf {
        self.root.join(TASK_LIST_FILE)
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.root.join(BACKUPS_DIR)
    }

    pub fn last_backup_marker(&self) -> PathBuf {
        self.backups_dir().join(LAST_BACKUP_MARKER)
    }

    pub fn backup_log(&self) -> PathBuf {
        self.backups_dir().join(BACKUP_LOG_FILE)
    }

    pub fn version_dir(&self, version: &BackupVersion) -> PathBuf {
        self.backups_dir().join(version.to_string())
    }

    /// Where a backup keeps its copies of project files
    pub fn payload_dir(&self, version: &BackupVersion) -> PathBuf {
        self.version_dir(version).join(PAYLOAD_DIR)
    }

    pub fn session_history(&self) -> PathBuf {
        self.root.join(SESSION_HISTORY_FILE)
    }

    pub fn latest_state(&self) -> PathBuf {
        self.root.join(LATEST_STATE_FILE)
    }

    /// Make sure `backups/` exists
    ///
    /// Failing here means no backup can ever be written, so it is fatal.
    pub fn ensure_backups_dir(&self) -> Result<PathBuf> {
        let dir = self.backups_dir();
        fs::create_dir_all(&dir).map_err(|source| TidemarkError::Init {
            path: dir.clone(),
            source,
        })?;
        Ok(dir)
    }

    /// Write the default task list if there is none
    ///
    /// Returns `true` when a file was created.
    pub fn initialize_task_list(&self) -> Result<bool> {
        let path = self.task_list();
        if path.exists() {
            return Ok(false);
        }

        fs::write(&path, DEFAULT_TASK_LIST)
            .map_err(|source| TidemarkError::Init { path, source })?;
        tracing::info!(path = %self.task_list().display(), "initialized task list");
        Ok(true)
    }

    /// Set up a fresh project: marker, task list and backups directory
    ///
    /// Existing files are left alone.
    pub fn init(&self) -> Result<()> {
        let marker = self.marker_file();
        if !marker.exists() {
            fs::write(&marker, "{}\n").map_err(|source| TidemarkError::Init {
                path: marker.clone(),
                source,
            })?;
        }

        self.initialize_task_list()?;
        self.ensure_backups_dir()?;

        Ok(())
    }
}

/// Write to a uniquely named sibling temp file and rename it into place
///
/// Readers see either the old contents or the new ones, never a torn write.
/// Concurrent writers each get their own temp file; the last rename wins.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_paths_are_relative_to_root() {
        let layout = ProjectLayout::new("/work/proj");
        let version: BackupVersion = "2025-06-17_v2".parse().unwrap();

        assert_eq!(layout.marker_file(), PathBuf::from("/work/proj/tidemark.json"));
        assert_eq!(
            layout.last_backup_marker(),
            PathBuf::from("/work/proj/backups/.last_scheduled_backup")
        );
        assert_eq!(
            layout.version_dir(&version),
            PathBuf::from("/work/proj/backups/2025-06-17_v2")
        );
        assert_eq!(
            layout.payload_dir(&version),
            PathBuf::from("/work/proj/backups/2025-06-17_v2/files")
        );
    }

    #[test]
    fn test_init_creates_structure() {
        let temp = TempDir::new().unwrap();
        let layout = ProjectLayout::new(temp.path());

        layout.init().unwrap();

        assert!(layout.marker_file().is_file());
        assert!(layout.task_list().is_file());
        assert!(layout.backups_dir().is_dir());
    }

    #[test]
    fn test_write_atomic_replaces_contents() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state.json");
        fs::write(&path, "old").unwrap();

        write_atomic(&path, b"new").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
        let leftovers: Vec<_> = fs::read_dir(temp.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1, "temp file was renamed away");
    }

    #[test]
    fn test_concurrent_write_atomic_never_tears() {
        use std::sync::{Arc, Barrier};
        use std::thread;

        let temp = TempDir::new().unwrap();
        let path = temp.path().join("latest_state.json");
        let barrier = Arc::new(Barrier::new(8));

        let writers: Vec<_> = (0..8)
            .map(|n| {
                let path = path.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let body = serde_json::json!({ "writer": n, "pad": "x".repeat(64 * 1024) });
                    barrier.wait();
                    for _ in 0..20 {
                        write_atomic(&path, body.to_string().as_bytes()).unwrap();
                    }
                })
            })
            .collect();

        for writer in writers {
            writer.join().unwrap();
        }

        let parsed: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(parsed["writer"].as_u64().unwrap() < 8);
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_initialize_task_list_keeps_existing() {
        let temp = TempDir::new().unwrap();
        let layout = ProjectLayout::new(temp.path());
        fs::write(layout.task_list(), "- [ ] mine\n").unwrap();

        assert!(!layout.initialize_task_list().unwrap());
        assert_eq!(fs::read_to_string(layout.task_list()).unwrap(), "- [ ] mine\n");
    }
}
