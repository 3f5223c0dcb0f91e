/// Project root resolution
///
/// Finds the root of a project by walking up from a starting directory until a
/// directory containing the `tidemark.json` marker turns up.

use crate::store::layout::MARKER_FILE;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Handles project root resolution
pub struct RootResolver;

impl RootResolver {
    /// Resolve the project root from a given path
    ///
    /// Walks up the directory tree looking for the marker file. Never fails:
    /// when no marker exists all the way up to the filesystem root, or the walk
    /// runs into a directory it has already visited, the (absolute) starting
    /// directory is returned instead.
    ///
    /// # Examples
    /// ```no_run
    /// use tidemark_lib::core::RootResolver;
    /// use std::env;
    ///
    /// # fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let cwd = env::current_dir()?;
    /// let project_root = RootResolver::resolve(&cwd);
    /// println!("Project root: {}", project_root.display());
    /// # Ok(())
    /// # }
    /// ```
    pub fn resolve<P: AsRef<Path>>(start_path: P) -> PathBuf {
        let start_path = start_path.as_ref();

        // Ensure the path is absolute
        let absolute_path =
            std::path::absolute(start_path).unwrap_or_else(|_| start_path.to_path_buf());

        let mut seen = HashSet::new();
        let mut current = absolute_path.as_path();

        loop {
            if let Some(id) = DirIdentity::of(current) {
                if !seen.insert(id) {
                    tracing::warn!(
                        dir = %current.display(),
                        "directory loop while resolving project root"
                    );
                    return absolute_path;
                }
            }

            if Self::has_marker(current) {
                tracing::debug!(root = %current.display(), "resolved project root");
                return current.to_path_buf();
            }

            match current.parent() {
                Some(parent) => current = parent,
                None => {
                    // Reached filesystem root without finding a marker
                    return absolute_path;
                }
            }
        }
    }

    /// Resolve from the current working directory
    pub fn resolve_cwd() -> PathBuf {
        match std::env::current_dir() {
            Ok(cwd) => Self::resolve(cwd),
            Err(_) => Self::resolve("."),
        }
    }

    /// Check whether a directory holds the marker file
    pub fn has_marker<P: AsRef<Path>>(dir: P) -> bool {
        dir.as_ref().join(MARKER_FILE).is_file()
    }

    /// Get the project name from the root path
    ///
    /// Uses the directory name as the project name.
    pub fn project_name<P: AsRef<Path>>(project_root: P) -> Option<String> {
        project_root
            .as_ref()
            .file_name()
            .and_then(|name| name.to_str())
            .map(|s| s.to_string())
    }
}

/// What makes two directories "the same" during the upward walk
#[derive(Debug, PartialEq, Eq, Hash)]
enum DirIdentity {
    #[cfg(unix)]
    Inode { dev: u64, ino: u64 },
    #[cfg_attr(unix, allow(dead_code))]
    Canonical(PathBuf),
}

impl DirIdentity {
    #[cfg(unix)]
    fn of(dir: &Path) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;
        std::fs::metadata(dir).ok().map(|m| DirIdentity::Inode {
            dev: m.dev(),
            ino: m.ino(),
        })
    }

    #[cfg(not(unix))]
    fn of(dir: &Path) -> Option<Self> {
        std::fs::canonicalize(dir).ok().map(DirIdentity::Canonical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_from_subdirectory() {
        let temp = TempDir::new().unwrap();
        let project_dir = temp.path().join("my-project");
        fs::create_dir(&project_dir).unwrap();
        fs::write(project_dir.join(MARKER_FILE), "{}").unwrap();

        let sub_dir = project_dir.join("src").join("components");
        fs::create_dir_all(&sub_dir).unwrap();

        let resolved = RootResolver::resolve(&sub_dir);
        assert_eq!(resolved, project_dir);
    }

    #[test]
    fn test_nearest_marker_wins() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(MARKER_FILE), "{}").unwrap();
        let inner = temp.path().join("nested");
        fs::create_dir(&inner).unwrap();
        fs::write(inner.join(MARKER_FILE), "{}").unwrap();

        assert_eq!(RootResolver::resolve(&inner), inner);
    }

    #[test]
    fn test_no_marker_falls_back_to_start() {
        let temp = TempDir::new().unwrap();
        let sub_dir = temp.path().join("no-markers");
        fs::create_dir(&sub_dir).unwrap();

        let resolved = RootResolver::resolve(&sub_dir);
        assert_eq!(resolved, sub_dir);
    }

    #[test]
    fn test_marker_must_be_a_file() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join(MARKER_FILE)).unwrap();

        assert!(!RootResolver::has_marker(temp.path()));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_start_resolves() {
        let temp = TempDir::new().unwrap();
        let project_dir = temp.path().join("real");
        fs::create_dir_all(project_dir.join("deep")).unwrap();
        fs::write(project_dir.join(MARKER_FILE), "{}").unwrap();

        let link = temp.path().join("link");
        std::os::unix::fs::symlink(project_dir.join("deep"), &link).unwrap();

        // Lexical walk from the link goes link -> temp, neither has the marker
        let resolved = RootResolver::resolve(&link);
        assert_eq!(resolved, link);
    }

    #[test]
    fn test_get_project_name() {
        let path = PathBuf::from("/home/user/my-awesome-project");
        let name = RootResolver::project_name(&path).unwrap();
        assert_eq!(name, "my-awesome-project");
    }
}
