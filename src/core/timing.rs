/// Staleness evaluation
///
/// Compares the age of tracked artifacts against configured thresholds to
/// decide what is due. Only timestamps are read; nothing is modified.

use crate::store::{ArtifactState, DueFlags, ProjectLayout};
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

/// How old each artifact may get before it is due
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingThresholds {
    pub task_list_staleness: Duration,
    pub backup_interval: Duration,
}

impl Default for TimingThresholds {
    fn default() -> Self {
        Self {
            task_list_staleness: Duration::from_secs(30 * 60),
            backup_interval: Duration::from_secs(30 * 60),
        }
    }
}

/// Tracked artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    TaskList,
    Backup,
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Artifact::TaskList => "task_list",
            Artifact::Backup => "backup",
        };
        f.pad(s)
    }
}

/// Verdict for one artifact
#[derive(Debug, Clone)]
pub struct ArtifactReport {
    pub artifact: Artifact,
    pub path: PathBuf,
    /// `None` when the file does not exist
    pub age: Option<Duration>,
    pub threshold: Duration,
    pub due: bool,
    /// The file is missing and should be created rather than refreshed
    pub must_initialize: bool,
}

/// Verdicts for every tracked artifact
#[derive(Debug, Clone)]
pub struct DueReport {
    pub task_list: ArtifactReport,
    pub backup: ArtifactReport,
}

impl DueReport {
    pub fn flags(&self) -> DueFlags {
        DueFlags {
            task_list: self.task_list.due,
            backup: self.backup.due,
        }
    }

    pub fn any_due(&self) -> bool {
        self.task_list.due || self.backup.due
    }

    pub fn artifacts(&self) -> [&ArtifactReport; 2] {
        [&self.task_list, &self.backup]
    }
}

pub struct TimingEvaluator;

impl TimingEvaluator {
    /// Evaluate every tracked artifact against the wall clock
    pub fn evaluate(layout: &ProjectLayout, thresholds: &TimingThresholds) -> DueReport {
        Self::evaluate_at(layout, thresholds, SystemTime::now())
    }

    /// Evaluate every tracked artifact as of `now`
    pub fn evaluate_at(
        layout: &ProjectLayout,
        thresholds: &TimingThresholds,
        now: SystemTime,
    ) -> DueReport {
        let task_list = ArtifactState::capture(layout.task_list());
        let backup = ArtifactState::capture(layout.last_backup_marker());

        DueReport {
            task_list: Self::assess(
                Artifact::TaskList,
                &task_list,
                thresholds.task_list_staleness,
                now,
            ),
            backup: Self::assess(Artifact::Backup, &backup, thresholds.backup_interval, now),
        }
    }

    /// Judge one artifact
    ///
    /// Due means strictly older than the threshold. A file stamped in the
    /// future has age zero.
    pub fn assess(
        artifact: Artifact,
        state: &ArtifactState,
        threshold: Duration,
        now: SystemTime,
    ) -> ArtifactReport {
        let age = state
            .modified
            .map(|modified| now.duration_since(modified).unwrap_or(Duration::ZERO));

        let due = match age {
            Some(age) => age > threshold,
            None => true,
        };

        tracing::debug!(%artifact, ?age, ?threshold, due, "assessed artifact");

        ArtifactReport {
            artifact,
            path: state.path.clone(),
            age,
            threshold,
            due,
            must_initialize: age.is_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use std::fs;
    use std::time::UNIX_EPOCH;
    use tempfile::TempDir;

    const MINUTE: Duration = Duration::from_secs(60);

    // Whole seconds so filesystem timestamp precision can't shift the boundary
    fn fixed_now() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_750_000_000)
    }

    fn setup() -> (TempDir, ProjectLayout) {
        let temp = TempDir::new().unwrap();
        let layout = ProjectLayout::new(temp.path());
        fs::create_dir_all(layout.backups_dir()).unwrap();
        (temp, layout)
    }

    fn touch_at(path: &std::path::Path, at: SystemTime) {
        fs::write(path, "x").unwrap();
        set_file_mtime(path, FileTime::from_system_time(at)).unwrap();
    }

    #[test]
    fn test_missing_artifacts_are_due() {
        let (_temp, layout) = setup();

        let report = TimingEvaluator::evaluate(&layout, &TimingThresholds::default());

        for artifact in report.artifacts() {
            assert!(artifact.due);
            assert!(artifact.must_initialize);
            assert!(artifact.age.is_none());
        }
    }

    #[test]
    fn test_threshold_boundary_is_exclusive() {
        let (_temp, layout) = setup();
        let thresholds = TimingThresholds::default();
        let now = fixed_now();

        touch_at(&layout.task_list(), now - 30 * MINUTE);
        touch_at(&layout.last_backup_marker(), now - 30 * MINUTE - Duration::from_secs(1));

        let report = TimingEvaluator::evaluate_at(&layout, &thresholds, now);

        assert_eq!(report.task_list.age, Some(30 * MINUTE));
        assert!(!report.task_list.due, "exactly at threshold is not due");
        assert!(report.backup.due, "one second past threshold is due");
        assert!(!report.backup.must_initialize);
    }

    #[test]
    fn test_fresh_artifact_not_due() {
        let (_temp, layout) = setup();
        let now = fixed_now();

        touch_at(&layout.task_list(), now - 5 * MINUTE);
        touch_at(&layout.last_backup_marker(), now - 45 * MINUTE);

        let report = TimingEvaluator::evaluate_at(&layout, &TimingThresholds::default(), now);
        assert_eq!(
            report.flags(),
            DueFlags {
                task_list: false,
                backup: true
            }
        );
        assert!(report.any_due());
    }

    #[test]
    fn test_future_timestamp_is_age_zero() {
        let (_temp, layout) = setup();
        let now = fixed_now();

        touch_at(&layout.task_list(), now + 10 * MINUTE);

        let report = TimingEvaluator::evaluate_at(&layout, &TimingThresholds::default(), now);
        assert_eq!(report.task_list.age, Some(Duration::ZERO));
        assert!(!report.task_list.due);
    }

    #[test]
    fn test_custom_thresholds() {
        let (_temp, layout) = setup();
        let now = fixed_now();
        let thresholds = TimingThresholds {
            task_list_staleness: 2 * MINUTE,
            backup_interval: 120 * MINUTE,
        };

        touch_at(&layout.task_list(), now - 3 * MINUTE);
        touch_at(&layout.last_backup_marker(), now - 90 * MINUTE);

        let report = TimingEvaluator::evaluate_at(&layout, &thresholds, now);
        assert!(report.task_list.due);
        assert!(!report.backup.due);
    }
}
