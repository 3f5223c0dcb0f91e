// End-to-end behavior of backups, retention and session recording against a
// real temporary project directory.

use chrono::{DateTime, Local, TimeZone};
use std::collections::HashSet;
use std::fs;
use std::sync::{Arc, Barrier};
use tempfile::TempDir;
use tidemark_lib::core::{BackupCatalog, BackupManager, RootResolver, SessionRecorder};
use tidemark_lib::store::layout::MANIFEST_FILE;
use tidemark_lib::store::{BackupKind, BackupManifest, BackupVersion};
use tidemark_lib::{Config, ProjectLayout};

fn at(day: u32, hour: u32, minute: u32) -> DateTime<Local> {
    Local.with_ymd_and_hms(2025, 6, day, hour, minute, 0).unwrap()
}

fn project() -> (TempDir, ProjectLayout) {
    let temp = TempDir::new().unwrap();
    let layout = ProjectLayout::new(temp.path());
    layout.init().unwrap();
    (temp, layout)
}

fn config_keeping(max_kept: usize) -> Config {
    let mut config = Config::default();
    config.retention.max_kept = max_kept;
    config
}

fn retained(layout: &ProjectLayout) -> Vec<String> {
    BackupCatalog::scan(layout)
        .unwrap()
        .versions()
        .iter()
        .map(|v| v.to_string())
        .collect()
}

#[test]
fn empty_project_first_backup() {
    let temp = TempDir::new().unwrap();
    let layout = ProjectLayout::new(temp.path());
    let manager = BackupManager::new(layout.clone(), &Config::default());

    manager
        .create_backup_at("init", BackupKind::Standard, at(17, 9, 0))
        .unwrap();

    let dir = layout.backups_dir().join("2025-06-17_v1");
    assert!(dir.is_dir());

    let manifest: BackupManifest =
        serde_json::from_str(&fs::read_to_string(dir.join(MANIFEST_FILE)).unwrap()).unwrap();
    assert!(manifest.files.is_empty(), "nothing existed to copy");
    assert_eq!(manifest.reason, "init");

    let log = fs::read_to_string(layout.backup_log()).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("2025-06-17_v1 - standard - init"));
}

#[test]
fn manifest_only_lists_existing_files() {
    let (_temp, layout) = project();
    let manager = BackupManager::new(layout.clone(), &Config::default());

    let outcome = manager
        .create_backup_at("init", BackupKind::Standard, at(17, 9, 0))
        .unwrap();

    // init created the marker and TODO.md; README and session files are absent
    let paths: Vec<&str> = outcome
        .record
        .manifest
        .files
        .iter()
        .map(|f| f.path.as_str())
        .collect();
    assert_eq!(paths, vec!["TODO.md", "tidemark.json"]);
    assert!(outcome.record.manifest.missing.is_empty());
}

#[test]
fn same_day_backups_number_one_to_n() {
    let (_temp, layout) = project();
    let manager = BackupManager::new(layout.clone(), &config_keeping(20));

    for i in 0..12 {
        manager
            .create_backup_at("tick", BackupKind::Standard, at(17, 9, i))
            .unwrap();
    }

    let catalog = BackupCatalog::scan(&layout).unwrap();
    let mut sequences: Vec<u32> = catalog.records.iter().map(|r| r.version.sequence).collect();
    sequences.sort_unstable();
    assert_eq!(sequences, (1..=12).collect::<Vec<u32>>());
}

#[test]
fn six_backups_keep_versions_two_through_six() {
    let (_temp, layout) = project();
    let manager = BackupManager::new(layout.clone(), &config_keeping(5));

    for i in 0..6 {
        manager
            .create_backup_at("tick", BackupKind::Standard, at(17, 9, i))
            .unwrap();
    }

    assert_eq!(
        retained(&layout),
        vec![
            "2025-06-17_v6",
            "2025-06-17_v5",
            "2025-06-17_v4",
            "2025-06-17_v3",
            "2025-06-17_v2",
        ]
    );
    assert!(!layout.backups_dir().join("2025-06-17_v1").exists());
}

#[test]
fn retention_count_tracks_min_of_ceiling_and_total() {
    let (_temp, layout) = project();
    let max_kept = 3;
    let manager = BackupManager::new(layout.clone(), &config_keeping(max_kept));
    let mut created: Vec<BackupVersion> = Vec::new();

    // Spread over two days so ordering has to use the date too
    for (n, (day, minute)) in [(16, 0), (16, 1), (17, 0), (17, 1), (17, 2), (17, 3)]
        .into_iter()
        .enumerate()
    {
        let outcome = manager
            .create_backup_at("tick", BackupKind::Standard, at(day, 9, minute))
            .unwrap();
        created.push(outcome.record.version);

        let total = n + 1;
        let catalog = BackupCatalog::scan(&layout).unwrap();
        assert_eq!(catalog.len(), total.min(max_kept));

        let mut newest = created.clone();
        newest.sort_by(|a, b| b.cmp(a));
        newest.truncate(max_kept);
        assert_eq!(catalog.versions(), newest);
    }
}

#[test]
fn pruned_versions_are_not_reused() {
    let (_temp, layout) = project();
    let manager = BackupManager::new(layout.clone(), &config_keeping(1));

    for i in 0..4 {
        manager
            .create_backup_at("tick", BackupKind::Standard, at(17, 9, i))
            .unwrap();
    }

    assert_eq!(retained(&layout), vec!["2025-06-17_v4"]);
}

#[test]
fn double_digit_sequences_sort_numerically() {
    let (_temp, layout) = project();
    let manager = BackupManager::new(layout.clone(), &config_keeping(3));

    for i in 0..11 {
        manager
            .create_backup_at("tick", BackupKind::Standard, at(17, 9, i))
            .unwrap();
    }

    assert_eq!(
        retained(&layout),
        vec!["2025-06-17_v11", "2025-06-17_v10", "2025-06-17_v9"]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_backups_get_distinct_versions() {
    let (_temp, layout) = project();
    let config = config_keeping(100);

    for round in 0..10u32 {
        let barrier = Arc::new(Barrier::new(2));

        let tasks: Vec<_> = (0..2)
            .map(|_| {
                let manager = BackupManager::new(layout.clone(), &config);
                let barrier = Arc::clone(&barrier);
                tokio::task::spawn_blocking(move || {
                    barrier.wait();
                    manager.create_backup_at("race", BackupKind::Standard, at(17, 10, round))
                })
            })
            .collect();

        let mut versions = HashSet::new();
        for task in tasks {
            let outcome = task.await.unwrap().expect("both racers succeed");
            assert!(versions.insert(outcome.record.version), "duplicate version");
        }
    }

    let catalog = BackupCatalog::scan(&layout).unwrap();
    assert_eq!(catalog.len(), 20);
    assert!(catalog.corrupt.is_empty());

    let log = fs::read_to_string(layout.backup_log()).unwrap();
    assert_eq!(log.lines().count(), 20);
}

#[test]
fn record_after_backup_from_subdirectory() {
    let (temp, _layout) = project();
    let nested = temp.path().join("src").join("deep");
    fs::create_dir_all(&nested).unwrap();

    let root = RootResolver::resolve(&nested);
    assert_eq!(root, temp.path());

    let layout = ProjectLayout::new(root);
    let config = Config::load_with(&layout, None, |_| None).unwrap();
    let manager = BackupManager::new(layout.clone(), &config);
    let outcome = manager.create_backup("before refactor", BackupKind::Full).unwrap();

    let recorder = SessionRecorder::new(layout.clone(), config.thresholds());
    let before = fs::read(layout.session_history()).unwrap_or_default();
    let recorded = recorder.record("X", "Y");
    let after = fs::read(layout.session_history()).unwrap();

    assert!(recorded.history_written && recorded.snapshot_written);
    assert!(after.starts_with(&before));

    let state = recorder.latest_state().unwrap();
    assert_eq!(state.last_action, "X");
    assert_eq!(state.detail, "Y");
    assert_eq!(state.latest_backup, Some(outcome.record.version.to_string()));
}
