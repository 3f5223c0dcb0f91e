/// Configuration for tidemark
///
/// Settings are loaded from four layers (in priority order):
/// 1. **Compiled defaults** ([`Config::default()`])
/// 2. **User file** `~/.tidemark/config.json` (deep-merged over defaults)
/// 3. **Project marker** `tidemark.json`, when it holds a JSON object
/// 4. **Environment variables** `TIDEMARK_*` (highest priority)
///
/// The result is resolved once per invocation and passed around by value.

use crate::core::retention::RetentionPolicy;
use crate::core::timing::TimingThresholds;
use crate::error::{Result, TidemarkError};
use crate::store::layout::{
    LATEST_STATE_FILE, MARKER_FILE, SESSION_HISTORY_FILE, TASK_LIST_FILE,
};
use crate::store::ProjectLayout;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_MAX_KEPT: &str = "TIDEMARK_MAX_KEPT";
pub const ENV_BACKUP_INTERVAL: &str = "TIDEMARK_BACKUP_INTERVAL_MINUTES";
pub const ENV_TASK_STALENESS: &str = "TIDEMARK_TASK_STALENESS_MINUTES";

const DEFAULT_THRESHOLD_MINUTES: u64 = 30;
const DEFAULT_MAX_KEPT: usize = 5;
const DEFAULT_COLLISION_RETRIES: u32 = 5;

/// Top-level settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub thresholds: ThresholdConfig,
    pub retention: RetentionConfig,
    pub backup: BackupConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThresholdConfig {
    pub task_list_staleness_minutes: u64,
    pub backup_interval_minutes: u64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            task_list_staleness_minutes: DEFAULT_THRESHOLD_MINUTES,
            backup_interval_minutes: DEFAULT_THRESHOLD_MINUTES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetentionConfig {
    pub max_kept: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_kept: DEFAULT_MAX_KEPT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackupConfig {
    /// Paths copied by every backup, relative to the project root
    pub standard_files: Vec<String>,
    /// Extra paths (usually directories) copied by full backups
    pub full_extra_paths: Vec<String>,
    pub max_collision_retries: u32,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            standard_files: vec![
                MARKER_FILE.to_string(),
                TASK_LIST_FILE.to_string(),
                SESSION_HISTORY_FILE.to_string(),
                LATEST_STATE_FILE.to_string(),
                "README.md".to_string(),
            ],
            full_extra_paths: vec!["patterns".to_string(), "memory".to_string()],
            max_collision_retries: DEFAULT_COLLISION_RETRIES,
        }
    }
}

impl Config {
    /// Load settings for a project from every layer
    pub fn load(layout: &ProjectLayout) -> Result<Self> {
        let user_file = user_config_path();
        Self::load_with(layout, user_file.as_deref(), |key| std::env::var(key).ok())
    }

    /// Same as [`Config::load`] with the user file and environment supplied by the caller
    pub fn load_with<F>(layout: &ProjectLayout, user_file: Option<&Path>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut merged = serde_json::to_value(Config::default())?;

        if let Some(path) = user_file {
            if let Some(overlay) = read_json_object(path)? {
                tracing::debug!(path = %path.display(), "merging user config");
                merged = deep_merge(merged, overlay);
            }
        }

        let marker = layout.marker_file();
        if let Some(overlay) = read_json_object(&marker)? {
            tracing::debug!(path = %marker.display(), "merging project config");
            merged = deep_merge(merged, overlay);
        }

        let mut config: Config = serde_json::from_value(merged)
            .map_err(|e| TidemarkError::Config(format!("invalid settings: {}", e)))?;

        config.apply_env_overrides(env)?;
        config.validate()?;

        Ok(config)
    }

    fn apply_env_overrides<F>(&mut self, env: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = env(ENV_MAX_KEPT) {
            self.retention.max_kept = parse_env(ENV_MAX_KEPT, &v)?;
        }
        if let Some(v) = env(ENV_BACKUP_INTERVAL) {
            self.thresholds.backup_interval_minutes = parse_env(ENV_BACKUP_INTERVAL, &v)?;
        }
        if let Some(v) = env(ENV_TASK_STALENESS) {
            self.thresholds.task_list_staleness_minutes = parse_env(ENV_TASK_STALENESS, &v)?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.retention.max_kept == 0 {
            return Err(TidemarkError::Config(
                "retention.max_kept must be at least 1".to_string(),
            ));
        }
        if self.backup.max_collision_retries == 0 {
            return Err(TidemarkError::Config(
                "backup.max_collision_retries must be at least 1".to_string(),
            ));
        }
        for (key, value) in [
            (
                "thresholds.task_list_staleness_minutes",
                self.thresholds.task_list_staleness_minutes,
            ),
            (
                "thresholds.backup_interval_minutes",
                self.thresholds.backup_interval_minutes,
            ),
        ] {
            if value.checked_mul(60).is_none() {
                return Err(TidemarkError::Config(format!(
                    "{} is too large ({} minutes)",
                    key, value
                )));
            }
        }
        Ok(())
    }

    pub fn thresholds(&self) -> TimingThresholds {
        TimingThresholds {
            task_list_staleness: minutes(self.thresholds.task_list_staleness_minutes),
            backup_interval: minutes(self.thresholds.backup_interval_minutes),
        }
    }

    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy::new(self.retention.max_kept)
    }
}

/// `~/.tidemark/config.json`, if a home directory exists
pub fn user_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".tidemark").join("config.json"))
}

/// Recursively merge `overlay` into `base`. Objects merge key by key, anything else replaces.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let merged = match base.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            Value::Object(base)
        }
        (_, overlay) => overlay,
    }
}

/// Read a JSON object from disk
///
/// Missing or blank files yield `None` (an empty marker is fine). Anything that
/// is present but not a JSON object is a configuration error.
fn read_json_object(path: &Path) -> Result<Option<Value>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if content.trim().is_empty() {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(&content)
        .map_err(|e| TidemarkError::Config(format!("{}: {}", path.display(), e)))?;

    match value {
        Value::Object(_) => Ok(Some(value)),
        _ => Err(TidemarkError::Config(format!(
            "{}: expected a JSON object",
            path.display()
        ))),
    }
}

fn minutes(m: u64) -> Duration {
    Duration::from_secs(m.saturating_mul(60))
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| TidemarkError::Config(format!("{}={} is not a valid number", key, value)))
}
