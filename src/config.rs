//! Configuration loading from traitfold.toml.
//!
//! Scheduler plumbing differs between clusters (command names, polling
//! cadence), so it lives in a small TOML file rather than in code.
//!
//! ## Example
//!
//! ```toml
//! [scheduler]
//! submit = "bsub"
//! query = "bjobs"
//! poll-secs = 10
//! job-prefix = "traitfold_cmd"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Resolved configuration with defaults applied.
#[derive(Debug, Clone)]
pub struct Config {
    /// Source file for this config (for display).
    pub source: Option<PathBuf>,

    /// Batch submission command (LSF `bsub` by default).
    pub submit: String,

    /// Job query command (LSF `bjobs` by default).
    pub query: String,

    /// Polling interval while waiting on a job.
    pub poll_interval: Duration,

    /// Prefix for generated job names; the sequence number is appended.
    pub job_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: None,
            submit: "bsub".into(),
            query: "bjobs".into(),
            poll_interval: Duration::from_secs(10),
            job_prefix: "traitfold_cmd".into(),
        }
    }
}

/// Raw config as deserialized from TOML.
#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    scheduler: Option<RawScheduler>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
struct RawScheduler {
    submit: Option<String>,
    query: Option<String>,
    poll_secs: Option<u64>,
    job_prefix: Option<String>,
}

impl Config {
    /// Load configuration starting from the given directory.
    ///
    /// Search order:
    /// 1. traitfold.toml in the directory
    /// 2. traitfold.toml in ancestor directories
    /// 3. Defaults if nothing found
    pub fn load(directory: &Path) -> Self {
        let mut current = Some(directory.to_path_buf());
        while let Some(dir) = current {
            let candidate = dir.join("traitfold.toml");
            if candidate.exists() {
                if let Some(config) = Self::load_file(&candidate) {
                    return config;
                }
            }
            current = dir.parent().map(Path::to_path_buf);
        }
        Self::default()
    }

    fn load_file(path: &Path) -> Option<Self> {
        let text = std::fs::read_to_string(path).ok()?;
        let raw: RawConfig = toml::from_str(&text).ok()?;
        let scheduler = raw.scheduler.unwrap_or_default();

        let defaults = Self::default();
        Some(Self {
            source: Some(path.to_path_buf()),
            submit: scheduler.submit.unwrap_or(defaults.submit),
            query: scheduler.query.unwrap_or(defaults.query),
            poll_interval: scheduler
                .poll_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.poll_interval),
            job_prefix: scheduler.job_prefix.unwrap_or(defaults.job_prefix),
        })
    }

    /// One-line summary for verbose output.
    pub fn display_summary(&self) -> String {
        match &self.source {
            Some(path) => format!("Config: {}", path.display()),
            None => "Config: defaults (no traitfold.toml found)".to_string(),
        }
    }
}
