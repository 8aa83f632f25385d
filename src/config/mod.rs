// SPDX-License-Identifier: MIT
//! Agent configuration.
//!
//! One explicit [`AgentConfig`] struct, constructed at startup and passed
//! down — there is no process-wide mutable defaults module. Priority:
//! CLI / env var > `{data_dir}/config.toml` > built-in default.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::error;

const DEFAULT_CHECK_POOL_SIZE: usize = 4;
const DEFAULT_ENDPOINT_POOL_SIZE: usize = 2;
const DEFAULT_DUE_QUEUE_DEPTH: usize = 16;
const DEFAULT_RESULT_QUEUE_DEPTH: usize = 64;
const DEFAULT_ENDPOINT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_REGISTRATION_MAX_ATTEMPTS: u32 = 8;
const DEFAULT_REGISTRATION_RETRY_SECS: u64 = 5 * 60;

/// `{data_dir}/config.toml` — all fields are optional overrides.
#[derive(Debug, Default, Deserialize)]
struct TomlConfig {
    /// Log level filter string, e.g. "debug", "info,vigild=trace" (default: "info").
    log: Option<String>,
    /// Log output format: "pretty" (default) | "json".
    log_format: Option<String>,
    /// Worker threads for check execution (default: 4).
    check_pool_size: Option<usize>,
    /// Concurrent in-flight evaluation submissions (default: 2).
    endpoint_pool_size: Option<usize>,
    /// Scheduler delivery queue depth; overflow drops firings (default: 16).
    due_queue_depth: Option<usize>,
    /// Evaluator result queue depth; overflow drops results (default: 64).
    result_queue_depth: Option<usize>,
    /// Per-request endpoint timeout, seconds (default: 30).
    endpoint_timeout_secs: Option<u64>,
    /// Maximum registration attempts per activation (default: 8).
    registration_max_attempts: Option<u32>,
    /// Delay before retrying a "retry later" registration, seconds (default: 300).
    registration_retry_secs: Option<u64>,
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("config.toml");
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml — using defaults");
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub data_dir: PathBuf,
    pub log: String,
    /// "pretty" (default) | "json".
    pub log_format: String,
    pub check_pool_size: usize,
    pub endpoint_pool_size: usize,
    pub due_queue_depth: usize,
    pub result_queue_depth: usize,
    pub endpoint_timeout: Duration,
    pub registration_max_attempts: u32,
    pub registration_retry_delay: Duration,
}

impl AgentConfig {
    /// Build config from CLI/env args plus the optional TOML file.
    pub fn new(
        data_dir: Option<PathBuf>,
        log: Option<String>,
        check_pool_size: Option<usize>,
    ) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);
        let toml = load_toml(&data_dir).unwrap_or_default();

        let log = log.or(toml.log).unwrap_or_else(|| "info".to_string());
        let log_format = std::env::var("VIGILD_LOG_FORMAT")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.log_format)
            .unwrap_or_else(|| "pretty".to_string());

        let check_pool_size = check_pool_size
            .or(toml.check_pool_size)
            .unwrap_or(DEFAULT_CHECK_POOL_SIZE)
            .max(1);
        let endpoint_pool_size = toml
            .endpoint_pool_size
            .unwrap_or(DEFAULT_ENDPOINT_POOL_SIZE)
            .max(1);
        let due_queue_depth = toml.due_queue_depth.unwrap_or(DEFAULT_DUE_QUEUE_DEPTH).max(1);
        let result_queue_depth = toml
            .result_queue_depth
            .unwrap_or(DEFAULT_RESULT_QUEUE_DEPTH)
            .max(1);

        let endpoint_timeout = Duration::from_secs(
            toml.endpoint_timeout_secs
                .unwrap_or(DEFAULT_ENDPOINT_TIMEOUT_SECS),
        );
        let registration_max_attempts = toml
            .registration_max_attempts
            .unwrap_or(DEFAULT_REGISTRATION_MAX_ATTEMPTS)
            .max(1);
        let registration_retry_delay = Duration::from_secs(
            toml.registration_retry_secs
                .unwrap_or(DEFAULT_REGISTRATION_RETRY_SECS),
        );

        Self {
            data_dir,
            log,
            log_format,
            check_pool_size,
            endpoint_pool_size,
            due_queue_depth,
            result_queue_depth,
            endpoint_timeout,
            registration_max_attempts,
            registration_retry_delay,
        }
    }
}

fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("vigild");
        }
    }
    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("vigild");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join(".local")
                .join("share")
                .join("vigild");
        }
    }
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("vigild");
        }
    }
    // Fallback
    PathBuf::from(".vigild")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_a_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = AgentConfig::new(Some(dir.path().to_path_buf()), None, None);
        assert_eq!(config.log, "info");
        assert_eq!(config.check_pool_size, DEFAULT_CHECK_POOL_SIZE);
        assert_eq!(config.endpoint_timeout, Duration::from_secs(30));
        assert_eq!(config.registration_retry_delay, Duration::from_secs(300));
    }

    #[test]
    fn toml_overrides_defaults_and_cli_overrides_toml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "log = \"debug\"\ncheck_pool_size = 9\nendpoint_timeout_secs = 5\n",
        )
        .unwrap();

        let config = AgentConfig::new(Some(dir.path().to_path_buf()), None, None);
        assert_eq!(config.log, "debug");
        assert_eq!(config.check_pool_size, 9);
        assert_eq!(config.endpoint_timeout, Duration::from_secs(5));

        // CLI value wins over the TOML layer.
        let config = AgentConfig::new(Some(dir.path().to_path_buf()), Some("warn".into()), Some(2));
        assert_eq!(config.log, "warn");
        assert_eq!(config.check_pool_size, 2);
    }

    #[test]
    fn pool_sizes_are_clamped_to_at_least_one() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), "check_pool_size = 0\n").unwrap();
        let config = AgentConfig::new(Some(dir.path().to_path_buf()), None, None);
        assert_eq!(config.check_pool_size, 1);
    }
}
