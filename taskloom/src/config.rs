/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Orchestrator configuration.
//!
//! Configuration is a plain struct with a [`Default`] impl documenting the
//! recommended defaults. [`OrchestratorConfig::from_env`] layers environment
//! variables (`TASKLOOM_*`) and an optional TOML file on top of those
//! defaults, in that priority order: defaults < TOML file < environment.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Runtime configuration for an [`crate::Orchestrator`].
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Database connection URL (`postgres://...` or `sqlite://path/to/file.db`).
    pub database_url: String,

    /// Number of pooled database connections.
    pub db_pool_size: u32,

    /// Whether to run embedded migrations on startup.
    pub run_migrations_on_start: bool,

    /// Number of worker tasks draining the work queue concurrently.
    pub worker_pool_size: usize,

    /// How often the queue poller looks for due work items.
    pub poll_interval: Duration,

    /// How long a claimed work item's lease is valid without a heartbeat.
    pub lease_duration: Duration,

    /// How often a worker refreshes the lease of the item it is executing.
    /// Must be well under `lease_duration` (the engine enforces `< L / 3`).
    pub heartbeat_interval: Duration,

    /// Base delay before a failed work item is retried; actual delay grows
    /// with consecutive failures (see [`crate::queue::backoff`]).
    pub retry_backoff_base: Duration,

    /// Default per-task timeout used when a task definition does not
    /// specify one.
    pub default_task_timeout: Duration,

    /// Default max retry count used when a task definition does not specify
    /// one.
    pub default_max_retries: i32,

    /// Cap on combined stdout+stderr captured from a task's child process.
    pub max_output_bytes: usize,

    /// Poll interval for the cron dispatcher. Defaults to `poll_interval`.
    pub cron_poll_interval: Duration,

    /// Tracing `EnvFilter` directive string, e.g. `"info"` or
    /// `"taskloom=debug,warn"`.
    pub log_filter: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://taskloom.db".to_string(),
            db_pool_size: 10,
            run_migrations_on_start: true,
            worker_pool_size: 10,
            poll_interval: Duration::from_secs(5),
            lease_duration: Duration::from_secs(5 * 60),
            heartbeat_interval: Duration::from_secs(30),
            retry_backoff_base: Duration::from_secs(30),
            default_task_timeout: Duration::from_secs(60 * 60),
            default_max_retries: 3,
            max_output_bytes: 1024 * 1024,
            cron_poll_interval: Duration::from_secs(5),
            log_filter: "info".to_string(),
        }
    }
}

/// On-disk / environment representation of [`OrchestratorConfig`].
///
/// All fields are optional so a partial TOML file only overrides what it
/// names; anything missing falls back to [`OrchestratorConfig::default`].
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    database_url: Option<String>,
    db_pool_size: Option<u32>,
    run_migrations_on_start: Option<bool>,
    worker_pool_size: Option<usize>,
    poll_interval_secs: Option<u64>,
    lease_duration_secs: Option<u64>,
    heartbeat_interval_secs: Option<u64>,
    retry_backoff_base_secs: Option<u64>,
    default_task_timeout_secs: Option<u64>,
    default_max_retries: Option<i32>,
    max_output_bytes: Option<usize>,
    cron_poll_interval_secs: Option<u64>,
    log_filter: Option<String>,
}

impl OrchestratorConfig {
    /// Loads configuration starting from [`Default::default`], applying an
    /// optional TOML file at `path` if given, then environment variables
    /// prefixed `TASKLOOM_`.
    pub fn load(toml_path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(path) = toml_path {
            let contents = std::fs::read_to_string(path)?;
            let raw: RawConfig = toml::from_str(&contents)?;
            config.apply_raw(raw);
        }

        config.apply_env();
        Ok(config)
    }

    fn apply_raw(&mut self, raw: RawConfig) {
        if let Some(v) = raw.database_url {
            self.database_url = v;
        }
        if let Some(v) = raw.db_pool_size {
            self.db_pool_size = v;
        }
        if let Some(v) = raw.run_migrations_on_start {
            self.run_migrations_on_start = v;
        }
        if let Some(v) = raw.worker_pool_size {
            self.worker_pool_size = v;
        }
        if let Some(v) = raw.poll_interval_secs {
            self.poll_interval = Duration::from_secs(v);
        }
        if let Some(v) = raw.lease_duration_secs {
            self.lease_duration = Duration::from_secs(v);
        }
        if let Some(v) = raw.heartbeat_interval_secs {
            self.heartbeat_interval = Duration::from_secs(v);
        }
        if let Some(v) = raw.retry_backoff_base_secs {
            self.retry_backoff_base = Duration::from_secs(v);
        }
        if let Some(v) = raw.default_task_timeout_secs {
            self.default_task_timeout = Duration::from_secs(v);
        }
        if let Some(v) = raw.default_max_retries {
            self.default_max_retries = v;
        }
        if let Some(v) = raw.max_output_bytes {
            self.max_output_bytes = v;
        }
        if let Some(v) = raw.cron_poll_interval_secs {
            self.cron_poll_interval = Duration::from_secs(v);
        }
        if let Some(v) = raw.log_filter {
            self.log_filter = v;
        }
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("TASKLOOM_DATABASE_URL") {
            self.database_url = v;
        }
        if let Ok(v) = env_u32("TASKLOOM_DB_POOL_SIZE") {
            self.db_pool_size = v;
        }
        if let Ok(v) = std::env::var("TASKLOOM_RUN_MIGRATIONS_ON_START") {
            self.run_migrations_on_start = parse_bool(&v);
        }
        if let Ok(v) = env_usize("TASKLOOM_WORKER_POOL_SIZE") {
            self.worker_pool_size = v;
        }
        if let Ok(v) = env_u64("TASKLOOM_POLL_INTERVAL_SECS") {
            self.poll_interval = Duration::from_secs(v);
        }
        if let Ok(v) = env_u64("TASKLOOM_LEASE_DURATION_SECS") {
            self.lease_duration = Duration::from_secs(v);
        }
        if let Ok(v) = env_u64("TASKLOOM_HEARTBEAT_INTERVAL_SECS") {
            self.heartbeat_interval = Duration::from_secs(v);
        }
        if let Ok(v) = env_u64("TASKLOOM_RETRY_BACKOFF_BASE_SECS") {
            self.retry_backoff_base = Duration::from_secs(v);
        }
        if let Ok(v) = env_u64("TASKLOOM_DEFAULT_TASK_TIMEOUT_SECS") {
            self.default_task_timeout = Duration::from_secs(v);
        }
        if let Ok(v) = std::env::var("TASKLOOM_LOG_FILTER") {
            self.log_filter = v;
        }
    }

    /// Validates that the heartbeat interval is a safe fraction of the lease
    /// duration, per the engine's `H < L / 3` requirement. Called by
    /// [`crate::Orchestrator::new`]; exposed so callers can check
    /// hand-built configs early.
    pub fn validate(&self) -> Result<(), String> {
        if self.heartbeat_interval * 3 >= self.lease_duration {
            return Err(format!(
                "heartbeat_interval ({:?}) must be less than lease_duration / 3 ({:?})",
                self.heartbeat_interval,
                self.lease_duration / 3
            ));
        }
        if self.worker_pool_size == 0 {
            return Err("worker_pool_size must be at least 1".to_string());
        }
        Ok(())
    }
}

fn parse_bool(v: &str) -> bool {
    matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn env_u64(key: &str) -> Result<u64, ()> {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).ok_or(())
}

fn env_u32(key: &str) -> Result<u32, ()> {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).ok_or(())
}

fn env_usize(key: &str) -> Result<usize, ()> {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).ok_or(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        assert!(OrchestratorConfig::default().validate().is_ok());
    }

    #[test]
    fn heartbeat_too_close_to_lease_fails_validation() {
        let mut config = OrchestratorConfig::default();
        config.heartbeat_interval = config.lease_duration;
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taskloom.toml");
        std::fs::write(&path, "worker_pool_size = 4\nlog_filter = \"debug\"\n").unwrap();

        let config = OrchestratorConfig::load(Some(&path)).unwrap();
        assert_eq!(config.worker_pool_size, 4);
        assert_eq!(config.log_filter, "debug");
        // Untouched fields keep their default.
        assert_eq!(config.db_pool_size, 10);
    }
}
