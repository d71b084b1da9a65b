//! Config schema types: scheduler tunables and the job list.

use std::time::Duration;

use {
    cadence_common::duration::parse_duration,
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CadenceConfig {
    pub scheduler: SchedulerConfig,
    pub jobs: Vec<JobConfig>,
}

impl CadenceConfig {
    #[must_use]
    pub fn job(&self, name: &str) -> Option<&JobConfig> {
        self.jobs.iter().find(|j| j.name == name)
    }
}

/// Engine tunables. Durations are human strings (`"30s"`, `"5m"`, `"200ms"`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Global status used the first time the database is created. A status
    /// persisted by a previous run takes precedence.
    pub enabled_on_start: bool,
    pub poll_interval: String,
    pub shutdown_grace: String,
    pub history_retry_attempts: u32,
    pub history_retry_backoff: String,
    /// SQLite URL. `None` keeps state and history in memory.
    pub database_url: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled_on_start: true,
            poll_interval: "30s".into(),
            shutdown_grace: "30s".into(),
            history_retry_attempts: 3,
            history_retry_backoff: "200ms".into(),
            database_url: None,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> cadence_common::Result<Duration> {
        parse_duration(&self.poll_interval)
    }

    pub fn shutdown_grace(&self) -> cadence_common::Result<Duration> {
        parse_duration(&self.shutdown_grace)
    }

    pub fn history_retry_backoff(&self) -> cadence_common::Result<Duration> {
        parse_duration(&self.history_retry_backoff)
    }
}

/// One recurring job that runs an external command.
///
/// Exactly one of `every` and `cron` must be set. `tz` only applies to `cron`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JobConfig {
    pub name: String,
    pub every: Option<String>,
    pub cron: Option<String>,
    pub tz: Option<String>,
    pub active: bool,
    pub command: String,
    pub args: Vec<String>,
    /// Working directory for the command. Defaults to the scheduler's own.
    pub workdir: Option<String>,
    /// Kill the command if it runs longer than this.
    pub timeout: Option<String>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            every: None,
            cron: None,
            tz: None,
            active: true,
            command: String::new(),
            args: Vec::new(),
            workdir: None,
            timeout: None,
        }
    }
}

impl JobConfig {
    pub fn timeout(&self) -> cadence_common::Result<Option<Duration>> {
        self.timeout.as_deref().map(parse_duration).transpose()
    }
}
