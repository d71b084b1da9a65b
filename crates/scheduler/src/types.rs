//! Core data types for the scheduler: job state, run history, admin views.

use std::{fmt, str::FromStr};

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

use crate::trigger::TriggerSpec;

/// Stable job identifier, assigned by the registry in registration order (1-based).
pub type JobId = u32;

/// Outcome of a single job run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    Success,
    Failure,
}

impl RunStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// What caused a run to start.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TriggerType {
    /// Fired by the timer loop when the job came due.
    Scheduled,
    /// Forced through the admin surface.
    Manual,
}

impl TriggerType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "manual" => Ok(Self::Manual),
            other => Err(format!("unknown trigger type: {other}")),
        }
    }
}

/// Summary of the most recent completed run, kept on the job state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LastRun {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub trigger_type: TriggerType,
}

/// Mutable, persisted state of one registry job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    pub job_id: JobId,
    pub active: bool,
    pub currently_running: bool,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run: Option<LastRun>,
    /// Due firings skipped because a previous run was still in flight.
    pub missed_runs: u64,
    /// Trigger bound through the admin surface, replacing the registry default.
    pub trigger_override: Option<TriggerSpec>,
    pub updated_at: DateTime<Utc>,
}

impl JobState {
    #[must_use]
    pub fn new(job_id: JobId, active: bool) -> Self {
        Self {
            job_id,
            active,
            currently_running: false,
            next_run_at: None,
            last_run: None,
            missed_runs: 0,
            trigger_override: None,
            updated_at: Utc::now(),
        }
    }
}

/// A run that finished and is about to be written to the history log.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub job_id: JobId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub trigger_type: TriggerType,
    pub error_message: Option<String>,
    pub error_log: Option<String>,
}

impl RunRecord {
    #[must_use]
    pub fn last_run(&self) -> LastRun {
        LastRun {
            started_at: self.started_at,
            finished_at: self.finished_at,
            status: self.status,
            trigger_type: self.trigger_type,
        }
    }
}

/// Immutable history entry, as stored by the history log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub job_id: JobId,
    /// 1-based sequence number within the job's history.
    pub version: u64,
    #[serde(rename = "jobRunStartTime")]
    pub started_at: DateTime<Utc>,
    #[serde(rename = "jobRunEndTime")]
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub trigger_type: TriggerType,
    #[serde(
        rename = "jobRunErrorMessage",
        skip_serializing_if = "Option::is_none"
    )]
    pub error_message: Option<String>,
    #[serde(rename = "jobRunErrorLog", skip_serializing_if = "Option::is_none")]
    pub error_log: Option<String>,
}

impl HistoryEntry {
    #[must_use]
    pub fn from_record(record: &RunRecord, version: u64) -> Self {
        Self {
            job_id: record.job_id,
            version,
            started_at: record.started_at,
            finished_at: record.finished_at,
            status: record.status,
            trigger_type: record.trigger_type,
            error_message: record.error_message.clone(),
            error_log: record.error_log.clone(),
        }
    }

    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// Offset/limit window over a job's history (oldest first).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct HistoryQuery {
    pub offset: usize,
    pub limit: Option<usize>,
}

impl HistoryQuery {
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn page(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit: Some(limit),
        }
    }
}

/// A page of history plus the total number of entries for the job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub total_filtered_records: u64,
    pub page_items: Vec<HistoryEntry>,
}

/// Client-facing view of a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub display_name: String,
    pub active: bool,
    pub currently_running: bool,
    /// Absent while the scheduler is stopped or the job is inactive.
    pub next_run_time: Option<DateTime<Utc>>,
    /// Human-readable description of the effective trigger.
    pub trigger: String,
    pub missed_runs: u64,
    pub last_run_history: Option<HistoryEntry>,
}

/// Partial update accepted by the admin surface.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<TriggerSpec>,
}
