//! Persistence contracts for job state and run history.
//!
//! Every mutation is a single operation on one job's row so the engine and the
//! admin surface never race through a read-modify-write of their own.

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
};

use crate::{
    Result,
    trigger::TriggerSpec,
    types::{HistoryEntry, HistoryQuery, JobId, JobState, LastRun, RunRecord},
};

/// Mutable per-job state plus the persisted global scheduler status.
#[async_trait]
pub trait JobStateStore: Send + Sync {
    /// Seed a row for `job_id` if none exists. Returns the stored state.
    async fn ensure_job(&self, job_id: JobId, default_active: bool) -> Result<JobState>;

    async fn get_state(&self, job_id: JobId) -> Result<JobState>;

    /// All rows, ordered by job id.
    async fn list_states(&self) -> Result<Vec<JobState>>;

    /// Flip the active flag and return the state actually stored.
    ///
    /// Deactivating also clears the next run time.
    async fn set_active(&self, job_id: JobId, active: bool) -> Result<JobState>;

    /// Store the next run time. An inactive job always stores `None`.
    async fn set_next_run(&self, job_id: JobId, next_run_at: Option<DateTime<Utc>>) -> Result<()>;

    async fn set_running(&self, job_id: JobId, running: bool) -> Result<()>;

    /// Clear the running flag, store the last-run summary and re-arm
    /// (subject to the same rule as [`JobStateStore::set_next_run`]).
    async fn record_completion(
        &self,
        job_id: JobId,
        last_run: &LastRun,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Count a skipped firing. Returns the new total.
    async fn record_missed(&self, job_id: JobId) -> Result<u64>;

    async fn set_trigger_override(
        &self,
        job_id: JobId,
        trigger: Option<TriggerSpec>,
    ) -> Result<JobState>;

    /// Reset running flags left behind by a previous process. Returns how many were cleared.
    async fn clear_running_flags(&self) -> Result<usize>;

    /// Persisted global status, or `None` if it was never written.
    async fn scheduler_status(&self) -> Result<Option<bool>>;

    async fn set_scheduler_status(&self, running: bool) -> Result<()>;
}

/// Append-only run history.
#[async_trait]
pub trait HistoryLog: Send + Sync {
    /// Append a finished run, assigning the next per-job version.
    async fn append(&self, record: &RunRecord) -> Result<HistoryEntry>;

    /// Entries for a job, oldest first.
    async fn query(&self, job_id: JobId, query: HistoryQuery) -> Result<Vec<HistoryEntry>>;

    async fn latest(&self, job_id: JobId) -> Result<Option<HistoryEntry>>;

    async fn count(&self, job_id: JobId) -> Result<u64>;
}
