//! Metric name and label definitions.
//!
//! Every metric emitted by the scheduler is named here so dashboards and
//! alerts have a single place to look.

/// Scheduler engine metrics
pub mod scheduler {
    /// Number of jobs in the registry
    pub const JOBS_REGISTERED: &str = "cadence_scheduler_jobs_registered";
    /// Number of job executions currently in flight
    pub const JOBS_RUNNING: &str = "cadence_scheduler_jobs_running";
    /// Total job executions started (scheduled and manual)
    pub const EXECUTIONS_TOTAL: &str = "cadence_scheduler_executions_total";
    /// Job executions whose action returned an error or panicked
    pub const EXECUTION_FAILURES_TOTAL: &str = "cadence_scheduler_execution_failures_total";
    /// Job execution duration in seconds
    pub const EXECUTION_DURATION_SECONDS: &str = "cadence_scheduler_execution_duration_seconds";
    /// Due firings skipped because the previous run was still in flight
    pub const MISSED_RUNS_TOTAL: &str = "cadence_scheduler_missed_runs_total";
    /// Manual triggers rejected because the job was already running
    pub const RUN_NOW_REJECTED_TOTAL: &str = "cadence_scheduler_run_now_rejected_total";
    /// Global status toggles
    pub const STATUS_CHANGES_TOTAL: &str = "cadence_scheduler_status_changes_total";
}

/// Persistence metrics
pub mod store {
    /// State store / history log failures seen by the engine
    pub const INFRASTRUCTURE_FAULTS_TOTAL: &str = "cadence_store_infrastructure_faults_total";
    /// History appends that needed at least one retry
    pub const HISTORY_APPEND_RETRIES_TOTAL: &str = "cadence_store_history_append_retries_total";
}

/// Common label keys
pub mod labels {
    pub const JOB: &str = "job";
    pub const STATUS: &str = "status";
    pub const TRIGGER: &str = "trigger";
    pub const OPERATION: &str = "operation";
}
