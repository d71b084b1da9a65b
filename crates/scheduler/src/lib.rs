//! Recurring background jobs: a static registry, persisted per-job state, an
//! append-only run history, a timer-driven engine with per-job mutual
//! exclusion, and an admin surface in typed and JSON form.

pub mod admin;
pub mod error;
mod guard;
pub mod registry;
pub mod rpc;
pub mod service;
pub mod status;
pub mod store;
pub mod store_memory;
pub mod store_sqlite;
pub mod trigger;
pub mod types;

pub use {
    error::{Error, Result},
    registry::{JobActionFn, JobContext, JobDefinition, JobRegistry, action_fn},
    service::{EngineConfig, SchedulerService},
    status::SchedulerStatus,
    trigger::{Trigger, TriggerSpec},
};

/// Run database migrations for the scheduler tables.
///
/// Creates `job_states`, `scheduler_status` and `job_run_history`. Called by
/// [`store_sqlite::SqliteStore::new`]; call it yourself before
/// [`store_sqlite::SqliteStore::with_pool`].
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
