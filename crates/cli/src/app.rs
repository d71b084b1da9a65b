//! Turns a loaded config into a ready-to-start engine.

use std::{path::Path, sync::Arc};

use {
    anyhow::{Context, bail},
    cadence_config::{CadenceConfig, JobConfig},
    cadence_scheduler::{
        EngineConfig, JobDefinition, JobRegistry, SchedulerService, SchedulerStatus, TriggerSpec,
        store::{HistoryLog, JobStateStore},
        store_memory::{InMemoryHistoryLog, InMemoryStateStore},
        store_sqlite::SqliteStore,
    },
    tracing::{debug, info},
};

use crate::command_job::CommandSpec;

/// Load the explicit config file, or discover one. `CADENCE_*` overrides
/// apply in both cases.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<CadenceConfig> {
    match path {
        Some(path) => {
            let mut config = cadence_config::load_config(path)?;
            cadence_config::apply_env_overrides(&mut config);
            Ok(config)
        },
        None => Ok(cadence_config::discover_and_load()),
    }
}

/// The trigger a config job declares. Exactly one of `every` and `cron`.
pub fn trigger_spec(job: &JobConfig) -> anyhow::Result<TriggerSpec> {
    match (&job.every, &job.cron) {
        (Some(every), None) => Ok(TriggerSpec::every(every.clone())),
        (None, Some(expr)) => Ok(TriggerSpec::Cron {
            expr: expr.clone(),
            tz: job.tz.clone(),
        }),
        (Some(_), Some(_)) => bail!("job '{}' sets both `every` and `cron`", job.name),
        (None, None) => bail!("job '{}' needs `every` or `cron`", job.name),
    }
}

/// Build the registry of command-runner jobs, in config order.
pub fn build_registry(config: &CadenceConfig) -> anyhow::Result<JobRegistry> {
    let mut builder = JobRegistry::builder();
    for job in &config.jobs {
        let trigger = trigger_spec(job)?
            .build()
            .with_context(|| format!("invalid trigger for job '{}'", job.name))?;
        let command = CommandSpec {
            program: job.command.clone(),
            args: job.args.clone(),
            workdir: job.workdir.as_ref().map(Into::into),
            timeout: job
                .timeout()
                .with_context(|| format!("invalid timeout for job '{}'", job.name))?,
        };
        builder = builder.job(
            JobDefinition::new(job.name.clone(), trigger, command.into_action())
                .with_default_active(job.active),
        );
    }
    Ok(builder.build()?)
}

pub fn engine_config(config: &CadenceConfig) -> anyhow::Result<EngineConfig> {
    let scheduler = &config.scheduler;
    Ok(EngineConfig {
        poll_interval: scheduler.poll_interval()?,
        shutdown_grace: scheduler.shutdown_grace()?,
        history_retry_attempts: scheduler.history_retry_attempts.max(1),
        history_retry_backoff: scheduler.history_retry_backoff()?,
    })
}

/// Open the configured stores. Without a database URL everything stays in memory.
pub async fn open_stores(
    config: &CadenceConfig,
) -> anyhow::Result<(Arc<dyn JobStateStore>, Arc<dyn HistoryLog>)> {
    match config.scheduler.database_url.as_deref() {
        Some(url) => {
            let store = Arc::new(
                SqliteStore::new(url)
                    .await
                    .with_context(|| format!("failed to open database {url}"))?,
            );
            info!(url, "using sqlite store");
            let states: Arc<dyn JobStateStore> = store.clone();
            let history: Arc<dyn HistoryLog> = store;
            Ok((states, history))
        },
        None => {
            debug!("no database_url configured, state and history are in memory");
            let states: Arc<dyn JobStateStore> = Arc::new(InMemoryStateStore::new());
            let history: Arc<dyn HistoryLog> = Arc::new(InMemoryHistoryLog::new());
            Ok((states, history))
        },
    }
}

/// Assemble the engine from config. Not started.
pub async fn build_service(config: &CadenceConfig) -> anyhow::Result<Arc<SchedulerService>> {
    let registry = Arc::new(build_registry(config)?);
    let engine = engine_config(config)?;
    let (states, history) = open_stores(config).await?;
    let status = Arc::new(SchedulerStatus::new(config.scheduler.enabled_on_start));
    Ok(SchedulerService::with_config(
        registry, states, history, status, engine,
    ))
}
