//! JSON-in/JSON-out service over the admin surface, for a transport layer to mount.

use std::sync::Arc;

use {async_trait::async_trait, serde_json::Value, tracing::error};

use crate::{
    Error,
    service::SchedulerService,
    types::{HistoryQuery, JobId, JobPatch},
};

/// Error returned by [`JobsService`] methods, with a stable machine-readable code.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{message}")]
    NotFound { message: String },
    #[error("{message}")]
    Conflict { message: String },
    #[error("{message}")]
    InvalidRequest { message: String },
    #[error("{message}")]
    Unavailable { message: String },
    #[error("{0}")]
    Serde(#[from] serde_json::Error),
}

impl ServiceError {
    #[must_use]
    pub fn invalid_request(message: impl std::fmt::Display) -> Self {
        Self::InvalidRequest {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::InvalidRequest { .. } | Self::Serde(_) => "invalid_request",
            Self::Unavailable { .. } => "unavailable",
        }
    }
}

impl From<Error> for ServiceError {
    fn from(err: Error) -> Self {
        let message = err.to_string();
        match err {
            Error::JobNotFound { .. } => Self::NotFound { message },
            Error::InvalidTransition { .. } => Self::Conflict { message },
            Error::Timeout { .. } => Self::Unavailable { message },
            Error::InvalidTrigger { .. }
            | Error::CronParse { .. }
            | Error::UnknownTimezone { .. }
            | Error::Parse(_)
            | Error::DuplicateJob { .. } => Self::InvalidRequest { message },
            other => {
                error!(error = %other, "jobs service failed");
                Self::Unavailable { message }
            },
        }
    }
}

pub type ServiceResult<T = Value> = Result<T, ServiceError>;

#[async_trait]
pub trait JobsService: Send + Sync {
    /// `{ "running": bool }`
    async fn status(&self) -> ServiceResult;
    /// Params `{ "running": bool }`.
    async fn set_status(&self, params: Value) -> ServiceResult;
    async fn list(&self) -> ServiceResult;
    /// Params `{ "jobId": n }`.
    async fn get(&self, params: Value) -> ServiceResult;
    /// Params `{ "jobId": n, "patch": { "active"?, "trigger"? } }`.
    async fn update(&self, params: Value) -> ServiceResult;
    /// Params `{ "jobId": n, "offset"?, "limit"? }`.
    async fn history(&self, params: Value) -> ServiceResult;
    /// Params `{ "jobId": n }`. Acknowledges without waiting for the run.
    async fn run(&self, params: Value) -> ServiceResult;
}

/// [`JobsService`] backed by a running [`SchedulerService`].
pub struct LiveJobsService {
    inner: Arc<SchedulerService>,
}

impl LiveJobsService {
    pub fn new(inner: Arc<SchedulerService>) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &Arc<SchedulerService> {
        &self.inner
    }
}

fn job_id(params: &Value) -> ServiceResult<JobId> {
    let raw = params
        .get("jobId")
        .and_then(Value::as_u64)
        .ok_or_else(|| ServiceError::invalid_request("missing 'jobId'"))?;
    JobId::try_from(raw).map_err(|_| ServiceError::invalid_request(format!("invalid 'jobId': {raw}")))
}

fn usize_param(params: &Value, key: &str) -> ServiceResult<Option<usize>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| ServiceError::invalid_request(format!("invalid '{key}'"))),
    }
}

#[async_trait]
impl JobsService for LiveJobsService {
    async fn status(&self) -> ServiceResult {
        Ok(serde_json::json!({ "running": self.inner.scheduler_status() }))
    }

    async fn set_status(&self, params: Value) -> ServiceResult {
        let running = params
            .get("running")
            .and_then(Value::as_bool)
            .ok_or_else(|| ServiceError::invalid_request("missing 'running'"))?;
        let applied = self.inner.set_scheduler_status(running).await?;
        Ok(serde_json::json!({ "running": applied }))
    }

    async fn list(&self) -> ServiceResult {
        let jobs = self.inner.list_jobs().await?;
        Ok(serde_json::to_value(jobs)?)
    }

    async fn get(&self, params: Value) -> ServiceResult {
        let job = self.inner.get_job(job_id(&params)?).await?;
        Ok(serde_json::to_value(job)?)
    }

    async fn update(&self, params: Value) -> ServiceResult {
        let id = job_id(&params)?;
        let patch: JobPatch = serde_json::from_value(
            params
                .get("patch")
                .cloned()
                .unwrap_or(Value::Object(Default::default())),
        )
        .map_err(|e| ServiceError::invalid_request(format!("invalid patch: {e}")))?;
        let job = self.inner.update_job(id, patch).await?;
        Ok(serde_json::to_value(job)?)
    }

    async fn history(&self, params: Value) -> ServiceResult {
        let id = job_id(&params)?;
        let query = HistoryQuery {
            offset: usize_param(&params, "offset")?.unwrap_or(0),
            limit: usize_param(&params, "limit")?,
        };
        let page = self.inner.get_history(id, query).await?;
        Ok(serde_json::to_value(page)?)
    }

    async fn run(&self, params: Value) -> ServiceResult {
        let id = job_id(&params)?;
        self.inner.run_now(id).await?;
        Ok(serde_json::json!({ "jobId": id, "accepted": true }))
    }
}
