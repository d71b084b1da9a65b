use std::time::Duration;

use thiserror::Error;

use crate::types::JobId;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Parse(#[from] cadence_common::Error),

    #[error("invalid cron expression '{expr}': {source}")]
    CronParse {
        expr: String,
        #[source]
        source: cron::error::Error,
    },

    #[error("unknown timezone: {timezone}")]
    UnknownTimezone { timezone: String },

    #[error("invalid trigger: {message}")]
    InvalidTrigger { message: String },

    #[error("job not found: {job_id}")]
    JobNotFound { job_id: JobId },

    #[error("duplicate job name: {name}")]
    DuplicateJob { name: String },

    #[error("job {job_id}: {reason}")]
    InvalidTransition { job_id: JobId, reason: String },

    #[error("job {job_id} still running after {waited:?}")]
    Timeout { job_id: JobId, waited: Duration },

    #[error("{message}")]
    Message { message: String },

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn job_not_found(job_id: JobId) -> Self {
        Self::JobNotFound { job_id }
    }

    #[must_use]
    pub fn invalid_transition(job_id: JobId, reason: impl Into<String>) -> Self {
        Self::InvalidTransition {
            job_id,
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn invalid_trigger(message: impl Into<String>) -> Self {
        Self::InvalidTrigger {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn unknown_timezone(timezone: impl Into<String>) -> Self {
        Self::UnknownTimezone {
            timezone: timezone.into(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Errors raised by the persistence layer rather than by the caller's request.
    #[must_use]
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Json(_) | Self::Sqlx(_) | Self::Migrate(_) | Self::External { .. }
        )
    }
}

impl cadence_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::message(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

cadence_common::impl_context!();
