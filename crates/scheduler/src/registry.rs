//! Static job catalog. Built once at startup and immutable afterwards.

use std::{collections::HashSet, fmt, future::Future, pin::Pin, sync::Arc};

use chrono::{DateTime, Utc};

use crate::{
    error::{Error, Result},
    trigger::Trigger,
    types::{JobId, TriggerType},
};

/// What a job action gets to know about the run it is part of.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: JobId,
    pub name: String,
    pub trigger_type: TriggerType,
    pub started_at: DateTime<Utc>,
}

/// Boxed future returned by a job action.
pub type ActionFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// The unit of work a job performs. Opaque to the scheduler.
pub type JobActionFn = Arc<dyn Fn(JobContext) -> ActionFuture + Send + Sync>;

/// Wrap an async closure as a [`JobActionFn`].
pub fn action_fn<F, Fut>(f: F) -> JobActionFn
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |ctx| -> ActionFuture { Box::pin(f(ctx)) })
}

/// A registered job: identity, default trigger and action.
#[derive(Clone)]
pub struct JobDefinition {
    id: JobId,
    name: String,
    trigger: Arc<dyn Trigger>,
    action: JobActionFn,
    default_active: bool,
}

impl JobDefinition {
    /// Create a definition. The id is assigned when the registry is built.
    pub fn new(name: impl Into<String>, trigger: Arc<dyn Trigger>, action: JobActionFn) -> Self {
        Self {
            id: 0,
            name: name.into(),
            trigger,
            action,
            default_active: true,
        }
    }

    /// Whether the job starts active the first time its state is seeded.
    #[must_use]
    pub fn with_default_active(mut self, active: bool) -> Self {
        self.default_active = active;
        self
    }

    #[must_use]
    pub fn id(&self) -> JobId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn trigger(&self) -> &Arc<dyn Trigger> {
        &self.trigger
    }

    #[must_use]
    pub fn action(&self) -> &JobActionFn {
        &self.action
    }

    #[must_use]
    pub fn default_active(&self) -> bool {
        self.default_active
    }
}

impl fmt::Debug for JobDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("trigger", &self.trigger)
            .field("default_active", &self.default_active)
            .finish_non_exhaustive()
    }
}

/// Ordered, immutable set of job definitions.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: Vec<JobDefinition>,
}

impl JobRegistry {
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// All jobs in registration order.
    #[must_use]
    pub fn list_jobs(&self) -> &[JobDefinition] {
        &self.jobs
    }

    pub fn get_job(&self, id: JobId) -> Result<&JobDefinition> {
        // Ids are dense and 1-based, so the position is `id - 1`.
        id.checked_sub(1)
            .and_then(|idx| self.jobs.get(idx as usize))
            .ok_or_else(|| Error::job_not_found(id))
    }

    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<&JobDefinition> {
        self.jobs.iter().find(|j| j.name == name)
    }

    #[must_use]
    pub fn ids(&self) -> Vec<JobId> {
        self.jobs.iter().map(|j| j.id).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Collects definitions and assigns ids in registration order.
#[derive(Default)]
pub struct RegistryBuilder {
    jobs: Vec<JobDefinition>,
}

impl RegistryBuilder {
    #[must_use]
    pub fn job(mut self, definition: JobDefinition) -> Self {
        self.jobs.push(definition);
        self
    }

    /// Shorthand for registering an active job from its parts.
    #[must_use]
    pub fn register(
        self,
        name: impl Into<String>,
        trigger: Arc<dyn Trigger>,
        action: JobActionFn,
    ) -> Self {
        self.job(JobDefinition::new(name, trigger, action))
    }

    /// Validate names and freeze the catalog.
    pub fn build(self) -> Result<JobRegistry> {
        let mut seen = HashSet::with_capacity(self.jobs.len());
        let mut jobs = Vec::with_capacity(self.jobs.len());
        for (idx, mut job) in self.jobs.into_iter().enumerate() {
            let name = job.name.trim();
            if name.is_empty() {
                return Err(Error::message(format!("job #{} has an empty name", idx + 1)));
            }
            if !seen.insert(name.to_string()) {
                return Err(Error::DuplicateJob {
                    name: name.to_string(),
                });
            }
            job.id = JobId::try_from(idx + 1)
                .map_err(|_| Error::message("too many jobs for a u32 id space"))?;
            jobs.push(job);
        }
        Ok(JobRegistry { jobs })
    }
}
