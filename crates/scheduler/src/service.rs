//! Scheduler engine: timer loop, run execution, lifecycle.

use std::{
    any::Any,
    collections::HashMap,
    sync::{
        Arc, Mutex as StdMutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    chrono::{DateTime, Utc},
    tokio::{
        sync::{Mutex, Notify},
        task::JoinHandle,
    },
    tokio_util::task::TaskTracker,
    tracing::{debug, error, info, warn},
};

#[cfg(feature = "metrics")]
use cadence_metrics::{
    counter, gauge, histogram, labels, scheduler as scheduler_metrics, store as store_metrics,
};

use crate::{
    Error, Result,
    guard::RunGuard,
    registry::{JobContext, JobDefinition, JobRegistry},
    status::SchedulerStatus,
    store::{HistoryLog, JobStateStore},
    trigger::Trigger,
    types::{HistoryEntry, JobId, JobState, RunRecord, RunStatus, TriggerType},
};

/// Tunables for the engine. Built from the `scheduler` config section by the CLI.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on how long the timer loop sleeps between evaluations.
    pub poll_interval: Duration,
    /// How long `shutdown()` waits for in-flight runs.
    pub shutdown_grace: Duration,
    /// Attempts per history append, including the first.
    pub history_retry_attempts: u32,
    /// Delay before the first retry; doubled after each failure.
    pub history_retry_backoff: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(30),
            history_retry_attempts: 3,
            history_retry_backoff: Duration::from_millis(200),
        }
    }
}

/// The scheduler engine and its admin surface (see `admin.rs`).
pub struct SchedulerService {
    pub(crate) registry: Arc<JobRegistry>,
    pub(crate) states: Arc<dyn JobStateStore>,
    pub(crate) history: Arc<dyn HistoryLog>,
    pub(crate) status: Arc<SchedulerStatus>,
    guards: HashMap<JobId, Arc<RunGuard>>,
    config: EngineConfig,
    pub(crate) wake: Notify,
    timer_handle: Mutex<Option<JoinHandle<()>>>,
    tracker: TaskTracker,
    stopping: AtomicBool,
    /// Jobs whose due-time bookkeeping failed, held back until the instant.
    held_back: StdMutex<HashMap<JobId, DateTime<Utc>>>,
    /// Serializes admin writes that touch both the store and in-memory status.
    pub(crate) admin_lock: Mutex<()>,
}

impl SchedulerService {
    pub fn new(
        registry: Arc<JobRegistry>,
        states: Arc<dyn JobStateStore>,
        history: Arc<dyn HistoryLog>,
        status: Arc<SchedulerStatus>,
    ) -> Arc<Self> {
        Self::with_config(registry, states, history, status, EngineConfig::default())
    }

    pub fn with_config(
        registry: Arc<JobRegistry>,
        states: Arc<dyn JobStateStore>,
        history: Arc<dyn HistoryLog>,
        status: Arc<SchedulerStatus>,
        config: EngineConfig,
    ) -> Arc<Self> {
        let guards = registry
            .ids()
            .into_iter()
            .map(|id| (id, Arc::new(RunGuard::default())))
            .collect();
        Arc::new(Self {
            registry,
            states,
            history,
            status,
            guards,
            config,
            wake: Notify::new(),
            timer_handle: Mutex::new(None),
            tracker: TaskTracker::new(),
            stopping: AtomicBool::new(false),
            held_back: StdMutex::new(HashMap::new()),
            admin_lock: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Seed state, recover from a previous process, and start the timer loop.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        for job in self.registry.list_jobs() {
            self.states.ensure_job(job.id(), job.default_active()).await?;
        }

        let cleared = self.states.clear_running_flags().await?;
        if cleared > 0 {
            warn!(count = cleared, "cleared running flags left by a previous process");
        }

        match self.states.scheduler_status().await? {
            Some(running) => {
                self.status.set(running);
            },
            None => {
                self.states
                    .set_scheduler_status(self.status.is_running())
                    .await?;
            },
        }

        self.rearm_all(Utc::now()).await?;

        #[cfg(feature = "metrics")]
        gauge!(scheduler_metrics::JOBS_REGISTERED).set(self.registry.len() as f64);

        self.stopping.store(false, Ordering::Release);
        let svc = Arc::clone(self);
        let handle = tokio::spawn(async move {
            svc.timer_loop().await;
        });
        *self.timer_handle.lock().await = Some(handle);

        info!(
            jobs = self.registry.len(),
            running = self.status.is_running(),
            "scheduler started"
        );
        Ok(())
    }

    /// Stop the timer loop and wait for in-flight runs, bounded by the grace period.
    ///
    /// Runs still going after the grace period are left to finish on their own.
    pub async fn shutdown(&self) {
        self.stopping.store(true, Ordering::Release);
        self.wake.notify_one();

        if let Some(handle) = self.timer_handle.lock().await.take()
            && let Err(e) = handle.await
        {
            warn!(error = %e, "timer loop ended abnormally");
        }

        self.tracker.close();
        match tokio::time::timeout(self.config.shutdown_grace, self.tracker.wait()).await {
            Ok(()) => info!("scheduler stopped"),
            Err(_) => warn!(
                in_flight = self.tracker.len(),
                grace = ?self.config.shutdown_grace,
                "shutdown grace period elapsed with runs still in flight"
            ),
        }
    }

    // ── Internal ────────────────────────────────────────────────────────

    pub(crate) fn guard(&self, job_id: JobId) -> Result<&Arc<RunGuard>> {
        self.guards
            .get(&job_id)
            .ok_or_else(|| Error::job_not_found(job_id))
    }

    /// The trigger currently bound to a job: its override if one is set and
    /// valid, otherwise the registry default.
    pub(crate) fn effective_trigger(
        &self,
        job: &JobDefinition,
        state: &JobState,
    ) -> Arc<dyn Trigger> {
        let Some(spec) = &state.trigger_override else {
            return Arc::clone(job.trigger());
        };
        match spec.build() {
            Ok(trigger) => trigger,
            Err(e) => {
                warn!(job_id = job.id(), error = %e, "stored trigger override is invalid, using default");
                Arc::clone(job.trigger())
            },
        }
    }

    /// Read a job's state, seeding the row if the engine was never started.
    pub(crate) async fn state_for(&self, job: &JobDefinition) -> Result<JobState> {
        match self.states.get_state(job.id()).await {
            Err(Error::JobNotFound { .. }) => {
                self.states.ensure_job(job.id(), job.default_active()).await
            },
            other => other,
        }
    }

    /// Recompute the next run of one job from `reference`, or clear it when
    /// the job should not fire.
    pub(crate) async fn rearm(
        &self,
        job: &JobDefinition,
        state: &JobState,
        reference: DateTime<Utc>,
    ) -> Result<()> {
        let next = if state.active && self.status.is_running() {
            self.effective_trigger(job, state).next_run_after(reference)
        } else {
            None
        };
        self.states.set_next_run(job.id(), next).await
    }

    pub(crate) async fn rearm_all(&self, reference: DateTime<Utc>) -> Result<()> {
        for state in self.states.list_states().await? {
            let Ok(job) = self.registry.get_job(state.job_id) else {
                continue;
            };
            self.rearm(job, &state, reference).await?;
        }
        Ok(())
    }

    async fn timer_loop(self: &Arc<Self>) {
        loop {
            if self.stopping.load(Ordering::Acquire) {
                break;
            }

            let sleep_for = self.time_until_next_wake().await;
            if sleep_for.is_zero() {
                // Stores may complete without ever returning Pending.
                tokio::task::yield_now().await;
            } else {
                tokio::select! {
                    () = tokio::time::sleep(sleep_for) => {},
                    () = self.wake.notified() => {
                        debug!("timer loop woken by notify");
                        continue;
                    },
                }
            }

            if self.stopping.load(Ordering::Acquire) {
                break;
            }

            self.process_due_jobs().await;
        }
        debug!("timer loop exited");
    }

    async fn time_until_next_wake(&self) -> Duration {
        let poll = self.config.poll_interval;
        if !self.status.is_running() {
            return poll;
        }
        let states = match self.states.list_states().await {
            Ok(states) => states,
            Err(e) => {
                self.infrastructure_fault("list_states", None, &e);
                return poll;
            },
        };
        let now = Utc::now();
        let held_back = self.held_back.lock().unwrap_or_else(|e| e.into_inner());
        states
            .iter()
            .filter(|s| s.active)
            .filter_map(|s| {
                let next = s.next_run_at?;
                Some(match held_back.get(&s.job_id) {
                    Some(&until) => next.max(until),
                    None => next,
                })
            })
            .map(|t| (t - now).to_std().unwrap_or(Duration::ZERO))
            .min()
            .map_or(poll, |d| d.min(poll))
    }

    async fn process_due_jobs(self: &Arc<Self>) {
        if !self.status.is_running() {
            return;
        }
        let now = Utc::now();
        let states = match self.states.list_states().await {
            Ok(states) => states,
            Err(e) => {
                self.infrastructure_fault("list_states", None, &e);
                return;
            },
        };

        for state in states {
            if !state.active || !state.next_run_at.is_some_and(|t| t <= now) {
                continue;
            }
            if self.is_held_back(state.job_id, now) {
                continue;
            }
            let Ok(job) = self.registry.get_job(state.job_id) else {
                continue;
            };
            match self.fire_due(job, state, now).await {
                Ok(()) => self.hold_back(job.id(), None),
                Err(e) => {
                    self.infrastructure_fault("fire_due", Some(job.id()), &e);
                    let until = now
                        + chrono::Duration::from_std(self.config.poll_interval)
                            .unwrap_or(chrono::Duration::seconds(30));
                    warn!(job_id = job.id(), until = %until, "holding job back after bookkeeping fault");
                    self.hold_back(job.id(), Some(until));
                },
            }
        }
    }

    fn is_held_back(&self, job_id: JobId, now: DateTime<Utc>) -> bool {
        let held_back = self.held_back.lock().unwrap_or_else(|e| e.into_inner());
        held_back.get(&job_id).is_some_and(|&until| until > now)
    }

    fn hold_back(&self, job_id: JobId, until: Option<DateTime<Utc>>) {
        let mut held_back = self.held_back.lock().unwrap_or_else(|e| e.into_inner());
        match until {
            Some(until) => {
                held_back.insert(job_id, until);
            },
            None => {
                held_back.remove(&job_id);
            },
        }
    }

    async fn fire_due(
        self: &Arc<Self>,
        job: &JobDefinition,
        state: JobState,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let guard = Arc::clone(self.guard(job.id())?);

        if !guard.try_acquire() {
            // Re-arm before counting so a failed count cannot leave the slot due.
            self.rearm(job, &state, now).await?;
            let missed = self.states.record_missed(job.id()).await?;
            #[cfg(feature = "metrics")]
            counter!(scheduler_metrics::MISSED_RUNS_TOTAL, labels::JOB => job.name().to_string())
                .increment(1);
            debug!(job_id = job.id(), name = job.name(), missed, "job still running, skipping due firing");
            return Ok(());
        }

        // Status or activity may have flipped since the states were listed.
        let current = match self.states.get_state(job.id()).await {
            Ok(current) => current,
            Err(e) => {
                guard.release();
                return Err(e);
            },
        };
        if !current.active || !self.status.is_running() {
            guard.release();
            return Ok(());
        }

        // Move the next run past this slot so the loop does not fire it twice.
        if let Err(e) = self.rearm(job, &current, now).await {
            guard.release();
            return Err(e);
        }

        self.spawn_run(job.clone(), guard, TriggerType::Scheduled);
        Ok(())
    }

    /// Spawn one execution. The caller must already hold `guard`.
    pub(crate) fn spawn_run(
        self: &Arc<Self>,
        job: JobDefinition,
        guard: Arc<RunGuard>,
        trigger_type: TriggerType,
    ) {
        let svc = Arc::clone(self);
        self.tracker.spawn(async move {
            svc.execute(&job, &guard, trigger_type).await;
        });
    }

    async fn execute(&self, job: &JobDefinition, guard: &RunGuard, trigger_type: TriggerType) {
        let job_id = job.id();
        let started_at = Utc::now();

        if let Err(e) = self.states.set_running(job_id, true).await {
            self.infrastructure_fault("set_running", Some(job_id), &e);
        }

        info!(job_id, name = job.name(), trigger = %trigger_type, "job started");

        #[cfg(feature = "metrics")]
        {
            counter!(scheduler_metrics::EXECUTIONS_TOTAL, labels::TRIGGER => trigger_type.as_str())
                .increment(1);
            gauge!(scheduler_metrics::JOBS_RUNNING).increment(1.0);
        }

        let ctx = JobContext {
            job_id,
            name: job.name().to_string(),
            trigger_type,
            started_at,
        };
        let action = Arc::clone(job.action());
        // Run on a separate task so a panicking action surfaces as a JoinError.
        let outcome = tokio::spawn(async move { action(ctx).await }).await;
        let finished_at = Utc::now();

        let (status, error_message, error_log) = match outcome {
            Ok(Ok(())) => (RunStatus::Success, None, None),
            Ok(Err(e)) => (RunStatus::Failure, Some(e.to_string()), Some(format!("{e:?}"))),
            Err(e) if e.is_panic() => {
                let message = format!("job action panicked: {}", panic_message(e.into_panic()));
                (RunStatus::Failure, Some(message.clone()), Some(message))
            },
            Err(e) => (
                RunStatus::Failure,
                Some("job action was cancelled".to_string()),
                Some(e.to_string()),
            ),
        };

        let record = RunRecord {
            job_id,
            started_at,
            finished_at,
            status,
            trigger_type,
            error_message,
            error_log,
        };
        let duration_ms = (finished_at - started_at).num_milliseconds();

        match &record.error_message {
            None => info!(job_id, name = job.name(), status = %status, duration_ms, "job finished"),
            Some(message) => error!(
                job_id,
                name = job.name(),
                status = %status,
                duration_ms,
                error = %message,
                "job failed"
            ),
        }

        #[cfg(feature = "metrics")]
        {
            if status == RunStatus::Failure {
                counter!(scheduler_metrics::EXECUTION_FAILURES_TOTAL, labels::JOB => job.name().to_string())
                    .increment(1);
            }
            histogram!(scheduler_metrics::EXECUTION_DURATION_SECONDS, labels::STATUS => status.as_str())
                .record(duration_ms as f64 / 1000.0);
            gauge!(scheduler_metrics::JOBS_RUNNING).decrement(1.0);
        }

        // History first, then state, then the guard: anyone who observes the
        // job idle also observes its history entry.
        self.append_history(&record).await;
        self.complete(job, &record).await;
        guard.release();
        self.wake.notify_one();
    }

    async fn complete(&self, job: &JobDefinition, record: &RunRecord) {
        let next = match self.states.get_state(job.id()).await {
            Ok(state) if state.active && self.status.is_running() => self
                .effective_trigger(job, &state)
                .next_run_after(record.finished_at),
            Ok(_) => None,
            Err(e) => {
                self.infrastructure_fault("get_state", Some(job.id()), &e);
                None
            },
        };
        if let Err(e) = self
            .states
            .record_completion(job.id(), &record.last_run(), next)
            .await
        {
            self.infrastructure_fault("record_completion", Some(job.id()), &e);
        }
    }

    /// Append with bounded retry and exponential backoff. A final failure is
    /// reported as an infrastructure fault.
    async fn append_history(&self, record: &RunRecord) -> Option<HistoryEntry> {
        let attempts = self.config.history_retry_attempts.max(1);
        let mut backoff = self.config.history_retry_backoff;
        for attempt in 1..=attempts {
            match self.history.append(record).await {
                Ok(entry) => return Some(entry),
                Err(e) if attempt < attempts => {
                    warn!(
                        job_id = record.job_id,
                        attempt,
                        error = %e,
                        "history append failed, retrying"
                    );
                    #[cfg(feature = "metrics")]
                    counter!(store_metrics::HISTORY_APPEND_RETRIES_TOTAL).increment(1);
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                },
                Err(e) => self.infrastructure_fault("append_history", Some(record.job_id), &e),
            }
        }
        None
    }

    pub(crate) fn infrastructure_fault(
        &self,
        operation: &'static str,
        job_id: Option<JobId>,
        err: &Error,
    ) {
        error!(operation, job_id, error = %err, "infrastructure fault");
        #[cfg(feature = "metrics")]
        counter!(store_metrics::INFRASTRUCTURE_FAULTS_TOTAL, labels::OPERATION => operation)
            .increment(1);
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
