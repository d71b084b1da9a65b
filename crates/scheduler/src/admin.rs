//! Typed admin surface: global status, per-job activity, trigger rebinding,
//! forced runs and history queries.

use std::{sync::Arc, time::Duration};

use {
    chrono::Utc,
    tracing::{debug, info},
};

#[cfg(feature = "metrics")]
use cadence_metrics::{counter, labels, scheduler as scheduler_metrics};

use crate::{
    Error, Result,
    registry::JobDefinition,
    service::SchedulerService,
    types::{HistoryPage, HistoryQuery, JobId, JobPatch, JobSnapshot, JobState, TriggerType},
};

impl SchedulerService {
    /// Whether scheduled firings are currently allowed.
    #[must_use]
    pub fn scheduler_status(&self) -> bool {
        self.status.is_running()
    }

    /// Persist and apply the global status. Returns the applied value.
    ///
    /// Stopping clears every job's next run; in-flight runs are not cancelled.
    pub async fn set_scheduler_status(&self, running: bool) -> Result<bool> {
        let _lock = self.admin_lock.lock().await;
        self.states.set_scheduler_status(running).await?;
        let previous = self.status.set(running);
        if previous == running {
            debug!(running, "scheduler status unchanged");
            return Ok(running);
        }
        info!(running, "scheduler status changed");
        #[cfg(feature = "metrics")]
        counter!(scheduler_metrics::STATUS_CHANGES_TOTAL, labels::STATUS => if running { "running" } else { "stopped" })
            .increment(1);
        self.rearm_all(Utc::now()).await?;
        self.wake.notify_one();
        Ok(running)
    }

    /// Ids of every registered job, in registration order.
    #[must_use]
    pub fn list_job_ids(&self) -> Vec<JobId> {
        self.registry.ids()
    }

    pub async fn list_jobs(&self) -> Result<Vec<JobSnapshot>> {
        let mut out = Vec::with_capacity(self.registry.len());
        for job in self.registry.list_jobs() {
            let state = self.state_for(job).await?;
            out.push(self.snapshot(job, &state).await?);
        }
        Ok(out)
    }

    pub async fn get_job(&self, job_id: JobId) -> Result<JobSnapshot> {
        let job = self.registry.get_job(job_id)?;
        let state = self.state_for(job).await?;
        self.snapshot(job, &state).await
    }

    /// Flip a job's active flag and return the post-update snapshot.
    pub async fn set_job_active(&self, job_id: JobId, active: bool) -> Result<JobSnapshot> {
        self.update_job(job_id, JobPatch {
            active: Some(active),
            trigger: None,
        })
        .await
    }

    /// Apply a partial update. The trigger is validated before anything is written.
    pub async fn update_job(&self, job_id: JobId, patch: JobPatch) -> Result<JobSnapshot> {
        let job = self.registry.get_job(job_id)?;
        if let Some(spec) = &patch.trigger {
            spec.build()?;
        }

        let _lock = self.admin_lock.lock().await;
        let before = self.state_for(job).await?;
        let mut state = before.clone();

        if let Some(spec) = patch.trigger {
            info!(job_id, name = job.name(), trigger = ?spec, "job trigger rebound");
            state = self.states.set_trigger_override(job_id, Some(spec)).await?;
        }
        if let Some(active) = patch.active {
            state = self.states.set_active(job_id, active).await?;
            if before.active != state.active {
                info!(job_id, name = job.name(), active = state.active, "job activity changed");
            }
        }

        let trigger_changed = state.trigger_override != before.trigger_override;
        let activated = state.active && (!before.active || state.next_run_at.is_none());
        if trigger_changed || activated {
            self.rearm(job, &state, Utc::now()).await?;
        }
        self.wake.notify_one();

        let state = self.states.get_state(job_id).await?;
        self.snapshot(job, &state).await
    }

    /// A page of a job's history, oldest first, with the unpaged total.
    pub async fn get_history(&self, job_id: JobId, query: HistoryQuery) -> Result<HistoryPage> {
        self.registry.get_job(job_id)?;
        let total_filtered_records = self.history.count(job_id).await?;
        let page_items = self.history.query(job_id, query).await?;
        Ok(HistoryPage {
            total_filtered_records,
            page_items,
        })
    }

    /// Fire a job immediately, bypassing its trigger but not its guard.
    ///
    /// Returns once the run is spawned. Allowed for inactive jobs and while the
    /// scheduler is stopped; rejected while the job is already running.
    pub async fn run_now(self: &Arc<Self>, job_id: JobId) -> Result<()> {
        let job = self.registry.get_job(job_id)?.clone();
        let guard = Arc::clone(self.guard(job_id)?);

        if !guard.try_acquire() {
            #[cfg(feature = "metrics")]
            counter!(scheduler_metrics::RUN_NOW_REJECTED_TOTAL, labels::JOB => job.name().to_string())
                .increment(1);
            debug!(job_id, name = job.name(), "manual run rejected, job already running");
            return Err(Error::invalid_transition(job_id, "job is already running"));
        }

        if let Err(e) = self.state_for(&job).await {
            guard.release();
            return Err(e);
        }

        info!(job_id, name = job.name(), "manual run requested");
        self.spawn_run(job, guard, TriggerType::Manual);
        Ok(())
    }

    /// Wait for the in-flight run of a job to finish, then return its snapshot.
    pub async fn wait_until_idle(&self, job_id: JobId, timeout: Duration) -> Result<JobSnapshot> {
        let guard = self.guard(job_id)?;
        tokio::time::timeout(timeout, guard.wait_idle())
            .await
            .map_err(|_| Error::Timeout {
                job_id,
                waited: timeout,
            })?;
        self.get_job(job_id).await
    }

    async fn snapshot(&self, job: &JobDefinition, state: &JobState) -> Result<JobSnapshot> {
        let next_run_time = state
            .next_run_at
            .filter(|_| state.active && self.status.is_running());
        let currently_running = self.guard(job.id())?.is_running();
        Ok(JobSnapshot {
            job_id: job.id(),
            display_name: job.name().to_string(),
            active: state.active,
            currently_running,
            next_run_time,
            trigger: self.effective_trigger(job, state).describe(),
            missed_runs: state.missed_runs,
            last_run_history: self.history.latest(job.id()).await?,
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use {
        super::*,
        crate::{
            registry::{JobRegistry, action_fn},
            service::EngineConfig,
            status::SchedulerStatus,
            store::JobStateStore,
            store_memory::{InMemoryHistoryLog, InMemoryStateStore},
            trigger::TriggerSpec,
            types::RunStatus,
        },
        tokio::sync::Semaphore,
    };

    fn config() -> EngineConfig {
        EngineConfig {
            poll_interval: Duration::from_millis(50),
            shutdown_grace: Duration::from_secs(2),
            history_retry_attempts: 1,
            history_retry_backoff: Duration::from_millis(1),
        }
    }

    async fn started(registry: JobRegistry, running: bool) -> Arc<SchedulerService> {
        let svc = SchedulerService::with_config(
            Arc::new(registry),
            Arc::new(InMemoryStateStore::new()),
            Arc::new(InMemoryHistoryLog::new()),
            Arc::new(SchedulerStatus::new(running)),
            config(),
        );
        svc.start().await.unwrap();
        svc
    }

    fn hourly(name: &str) -> JobDefinition {
        JobDefinition::new(
            name,
            TriggerSpec::every("1h").build().unwrap(),
            action_fn(|_| async { Ok(()) }),
        )
    }

    fn three_jobs() -> JobRegistry {
        JobRegistry::builder()
            .job(hourly("Update loan arrears ageing"))
            .job(hourly("Apply annual fee").with_default_active(false))
            .job(hourly("Post interest for savings"))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn job_ids_match_registry_across_toggles() {
        let svc = started(three_jobs(), true).await;
        assert_eq!(svc.list_job_ids(), vec![1, 2, 3]);
        svc.set_job_active(2, true).await.unwrap();
        svc.set_scheduler_status(false).await.unwrap();
        assert_eq!(svc.list_job_ids().len(), svc.registry().len());
        assert_eq!(svc.list_jobs().await.unwrap().len(), 3);
        svc.shutdown().await;
    }

    #[tokio::test]
    async fn global_status_round_trips_and_masks_next_run() {
        let svc = started(three_jobs(), true).await;
        assert!(svc.get_job(1).await.unwrap().next_run_time.is_some());

        assert!(!svc.set_scheduler_status(false).await.unwrap());
        assert!(!svc.scheduler_status());
        for snap in svc.list_jobs().await.unwrap() {
            assert!(snap.next_run_time.is_none(), "job {} still armed", snap.job_id);
        }

        assert!(svc.set_scheduler_status(true).await.unwrap());
        assert!(svc.get_job(1).await.unwrap().next_run_time.is_some());
        svc.shutdown().await;
    }

    #[tokio::test]
    async fn repeated_start_status_keeps_interval_jobs_firing() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let registry = JobRegistry::builder()
            .register(
                "Accrue penalties",
                TriggerSpec::every("300ms").build().unwrap(),
                action_fn(move |_| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
            )
            .build()
            .unwrap();
        let svc = started(registry, true).await;

        let before = svc.get_job(1).await.unwrap().next_run_time;
        assert!(svc.set_scheduler_status(true).await.unwrap());
        assert_eq!(svc.get_job(1).await.unwrap().next_run_time, before);

        for _ in 0..12 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            svc.set_scheduler_status(true).await.unwrap();
        }

        assert!(
            runs.load(Ordering::SeqCst) >= 2,
            "only {} runs in 1.2s",
            runs.load(Ordering::SeqCst)
        );
        svc.shutdown().await;
    }

    #[tokio::test]
    async fn toggling_active_reads_back() {
        let svc = started(three_jobs(), true).await;
        let before = svc.get_job(2).await.unwrap();
        assert!(!before.active);
        assert!(before.next_run_time.is_none());

        let on = svc.set_job_active(2, true).await.unwrap();
        assert!(on.active);
        assert!(on.next_run_time.is_some());

        let off = svc.set_job_active(2, false).await.unwrap();
        assert!(!off.active);
        assert!(off.next_run_time.is_none());
        svc.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_job_is_not_found_everywhere() {
        let svc = started(three_jobs(), true).await;
        assert!(matches!(svc.get_job(4).await, Err(Error::JobNotFound { job_id: 4 })));
        assert!(svc.set_job_active(0, true).await.is_err());
        assert!(svc.get_history(9, HistoryQuery::all()).await.is_err());
        assert!(svc.run_now(9).await.is_err());
        assert!(svc.wait_until_idle(9, Duration::from_millis(10)).await.is_err());
        svc.shutdown().await;
    }

    #[tokio::test]
    async fn invalid_trigger_is_rejected_before_any_write() {
        let svc = started(three_jobs(), true).await;
        let result = svc
            .update_job(1, JobPatch {
                active: Some(false),
                trigger: Some(TriggerSpec::cron("61 * * * *")),
            })
            .await;
        assert!(matches!(result, Err(Error::CronParse { .. })));
        // The active flag in the same patch was not applied.
        assert!(svc.get_job(1).await.unwrap().active);
        svc.shutdown().await;
    }

    #[tokio::test]
    async fn trigger_rebinding_changes_description_and_rearms() {
        let svc = started(three_jobs(), true).await;
        let snap = svc
            .update_job(3, JobPatch {
                active: None,
                trigger: Some(TriggerSpec::Cron {
                    expr: "0 2 * * *".into(),
                    tz: Some("UTC".into()),
                }),
            })
            .await
            .unwrap();
        assert_eq!(snap.trigger, "cron '0 2 * * *' (UTC)");
        let next = snap.next_run_time.unwrap();
        assert_eq!(next.format("%H:%M:%S").to_string(), "02:00:00");
        svc.shutdown().await;
    }

    #[tokio::test]
    async fn run_now_is_manual_and_allowed_while_stopped() {
        let svc = started(three_jobs(), false).await;
        svc.run_now(2).await.unwrap();
        let snap = svc.wait_until_idle(2, Duration::from_secs(2)).await.unwrap();

        let last = snap.last_run_history.unwrap();
        assert_eq!(last.trigger_type, TriggerType::Manual);
        assert_eq!(last.status, RunStatus::Success);
        assert!(last.finished_at >= last.started_at);
        // Stopped scheduler and inactive job: still not armed afterwards.
        assert!(snap.next_run_time.is_none());
        svc.shutdown().await;
    }

    #[tokio::test]
    async fn run_now_rejects_while_running_and_times_out_waiting() {
        let gate = Arc::new(Semaphore::new(0));
        let action = {
            let gate = Arc::clone(&gate);
            action_fn(move |_| {
                let gate = Arc::clone(&gate);
                async move {
                    let _permit = gate.acquire().await?;
                    Ok(())
                }
            })
        };
        let registry = JobRegistry::builder()
            .register("blocked", TriggerSpec::every("1h").build().unwrap(), action)
            .build()
            .unwrap();
        let svc = started(registry, true).await;

        svc.run_now(1).await.unwrap();
        assert!(svc.get_job(1).await.unwrap().currently_running);
        assert!(matches!(
            svc.run_now(1).await,
            Err(Error::InvalidTransition { job_id: 1, .. })
        ));
        assert!(matches!(
            svc.wait_until_idle(1, Duration::from_millis(50)).await,
            Err(Error::Timeout { job_id: 1, .. })
        ));

        gate.add_permits(1);
        let snap = svc.wait_until_idle(1, Duration::from_secs(2)).await.unwrap();
        assert!(!snap.currently_running);
        assert_eq!(svc.get_history(1, HistoryQuery::all()).await.unwrap().total_filtered_records, 1);
        svc.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_run_now_barrage_fires_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let action = {
            let runs = Arc::clone(&runs);
            action_fn(move |_| {
                let runs = Arc::clone(&runs);
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(())
                }
            })
        };
        let registry = JobRegistry::builder()
            .register("once", TriggerSpec::every("1h").build().unwrap(), action)
            .build()
            .unwrap();
        let svc = started(registry, true).await;

        let attempts: Vec<_> = (0..16)
            .map(|_| {
                let svc = Arc::clone(&svc);
                tokio::spawn(async move { svc.run_now(1).await.is_ok() })
            })
            .collect();
        let mut accepted = 0;
        for attempt in attempts {
            if attempt.await.unwrap() {
                accepted += 1;
            }
        }
        svc.wait_until_idle(1, Duration::from_secs(2)).await.unwrap();

        assert_eq!(accepted, 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        svc.shutdown().await;
    }

    #[tokio::test]
    async fn global_stop_does_not_abort_in_flight_run() {
        let gate = Arc::new(Semaphore::new(0));
        let action = {
            let gate = Arc::clone(&gate);
            action_fn(move |_| {
                let gate = Arc::clone(&gate);
                async move {
                    let _permit = gate.acquire().await?;
                    Ok(())
                }
            })
        };
        let registry = JobRegistry::builder()
            .register("long", TriggerSpec::every("1h").build().unwrap(), action)
            .build()
            .unwrap();
        let svc = started(registry, true).await;

        svc.run_now(1).await.unwrap();
        svc.set_scheduler_status(false).await.unwrap();
        assert!(svc.get_job(1).await.unwrap().currently_running);

        gate.add_permits(1);
        let snap = svc.wait_until_idle(1, Duration::from_secs(2)).await.unwrap();
        assert_eq!(snap.last_run_history.unwrap().status, RunStatus::Success);
        assert!(snap.next_run_time.is_none());
        svc.shutdown().await;
    }

    #[tokio::test]
    async fn history_pages_report_total() {
        let svc = started(three_jobs(), true).await;
        for _ in 0..3 {
            svc.run_now(1).await.unwrap();
            svc.wait_until_idle(1, Duration::from_secs(2)).await.unwrap();
        }
        let page = svc.get_history(1, HistoryQuery::page(1, 1)).await.unwrap();
        assert_eq!(page.total_filtered_records, 3);
        assert_eq!(page.page_items.len(), 1);
        assert_eq!(page.page_items[0].version, 2);
        svc.shutdown().await;
    }

    #[tokio::test]
    async fn admin_works_before_start() {
        let svc = SchedulerService::new(
            Arc::new(three_jobs()),
            Arc::new(InMemoryStateStore::new()),
            Arc::new(InMemoryHistoryLog::new()),
            Arc::new(SchedulerStatus::new(false)),
        );
        let snap = svc.get_job(2).await.unwrap();
        assert!(!snap.active);
        assert_eq!(svc.states.list_states().await.unwrap().len(), 1);
    }
}
