//! In-memory stores, for tests and single-process deployments without a database.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Mutex,
};

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
};

use crate::{
    Error, Result,
    store::{HistoryLog, JobStateStore},
    trigger::TriggerSpec,
    types::{HistoryEntry, HistoryQuery, JobId, JobState, LastRun, RunRecord},
};

/// Job state store backed by a `BTreeMap`. No persistence.
#[derive(Default)]
pub struct InMemoryStateStore {
    states: Mutex<BTreeMap<JobId, JobState>>,
    scheduler_status: Mutex<Option<bool>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn update<T>(&self, job_id: JobId, f: impl FnOnce(&mut JobState) -> T) -> Result<T> {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        let state = states
            .get_mut(&job_id)
            .ok_or_else(|| Error::job_not_found(job_id))?;
        let out = f(state);
        state.updated_at = Utc::now();
        Ok(out)
    }
}

#[async_trait]
impl JobStateStore for InMemoryStateStore {
    async fn ensure_job(&self, job_id: JobId, default_active: bool) -> Result<JobState> {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        Ok(states
            .entry(job_id)
            .or_insert_with(|| JobState::new(job_id, default_active))
            .clone())
    }

    async fn get_state(&self, job_id: JobId) -> Result<JobState> {
        let states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        states
            .get(&job_id)
            .cloned()
            .ok_or_else(|| Error::job_not_found(job_id))
    }

    async fn list_states(&self) -> Result<Vec<JobState>> {
        let states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        Ok(states.values().cloned().collect())
    }

    async fn set_active(&self, job_id: JobId, active: bool) -> Result<JobState> {
        self.update(job_id, |state| {
            state.active = active;
            if !active {
                state.next_run_at = None;
            }
            state.clone()
        })
    }

    async fn set_next_run(&self, job_id: JobId, next_run_at: Option<DateTime<Utc>>) -> Result<()> {
        self.update(job_id, |state| {
            state.next_run_at = next_run_at.filter(|_| state.active);
        })
    }

    async fn set_running(&self, job_id: JobId, running: bool) -> Result<()> {
        self.update(job_id, |state| state.currently_running = running)
    }

    async fn record_completion(
        &self,
        job_id: JobId,
        last_run: &LastRun,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.update(job_id, |state| {
            state.currently_running = false;
            state.last_run = Some(*last_run);
            state.next_run_at = next_run_at.filter(|_| state.active);
        })
    }

    async fn record_missed(&self, job_id: JobId) -> Result<u64> {
        self.update(job_id, |state| {
            state.missed_runs += 1;
            state.missed_runs
        })
    }

    async fn set_trigger_override(
        &self,
        job_id: JobId,
        trigger: Option<TriggerSpec>,
    ) -> Result<JobState> {
        self.update(job_id, |state| {
            state.trigger_override = trigger;
            state.clone()
        })
    }

    async fn clear_running_flags(&self) -> Result<usize> {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        let mut cleared = 0;
        for state in states.values_mut().filter(|s| s.currently_running) {
            state.currently_running = false;
            cleared += 1;
        }
        Ok(cleared)
    }

    async fn scheduler_status(&self) -> Result<Option<bool>> {
        Ok(*self
            .scheduler_status
            .lock()
            .unwrap_or_else(|e| e.into_inner()))
    }

    async fn set_scheduler_status(&self, running: bool) -> Result<()> {
        *self
            .scheduler_status
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(running);
        Ok(())
    }
}

/// History log backed by a `HashMap` of per-job vectors. No persistence.
#[derive(Default)]
pub struct InMemoryHistoryLog {
    runs: Mutex<HashMap<JobId, Vec<HistoryEntry>>>,
}

impl InMemoryHistoryLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryLog for InMemoryHistoryLog {
    async fn append(&self, record: &RunRecord) -> Result<HistoryEntry> {
        let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        let entries = runs.entry(record.job_id).or_default();
        let entry = HistoryEntry::from_record(record, entries.len() as u64 + 1);
        entries.push(entry.clone());
        Ok(entry)
    }

    async fn query(&self, job_id: JobId, query: HistoryQuery) -> Result<Vec<HistoryEntry>> {
        let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        let Some(entries) = runs.get(&job_id) else {
            return Ok(Vec::new());
        };
        let window = entries.iter().skip(query.offset);
        Ok(match query.limit {
            Some(limit) => window.take(limit).cloned().collect(),
            None => window.cloned().collect(),
        })
    }

    async fn latest(&self, job_id: JobId) -> Result<Option<HistoryEntry>> {
        let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        Ok(runs.get(&job_id).and_then(|e| e.last().cloned()))
    }

    async fn count(&self, job_id: JobId) -> Result<u64> {
        let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        Ok(runs.get(&job_id).map_or(0, |e| e.len() as u64))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::types::{RunStatus, TriggerType},
    };

    fn record(job_id: JobId, offset_ms: i64, status: RunStatus) -> RunRecord {
        let base = "2026-03-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let started = base + chrono::Duration::milliseconds(offset_ms);
        RunRecord {
            job_id,
            started_at: started,
            finished_at: started + chrono::Duration::milliseconds(10),
            status,
            trigger_type: TriggerType::Scheduled,
            error_message: None,
            error_log: None,
        }
    }

    #[tokio::test]
    async fn ensure_job_is_idempotent() {
        let store = InMemoryStateStore::new();
        store.ensure_job(1, true).await.unwrap();
        store.set_active(1, false).await.unwrap();
        // A second seed must not reset what an operator changed.
        let state = store.ensure_job(1, true).await.unwrap();
        assert!(!state.active);
    }

    #[tokio::test]
    async fn set_active_returns_stored_state() {
        let store = InMemoryStateStore::new();
        store.ensure_job(1, false).await.unwrap();
        let state = store.set_active(1, true).await.unwrap();
        assert!(state.active);
        assert!(store.get_state(1).await.unwrap().active);
    }

    #[tokio::test]
    async fn deactivation_clears_next_run() {
        let store = InMemoryStateStore::new();
        store.ensure_job(1, true).await.unwrap();
        store.set_next_run(1, Some(Utc::now())).await.unwrap();
        let state = store.set_active(1, false).await.unwrap();
        assert!(state.next_run_at.is_none());
    }

    #[tokio::test]
    async fn inactive_jobs_never_store_a_next_run() {
        let store = InMemoryStateStore::new();
        store.ensure_job(1, false).await.unwrap();
        store.set_next_run(1, Some(Utc::now())).await.unwrap();
        assert!(store.get_state(1).await.unwrap().next_run_at.is_none());
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let store = InMemoryStateStore::new();
        assert!(matches!(
            store.get_state(9).await,
            Err(Error::JobNotFound { job_id: 9 })
        ));
        assert!(store.set_active(9, true).await.is_err());
    }

    #[tokio::test]
    async fn completion_clears_running_and_keeps_summary() {
        let store = InMemoryStateStore::new();
        store.ensure_job(1, true).await.unwrap();
        store.set_running(1, true).await.unwrap();
        let rec = record(1, 0, RunStatus::Success);
        let next = rec.finished_at + chrono::Duration::minutes(1);
        store
            .record_completion(1, &rec.last_run(), Some(next))
            .await
            .unwrap();

        let state = store.get_state(1).await.unwrap();
        assert!(!state.currently_running);
        assert_eq!(state.next_run_at, Some(next));
        assert_eq!(state.last_run.unwrap().status, RunStatus::Success);
    }

    #[tokio::test]
    async fn clear_running_flags_counts_rows() {
        let store = InMemoryStateStore::new();
        for id in 1..=3 {
            store.ensure_job(id, true).await.unwrap();
        }
        store.set_running(1, true).await.unwrap();
        store.set_running(3, true).await.unwrap();
        assert_eq!(store.clear_running_flags().await.unwrap(), 2);
        assert_eq!(store.clear_running_flags().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn scheduler_status_starts_unset() {
        let store = InMemoryStateStore::new();
        assert_eq!(store.scheduler_status().await.unwrap(), None);
        store.set_scheduler_status(true).await.unwrap();
        assert_eq!(store.scheduler_status().await.unwrap(), Some(true));
    }

    #[tokio::test]
    async fn history_versions_are_per_job() {
        let log = InMemoryHistoryLog::new();
        for i in 0..3 {
            log.append(&record(1, i * 100, RunStatus::Success))
                .await
                .unwrap();
        }
        let other = log
            .append(&record(2, 0, RunStatus::Failure))
            .await
            .unwrap();

        assert_eq!(other.version, 1);
        assert_eq!(log.count(1).await.unwrap(), 3);
        assert_eq!(log.latest(1).await.unwrap().unwrap().version, 3);
    }

    #[tokio::test]
    async fn history_pages_oldest_first() {
        let log = InMemoryHistoryLog::new();
        for i in 0..5 {
            log.append(&record(1, i * 100, RunStatus::Success))
                .await
                .unwrap();
        }
        let page = log.query(1, HistoryQuery::page(1, 2)).await.unwrap();
        let versions: Vec<u64> = page.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![2, 3]);

        let all = log.query(1, HistoryQuery::all()).await.unwrap();
        assert_eq!(all.len(), 5);
        assert!(all.windows(2).all(|w| w[0].started_at < w[1].started_at));
    }

    #[tokio::test]
    async fn history_for_unknown_job_is_empty() {
        let log = InMemoryHistoryLog::new();
        assert!(log.query(7, HistoryQuery::all()).await.unwrap().is_empty());
        assert!(log.latest(7).await.unwrap().is_none());
    }
}
