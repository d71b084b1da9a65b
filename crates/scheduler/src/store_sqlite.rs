//! SQLite-backed job state store and history log using sqlx.

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    sqlx::{
        Row, SqlitePool,
        sqlite::{SqlitePoolOptions, SqliteRow},
    },
};

use crate::{
    Error, Result,
    store::{HistoryLog, JobStateStore},
    trigger::TriggerSpec,
    types::{HistoryEntry, HistoryQuery, JobId, JobState, LastRun, RunRecord},
};

const STATE_COLUMNS: &str = "job_id, active, currently_running, next_run_at_ms, last_started_at_ms, \
     last_finished_at_ms, last_status, last_trigger_type, missed_runs, trigger_override, \
     updated_at_ms";

const HISTORY_COLUMNS: &str = "job_id, version, started_at_ms, finished_at_ms, status, \
     trigger_type, error_message, error_log";

/// SQLite persistence for both job state and run history.
///
/// One pool serves both traits, so a single `Arc<SqliteStore>` can be handed
/// to the engine as its state store and its history log.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect with a small pool and run migrations.
    ///
    /// For shared pools, use [`SqliteStore::with_pool`] after calling
    /// [`crate::run_migrations`].
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        crate::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Private in-memory database. Pinned to a single long-lived connection,
    /// since every new connection to `sqlite::memory:` opens an empty database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        crate::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Create a store using an existing pool (migrations must already be run).
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch_state(&self, job_id: JobId) -> Result<Option<JobState>> {
        let row = sqlx::query(&format!(
            "SELECT {STATE_COLUMNS} FROM job_states WHERE job_id = ?"
        ))
        .bind(i64::from(job_id))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(state_from_row).transpose()
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn from_ms(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| Error::message(format!("timestamp out of range: {ms}")))
}

fn opt_from_ms(ms: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    ms.map(from_ms).transpose()
}

fn job_id_from(raw: i64) -> Result<JobId> {
    JobId::try_from(raw).map_err(|_| Error::message(format!("invalid job id in store: {raw}")))
}

fn state_from_row(row: &SqliteRow) -> Result<JobState> {
    let last_run = match (
        row.try_get::<Option<i64>, _>("last_started_at_ms")?,
        row.try_get::<Option<i64>, _>("last_finished_at_ms")?,
        row.try_get::<Option<String>, _>("last_status")?,
        row.try_get::<Option<String>, _>("last_trigger_type")?,
    ) {
        (Some(started), Some(finished), Some(status), Some(trigger_type)) => Some(LastRun {
            started_at: from_ms(started)?,
            finished_at: from_ms(finished)?,
            status: status.parse().map_err(Error::message)?,
            trigger_type: trigger_type.parse().map_err(Error::message)?,
        }),
        _ => None,
    };

    let trigger_override = row
        .try_get::<Option<String>, _>("trigger_override")?
        .map(|raw| serde_json::from_str::<TriggerSpec>(&raw))
        .transpose()?;

    Ok(JobState {
        job_id: job_id_from(row.try_get("job_id")?)?,
        active: row.try_get("active")?,
        currently_running: row.try_get("currently_running")?,
        next_run_at: opt_from_ms(row.try_get("next_run_at_ms")?)?,
        last_run,
        missed_runs: row.try_get::<i64, _>("missed_runs")?.max(0) as u64,
        trigger_override,
        updated_at: from_ms(row.try_get("updated_at_ms")?)?,
    })
}

fn entry_from_row(row: &SqliteRow) -> Result<HistoryEntry> {
    Ok(HistoryEntry {
        job_id: job_id_from(row.try_get("job_id")?)?,
        version: row.try_get::<i64, _>("version")?.max(0) as u64,
        started_at: from_ms(row.try_get("started_at_ms")?)?,
        finished_at: from_ms(row.try_get("finished_at_ms")?)?,
        status: row
            .try_get::<String, _>("status")?
            .parse()
            .map_err(Error::message)?,
        trigger_type: row
            .try_get::<String, _>("trigger_type")?
            .parse()
            .map_err(Error::message)?,
        error_message: row.try_get("error_message")?,
        error_log: row.try_get("error_log")?,
    })
}

#[async_trait]
impl JobStateStore for SqliteStore {
    async fn ensure_job(&self, job_id: JobId, default_active: bool) -> Result<JobState> {
        sqlx::query(
            "INSERT INTO job_states (job_id, active, updated_at_ms) VALUES (?, ?, ?)
             ON CONFLICT(job_id) DO NOTHING",
        )
        .bind(i64::from(job_id))
        .bind(default_active)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        self.get_state(job_id).await
    }

    async fn get_state(&self, job_id: JobId) -> Result<JobState> {
        self.fetch_state(job_id)
            .await?
            .ok_or_else(|| Error::job_not_found(job_id))
    }

    async fn list_states(&self) -> Result<Vec<JobState>> {
        let rows = sqlx::query(&format!(
            "SELECT {STATE_COLUMNS} FROM job_states ORDER BY job_id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(state_from_row).collect()
    }

    async fn set_active(&self, job_id: JobId, active: bool) -> Result<JobState> {
        let row = sqlx::query(&format!(
            "UPDATE job_states
             SET active = ?1,
                 next_run_at_ms = CASE WHEN ?1 THEN next_run_at_ms ELSE NULL END,
                 updated_at_ms = ?2
             WHERE job_id = ?3
             RETURNING {STATE_COLUMNS}"
        ))
        .bind(active)
        .bind(now_ms())
        .bind(i64::from(job_id))
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => state_from_row(&row),
            None => Err(Error::job_not_found(job_id)),
        }
    }

    async fn set_next_run(&self, job_id: JobId, next_run_at: Option<DateTime<Utc>>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE job_states
             SET next_run_at_ms = CASE WHEN active THEN ? ELSE NULL END, updated_at_ms = ?
             WHERE job_id = ?",
        )
        .bind(next_run_at.map(|t| t.timestamp_millis()))
        .bind(now_ms())
        .bind(i64::from(job_id))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::job_not_found(job_id));
        }
        Ok(())
    }

    async fn set_running(&self, job_id: JobId, running: bool) -> Result<()> {
        let result = sqlx::query(
            "UPDATE job_states SET currently_running = ?, updated_at_ms = ? WHERE job_id = ?",
        )
        .bind(running)
        .bind(now_ms())
        .bind(i64::from(job_id))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::job_not_found(job_id));
        }
        Ok(())
    }

    async fn record_completion(
        &self,
        job_id: JobId,
        last_run: &LastRun,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE job_states
             SET currently_running = 0,
                 last_started_at_ms = ?,
                 last_finished_at_ms = ?,
                 last_status = ?,
                 last_trigger_type = ?,
                 next_run_at_ms = CASE WHEN active THEN ? ELSE NULL END,
                 updated_at_ms = ?
             WHERE job_id = ?",
        )
        .bind(last_run.started_at.timestamp_millis())
        .bind(last_run.finished_at.timestamp_millis())
        .bind(last_run.status.as_str())
        .bind(last_run.trigger_type.as_str())
        .bind(next_run_at.map(|t| t.timestamp_millis()))
        .bind(now_ms())
        .bind(i64::from(job_id))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::job_not_found(job_id));
        }
        Ok(())
    }

    async fn record_missed(&self, job_id: JobId) -> Result<u64> {
        let row = sqlx::query(
            "UPDATE job_states SET missed_runs = missed_runs + 1, updated_at_ms = ?
             WHERE job_id = ?
             RETURNING missed_runs",
        )
        .bind(now_ms())
        .bind(i64::from(job_id))
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::job_not_found(job_id))?;
        Ok(row.try_get::<i64, _>("missed_runs")?.max(0) as u64)
    }

    async fn set_trigger_override(
        &self,
        job_id: JobId,
        trigger: Option<TriggerSpec>,
    ) -> Result<JobState> {
        let raw = trigger.as_ref().map(serde_json::to_string).transpose()?;
        let row = sqlx::query(&format!(
            "UPDATE job_states SET trigger_override = ?, updated_at_ms = ?
             WHERE job_id = ?
             RETURNING {STATE_COLUMNS}"
        ))
        .bind(raw)
        .bind(now_ms())
        .bind(i64::from(job_id))
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => state_from_row(&row),
            None => Err(Error::job_not_found(job_id)),
        }
    }

    async fn clear_running_flags(&self) -> Result<usize> {
        let result = sqlx::query(
            "UPDATE job_states SET currently_running = 0, updated_at_ms = ?
             WHERE currently_running = 1",
        )
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn scheduler_status(&self) -> Result<Option<bool>> {
        let row = sqlx::query("SELECT running FROM scheduler_status WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.try_get::<bool, _>("running"))
            .transpose()
            .map_err(Into::into)
    }

    async fn set_scheduler_status(&self, running: bool) -> Result<()> {
        sqlx::query(
            "INSERT INTO scheduler_status (id, running, updated_at_ms) VALUES (1, ?, ?)
             ON CONFLICT(id) DO UPDATE
             SET running = excluded.running, updated_at_ms = excluded.updated_at_ms",
        )
        .bind(running)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl HistoryLog for SqliteStore {
    async fn append(&self, record: &RunRecord) -> Result<HistoryEntry> {
        // Version assignment and insert happen in one statement, so concurrent
        // appends for the same job cannot reuse a version.
        let row = sqlx::query(&format!(
            "INSERT INTO job_run_history
                 (job_id, version, started_at_ms, finished_at_ms, status, trigger_type,
                  error_message, error_log)
             SELECT ?1, COALESCE(MAX(version), 0) + 1, ?2, ?3, ?4, ?5, ?6, ?7
             FROM job_run_history WHERE job_id = ?1
             RETURNING {HISTORY_COLUMNS}"
        ))
        .bind(i64::from(record.job_id))
        .bind(record.started_at.timestamp_millis())
        .bind(record.finished_at.timestamp_millis())
        .bind(record.status.as_str())
        .bind(record.trigger_type.as_str())
        .bind(&record.error_message)
        .bind(&record.error_log)
        .fetch_one(&self.pool)
        .await?;
        entry_from_row(&row)
    }

    async fn query(&self, job_id: JobId, query: HistoryQuery) -> Result<Vec<HistoryEntry>> {
        // SQLite treats a negative LIMIT as "no limit".
        let limit = query
            .limit
            .map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
        let offset = i64::try_from(query.offset).unwrap_or(i64::MAX);
        let rows = sqlx::query(&format!(
            "SELECT {HISTORY_COLUMNS} FROM job_run_history
             WHERE job_id = ?
             ORDER BY version ASC
             LIMIT ? OFFSET ?"
        ))
        .bind(i64::from(job_id))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn latest(&self, job_id: JobId) -> Result<Option<HistoryEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {HISTORY_COLUMNS} FROM job_run_history
             WHERE job_id = ?
             ORDER BY version DESC
             LIMIT 1"
        ))
        .bind(i64::from(job_id))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(entry_from_row).transpose()
    }

    async fn count(&self, job_id: JobId) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM job_run_history WHERE job_id = ?")
            .bind(i64::from(job_id))
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("n")?.max(0) as u64)
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
            finished_at: started + chrono::Duration::milliseconds(250),
            status,
            trigger_type: TriggerType::Manual,
            error_message: (status == RunStatus::Failure).then(|| "boom".to_string()),
            error_log: None,
        }
    }

    #[tokio::test]
    async fn state_roundtrip() {
        let store = SqliteStore::in_memory().await.unwrap();
        let seeded = store.ensure_job(1, true).await.unwrap();
        assert!(seeded.active);
        assert!(!seeded.currently_running);
        assert!(seeded.last_run.is_none());

        let next = "2026-03-01T00:05:00Z".parse::<DateTime<Utc>>().unwrap();
        store.set_next_run(1, Some(next)).await.unwrap();
        store.set_running(1, true).await.unwrap();

        let state = store.get_state(1).await.unwrap();
        assert_eq!(state.next_run_at, Some(next));
        assert!(state.currently_running);
    }

    #[tokio::test]
    async fn ensure_job_keeps_existing_row() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.ensure_job(1, true).await.unwrap();
        store.set_active(1, false).await.unwrap();
        assert!(!store.ensure_job(1, true).await.unwrap().active);
    }

    #[tokio::test]
    async fn inactive_job_ignores_next_run() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.ensure_job(1, true).await.unwrap();
        store.set_next_run(1, Some(Utc::now())).await.unwrap();

        let state = store.set_active(1, false).await.unwrap();
        assert!(state.next_run_at.is_none());

        store.set_next_run(1, Some(Utc::now())).await.unwrap();
        assert!(store.get_state(1).await.unwrap().next_run_at.is_none());
    }

    #[tokio::test]
    async fn missing_rows_are_not_found() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert!(matches!(
            store.get_state(4).await,
            Err(Error::JobNotFound { job_id: 4 })
        ));
        assert!(matches!(
            store.set_active(4, true).await,
            Err(Error::JobNotFound { job_id: 4 })
        ));
        assert!(store.set_next_run(4, None).await.is_err());
        assert!(store.record_missed(4).await.is_err());
    }

    #[tokio::test]
    async fn completion_persists_last_run() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.ensure_job(2, true).await.unwrap();
        store.set_running(2, true).await.unwrap();

        let rec = record(2, 0, RunStatus::Failure);
        store
            .record_completion(2, &rec.last_run(), None)
            .await
            .unwrap();

        let state = store.get_state(2).await.unwrap();
        assert!(!state.currently_running);
        assert_eq!(state.last_run, Some(rec.last_run()));
    }

    #[tokio::test]
    async fn missed_runs_accumulate() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.ensure_job(1, true).await.unwrap();
        assert_eq!(store.record_missed(1).await.unwrap(), 1);
        assert_eq!(store.record_missed(1).await.unwrap(), 2);
        assert_eq!(store.get_state(1).await.unwrap().missed_runs, 2);
    }

    #[tokio::test]
    async fn trigger_override_roundtrip() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.ensure_job(1, true).await.unwrap();
        let spec = TriggerSpec::Cron {
            expr: "0 3 * * *".into(),
            tz: Some("Europe/Berlin".into()),
        };
        let state = store
            .set_trigger_override(1, Some(spec.clone()))
            .await
            .unwrap();
        assert_eq!(state.trigger_override, Some(spec));

        let cleared = store.set_trigger_override(1, None).await.unwrap();
        assert!(cleared.trigger_override.is_none());
    }

    #[tokio::test]
    async fn stale_running_flags_are_cleared() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.ensure_job(1, true).await.unwrap();
        store.ensure_job(2, true).await.unwrap();
        store.set_running(2, true).await.unwrap();
        assert_eq!(store.clear_running_flags().await.unwrap(), 1);
        assert!(!store.get_state(2).await.unwrap().currently_running);
    }

    #[tokio::test]
    async fn scheduler_status_upserts() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert_eq!(store.scheduler_status().await.unwrap(), None);
        store.set_scheduler_status(false).await.unwrap();
        store.set_scheduler_status(true).await.unwrap();
        assert_eq!(store.scheduler_status().await.unwrap(), Some(true));
    }

    #[tokio::test]
    async fn history_versions_and_paging() {
        let store = SqliteStore::in_memory().await.unwrap();
        for i in 0..4 {
            let entry = store
                .append(&record(1, i * 1000, RunStatus::Success))
                .await
                .unwrap();
            assert_eq!(entry.version, i as u64 + 1);
        }
        let failed = store
            .append(&record(1, 5000, RunStatus::Failure))
            .await
            .unwrap();
        assert_eq!(failed.error_message.as_deref(), Some("boom"));
        assert_eq!(store.append(&record(2, 0, RunStatus::Success)).await.unwrap().version, 1);

        assert_eq!(store.count(1).await.unwrap(), 5);
        let page = store.query(1, HistoryQuery::page(3, 10)).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].version, 4);
        assert_eq!(store.query(1, HistoryQuery::all()).await.unwrap().len(), 5);

        let latest = store.latest(1).await.unwrap().unwrap();
        assert_eq!(latest.status, RunStatus::Failure);
        assert_eq!(latest.duration_ms(), 250);
    }

    #[tokio::test]
    async fn file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("cadence.db").display());

        {
            let store = SqliteStore::new(&url).await.unwrap();
            store.ensure_job(1, true).await.unwrap();
            store.set_scheduler_status(false).await.unwrap();
            store
                .append(&record(1, 0, RunStatus::Success))
                .await
                .unwrap();
        }

        let store = SqliteStore::new(&url).await.unwrap();
        assert_eq!(store.scheduler_status().await.unwrap(), Some(false));
        assert_eq!(store.count(1).await.unwrap(), 1);
        assert!(store.get_state(1).await.unwrap().active);
    }
}
