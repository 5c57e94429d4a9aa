//! Postgres-backed `QueueBackend` over the crate's persisted schema.
//!
//! The locking dequeue (`UPDATE ... WHERE id = (SELECT ... FOR UPDATE
//! SKIP LOCKED) RETURNING ...`) and the cancel-wins `complete_job`
//! pattern follow the style of a hand-rolled Postgres job queue: raw
//! `sqlx::query` rather than the macro-checked variants, row-level
//! locking instead of `SELECT ... FOR UPDATE` on the whole table, and
//! a `CASE`-guarded `UPDATE` so a concurrent cancel always wins over a
//! racing `complete`/`fail`.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::instrument;

use crate::backend::{BackoffFn, BoxStream, QueueBackend, QueueStats};
use crate::types::{Priority, MAX_PAYLOAD_BYTES};
use crate::{JobEvent, JobId, JobMessage, JobRecord, JobStatus, QueueError, QueueResult, WorkerId};

pub struct PostgresBackend {
    pool: PgPool,
    event_broadcaster: tokio::sync::broadcast::Sender<JobEvent>,
}

impl PostgresBackend {
    pub async fn connect(database_url: &str) -> QueueResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        let (event_broadcaster, _) = tokio::sync::broadcast::channel(1024);
        Ok(Self { pool, event_broadcaster })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        let (event_broadcaster, _) = tokio::sync::broadcast::channel(1024);
        Self { pool, event_broadcaster }
    }

    /// Creates the `jobs`, `workers`, and `cache` tables. Exposed so a
    /// CLI `migrate` command or test fixture can call it without
    /// shipping a separate migrations directory - the schema is small
    /// and fully owned by this crate.
    pub async fn run_migrations(&self) -> QueueResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id UUID PRIMARY KEY,
                job_type TEXT NOT NULL,
                payload_json JSONB NOT NULL,
                priority SMALLINT NOT NULL,
                status TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL,
                scheduled_at TIMESTAMPTZ NOT NULL,
                started_at TIMESTAMPTZ,
                completed_at TIMESTAMPTZ,
                error_message TEXT,
                worker_id TEXT,
                dedup_key TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
            CREATE INDEX IF NOT EXISTS jobs_dequeue_idx ON jobs (status, scheduled_at, priority);
            CREATE INDEX IF NOT EXISTS jobs_type_status_idx ON jobs (job_type, status);
            CREATE UNIQUE INDEX IF NOT EXISTS jobs_open_dedup_idx
                ON jobs (job_type, dedup_key)
                WHERE dedup_key IS NOT NULL AND status IN ('pending', 'processing', 'retry');

            CREATE TABLE IF NOT EXISTS workers (
                id TEXT PRIMARY KEY,
                last_seen TIMESTAMPTZ NOT NULL
            );

            CREATE TABLE IF NOT EXISTS cache (
                key TEXT PRIMARY KEY,
                value_json JSONB NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL
            );
            CREATE INDEX IF NOT EXISTS cache_expires_idx ON cache (expires_at);
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn row_to_record(row: &sqlx::postgres::PgRow) -> QueueResult<JobRecord> {
        let status_str: String = row.try_get("status").map_err(|e| QueueError::Store(e.to_string()))?;
        let status = match status_str.as_str() {
            "pending" => JobStatus::Pending,
            "processing" => JobStatus::Processing,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            "retry" => JobStatus::Retry,
            "cancelled" => JobStatus::Cancelled,
            other => return Err(QueueError::Internal(format!("unknown status {other}"))),
        };
        let priority: i16 = row.try_get("priority").map_err(|e| QueueError::Store(e.to_string()))?;
        let id: uuid::Uuid = row.try_get("id").map_err(|e| QueueError::Store(e.to_string()))?;

        Ok(JobRecord {
            id: JobId::from_string(id.to_string()),
            job_type: row.try_get("job_type").map_err(|e| QueueError::Store(e.to_string()))?,
            payload: row.try_get("payload_json").map_err(|e| QueueError::Store(e.to_string()))?,
            priority: Priority::new(priority as u8)?,
            status,
            attempts: row.try_get::<i32, _>("attempts").map_err(|e| QueueError::Store(e.to_string()))? as u32,
            max_attempts: row.try_get::<i32, _>("max_attempts").map_err(|e| QueueError::Store(e.to_string()))? as u32,
            scheduled_at: row.try_get("scheduled_at").map_err(|e| QueueError::Store(e.to_string()))?,
            started_at: row.try_get("started_at").map_err(|e| QueueError::Store(e.to_string()))?,
            completed_at: row.try_get("completed_at").map_err(|e| QueueError::Store(e.to_string()))?,
            error_message: row.try_get("error_message").map_err(|e| QueueError::Store(e.to_string()))?,
            worker_id: row
                .try_get::<Option<String>, _>("worker_id")
                .map_err(|e| QueueError::Store(e.to_string()))?
                .map(WorkerId::from_string),
            dedup_key: row.try_get("dedup_key").map_err(|e| QueueError::Store(e.to_string()))?,
            created_at: row.try_get("created_at").map_err(|e| QueueError::Store(e.to_string()))?,
            updated_at: row.try_get("updated_at").map_err(|e| QueueError::Store(e.to_string()))?,
        })
    }
}

#[async_trait]
impl QueueBackend for PostgresBackend {
    #[instrument(skip(self, message), fields(job_type = %message.job_type))]
    async fn enqueue(&self, message: JobMessage) -> QueueResult<JobId> {
        if message.payload_size() > MAX_PAYLOAD_BYTES {
            return Err(QueueError::PayloadTooLarge {
                size: message.payload_size(),
                max: MAX_PAYLOAD_BYTES,
            });
        }

        let id = uuid::Uuid::new_v4();
        // Partial unique index on (job_type, dedup_key) among open
        // statuses makes this an atomic race at the database: the
        // loser's INSERT ... ON CONFLICT clause hands back the
        // winner's id instead of erroring.
        let row = sqlx::query(
            r#"
            INSERT INTO jobs (id, job_type, payload_json, priority, status, max_attempts, scheduled_at, dedup_key)
            VALUES ($1, $2, $3, $4, 'pending', $5, $6, $7)
            ON CONFLICT (job_type, dedup_key) WHERE dedup_key IS NOT NULL
                AND status IN ('pending', 'processing', 'retry')
            DO UPDATE SET job_type = EXCLUDED.job_type
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(&message.job_type)
        .bind(&message.payload)
        .bind(message.priority.get() as i16)
        .bind(message.max_attempts as i32)
        .bind(message.scheduled_at)
        .bind(&message.dedup_key)
        .fetch_one(&self.pool)
        .await?;

        let returned_id: uuid::Uuid = row.try_get("id").map_err(|e| QueueError::Store(e.to_string()))?;
        let job_id = JobId::from_string(returned_id.to_string());

        let _ = self.event_broadcaster.send(JobEvent::Enqueued {
            job_id: job_id.clone(),
            job_type: message.job_type,
            at: Utc::now(),
        });
        Ok(job_id)
    }

    #[instrument(skip(self))]
    async fn dequeue(
        &self,
        worker_id: WorkerId,
        eligible_types: Option<&[&str]>,
    ) -> QueueResult<Option<JobRecord>> {
        let now = Utc::now();
        let types: Vec<String> = eligible_types
            .map(|types| types.iter().map(|s| s.to_string()).collect())
            .unwrap_or_default();
        let filter_by_type = eligible_types.is_some();

        let row = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'processing', worker_id = $1, started_at = $2,
                attempts = attempts + 1, updated_at = $2
            WHERE id = (
                SELECT id FROM jobs
                WHERE status IN ('pending', 'retry')
                  AND scheduled_at <= $2
                  AND ($3 = false OR job_type = ANY($4))
                ORDER BY priority ASC, scheduled_at ASC, created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(worker_id.as_str())
        .bind(now)
        .bind(filter_by_type)
        .bind(&types)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let record = Self::row_to_record(&row)?;
                let _ = self.event_broadcaster.send(JobEvent::Processing {
                    job_id: record.id.clone(),
                    worker_id: worker_id.as_str().to_string(),
                    at: now,
                });
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn complete(&self, job_id: &JobId, worker_id: &WorkerId) -> QueueResult<()> {
        let id: uuid::Uuid = job_id
            .as_str()
            .parse()
            .map_err(|_| QueueError::JobNotFound(job_id.to_string()))?;
        let now = Utc::now();
        // Cancel-wins: a row a management-API cancel already flipped to
        // 'cancelled' never gets overwritten back to 'completed'.
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = CASE WHEN status = 'cancelled' THEN status ELSE 'completed' END,
                completed_at = CASE WHEN status = 'cancelled' THEN completed_at ELSE $3 END,
                worker_id = NULL,
                updated_at = $3
            WHERE id = $1 AND worker_id = $2 AND status IN ('processing', 'cancelled')
            "#,
        )
        .bind(id)
        .bind(worker_id.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::WorkerMismatch);
        }

        let record = self.get_record(job_id).await?;
        if record.status == JobStatus::Cancelled {
            return Err(QueueError::JobCanceled);
        }
        let _ = self.event_broadcaster.send(JobEvent::Completed { job_id: job_id.clone(), at: now });
        Ok(())
    }

    async fn fail(
        &self,
        job_id: &JobId,
        worker_id: &WorkerId,
        error: String,
        backoff: BackoffFn<'_>,
    ) -> QueueResult<()> {
        let id: uuid::Uuid = job_id
            .as_str()
            .parse()
            .map_err(|_| QueueError::JobNotFound(job_id.to_string()))?;

        let mut record = self.get_record(job_id).await?;
        if record.status == JobStatus::Cancelled {
            return Err(QueueError::JobCanceled);
        }
        if record.status != JobStatus::Processing {
            return Err(QueueError::JobNotProcessing);
        }
        if record.worker_id.as_ref() != Some(worker_id) {
            return Err(QueueError::WorkerMismatch);
        }

        record.fail(error.clone(), |attempts| backoff(attempts));
        let now = Utc::now();

        sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2, scheduled_at = $3, error_message = $4,
                completed_at = $5, worker_id = NULL, started_at = $6, updated_at = $7
            WHERE id = $1 AND worker_id = $8
            "#,
        )
        .bind(id)
        .bind(record.status.name())
        .bind(record.scheduled_at)
        .bind(&record.error_message)
        .bind(record.completed_at)
        .bind(record.started_at)
        .bind(now)
        .bind(worker_id.as_str())
        .execute(&self.pool)
        .await?;

        let event = if record.status == JobStatus::Retry {
            JobEvent::Retrying {
                job_id: job_id.clone(),
                scheduled_at: record.scheduled_at,
                error,
                at: now,
            }
        } else {
            JobEvent::Failed { job_id: job_id.clone(), error, at: now }
        };
        let _ = self.event_broadcaster.send(event);
        Ok(())
    }

    async fn requeue(&self, job_id: &JobId, worker_id: &WorkerId, delay: chrono::Duration) -> QueueResult<()> {
        let id: uuid::Uuid = job_id
            .as_str()
            .parse()
            .map_err(|_| QueueError::JobNotFound(job_id.to_string()))?;
        let now = Utc::now();
        let scheduled_at = now + delay;
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending', attempts = GREATEST(attempts - 1, 0),
                scheduled_at = $3, worker_id = NULL, started_at = NULL, updated_at = $2
            WHERE id = $1 AND worker_id = $4 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(scheduled_at)
        .bind(worker_id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::WorkerMismatch);
        }
        Ok(())
    }

    async fn fail_permanent(&self, job_id: &JobId, worker_id: &WorkerId, error: String) -> QueueResult<()> {
        let id: uuid::Uuid = job_id
            .as_str()
            .parse()
            .map_err(|_| QueueError::JobNotFound(job_id.to_string()))?;
        let now = Utc::now();
        let truncated = crate::error::truncate_diagnostic(&error);
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed', completed_at = $2, error_message = $3, worker_id = NULL, updated_at = $2
            WHERE id = $1 AND worker_id = $4 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(&truncated)
        .bind(worker_id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::WorkerMismatch);
        }
        let _ = self.event_broadcaster.send(JobEvent::Failed { job_id: job_id.clone(), error: truncated, at: now });
        Ok(())
    }

    async fn reset(&self, job_id: &JobId) -> QueueResult<()> {
        let id: uuid::Uuid = job_id
            .as_str()
            .parse()
            .map_err(|_| QueueError::JobNotFound(job_id.to_string()))?;
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending', attempts = 0, scheduled_at = $2,
                worker_id = NULL, started_at = NULL, updated_at = $2
            WHERE id = $1 AND status NOT IN ('completed', 'failed', 'cancelled')
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn cancel(&self, job_id: &JobId) -> QueueResult<bool> {
        let id: uuid::Uuid = job_id
            .as_str()
            .parse()
            .map_err(|_| QueueError::JobNotFound(job_id.to_string()))?;
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE jobs SET status = 'cancelled', completed_at = $2, worker_id = NULL, updated_at = $2
            WHERE id = $1 AND status NOT IN ('completed', 'failed', 'cancelled')
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let cancelled = result.rows_affected() > 0;
        if cancelled {
            let _ = self.event_broadcaster.send(JobEvent::Cancelled { job_id: job_id.clone(), at: now });
        }
        Ok(cancelled)
    }

    async fn stats(&self) -> QueueResult<QueueStats> {
        let rows = sqlx::query("SELECT job_type, status, COUNT(*) AS count FROM jobs GROUP BY job_type, status")
            .fetch_all(&self.pool)
            .await?;
        let mut stats = QueueStats::default();
        for row in rows {
            let job_type: String = row.try_get("job_type").map_err(|e| QueueError::Store(e.to_string()))?;
            let status: String = row.try_get("status").map_err(|e| QueueError::Store(e.to_string()))?;
            let count: i64 = row.try_get("count").map_err(|e| QueueError::Store(e.to_string()))?;
            *stats.by_status.entry(status.clone()).or_default() += count as u64;
            *stats.by_job_type.entry(job_type).or_default().entry(status).or_default() += count as u64;
        }
        Ok(stats)
    }

    async fn get_record(&self, job_id: &JobId) -> QueueResult<JobRecord> {
        let id: uuid::Uuid = job_id
            .as_str()
            .parse()
            .map_err(|_| QueueError::JobNotFound(job_id.to_string()))?;
        let row = sqlx::query("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;
        Self::row_to_record(&row)
    }

    async fn list_jobs(
        &self,
        status: Option<&str>,
        job_type: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> QueueResult<Vec<JobRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM jobs
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR job_type = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(status)
        .bind(job_type)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_record).collect()
    }

    async fn heartbeat(&self, worker_id: &WorkerId) -> QueueResult<()> {
        sqlx::query(
            "INSERT INTO workers (id, last_seen) VALUES ($1, $2)
             ON CONFLICT (id) DO UPDATE SET last_seen = EXCLUDED.last_seen",
        )
        .bind(worker_id.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn dead_workers(&self, stale_after: Duration) -> QueueResult<Vec<WorkerId>> {
        let stale_seconds = stale_after.as_secs() as f64;
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT j.worker_id FROM jobs j
            LEFT JOIN workers w ON w.id = j.worker_id
            WHERE j.status = 'processing' AND j.worker_id IS NOT NULL
              AND (w.last_seen IS NULL OR w.last_seen < now() - ($1 || ' seconds')::interval)
            "#,
        )
        .bind(stale_seconds.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                row.try_get::<String, _>("worker_id")
                    .map(WorkerId::from_string)
                    .map_err(|e| QueueError::Store(e.to_string()))
            })
            .collect()
    }

    async fn reap_stuck(
        &self,
        elapsed_bound: Duration,
        dead_workers: &[WorkerId],
        backoff: BackoffFn<'_>,
    ) -> QueueResult<usize> {
        if dead_workers.is_empty() {
            return Ok(0);
        }
        let worker_strs: Vec<String> = dead_workers.iter().map(|w| w.as_str().to_string()).collect();
        let elapsed_seconds = elapsed_bound.as_secs() as f64;

        let rows = sqlx::query(
            r#"
            SELECT id, attempts, max_attempts FROM jobs
            WHERE status = 'processing'
              AND worker_id = ANY($1)
              AND started_at < now() - ($2 || ' seconds')::interval
            "#,
        )
        .bind(&worker_strs)
        .bind(elapsed_seconds.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut reaped = 0;
        for row in rows {
            let id: uuid::Uuid = row.try_get("id").map_err(|e| QueueError::Store(e.to_string()))?;
            let attempts: i32 = row.try_get("attempts").map_err(|e| QueueError::Store(e.to_string()))?;
            let max_attempts: i32 = row.try_get("max_attempts").map_err(|e| QueueError::Store(e.to_string()))?;
            let now = Utc::now();

            if attempts >= max_attempts {
                sqlx::query(
                    "UPDATE jobs SET status = 'failed', completed_at = $2, error_message = $3, worker_id = NULL, updated_at = $2
                     WHERE id = $1",
                )
                .bind(id)
                .bind(now)
                .bind("worker heartbeat lost while job was processing")
                .execute(&self.pool)
                .await?;
            } else {
                let scheduled_at = backoff(attempts as u32);
                sqlx::query(
                    "UPDATE jobs SET status = 'retry', scheduled_at = $2, error_message = $3,
                     worker_id = NULL, started_at = NULL, updated_at = $4 WHERE id = $1",
                )
                .bind(id)
                .bind(scheduled_at)
                .bind("worker heartbeat lost while job was processing")
                .bind(now)
                .execute(&self.pool)
                .await?;
            }
            let _ = self.event_broadcaster.send(JobEvent::Reaped {
                job_id: JobId::from_string(id.to_string()),
                at: now,
            });
            reaped += 1;
        }
        Ok(reaped)
    }

    async fn delete_terminal_older_than(&self, retention: Duration) -> QueueResult<usize> {
        let retention_seconds = retention.as_secs() as f64;
        let result = sqlx::query(
            "DELETE FROM jobs WHERE status IN ('completed', 'failed', 'cancelled')
             AND completed_at < now() - ($1 || ' seconds')::interval",
        )
        .bind(retention_seconds.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn delete_terminal_by_status(&self, status: JobStatus) -> QueueResult<usize> {
        let result = sqlx::query("DELETE FROM jobs WHERE status = $1")
            .bind(status.name())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    fn event_stream(&self) -> BoxStream<JobEvent> {
        let receiver = self.event_broadcaster.subscribe();
        Box::pin(BroadcastStream::new(receiver).filter_map(|result| result.ok()))
    }
}
