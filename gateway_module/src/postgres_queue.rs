use std::env;
use std::time::Duration;

use postgres_native_tls::MakeTlsConnector;
use r2d2::{Pool, PooledConnection};
use r2d2_postgres::PostgresConnectionManager;
use tracing::error;
use uuid::Uuid;

use crate::classification_queue::{
    ClassificationJob, ClassificationQueue, DeadLetterJob, QueueError, QueuedJob,
    DEFAULT_LEASE, DEFAULT_MAX_ATTEMPTS,
};

#[derive(Debug)]
struct LoggingErrorHandler;

impl r2d2::HandleError<postgres::Error> for LoggingErrorHandler {
    fn handle_error(&self, err: postgres::Error) {
        error!("postgres connection pool error: {:?}", err);
    }
}

pub struct PostgresClassificationQueue {
    pool: Pool<PostgresConnectionManager<MakeTlsConnector>>,
    table: String,
    lease_secs: i64,
    max_attempts: i32,
}

impl PostgresClassificationQueue {
    pub fn new_from_url(db_url: &str) -> Result<Self, QueueError> {
        let lease_secs = resolve_i64_env("CLASSIFY_QUEUE_LEASE_SECS", DEFAULT_LEASE.as_secs() as i64);
        let max_attempts = resolve_i32_env("CLASSIFY_QUEUE_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS);
        Self::new(
            db_url,
            "classification_jobs",
            Duration::from_secs(lease_secs as u64),
            max_attempts,
        )
    }

    pub fn new(
        db_url: &str,
        table: &str,
        lease: Duration,
        max_attempts: i32,
    ) -> Result<Self, QueueError> {
        let table = sanitize_table_name(table)?;
        let config: postgres::Config = db_url.parse().map_err(QueueError::Postgres)?;
        let tls_connector = native_tls::TlsConnector::builder()
            .build()
            .map_err(|err| QueueError::Config(err.to_string()))?;
        let tls = MakeTlsConnector::new(tls_connector);
        let manager = PostgresConnectionManager::new(config, tls);
        let pool = Pool::builder()
            .max_size(4)
            .idle_timeout(Some(std::time::Duration::from_secs(300)))
            .error_handler(Box::new(LoggingErrorHandler))
            .build(manager)?;
        let queue = Self {
            pool,
            table,
            lease_secs: lease.as_secs() as i64,
            max_attempts,
        };
        queue.ensure_schema()?;
        Ok(queue)
    }

    fn connection(
        &self,
    ) -> Result<PooledConnection<PostgresConnectionManager<MakeTlsConnector>>, QueueError> {
        Ok(self.pool.get()?)
    }

    fn ensure_schema(&self) -> Result<(), QueueError> {
        let mut conn = self.connection()?;
        let statement = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id UUID PRIMARY KEY,
                ticket_id UUID NOT NULL,
                payload_json TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                locked_at TIMESTAMPTZ,
                locked_by TEXT,
                processed_at TIMESTAMPTZ,
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                available_at TIMESTAMPTZ
            );
            CREATE INDEX IF NOT EXISTS {table}_pending_idx
                ON {table}(status, created_at);
            CREATE INDEX IF NOT EXISTS {table}_available_idx
                ON {table}(status, available_at);",
            table = self.table
        );
        conn.batch_execute(&statement)?;
        Ok(())
    }
}

impl ClassificationQueue for PostgresClassificationQueue {
    fn enqueue(&self, job: &ClassificationJob) -> Result<(), QueueError> {
        let mut conn = self.connection()?;
        let payload_json = serde_json::to_string(job)?;
        conn.execute(
            &format!(
                "INSERT INTO {table} (id, ticket_id, payload_json, status, created_at, attempts)
                 VALUES ($1, $2, $3, 'pending', now(), 0)",
                table = self.table
            ),
            &[&Uuid::new_v4(), &job.ticket_id, &payload_json],
        )?;
        Ok(())
    }

    fn claim_next(&self) -> Result<Option<QueuedJob>, QueueError> {
        let mut conn = self.connection()?;
        let instance_id = resolve_worker_instance_id();
        let lease_secs = self.lease_secs;

        let mut tx = conn.transaction()?;
        let row = tx.query_opt(
            &format!(
                "SELECT id, payload_json, attempts
                 FROM {table}
                 WHERE (
                     status = 'pending'
                     OR (status = 'processing' AND locked_at < now() - ($1::bigint * interval '1 second'))
                   )
                   AND (available_at IS NULL OR available_at <= now())
                   AND attempts < $2
                 ORDER BY created_at
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED",
                table = self.table
            ),
            &[&lease_secs, &self.max_attempts],
        )?;

        let Some(row) = row else {
            tx.commit()?;
            return Ok(None);
        };

        let id: Uuid = row.get(0);
        let payload_json: String = row.get(1);
        let attempts: i32 = row.get(2);

        tx.execute(
            &format!(
                "UPDATE {table}
                 SET status = 'processing',
                     locked_at = now(),
                     locked_by = $2,
                     attempts = attempts + 1
                 WHERE id = $1",
                table = self.table
            ),
            &[&id, &instance_id],
        )?;
        tx.commit()?;

        let job: ClassificationJob = serde_json::from_str(&payload_json)?;
        Ok(Some(QueuedJob {
            id,
            job,
            attempt: attempts + 1,
        }))
    }

    fn mark_done(&self, id: &Uuid) -> Result<(), QueueError> {
        let mut conn = self.connection()?;
        conn.execute(
            &format!(
                "UPDATE {table}
                 SET status = 'done',
                     processed_at = now(),
                     locked_at = NULL,
                     locked_by = NULL
                 WHERE id = $1",
                table = self.table
            ),
            &[id],
        )?;
        Ok(())
    }

    fn mark_failed(&self, id: &Uuid, error: &str) -> Result<(), QueueError> {
        let mut conn = self.connection()?;
        let attempts: i32 = conn
            .query_one(
                &format!("SELECT attempts FROM {table} WHERE id = $1", table = self.table),
                &[id],
            )?
            .get(0);

        if attempts >= self.max_attempts {
            conn.execute(
                &format!(
                    "UPDATE {table}
                     SET status = 'dead_letter',
                         processed_at = now(),
                         locked_at = NULL,
                         locked_by = NULL,
                         available_at = NULL,
                         last_error = $2
                     WHERE id = $1",
                    table = self.table
                ),
                &[id, &error],
            )?;
        } else {
            let backoff_secs = i64::from(attempts.max(1)).saturating_mul(5);
            conn.execute(
                &format!(
                    "UPDATE {table}
                     SET status = 'pending',
                         processed_at = now(),
                         locked_at = NULL,
                         locked_by = NULL,
                         available_at = now() + ($2::bigint * interval '1 second'),
                         last_error = $3
                     WHERE id = $1",
                    table = self.table
                ),
                &[id, &backoff_secs, &error],
            )?;
        }
        Ok(())
    }

    fn dead_letters(&self) -> Result<Vec<DeadLetterJob>, QueueError> {
        let mut conn = self.connection()?;
        let rows = conn.query(
            &format!(
                "SELECT id, payload_json, attempts, last_error
                 FROM {table}
                 WHERE status = 'dead_letter'
                 ORDER BY processed_at",
                table = self.table
            ),
            &[],
        )?;
        rows.iter()
            .map(|row| {
                let payload_json: String = row.get(1);
                let job: ClassificationJob = serde_json::from_str(&payload_json)?;
                Ok(DeadLetterJob {
                    id: row.get(0),
                    job,
                    attempts: row.get(2),
                    last_error: row.get(3),
                })
            })
            .collect()
    }
}

fn sanitize_table_name(raw: &str) -> Result<String, QueueError> {
    if raw.is_empty()
        || !raw
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
    {
        return Err(QueueError::Config(format!("invalid table name: {}", raw)));
    }
    Ok(raw.to_string())
}

fn resolve_i64_env(key: &str, default_value: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default_value)
}

fn resolve_i32_env(key: &str, default_value: i32) -> i32 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<i32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default_value)
}

fn resolve_worker_instance_id() -> String {
    if let Ok(value) = env::var("WORKER_INSTANCE_ID") {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    env::var("HOSTNAME")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| format!("pid-{}", std::process::id()))
}
