use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use postgres_native_tls::MakeTlsConnector;
use r2d2::{Pool, PooledConnection};
use r2d2_postgres::PostgresConnectionManager;
use tracing::error;

/// Providers redeliver change notifications at least once; claims are kept
/// long enough to outlive the redelivery horizon.
pub const DEFAULT_CLAIM_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum DedupStoreError {
    #[error("postgres error: {0}")]
    Postgres(#[from] postgres::Error),
    #[error("pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("claim store lock poisoned")]
    LockPoisoned,
    #[error("dedup store config error: {0}")]
    Config(String),
}

/// Write-once claim keyed by the provider message id. `claim` returns true
/// for exactly one caller per id; false means another invocation already
/// holds it and the caller must skip all side effects. Any other failure
/// propagates — dropping a notification on a transient store error would
/// lose mail permanently, which is worse than a duplicate.
pub trait DedupClaimStore: Send + Sync {
    fn claim(&self, provider_message_id: &str) -> Result<bool, DedupStoreError>;
}

pub struct MemoryDedupStore {
    claims: Mutex<HashMap<String, Instant>>,
    retention: Duration,
}

impl MemoryDedupStore {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_CLAIM_RETENTION)
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            claims: Mutex::new(HashMap::new()),
            retention,
        }
    }
}

impl Default for MemoryDedupStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DedupClaimStore for MemoryDedupStore {
    fn claim(&self, provider_message_id: &str) -> Result<bool, DedupStoreError> {
        let mut claims = self
            .claims
            .lock()
            .map_err(|_| DedupStoreError::LockPoisoned)?;
        let now = Instant::now();
        claims.retain(|_, claimed_at| now.duration_since(*claimed_at) < self.retention);
        if claims.contains_key(provider_message_id) {
            return Ok(false);
        }
        claims.insert(provider_message_id.to_string(), now);
        Ok(true)
    }
}

#[derive(Debug)]
struct LoggingErrorHandler;

impl r2d2::HandleError<postgres::Error> for LoggingErrorHandler {
    fn handle_error(&self, err: postgres::Error) {
        error!("postgres connection pool error: {:?}", err);
    }
}

pub struct PostgresDedupStore {
    pool: Pool<PostgresConnectionManager<MakeTlsConnector>>,
    table: String,
    retention_secs: i64,
}

impl PostgresDedupStore {
    pub fn new_from_url(db_url: &str) -> Result<Self, DedupStoreError> {
        Self::new(db_url, "dedup_claims", DEFAULT_CLAIM_RETENTION)
    }

    pub fn new(db_url: &str, table: &str, retention: Duration) -> Result<Self, DedupStoreError> {
        let table = sanitize_table_name(table)?;
        let config: postgres::Config = db_url.parse().map_err(DedupStoreError::Postgres)?;
        let tls_connector = native_tls::TlsConnector::builder()
            .build()
            .map_err(|err| DedupStoreError::Config(err.to_string()))?;
        let tls = MakeTlsConnector::new(tls_connector);
        let manager = PostgresConnectionManager::new(config, tls);
        let pool = Pool::builder()
            .max_size(4)
            .idle_timeout(Some(std::time::Duration::from_secs(300)))
            .error_handler(Box::new(LoggingErrorHandler))
            .build(manager)?;
        let store = Self {
            pool,
            table,
            retention_secs: retention.as_secs() as i64,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn connection(
        &self,
    ) -> Result<PooledConnection<PostgresConnectionManager<MakeTlsConnector>>, DedupStoreError>
    {
        Ok(self.pool.get()?)
    }

    fn ensure_schema(&self) -> Result<(), DedupStoreError> {
        let mut conn = self.connection()?;
        let statement = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                provider_message_id TEXT PRIMARY KEY,
                claimed_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                expires_at TIMESTAMPTZ NOT NULL
            );
            CREATE INDEX IF NOT EXISTS {table}_expires_idx ON {table}(expires_at);",
            table = self.table
        );
        conn.batch_execute(&statement)?;
        Ok(())
    }
}

impl DedupClaimStore for PostgresDedupStore {
    fn claim(&self, provider_message_id: &str) -> Result<bool, DedupStoreError> {
        let mut conn = self.connection()?;
        // Expired claims are past the provider's redelivery horizon and can
        // be reaped inline before the insert race.
        conn.execute(
            &format!(
                "DELETE FROM {table} WHERE expires_at <= now()",
                table = self.table
            ),
            &[],
        )?;
        let inserted = conn.execute(
            &format!(
                "INSERT INTO {table} (provider_message_id, claimed_at, expires_at)
                 VALUES ($1, now(), now() + ($2::bigint * interval '1 second'))
                 ON CONFLICT (provider_message_id) DO NOTHING",
                table = self.table
            ),
            &[&provider_message_id, &self.retention_secs],
        )?;
        Ok(inserted > 0)
    }
}

fn sanitize_table_name(raw: &str) -> Result<String, DedupStoreError> {
    if raw.is_empty()
        || !raw
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
    {
        return Err(DedupStoreError::Config(format!(
            "invalid table name: {}",
            raw
        )));
    }
    Ok(raw.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn claim_is_first_writer_wins() {
        let store = MemoryDedupStore::new();
        assert!(store.claim("msg-1").expect("claim"));
        assert!(!store.claim("msg-1").expect("claim"));
        assert!(store.claim("msg-2").expect("claim"));
    }

    #[test]
    fn concurrent_claims_yield_exactly_one_winner() {
        let store = Arc::new(MemoryDedupStore::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || store.claim("contended-id").expect("claim"))
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|handle| handle.join().expect("join"))
            .filter(|claimed| *claimed)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn expired_claims_can_be_retaken() {
        let store = MemoryDedupStore::with_retention(Duration::from_millis(10));
        assert!(store.claim("msg-1").expect("claim"));
        thread::sleep(Duration::from_millis(25));
        assert!(store.claim("msg-1").expect("claim"));
    }
}
