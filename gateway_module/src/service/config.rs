use std::env;
use std::path::PathBuf;
use std::time::Duration;

use triage_module::TeamDirectory;

use super::BoxError;

pub const DEFAULT_INBOUND_BODY_MAX_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    /// Shared client-state secret carried on every provider notification.
    pub webhook_secret: String,
    /// The support mailbox itself; inbound mail from this address is a
    /// feedback loop and never becomes a ticket.
    pub mailbox_address: String,
    pub store_backend: StoreBackend,
    pub db_url: Option<String>,
    pub worker_poll_interval: Duration,
    pub queue_lease: Duration,
    pub queue_max_attempts: i32,
    pub dedup_retention: Duration,
    pub team_directory: TeamDirectory,
    /// Public URL of the webhook endpoint; enables subscription renewal.
    pub webhook_public_url: Option<String>,
    pub auto_ack_enabled: bool,
    pub inbound_body_max_bytes: usize,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, BoxError> {
        dotenvy::dotenv().ok();

        let host = env::var("SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("SERVICE_PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(9200);

        let webhook_secret = env::var("WEBHOOK_SECRET")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| "maildesk-webhook-secret".to_string());
        let mailbox_address = env::var("MAILBOX_ADDRESS")
            .unwrap_or_else(|_| "support@notely.app".to_string())
            .trim()
            .to_ascii_lowercase();

        let store_backend = resolve_store_backend();
        let db_url = env::var("TICKET_DB_URL")
            .ok()
            .or_else(|| env::var("DATABASE_URL").ok())
            .filter(|value| !value.trim().is_empty());
        if store_backend == StoreBackend::Postgres && db_url.is_none() {
            return Err("postgres backend requires TICKET_DB_URL/DATABASE_URL".into());
        }

        let worker_poll_interval = resolve_secs_env("WORKER_POLL_INTERVAL_SECS", 1);
        let queue_lease = resolve_secs_env("CLASSIFY_QUEUE_LEASE_SECS", 300);
        let queue_max_attempts = env::var("CLASSIFY_QUEUE_MAX_ATTEMPTS")
            .ok()
            .and_then(|value| value.parse::<i32>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(3);
        let dedup_retention_days = env::var("DEDUP_RETENTION_DAYS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(7);

        let team_directory = match env::var("TEAM_DIRECTORY_PATH").ok().map(PathBuf::from) {
            Some(path) => TeamDirectory::load(&path)?,
            None => TeamDirectory::default(),
        };

        let webhook_public_url = env::var("WEBHOOK_PUBLIC_URL")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        let auto_ack_enabled = env_flag("AUTO_ACK_ENABLED", true);
        let inbound_body_max_bytes = env::var("INBOUND_BODY_MAX_BYTES")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_INBOUND_BODY_MAX_BYTES);

        Ok(Self {
            host,
            port,
            webhook_secret,
            mailbox_address,
            store_backend,
            db_url,
            worker_poll_interval,
            queue_lease,
            queue_max_attempts,
            dedup_retention: Duration::from_secs(dedup_retention_days * 24 * 60 * 60),
            team_directory,
            webhook_public_url,
            auto_ack_enabled,
            inbound_body_max_bytes,
        })
    }
}

fn resolve_store_backend() -> StoreBackend {
    match env::var("TICKET_STORE_BACKEND") {
        Ok(value) if value.trim().eq_ignore_ascii_case("memory") => StoreBackend::Memory,
        Ok(value) if value.trim().eq_ignore_ascii_case("postgres") => StoreBackend::Postgres,
        _ => StoreBackend::Postgres,
    }
}

fn resolve_secs_env(key: &str, default_secs: u64) -> Duration {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(default_secs))
}

fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "y"
        ),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serial_test::serial;

    use super::*;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    struct EnvGuard {
        key: String,
        previous: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &str, value: &str) -> Self {
            let previous = env::var(key).ok();
            env::set_var(key, value);
            Self {
                key: key.to_string(),
                previous,
            }
        }

        fn unset(key: &str) -> Self {
            let previous = env::var(key).ok();
            env::remove_var(key);
            Self {
                key: key.to_string(),
                previous,
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.previous {
                Some(value) => env::set_var(&self.key, value),
                None => env::remove_var(&self.key),
            }
        }
    }

    #[test]
    #[serial]
    fn memory_backend_needs_no_database_url() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _backend = EnvGuard::set("TICKET_STORE_BACKEND", "memory");
        let _db = EnvGuard::unset("TICKET_DB_URL");
        let _db2 = EnvGuard::unset("DATABASE_URL");
        let _team = EnvGuard::unset("TEAM_DIRECTORY_PATH");

        let config = ServiceConfig::from_env().expect("config");
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(config.queue_max_attempts, 3);
        assert!(config.auto_ack_enabled);
    }

    #[test]
    #[serial]
    fn postgres_backend_requires_database_url() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _backend = EnvGuard::set("TICKET_STORE_BACKEND", "postgres");
        let _db = EnvGuard::unset("TICKET_DB_URL");
        let _db2 = EnvGuard::unset("DATABASE_URL");

        assert!(ServiceConfig::from_env().is_err());
    }

    #[test]
    #[serial]
    fn team_directory_loads_from_configured_toml() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let temp = tempfile::TempDir::new().expect("tempdir");
        let path = temp.path().join("team.toml");
        std::fs::write(
            &path,
            r#"
brand = "Acme Notes"

[[members]]
id = "pat"
name = "Pat"
email = "pat@acme.test"
role = "support"
"#,
        )
        .expect("write team.toml");

        let _backend = EnvGuard::set("TICKET_STORE_BACKEND", "memory");
        let _team = EnvGuard::set("TEAM_DIRECTORY_PATH", path.to_str().unwrap());

        let config = ServiceConfig::from_env().expect("config");
        assert_eq!(config.team_directory.brand, "Acme Notes");
        assert_eq!(config.team_directory.assignable_ids(), vec!["pat"]);
    }
}
