use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_LEASE: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("postgres error: {0}")]
    Postgres(#[from] postgres::Error),
    #[error("pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("queue lock poisoned")]
    LockPoisoned,
    #[error("queue config error: {0}")]
    Config(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    New,
    Update,
}

/// One unit of AI work. Carries enough context for the worker to triage a
/// fresh ticket or re-summarize an ongoing thread without re-reading the
/// inbound payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationJob {
    pub ticket_id: Uuid,
    pub subject: String,
    pub body: String,
    pub from: String,
    pub mode: JobMode,
    /// The message this job should enrich (translation back-fill target).
    pub message_id: Uuid,
    /// Current ticket language, supplied for update-mode jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub id: Uuid,
    pub job: ClassificationJob,
    pub attempt: i32,
}

#[derive(Debug, Clone)]
pub struct DeadLetterJob {
    pub id: Uuid,
    pub job: ClassificationJob,
    pub attempts: i32,
    pub last_error: Option<String>,
}

/// At-least-once work queue with per-job leases. A claimed job that is
/// neither marked done nor failed is redelivered after the lease expires;
/// after `max_attempts` deliveries it lands on the dead-letter path and is
/// never claimed again.
pub trait ClassificationQueue: Send + Sync {
    fn enqueue(&self, job: &ClassificationJob) -> Result<(), QueueError>;
    fn claim_next(&self) -> Result<Option<QueuedJob>, QueueError>;
    fn mark_done(&self, id: &Uuid) -> Result<(), QueueError>;
    fn mark_failed(&self, id: &Uuid, error: &str) -> Result<(), QueueError>;
    fn dead_letters(&self) -> Result<Vec<DeadLetterJob>, QueueError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    Pending,
    Processing,
}

struct QueueEntry {
    id: Uuid,
    job: ClassificationJob,
    state: EntryState,
    attempts: i32,
    available_at: Instant,
    locked_at: Option<Instant>,
}

/// In-process queue for tests and single-node development. Mirrors the
/// durable backend's contract: leases, linear backoff, bounded attempts,
/// dead-letter terminal state.
pub struct MemoryClassificationQueue {
    entries: Mutex<VecDeque<QueueEntry>>,
    dead: Mutex<Vec<DeadLetterJob>>,
    lease: Duration,
    backoff_step: Duration,
    max_attempts: i32,
}

impl MemoryClassificationQueue {
    pub fn new() -> Self {
        Self::with_timing(DEFAULT_LEASE, Duration::from_secs(5), DEFAULT_MAX_ATTEMPTS)
    }

    pub fn with_timing(lease: Duration, backoff_step: Duration, max_attempts: i32) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            dead: Mutex::new(Vec::new()),
            lease,
            backoff_step,
            max_attempts,
        }
    }

    pub fn pending_len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }
}

impl Default for MemoryClassificationQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassificationQueue for MemoryClassificationQueue {
    fn enqueue(&self, job: &ClassificationJob) -> Result<(), QueueError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| QueueError::LockPoisoned)?;
        entries.push_back(QueueEntry {
            id: Uuid::new_v4(),
            job: job.clone(),
            state: EntryState::Pending,
            attempts: 0,
            available_at: Instant::now(),
            locked_at: None,
        });
        Ok(())
    }

    fn claim_next(&self) -> Result<Option<QueuedJob>, QueueError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| QueueError::LockPoisoned)?;
        let now = Instant::now();
        let claimable = entries.iter_mut().find(|entry| match entry.state {
            EntryState::Pending => entry.available_at <= now,
            EntryState::Processing => entry
                .locked_at
                .map(|locked_at| now.duration_since(locked_at) >= self.lease)
                .unwrap_or(true),
        });
        let Some(entry) = claimable else {
            return Ok(None);
        };
        entry.state = EntryState::Processing;
        entry.locked_at = Some(now);
        entry.attempts += 1;
        Ok(Some(QueuedJob {
            id: entry.id,
            job: entry.job.clone(),
            attempt: entry.attempts,
        }))
    }

    fn mark_done(&self, id: &Uuid) -> Result<(), QueueError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| QueueError::LockPoisoned)?;
        entries.retain(|entry| entry.id != *id);
        Ok(())
    }

    fn mark_failed(&self, id: &Uuid, error: &str) -> Result<(), QueueError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| QueueError::LockPoisoned)?;
        let Some(position) = entries.iter().position(|entry| entry.id == *id) else {
            return Ok(());
        };
        let entry = &mut entries[position];
        if entry.attempts >= self.max_attempts {
            let entry = entries.remove(position).expect("checked position");
            let mut dead = self.dead.lock().map_err(|_| QueueError::LockPoisoned)?;
            dead.push(DeadLetterJob {
                id: entry.id,
                job: entry.job,
                attempts: entry.attempts,
                last_error: Some(error.to_string()),
            });
        } else {
            let backoff = self.backoff_step * entry.attempts.max(1) as u32;
            entry.state = EntryState::Pending;
            entry.locked_at = None;
            entry.available_at = Instant::now() + backoff;
        }
        Ok(())
    }

    fn dead_letters(&self) -> Result<Vec<DeadLetterJob>, QueueError> {
        let dead = self.dead.lock().map_err(|_| QueueError::LockPoisoned)?;
        Ok(dead.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job(mode: JobMode) -> ClassificationJob {
        ClassificationJob {
            ticket_id: Uuid::new_v4(),
            subject: "Help".to_string(),
            body: "I need a refund".to_string(),
            from: "a@x.com".to_string(),
            mode,
            message_id: Uuid::new_v4(),
            language: None,
        }
    }

    fn fast_queue(max_attempts: i32) -> MemoryClassificationQueue {
        MemoryClassificationQueue::with_timing(
            Duration::from_secs(300),
            Duration::ZERO,
            max_attempts,
        )
    }

    #[test]
    fn enqueue_claim_done_roundtrip() {
        let queue = fast_queue(3);
        queue.enqueue(&sample_job(JobMode::New)).expect("enqueue");

        let claimed = queue.claim_next().expect("claim").expect("job");
        assert_eq!(claimed.attempt, 1);
        assert_eq!(claimed.job.mode, JobMode::New);
        // Leased job is invisible to other consumers.
        assert!(queue.claim_next().expect("claim").is_none());

        queue.mark_done(&claimed.id).expect("done");
        assert_eq!(queue.pending_len(), 0);
    }

    #[test]
    fn failed_job_is_redelivered_then_dead_lettered() {
        let queue = fast_queue(2);
        queue.enqueue(&sample_job(JobMode::Update)).expect("enqueue");

        let first = queue.claim_next().expect("claim").expect("job");
        queue.mark_failed(&first.id, "model timeout").expect("fail");

        let second = queue.claim_next().expect("claim").expect("job");
        assert_eq!(second.id, first.id);
        assert_eq!(second.attempt, 2);
        queue.mark_failed(&second.id, "model timeout").expect("fail");

        // Attempts exhausted: nothing left to claim, job parked for triage.
        assert!(queue.claim_next().expect("claim").is_none());
        let dead = queue.dead_letters().expect("dead letters");
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, 2);
        assert_eq!(dead[0].last_error.as_deref(), Some("model timeout"));
    }

    #[test]
    fn lease_expiry_makes_job_claimable_again() {
        let queue = MemoryClassificationQueue::with_timing(Duration::ZERO, Duration::ZERO, 3);
        queue.enqueue(&sample_job(JobMode::New)).expect("enqueue");

        let first = queue.claim_next().expect("claim").expect("job");
        // Zero lease: the abandoned claim is immediately redeliverable.
        let second = queue.claim_next().expect("claim").expect("job");
        assert_eq!(first.id, second.id);
        assert_eq!(second.attempt, 2);
    }

    #[test]
    fn job_schema_round_trips() {
        let job = ClassificationJob {
            language: Some("de".to_string()),
            ..sample_job(JobMode::Update)
        };
        let json = serde_json::to_string(&job).expect("serialize");
        assert!(json.contains("\"mode\":\"update\""));
        let parsed: ClassificationJob = serde_json::from_str(&json).expect("parse");
        assert_eq!(parsed.language.as_deref(), Some("de"));
        assert_eq!(parsed.ticket_id, job.ticket_id);
    }
}
