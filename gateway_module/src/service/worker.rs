use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{error, info, warn};

use triage_module::{ThreadDirection, ThreadEntry, TriageModel};

use crate::classification_queue::{ClassificationJob, ClassificationQueue, JobMode, QueuedJob};
use crate::ticket::{MessageDirection, TicketStatus, TicketTag, TicketUpdate};
use crate::ticket_store::TicketStore;

use super::BoxError;

pub struct WorkerControl {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl WorkerControl {
    pub fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Consume classification jobs one at a time. Model calls run for tens of
/// seconds, so single-item claims keep a stuck job from blocking siblings
/// beyond its lease.
pub fn spawn_classification_worker(
    store: Arc<dyn TicketStore>,
    model: Arc<dyn TriageModel>,
    queue: Arc<dyn ClassificationQueue>,
    poll_interval: Duration,
) -> WorkerControl {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();

    let handle = thread::spawn(move || {
        info!("classification worker started");
        while !stop_flag.load(Ordering::SeqCst) {
            match queue.claim_next() {
                Ok(Some(claimed)) => {
                    handle_claimed(store.as_ref(), model.as_ref(), queue.as_ref(), claimed);
                }
                Ok(None) => {
                    thread::sleep(poll_interval);
                }
                Err(err) => {
                    warn!("classification queue claim error: {}", err);
                    thread::sleep(poll_interval);
                }
            }
        }
        info!("classification worker stopped");
    });

    WorkerControl {
        stop,
        handle: Some(handle),
    }
}

fn handle_claimed(
    store: &dyn TicketStore,
    model: &dyn TriageModel,
    queue: &dyn ClassificationQueue,
    claimed: QueuedJob,
) {
    match process_job(store, model, &claimed.job) {
        Ok(()) => {
            if let Err(err) = queue.mark_done(&claimed.id) {
                warn!("failed to mark job {} done: {}", claimed.id, err);
            }
        }
        Err(err) => {
            // Always propagate into the queue so redelivery/backoff applies
            // and exhausted jobs land on the dead-letter path.
            error!(
                "failed to process ticket {} (attempt {}): {}",
                claimed.job.ticket_id, claimed.attempt, err
            );
            if let Err(mark_err) = queue.mark_failed(&claimed.id, &err.to_string()) {
                warn!("failed to mark job {} failed: {}", claimed.id, mark_err);
            }
        }
    }
}

pub fn process_job(
    store: &dyn TicketStore,
    model: &dyn TriageModel,
    job: &ClassificationJob,
) -> Result<(), BoxError> {
    match job.mode {
        JobMode::Update => process_update(store, model, job),
        JobMode::New => process_new(store, model, job),
    }
}

/// Follow-up message: re-summarize the whole thread, translate only the
/// newest inbound message. Never touches status or any other
/// first-classification field.
fn process_update(
    store: &dyn TicketStore,
    model: &dyn TriageModel,
    job: &ClassificationJob,
) -> Result<(), BoxError> {
    info!("updating summary for ticket {}", job.ticket_id);

    let messages = store.get_messages(&job.ticket_id)?;
    let ticket_language = job
        .language
        .clone()
        .filter(|language| !language.is_empty())
        .unwrap_or_else(|| "en".to_string());

    let thread: Vec<ThreadEntry> = messages
        .iter()
        .map(|message| ThreadEntry {
            direction: match message.direction {
                MessageDirection::Inbound => ThreadDirection::Inbound,
                MessageDirection::Outbound => ThreadDirection::Outbound,
            },
            from: message.from.clone(),
            body: message.body.clone(),
        })
        .collect();

    let result = model.update_summary(&thread, &job.subject, &ticket_language)?;

    store.update_ticket(
        &job.ticket_id,
        &TicketUpdate {
            summary: Some(result.summary),
            translated_body: Some(result.translated_body.clone()),
            ..Default::default()
        },
    )?;

    if ticket_language != "en" && !result.translated_body.trim().is_empty() {
        store.set_message_translation(&job.ticket_id, &job.message_id, &result.translated_body)?;
    }

    Ok(())
}

/// First classification: the only worker path allowed to write status.
fn process_new(
    store: &dyn TicketStore,
    model: &dyn TriageModel,
    job: &ClassificationJob,
) -> Result<(), BoxError> {
    info!("processing ticket {}: \"{}\"", job.ticket_id, job.subject);

    let result = model.classify_and_draft(&job.subject, &job.body, &job.from)?;
    info!(
        "classified ticket {}: category={}, priority={}, lang={}, assignee={}",
        job.ticket_id, result.category, result.priority, result.language, result.suggested_assignee
    );

    let category = result.category.parse().map_err(BoxError::from)?;
    let priority = result.priority.parse().map_err(BoxError::from)?;
    let (status, tags) = if result.should_auto_close {
        (
            TicketStatus::Closed,
            vec![TicketTag::AiProcessed, TicketTag::AutoClosed],
        )
    } else {
        (
            TicketStatus::Open,
            vec![TicketTag::AiProcessed, TicketTag::AiDraft],
        )
    };

    store.update_ticket(
        &job.ticket_id,
        &TicketUpdate {
            category: Some(category),
            priority: Some(priority),
            language: Some(result.language.clone()),
            summary: Some(result.summary),
            translated_subject: Some(result.translated_subject),
            translated_body: Some(result.translated_body.clone()),
            assignee_id: Some(Some(result.suggested_assignee)),
            draft_reply: Some(result.draft_reply),
            tags: Some(tags),
            status: Some(status),
            ..Default::default()
        },
    )?;

    if result.language != "en" && !result.translated_body.trim().is_empty() {
        store.set_message_translation(&job.ticket_id, &job.message_id, &result.translated_body)?;
    }

    if result.should_auto_close {
        info!("updated ticket {} (auto-closed)", job.ticket_id);
    } else {
        info!("updated ticket {}", job.ticket_id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use chrono::Utc;
    use triage_module::ClassificationResult;

    use super::*;
    use crate::service::test_support::test_state;
    use crate::ticket::{TicketCategory, TicketPriority};
    use crate::ticket_store::test_fixtures::{inbound_message, sample_ticket};

    fn seeded_job(harness: &crate::service::test_support::TestHarness, mode: JobMode) -> ClassificationJob {
        let ticket = sample_ticket(Some("conv-1"));
        harness.store.put_ticket(&ticket).expect("seed ticket");
        let message = inbound_message(ticket.id, "Ich brauche eine Rückerstattung", Utc::now());
        harness.store.append_message(&message).expect("seed message");
        ClassificationJob {
            ticket_id: ticket.id,
            subject: ticket.subject.clone(),
            body: message.body.clone(),
            from: ticket.from.clone(),
            mode,
            message_id: message.id,
            language: Some(ticket.language.clone()),
        }
    }

    #[test]
    fn new_mode_commits_full_classification() {
        let harness = test_state();
        let job = seeded_job(&harness, JobMode::New);
        harness.model.set_classification(ClassificationResult {
            category: "refund_request".to_string(),
            priority: "high".to_string(),
            language: "de".to_string(),
            summary: "Refund request.".to_string(),
            translated_subject: "Refund".to_string(),
            translated_body: "I need a refund".to_string(),
            suggested_assignee: "mara".to_string(),
            draft_reply: "Hallo!".to_string(),
            should_auto_close: false,
        });

        process_job(harness.store.as_ref(), harness.model.as_ref(), &job).expect("process");

        let ticket = harness
            .store
            .get_ticket(&job.ticket_id)
            .expect("get")
            .expect("ticket");
        assert_eq!(ticket.category, TicketCategory::RefundRequest);
        assert_eq!(ticket.priority, TicketPriority::High);
        assert_eq!(ticket.language, "de");
        assert_eq!(ticket.status, TicketStatus::Open);
        assert_eq!(ticket.assignee_id.as_deref(), Some("mara"));
        assert_eq!(ticket.draft_reply.as_deref(), Some("Hallo!"));
        assert_eq!(
            ticket.tags,
            vec![TicketTag::AiDraft, TicketTag::AiProcessed]
        );

        // Non-English ticket: the originating message gets its translation.
        let messages = harness.store.get_messages(&job.ticket_id).expect("thread");
        assert_eq!(
            messages[0].translated_body.as_deref(),
            Some("I need a refund")
        );
    }

    #[test]
    fn auto_close_sets_closed_status_and_exact_tag_set() {
        let harness = test_state();
        let job = seeded_job(&harness, JobMode::New);
        harness.model.set_classification(ClassificationResult {
            category: "garbage".to_string(),
            priority: "low".to_string(),
            language: "en".to_string(),
            summary: "Spam.".to_string(),
            translated_subject: "Spam".to_string(),
            translated_body: "spam".to_string(),
            suggested_assignee: "mara".to_string(),
            draft_reply: String::new(),
            should_auto_close: true,
        });

        process_job(harness.store.as_ref(), harness.model.as_ref(), &job).expect("process");

        let ticket = harness
            .store
            .get_ticket(&job.ticket_id)
            .expect("get")
            .expect("ticket");
        assert_eq!(ticket.status, TicketStatus::Closed);
        assert_eq!(
            ticket.tags,
            vec![TicketTag::AutoClosed, TicketTag::AiProcessed]
        );
        // English ticket: no translation back-fill.
        let messages = harness.store.get_messages(&job.ticket_id).expect("thread");
        assert!(messages[0].translated_body.is_none());
    }

    #[test]
    fn update_mode_never_touches_status_or_classification_fields() {
        let harness = test_state();
        let mut job = seeded_job(&harness, JobMode::Update);
        job.language = Some("de".to_string());
        harness
            .store
            .update_ticket(
                &job.ticket_id,
                &TicketUpdate {
                    status: Some(TicketStatus::Waiting),
                    priority: Some(TicketPriority::Critical),
                    ..Default::default()
                },
            )
            .expect("agent edit");

        process_job(harness.store.as_ref(), harness.model.as_ref(), &job).expect("process");

        let ticket = harness
            .store
            .get_ticket(&job.ticket_id)
            .expect("get")
            .expect("ticket");
        assert_eq!(ticket.status, TicketStatus::Waiting);
        assert_eq!(ticket.priority, TicketPriority::Critical);
        assert_eq!(ticket.summary.as_deref(), Some("Thread summary so far."));
        assert_eq!(
            ticket.translated_body.as_deref(),
            Some("Latest message in English.")
        );

        let messages = harness.store.get_messages(&job.ticket_id).expect("thread");
        assert_eq!(
            messages[0].translated_body.as_deref(),
            Some("Latest message in English.")
        );
    }

    #[test]
    fn failing_jobs_retry_until_dead_letter() {
        let harness = test_state();
        let job = seeded_job(&harness, JobMode::New);
        harness.model.fail_all();
        harness.queue.enqueue(&job).expect("enqueue");

        while let Some(claimed) = harness.queue.claim_next().expect("claim") {
            handle_claimed(
                harness.store.as_ref(),
                harness.model.as_ref(),
                harness.queue.as_ref(),
                claimed,
            );
        }

        let dead = harness.queue.dead_letters().expect("dead letters");
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, 3);
        assert!(dead[0].last_error.is_some());
    }

    #[test]
    fn worker_thread_drains_queue_end_to_end() {
        let harness = test_state();
        let job = seeded_job(&harness, JobMode::New);
        harness.queue.enqueue(&job).expect("enqueue");

        let mut control = spawn_classification_worker(
            harness.store.clone(),
            harness.model.clone(),
            harness.queue.clone(),
            Duration::from_millis(5),
        );

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let ticket = harness
                .store
                .get_ticket(&job.ticket_id)
                .expect("get")
                .expect("ticket");
            if ticket.tags.contains(&TicketTag::AiProcessed) {
                break;
            }
            assert!(Instant::now() < deadline, "worker did not classify in time");
            thread::sleep(Duration::from_millis(10));
        }
        control.stop_and_join();
        assert_eq!(harness.queue.pending_len(), 0);
    }
}
