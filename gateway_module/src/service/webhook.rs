use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};
use tokio::task;
use uuid::Uuid;

use mail_graph_module::{MailContent, MailProvider};
use triage_module::TriageModel;

use crate::classification_queue::{ClassificationJob, ClassificationQueue, JobMode};
use crate::dedup_store::DedupClaimStore;
use crate::ticket::{
    Message, MessageDirection, Ticket, TicketCategory, TicketPriority, TicketSource,
    TicketStatus, TicketUpdate,
};
use crate::ticket_store::{TicketStore, TicketStoreError};

use super::ack::{auto_ack_body, display_name, escape_html};
use super::state::AppState;
use super::BoxError;

#[derive(Debug, Deserialize)]
pub(super) struct ValidationParams {
    #[serde(rename = "validationToken")]
    pub validation_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct ChangeNotificationBatch {
    #[serde(default)]
    pub value: Vec<ChangeNotification>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ChangeNotification {
    #[serde(default)]
    pub client_state: Option<String>,
    #[serde(default)]
    pub resource_data: Option<ResourceData>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ResourceData {
    #[serde(default)]
    pub id: Option<String>,
}

/// Provider webhook endpoint.
///
/// Handles the subscription-validation handshake (echo the token) and
/// change-notification batches. The transport answer is always 202: the
/// provider retries aggressively on slow or failing responses, redelivery
/// is harmless thanks to the dedup claim, and retry storms are not.
pub(super) async fn receive_notifications(
    State(state): State<AppState>,
    Query(params): Query<ValidationParams>,
    body: Bytes,
) -> Response {
    if let Some(token) = params.validation_token {
        return (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain")],
            token,
        )
            .into_response();
    }

    let batch: ChangeNotificationBatch = match serde_json::from_slice(&body) {
        Ok(batch) => batch,
        Err(err) => {
            warn!("unparseable webhook payload: {}", err);
            ChangeNotificationBatch::default()
        }
    };

    let join = task::spawn_blocking(move || process_notifications(&state, batch)).await;
    if let Err(err) = join {
        error!("webhook processing task failed: {}", err);
    }

    (StatusCode::ACCEPTED, Json(json!({"status": "accepted"}))).into_response()
}

#[derive(Debug, PartialEq, Eq)]
pub(super) enum ItemOutcome {
    Skipped(&'static str),
    TicketCreated(Uuid),
    ReplyAppended(Uuid),
}

pub(super) fn process_notifications(state: &AppState, batch: ChangeNotificationBatch) {
    for notification in &batch.value {
        match process_change_item(state, notification) {
            Ok(ItemOutcome::Skipped(reason)) => {
                info!("webhook item skipped: {}", reason);
            }
            Ok(ItemOutcome::TicketCreated(ticket_id)) => {
                info!("created ticket {}", ticket_id);
            }
            Ok(ItemOutcome::ReplyAppended(ticket_id)) => {
                info!("appended reply to existing ticket {}", ticket_id);
            }
            Err(err) => {
                // Item errors never abort the batch; the transport layer
                // acknowledges regardless.
                error!("webhook item error: {}", err);
            }
        }
    }
}

pub(super) fn process_change_item(
    state: &AppState,
    notification: &ChangeNotification,
) -> Result<ItemOutcome, BoxError> {
    let Some(message_id) = notification
        .resource_data
        .as_ref()
        .and_then(|resource| resource.id.as_deref())
        .map(str::trim)
        .filter(|id| !id.is_empty())
    else {
        return Ok(ItemOutcome::Skipped("missing_resource_id"));
    };

    if notification.client_state.as_deref() != Some(state.config.webhook_secret.as_str()) {
        warn!("invalid client state, skipping notification");
        return Ok(ItemOutcome::Skipped("client_state_mismatch"));
    }

    // At-most-once: only the first claimant of this provider message id may
    // produce side effects.
    if !state.dedup.claim(message_id)? {
        info!("skipping duplicate notification for message {}", message_id);
        return Ok(ItemOutcome::Skipped("duplicate"));
    }

    let mail = state.mail.fetch_message(message_id)?;
    let sender = mail.from.trim().to_ascii_lowercase();
    if is_system_sender(&sender, &state.config.mailbox_address) {
        info!("skipping system sender: {}", mail.from);
        return Ok(ItemOutcome::Skipped("system_sender"));
    }

    let existing = match non_empty(&mail.conversation_id) {
        Some(conversation_id) => state.store.get_ticket_by_conversation_id(conversation_id)?,
        None => None,
    };

    match existing {
        Some(ticket) => append_reply(state, &ticket, &mail, message_id),
        None => create_ticket(state, &mail, message_id),
    }
}

fn append_reply(
    state: &AppState,
    ticket: &Ticket,
    mail: &MailContent,
    provider_message_id: &str,
) -> Result<ItemOutcome, BoxError> {
    let message = Message {
        id: Uuid::new_v4(),
        ticket_id: ticket.id,
        direction: MessageDirection::Inbound,
        body: mail.body.clone(),
        html_body: non_empty(&mail.html_body).map(str::to_string),
        translated_body: None,
        from: mail.from.clone(),
        to: None,
        provider_message_id: Some(provider_message_id.to_string()),
        created_at: Utc::now(),
    };
    state.store.append_message(&message)?;

    // A fresh customer reply demands attention again; it also becomes the
    // threading anchor for future outbound replies.
    let reopen = matches!(
        ticket.status,
        TicketStatus::Waiting | TicketStatus::Resolved | TicketStatus::Closed
    );
    state.store.update_ticket(
        &ticket.id,
        &TicketUpdate {
            status: reopen.then_some(TicketStatus::Open),
            provider_message_id: Some(provider_message_id.to_string()),
            ..Default::default()
        },
    )?;

    state.queue.enqueue(&ClassificationJob {
        ticket_id: ticket.id,
        subject: ticket.subject.clone(),
        body: mail.body.clone(),
        from: mail.from.clone(),
        mode: JobMode::Update,
        message_id: message.id,
        language: Some(ticket.language.clone()),
    })?;

    Ok(ItemOutcome::ReplyAppended(ticket.id))
}

fn create_ticket(
    state: &AppState,
    mail: &MailContent,
    provider_message_id: &str,
) -> Result<ItemOutcome, BoxError> {
    let now = Utc::now();
    let source = if mail.body.starts_with("MOBILE:") {
        TicketSource::Mobile
    } else {
        TicketSource::Email
    };

    // Pre-detect the language so the auto-ack can be localized before the
    // full pipeline runs; best-effort with an English fallback.
    let detected_language = match state
        .model
        .detect_language(&mail.subject, &mail.body, &mail.from)
    {
        Ok(language) => language,
        Err(err) => {
            error!("language detection failed, defaulting to en: {}", err);
            "en".to_string()
        }
    };

    let ticket = Ticket {
        id: Uuid::new_v4(),
        subject: mail.subject.clone(),
        from: mail.from.clone(),
        from_email: mail.from.clone(),
        status: TicketStatus::Open,
        // Provisional defaults; the classification worker refines them.
        priority: TicketPriority::Medium,
        category: TicketCategory::GeneralHowTo,
        tags: Vec::new(),
        language: detected_language.clone(),
        summary: None,
        translated_subject: None,
        translated_body: None,
        assignee_id: None,
        draft_reply: None,
        last_reply_source: None,
        last_reply_at: None,
        conversation_id: non_empty(&mail.conversation_id).map(str::to_string),
        provider_message_id: Some(provider_message_id.to_string()),
        source,
        created_at: now,
        updated_at: now,
    };

    match state.store.put_ticket(&ticket) {
        Ok(()) => {}
        // Another gateway instance created the conversation between our
        // lookup and this insert; fold into the existing thread instead.
        Err(TicketStoreError::ConversationConflict(_)) => {
            let conversation_id = ticket.conversation_id.as_deref().unwrap_or_default();
            let existing = state
                .store
                .get_ticket_by_conversation_id(conversation_id)?
                .ok_or_else(|| format!("conversation {} vanished mid-claim", conversation_id))?;
            return append_reply(state, &existing, mail, provider_message_id);
        }
        Err(err) => return Err(err.into()),
    }

    let message = Message {
        id: Uuid::new_v4(),
        ticket_id: ticket.id,
        direction: MessageDirection::Inbound,
        body: mail.body.clone(),
        html_body: non_empty(&mail.html_body).map(str::to_string),
        translated_body: None,
        from: mail.from.clone(),
        to: None,
        provider_message_id: Some(provider_message_id.to_string()),
        created_at: now,
    };
    state.store.append_message(&message)?;

    if state.config.auto_ack_enabled {
        let name = escape_html(&display_name(&mail.from, mail.from_name.as_deref()));
        let ack = auto_ack_body(&name, &detected_language, &state.config.team_directory.brand);
        if let Err(err) = state.mail.send_reply(provider_message_id, &ack) {
            // Best-effort side channel; ticket creation stands.
            error!("failed auto-ack for message {}: {}", provider_message_id, err);
        }
    }

    state.queue.enqueue(&ClassificationJob {
        ticket_id: ticket.id,
        subject: mail.subject.clone(),
        body: mail.body.clone(),
        from: mail.from.clone(),
        mode: JobMode::New,
        message_id: message.id,
        language: None,
    })?;

    Ok(ItemOutcome::TicketCreated(ticket.id))
}

fn is_system_sender(sender: &str, mailbox_address: &str) -> bool {
    sender == mailbox_address
        || sender.contains("mailer-daemon")
        || sender.contains("postmaster")
        || sender.contains("no-reply")
        || sender.contains("noreply")
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classification_queue::ClassificationQueue;
    use crate::service::test_support::{notification, test_state, TestHarness};
    use crate::ticket_store::test_fixtures::sample_ticket;

    #[test]
    fn new_conversation_creates_ticket_message_ack_and_job() {
        let TestHarness {
            state,
            store,
            queue,
            mail,
            ..
        } = test_state();
        mail.add_message("graph-1", "conv-9", "Help", "I need a refund\n\nBest,\nA", "a@x.com");

        let outcome =
            process_change_item(&state, &notification("graph-1", "maildesk-webhook-secret"))
                .expect("process");
        let ticket_id = match outcome {
            ItemOutcome::TicketCreated(id) => id,
            other => panic!("expected ticket creation, got {:?}", other),
        };

        let ticket = store.get_ticket(&ticket_id).expect("get").expect("ticket");
        assert_eq!(ticket.status, TicketStatus::Open);
        assert_eq!(ticket.priority, TicketPriority::Medium);
        assert_eq!(ticket.category, TicketCategory::GeneralHowTo);
        assert_eq!(ticket.language, "en");
        assert_eq!(ticket.conversation_id.as_deref(), Some("conv-9"));
        assert_eq!(ticket.source, TicketSource::Email);

        let messages = store.get_messages(&ticket_id).expect("messages");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].direction, MessageDirection::Inbound);
        assert_eq!(messages[0].provider_message_id.as_deref(), Some("graph-1"));

        // One localized auto-ack attempt threaded on the inbound message.
        let sent = mail.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "graph-1");
        assert!(sent[0].1.contains("Hello A"));

        let job = queue.claim_next().expect("claim").expect("job");
        assert_eq!(job.job.mode, JobMode::New);
        assert_eq!(job.job.ticket_id, ticket_id);
        assert_eq!(job.job.message_id, messages[0].id);
    }

    #[test]
    fn replayed_notification_is_idempotent() {
        let TestHarness {
            state,
            store,
            queue,
            mail,
            ..
        } = test_state();
        mail.add_message("graph-1", "conv-9", "Help", "body", "a@x.com");

        let first = process_change_item(&state, &notification("graph-1", "maildesk-webhook-secret"))
            .expect("first");
        assert!(matches!(first, ItemOutcome::TicketCreated(_)));

        let second =
            process_change_item(&state, &notification("graph-1", "maildesk-webhook-secret"))
                .expect("second");
        assert_eq!(second, ItemOutcome::Skipped("duplicate"));

        assert_eq!(store.list_all_tickets().expect("list").len(), 1);
        assert_eq!(queue.pending_len(), 1);
        assert_eq!(mail.sent().len(), 1);
    }

    #[test]
    fn reply_to_waiting_ticket_reopens_and_enqueues_update() {
        let TestHarness {
            state,
            store,
            queue,
            mail,
            ..
        } = test_state();

        let mut existing = sample_ticket(Some("conv-9"));
        existing.status = TicketStatus::Waiting;
        existing.language = "de".to_string();
        store.put_ticket(&existing).expect("seed");
        mail.add_message("graph-2", "conv-9", "Re: Help", "Noch ein Problem", "a@x.com");

        let outcome =
            process_change_item(&state, &notification("graph-2", "maildesk-webhook-secret"))
                .expect("process");
        assert_eq!(outcome, ItemOutcome::ReplyAppended(existing.id));

        let ticket = store
            .get_ticket(&existing.id)
            .expect("get")
            .expect("ticket");
        assert_eq!(ticket.status, TicketStatus::Open);
        // Future outbound replies thread on the newest inbound message.
        assert_eq!(ticket.provider_message_id.as_deref(), Some("graph-2"));

        let job = queue.claim_next().expect("claim").expect("job");
        assert_eq!(job.job.mode, JobMode::Update);
        assert_eq!(job.job.language.as_deref(), Some("de"));
        assert_eq!(job.job.subject, existing.subject);

        // Follow-ups get no auto-ack.
        assert!(mail.sent().is_empty());
    }

    #[test]
    fn bad_client_state_skips_without_side_effects() {
        let TestHarness {
            state,
            store,
            queue,
            mail,
            ..
        } = test_state();
        mail.add_message("graph-1", "conv-9", "Help", "body", "a@x.com");

        let outcome = process_change_item(&state, &notification("graph-1", "wrong-secret"))
            .expect("process");
        assert_eq!(outcome, ItemOutcome::Skipped("client_state_mismatch"));
        assert!(store.list_all_tickets().expect("list").is_empty());
        assert_eq!(queue.pending_len(), 0);

        // The id was never claimed, so the correct secret can still land it.
        let retried =
            process_change_item(&state, &notification("graph-1", "maildesk-webhook-secret"))
                .expect("retry");
        assert!(matches!(retried, ItemOutcome::TicketCreated(_)));
    }

    #[test]
    fn system_senders_never_become_tickets() {
        let TestHarness {
            state,
            store,
            mail,
            ..
        } = test_state();
        mail.add_message(
            "graph-3",
            "conv-3",
            "Delivery failure",
            "bounced",
            "MAILER-DAEMON@example.com",
        );
        mail.add_message("graph-4", "conv-4", "Auto", "loop", "support@notely.app");

        for id in ["graph-3", "graph-4"] {
            let outcome = process_change_item(&state, &notification(id, "maildesk-webhook-secret"))
                .expect("process");
            assert_eq!(outcome, ItemOutcome::Skipped("system_sender"));
        }
        assert!(store.list_all_tickets().expect("list").is_empty());
    }

    #[test]
    fn ack_failure_does_not_abort_ticket_creation() {
        let TestHarness {
            state,
            store,
            queue,
            mail,
            ..
        } = test_state();
        mail.add_message("graph-1", "conv-9", "Help", "body", "a@x.com");
        mail.fail_sends();

        let outcome =
            process_change_item(&state, &notification("graph-1", "maildesk-webhook-secret"))
                .expect("process");
        assert!(matches!(outcome, ItemOutcome::TicketCreated(_)));
        assert_eq!(store.list_all_tickets().expect("list").len(), 1);
        assert_eq!(queue.pending_len(), 1);
    }

    #[test]
    fn auto_ack_is_localized_to_the_detected_language() {
        let TestHarness {
            state,
            store,
            mail,
            model,
            ..
        } = test_state();
        model.set_detected_language("de");
        mail.add_message("graph-6", "conv-6", "Hilfe", "Meine Karten fehlen", "max@x.com");

        let outcome =
            process_change_item(&state, &notification("graph-6", "maildesk-webhook-secret"))
                .expect("process");
        let ItemOutcome::TicketCreated(ticket_id) = outcome else {
            panic!("expected creation");
        };
        let ticket = store.get_ticket(&ticket_id).expect("get").expect("ticket");
        assert_eq!(ticket.language, "de");

        let sent = mail.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.starts_with("Hallo Max"));
    }

    #[test]
    fn mobile_marker_sets_source() {
        let TestHarness { state, store, mail, .. } = test_state();
        mail.add_message("graph-5", "conv-5", "App issue", "MOBILE: crash on open", "a@x.com");

        let outcome =
            process_change_item(&state, &notification("graph-5", "maildesk-webhook-secret"))
                .expect("process");
        let ItemOutcome::TicketCreated(ticket_id) = outcome else {
            panic!("expected creation");
        };
        let ticket = store.get_ticket(&ticket_id).expect("get").expect("ticket");
        assert_eq!(ticket.source, TicketSource::Mobile);
    }

    #[tokio::test]
    async fn validation_handshake_echoes_token() {
        let TestHarness { state, .. } = test_state();
        let response = receive_notifications(
            State(state),
            Query(ValidationParams {
                validation_token: Some("echo-me".to_string()),
            }),
            Bytes::new(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .expect("body");
        assert_eq!(&body[..], b"echo-me");
    }

    #[tokio::test]
    async fn garbage_payload_still_returns_accepted() {
        let TestHarness { state, .. } = test_state();
        let response = receive_notifications(
            State(state),
            Query(ValidationParams {
                validation_token: None,
            }),
            Bytes::from_static(b"not json"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }
}
