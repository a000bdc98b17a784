use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use uuid::Uuid;

use crate::ticket::{normalize_tags, Message, Ticket, TicketStatus, TicketUpdate};

#[derive(Debug, thiserror::Error)]
pub enum TicketStoreError {
    #[error("postgres error: {0}")]
    Postgres(#[from] postgres::Error),
    #[error("pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("ticket not found: {0}")]
    TicketNotFound(Uuid),
    #[error("conversation already bound to ticket {0}")]
    ConversationConflict(Uuid),
    #[error("store lock poisoned")]
    LockPoisoned,
    #[error("invalid stored value: {0}")]
    InvalidRow(String),
    #[error("ticket store config error: {0}")]
    Config(String),
}

/// Durable keyed storage for tickets and their message threads.
///
/// Three writer roles share this store (webhook ingest, classification
/// worker, agent API); each commits only the attribute subset it owns via
/// `update_ticket`, so concurrent writers interleave without clobbering.
pub trait TicketStore: Send + Sync {
    fn put_ticket(&self, ticket: &Ticket) -> Result<(), TicketStoreError>;
    fn get_ticket(&self, ticket_id: &Uuid) -> Result<Option<Ticket>, TicketStoreError>;
    fn get_ticket_by_conversation_id(
        &self,
        conversation_id: &str,
    ) -> Result<Option<Ticket>, TicketStoreError>;
    /// Partial update; only the populated fields are written, and
    /// `updated_at` is refreshed on every call.
    fn update_ticket(&self, ticket_id: &Uuid, update: &TicketUpdate)
        -> Result<(), TicketStoreError>;
    fn append_message(&self, message: &Message) -> Result<(), TicketStoreError>;
    /// Messages ordered by (created_at, id) regardless of arrival order.
    fn get_messages(&self, ticket_id: &Uuid) -> Result<Vec<Message>, TicketStoreError>;
    fn set_message_translation(
        &self,
        ticket_id: &Uuid,
        message_id: &Uuid,
        translated_body: &str,
    ) -> Result<(), TicketStoreError>;
    fn list_tickets_by_status(
        &self,
        status: TicketStatus,
    ) -> Result<Vec<Ticket>, TicketStoreError>;
    fn list_tickets_by_assignee(&self, assignee_id: &str)
        -> Result<Vec<Ticket>, TicketStoreError>;
    fn list_all_tickets(&self) -> Result<Vec<Ticket>, TicketStoreError>;
}

pub(crate) fn apply_update(ticket: &mut Ticket, update: &TicketUpdate) {
    if let Some(status) = update.status {
        ticket.status = status;
    }
    if let Some(priority) = update.priority {
        ticket.priority = priority;
    }
    if let Some(category) = update.category {
        ticket.category = category;
    }
    if let Some(language) = &update.language {
        ticket.language = language.clone();
    }
    if let Some(summary) = &update.summary {
        ticket.summary = Some(summary.clone());
    }
    if let Some(translated_subject) = &update.translated_subject {
        ticket.translated_subject = Some(translated_subject.clone());
    }
    if let Some(translated_body) = &update.translated_body {
        ticket.translated_body = Some(translated_body.clone());
    }
    if let Some(assignee_id) = &update.assignee_id {
        ticket.assignee_id = assignee_id.clone();
    }
    if let Some(draft_reply) = &update.draft_reply {
        ticket.draft_reply = Some(draft_reply.clone());
    }
    if let Some(tags) = &update.tags {
        ticket.tags = normalize_tags(tags);
    }
    if let Some(last_reply_source) = update.last_reply_source {
        ticket.last_reply_source = Some(last_reply_source);
    }
    if let Some(last_reply_at) = update.last_reply_at {
        ticket.last_reply_at = Some(last_reply_at);
    }
    if let Some(provider_message_id) = &update.provider_message_id {
        ticket.provider_message_id = Some(provider_message_id.clone());
    }
    ticket.updated_at = Utc::now();
}

/// In-process backend for tests and single-node development.
#[derive(Default)]
pub struct MemoryTicketStore {
    tickets: Mutex<HashMap<Uuid, Ticket>>,
    messages: Mutex<HashMap<Uuid, Vec<Message>>>,
}

impl MemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TicketStore for MemoryTicketStore {
    fn put_ticket(&self, ticket: &Ticket) -> Result<(), TicketStoreError> {
        let mut tickets = self
            .tickets
            .lock()
            .map_err(|_| TicketStoreError::LockPoisoned)?;
        if let Some(conversation_id) = &ticket.conversation_id {
            if let Some(existing) = tickets
                .values()
                .find(|t| t.conversation_id.as_deref() == Some(conversation_id))
            {
                if existing.id != ticket.id {
                    return Err(TicketStoreError::ConversationConflict(existing.id));
                }
            }
        }
        tickets.insert(ticket.id, ticket.clone());
        Ok(())
    }

    fn get_ticket(&self, ticket_id: &Uuid) -> Result<Option<Ticket>, TicketStoreError> {
        let tickets = self
            .tickets
            .lock()
            .map_err(|_| TicketStoreError::LockPoisoned)?;
        Ok(tickets.get(ticket_id).cloned())
    }

    fn get_ticket_by_conversation_id(
        &self,
        conversation_id: &str,
    ) -> Result<Option<Ticket>, TicketStoreError> {
        let tickets = self
            .tickets
            .lock()
            .map_err(|_| TicketStoreError::LockPoisoned)?;
        Ok(tickets
            .values()
            .find(|t| t.conversation_id.as_deref() == Some(conversation_id))
            .cloned())
    }

    fn update_ticket(
        &self,
        ticket_id: &Uuid,
        update: &TicketUpdate,
    ) -> Result<(), TicketStoreError> {
        let mut tickets = self
            .tickets
            .lock()
            .map_err(|_| TicketStoreError::LockPoisoned)?;
        let ticket = tickets
            .get_mut(ticket_id)
            .ok_or(TicketStoreError::TicketNotFound(*ticket_id))?;
        apply_update(ticket, update);
        Ok(())
    }

    fn append_message(&self, message: &Message) -> Result<(), TicketStoreError> {
        let mut messages = self
            .messages
            .lock()
            .map_err(|_| TicketStoreError::LockPoisoned)?;
        messages
            .entry(message.ticket_id)
            .or_default()
            .push(message.clone());
        Ok(())
    }

    fn get_messages(&self, ticket_id: &Uuid) -> Result<Vec<Message>, TicketStoreError> {
        let messages = self
            .messages
            .lock()
            .map_err(|_| TicketStoreError::LockPoisoned)?;
        let mut thread = messages.get(ticket_id).cloned().unwrap_or_default();
        thread.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(thread)
    }

    fn set_message_translation(
        &self,
        ticket_id: &Uuid,
        message_id: &Uuid,
        translated_body: &str,
    ) -> Result<(), TicketStoreError> {
        let mut messages = self
            .messages
            .lock()
            .map_err(|_| TicketStoreError::LockPoisoned)?;
        if let Some(thread) = messages.get_mut(ticket_id) {
            if let Some(message) = thread.iter_mut().find(|m| m.id == *message_id) {
                message.translated_body = Some(translated_body.to_string());
            }
        }
        Ok(())
    }

    fn list_tickets_by_status(
        &self,
        status: TicketStatus,
    ) -> Result<Vec<Ticket>, TicketStoreError> {
        let tickets = self
            .tickets
            .lock()
            .map_err(|_| TicketStoreError::LockPoisoned)?;
        let mut matched: Vec<Ticket> = tickets
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched)
    }

    fn list_tickets_by_assignee(
        &self,
        assignee_id: &str,
    ) -> Result<Vec<Ticket>, TicketStoreError> {
        let tickets = self
            .tickets
            .lock()
            .map_err(|_| TicketStoreError::LockPoisoned)?;
        let mut matched: Vec<Ticket> = tickets
            .values()
            .filter(|t| t.assignee_id.as_deref() == Some(assignee_id))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched)
    }

    fn list_all_tickets(&self) -> Result<Vec<Ticket>, TicketStoreError> {
        let tickets = self
            .tickets
            .lock()
            .map_err(|_| TicketStoreError::LockPoisoned)?;
        let mut all: Vec<Ticket> = tickets.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }
}
