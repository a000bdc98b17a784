use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tokio::task;
use tracing::{error, info};
use uuid::Uuid;

use mail_graph_module::MailProvider;
use triage_module::TriageModel;

use crate::ticket::{
    normalize_tags, Message, MessageDirection, ReplySource, Ticket, TicketPriority,
    TicketStatus, TicketTag, TicketUpdate,
};
use crate::ticket_store::{TicketStore, TicketStoreError};

use super::state::AppState;

#[derive(Debug)]
pub(super) enum ApiError {
    NotFound(&'static str),
    BadRequest(String),
    Internal(String),
}

impl From<TicketStoreError> for ApiError {
    fn from(err: TicketStoreError) -> Self {
        match err {
            TicketStoreError::TicketNotFound(_) => ApiError::NotFound("Ticket not found"),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(json!({"error": message}))).into_response()
            }
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({"error": message}))).into_response()
            }
            ApiError::Internal(message) => {
                error!("api error: {}", message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": "Internal server error"})),
                )
                    .into_response()
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct TicketFilterParams {
    pub status: Option<String>,
    pub assignee_id: Option<String>,
    pub search: Option<String>,
}

/// GET /tickets
pub(super) async fn list_tickets(
    State(state): State<AppState>,
    Query(params): Query<TicketFilterParams>,
) -> Response {
    let result = task::spawn_blocking(move || list_tickets_sync(&state, &params)).await;
    match result {
        Ok(Ok(tickets)) => {
            let count = tickets.len();
            (StatusCode::OK, Json(json!({"tickets": tickets, "count": count}))).into_response()
        }
        Ok(Err(err)) => err.into_response(),
        Err(err) => ApiError::Internal(err.to_string()).into_response(),
    }
}

pub(super) fn list_tickets_sync(
    state: &AppState,
    params: &TicketFilterParams,
) -> Result<Vec<Ticket>, ApiError> {
    let mut tickets = if let Some(status) = &params.status {
        let status: TicketStatus = status
            .parse()
            .map_err(|err: String| ApiError::BadRequest(err))?;
        state.store.list_tickets_by_status(status)?
    } else if let Some(assignee_id) = &params.assignee_id {
        state.store.list_tickets_by_assignee(assignee_id)?
    } else {
        state.store.list_all_tickets()?
    };

    // In-memory search filter; a dedicated index service owns real search.
    if let Some(search) = &params.search {
        let needle = search.to_lowercase();
        tickets.retain(|ticket| {
            ticket.subject.to_lowercase().contains(&needle)
                || ticket.from.to_lowercase().contains(&needle)
                || ticket
                    .summary
                    .as_deref()
                    .map(|summary| summary.to_lowercase().contains(&needle))
                    .unwrap_or(false)
        });
    }
    Ok(tickets)
}

/// GET /tickets/{id}
pub(super) async fn get_ticket(
    State(state): State<AppState>,
    Path(ticket_id): Path<Uuid>,
) -> Response {
    let result = task::spawn_blocking(move || -> Result<_, ApiError> {
        let ticket = state
            .store
            .get_ticket(&ticket_id)?
            .ok_or(ApiError::NotFound("Ticket not found"))?;
        let messages = state.store.get_messages(&ticket_id)?;
        Ok((ticket, messages))
    })
    .await;
    match result {
        Ok(Ok((ticket, messages))) => (
            StatusCode::OK,
            Json(json!({"ticket": ticket, "messages": messages})),
        )
            .into_response(),
        Ok(Err(err)) => err.into_response(),
        Err(err) => ApiError::Internal(err.to_string()).into_response(),
    }
}

/// Agent-owned attribute subset; everything else belongs to the gateway or
/// the worker.
#[derive(Debug, Default, Deserialize)]
pub(super) struct AgentTicketUpdate {
    #[serde(default)]
    pub status: Option<TicketStatus>,
    #[serde(default)]
    pub priority: Option<TicketPriority>,
    #[serde(
        default,
        deserialize_with = "crate::ticket::deserialize_clearable_field"
    )]
    pub assignee_id: Option<Option<String>>,
    #[serde(default)]
    pub tags: Option<Vec<TicketTag>>,
}

/// PATCH /tickets/{id}
pub(super) async fn patch_ticket(
    State(state): State<AppState>,
    Path(ticket_id): Path<Uuid>,
    Json(update): Json<AgentTicketUpdate>,
) -> Response {
    let result = task::spawn_blocking(move || patch_ticket_sync(&state, &ticket_id, &update)).await;
    match result {
        Ok(Ok(ticket)) => (StatusCode::OK, Json(json!({"ticket": ticket}))).into_response(),
        Ok(Err(err)) => err.into_response(),
        Err(err) => ApiError::Internal(err.to_string()).into_response(),
    }
}

pub(super) fn patch_ticket_sync(
    state: &AppState,
    ticket_id: &Uuid,
    update: &AgentTicketUpdate,
) -> Result<Ticket, ApiError> {
    state.store.update_ticket(
        ticket_id,
        &TicketUpdate {
            status: update.status,
            priority: update.priority,
            assignee_id: update.assignee_id.clone(),
            tags: update.tags.clone(),
            ..Default::default()
        },
    )?;
    let ticket = state
        .store
        .get_ticket(ticket_id)?
        .ok_or(ApiError::NotFound("Ticket not found"))?;
    Ok(ticket)
}

#[derive(Debug, Deserialize)]
pub(super) struct SendReplyRequest {
    pub body: String,
    #[serde(default)]
    pub reply_source: Option<ReplySource>,
}

/// POST /tickets/{id}/reply
pub(super) async fn send_reply(
    State(state): State<AppState>,
    Path(ticket_id): Path<Uuid>,
    Json(request): Json<SendReplyRequest>,
) -> Response {
    let result = task::spawn_blocking(move || send_reply_sync(&state, &ticket_id, &request)).await;
    match result {
        Ok(Ok((message, ticket))) => (
            StatusCode::OK,
            Json(json!({"message": message, "ticket": ticket})),
        )
            .into_response(),
        Ok(Err(err)) => err.into_response(),
        Err(err) => ApiError::Internal(err.to_string()).into_response(),
    }
}

pub(super) fn send_reply_sync(
    state: &AppState,
    ticket_id: &Uuid,
    request: &SendReplyRequest,
) -> Result<(Message, Ticket), ApiError> {
    if request.body.trim().is_empty() {
        return Err(ApiError::BadRequest("Reply body must not be empty".to_string()));
    }
    let ticket = state
        .store
        .get_ticket(ticket_id)?
        .ok_or(ApiError::NotFound("Ticket not found"))?;

    // Agents write English; the outbound copy goes out in the customer's
    // language. Translation is best-effort: on failure the original text is
    // sent rather than nothing.
    let mut outbound_text = request.body.clone();
    let translated = ticket.language != "en" && !ticket.language.is_empty();
    if translated {
        match state
            .model
            .translate_to_language(&request.body, &ticket.language)
        {
            Ok(text) => outbound_text = text,
            Err(err) => {
                error!("translation failed, sending original text: {}", err);
            }
        }
    }

    let provider_message_id = match &ticket.provider_message_id {
        Some(parent_message_id) => Some(
            state
                .mail
                .send_reply(parent_message_id, &outbound_text)
                .map_err(|err| ApiError::Internal(err.to_string()))?,
        ),
        None => None,
    };

    let message = Message {
        id: Uuid::new_v4(),
        ticket_id: *ticket_id,
        direction: MessageDirection::Outbound,
        body: outbound_text,
        html_body: None,
        // Keep the agent's original English around for reference when the
        // outbound copy was translated.
        translated_body: translated.then(|| request.body.clone()),
        from: state.config.mailbox_address.clone(),
        to: Some(ticket.from_email.clone()),
        provider_message_id,
        created_at: Utc::now(),
    };
    state.store.append_message(&message)?;

    state.store.update_ticket(
        ticket_id,
        &TicketUpdate {
            status: Some(TicketStatus::Waiting),
            last_reply_source: Some(request.reply_source.unwrap_or(ReplySource::Agent)),
            last_reply_at: Some(Utc::now()),
            ..Default::default()
        },
    )?;
    info!("sent reply on ticket {}", ticket_id);

    let refreshed = state
        .store
        .get_ticket(ticket_id)?
        .ok_or(ApiError::NotFound("Ticket not found"))?;
    Ok((message, refreshed))
}

/// POST /tickets/{id}/draft — on-demand draft regeneration.
pub(super) async fn regenerate_draft(
    State(state): State<AppState>,
    Path(ticket_id): Path<Uuid>,
) -> Response {
    let result = task::spawn_blocking(move || regenerate_draft_sync(&state, &ticket_id)).await;
    match result {
        Ok(Ok((draft_reply, ticket))) => (
            StatusCode::OK,
            Json(json!({"draft_reply": draft_reply, "ticket": ticket})),
        )
            .into_response(),
        Ok(Err(err)) => err.into_response(),
        Err(err) => ApiError::Internal(err.to_string()).into_response(),
    }
}

pub(super) fn regenerate_draft_sync(
    state: &AppState,
    ticket_id: &Uuid,
) -> Result<(String, Ticket), ApiError> {
    let ticket = state
        .store
        .get_ticket(ticket_id)?
        .ok_or(ApiError::NotFound("Ticket not found"))?;
    let messages = state.store.get_messages(ticket_id)?;

    let latest_inbound = messages
        .iter()
        .rev()
        .find(|message| message.direction == MessageDirection::Inbound);

    // Fallback chain: latest inbound -> translated body -> summary -> subject.
    let full_body = latest_inbound
        .map(|message| message.body.clone())
        .filter(|body| !body.trim().is_empty())
        .or_else(|| non_empty_opt(ticket.translated_body.clone()))
        .or_else(|| non_empty_opt(ticket.summary.clone()))
        .or_else(|| non_empty_opt(Some(ticket.subject.clone())))
        .unwrap_or_default();

    if full_body.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "Not enough ticket content to draft a response".to_string(),
        ));
    }

    let subject = if ticket.subject.trim().is_empty() {
        "(No subject)".to_string()
    } else {
        ticket.subject.clone()
    };
    let language = if ticket.language.is_empty() {
        "en".to_string()
    } else {
        ticket.language.clone()
    };

    let draft_reply = state
        .model
        .generate_draft_reply(&subject, &full_body, &ticket.from, &language)
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    let mut tags = ticket.tags.clone();
    tags.push(TicketTag::AiDraft);
    state.store.update_ticket(
        ticket_id,
        &TicketUpdate {
            draft_reply: Some(draft_reply.clone()),
            tags: Some(normalize_tags(&tags)),
            ..Default::default()
        },
    )?;

    let refreshed = state
        .store
        .get_ticket(ticket_id)?
        .ok_or(ApiError::NotFound("Ticket not found"))?;
    Ok((draft_reply, refreshed))
}

fn non_empty_opt(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.trim().is_empty())
}
