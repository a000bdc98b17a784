use std::env;

use postgres::types::ToSql;
use postgres::Row;
use postgres_native_tls::MakeTlsConnector;
use r2d2::{Pool, PooledConnection};
use r2d2_postgres::PostgresConnectionManager;
use tracing::error;
use uuid::Uuid;

use crate::ticket::{Message, Ticket, TicketStatus, TicketUpdate};
use crate::ticket_store::{TicketStore, TicketStoreError};

/// Logs the underlying connection error instead of r2d2's silent default.
#[derive(Debug)]
struct LoggingErrorHandler;

impl r2d2::HandleError<postgres::Error> for LoggingErrorHandler {
    fn handle_error(&self, err: postgres::Error) {
        error!("postgres connection pool error: {:?}", err);
    }
}

pub struct PostgresTicketStore {
    pool: Pool<PostgresConnectionManager<MakeTlsConnector>>,
    tickets_table: String,
    messages_table: String,
}

impl PostgresTicketStore {
    pub fn from_env() -> Result<Self, TicketStoreError> {
        let db_url = resolve_db_url()?;
        Self::new(&db_url, "tickets", "ticket_messages")
    }

    pub fn new_from_url(db_url: &str) -> Result<Self, TicketStoreError> {
        Self::new(db_url, "tickets", "ticket_messages")
    }

    pub fn new(
        db_url: &str,
        tickets_table: &str,
        messages_table: &str,
    ) -> Result<Self, TicketStoreError> {
        let tickets_table = sanitize_table_name(tickets_table)?;
        let messages_table = sanitize_table_name(messages_table)?;

        let config: postgres::Config = db_url.parse().map_err(TicketStoreError::Postgres)?;
        let tls_connector = native_tls::TlsConnector::builder()
            .build()
            .map_err(|err| TicketStoreError::Config(err.to_string()))?;
        let tls = MakeTlsConnector::new(tls_connector);

        let manager = PostgresConnectionManager::new(config, tls);
        let pool = Pool::builder()
            .max_size(4)
            .idle_timeout(Some(std::time::Duration::from_secs(300)))
            .error_handler(Box::new(LoggingErrorHandler))
            .build(manager)?;
        let store = Self {
            pool,
            tickets_table,
            messages_table,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn connection(
        &self,
    ) -> Result<PooledConnection<PostgresConnectionManager<MakeTlsConnector>>, TicketStoreError>
    {
        Ok(self.pool.get()?)
    }

    fn ensure_schema(&self) -> Result<(), TicketStoreError> {
        let mut conn = self.connection()?;
        let statement = format!(
            "CREATE TABLE IF NOT EXISTS {tickets} (
                id UUID PRIMARY KEY,
                subject TEXT NOT NULL,
                from_addr TEXT NOT NULL,
                from_email TEXT NOT NULL,
                status TEXT NOT NULL,
                priority TEXT NOT NULL,
                category TEXT NOT NULL,
                tags TEXT[] NOT NULL DEFAULT '{{}}',
                language TEXT NOT NULL,
                summary TEXT,
                translated_subject TEXT,
                translated_body TEXT,
                assignee_id TEXT,
                draft_reply TEXT,
                last_reply_source TEXT,
                last_reply_at TIMESTAMPTZ,
                conversation_id TEXT,
                provider_message_id TEXT,
                source TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS {tickets}_conversation_idx
                ON {tickets}(conversation_id) WHERE conversation_id IS NOT NULL;
            CREATE INDEX IF NOT EXISTS {tickets}_status_idx
                ON {tickets}(status, created_at);
            CREATE INDEX IF NOT EXISTS {tickets}_assignee_idx
                ON {tickets}(assignee_id, created_at);
            CREATE TABLE IF NOT EXISTS {messages} (
                id UUID PRIMARY KEY,
                ticket_id UUID NOT NULL,
                direction TEXT NOT NULL,
                body TEXT NOT NULL,
                html_body TEXT,
                translated_body TEXT,
                from_addr TEXT NOT NULL,
                to_addr TEXT,
                provider_message_id TEXT,
                created_at TIMESTAMPTZ NOT NULL
            );
            CREATE INDEX IF NOT EXISTS {messages}_thread_idx
                ON {messages}(ticket_id, created_at, id);",
            tickets = self.tickets_table,
            messages = self.messages_table
        );
        conn.batch_execute(&statement)?;
        Ok(())
    }

    fn query_tickets(
        &self,
        where_clause: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Ticket>, TicketStoreError> {
        let mut conn = self.connection()?;
        let rows = conn.query(
            &format!(
                "SELECT id, subject, from_addr, from_email, status, priority, category, tags,
                        language, summary, translated_subject, translated_body, assignee_id,
                        draft_reply, last_reply_source, last_reply_at, conversation_id,
                        provider_message_id, source, created_at, updated_at
                 FROM {table}
                 {where_clause}
                 ORDER BY created_at DESC",
                table = self.tickets_table,
                where_clause = where_clause
            ),
            params,
        )?;
        rows.iter().map(row_to_ticket).collect()
    }
}

impl TicketStore for PostgresTicketStore {
    fn put_ticket(&self, ticket: &Ticket) -> Result<(), TicketStoreError> {
        let mut conn = self.connection()?;
        let tags: Vec<String> = ticket.tags.iter().map(|tag| tag.to_string()).collect();
        let result = conn.execute(
            &format!(
                "INSERT INTO {table}
                    (id, subject, from_addr, from_email, status, priority, category, tags,
                     language, summary, translated_subject, translated_body, assignee_id,
                     draft_reply, last_reply_source, last_reply_at, conversation_id,
                     provider_message_id, source, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                         $17, $18, $19, $20, $21)
                 ON CONFLICT (id) DO UPDATE SET
                    subject = EXCLUDED.subject,
                    status = EXCLUDED.status,
                    priority = EXCLUDED.priority,
                    category = EXCLUDED.category,
                    tags = EXCLUDED.tags,
                    language = EXCLUDED.language,
                    updated_at = EXCLUDED.updated_at",
                table = self.tickets_table
            ),
            &[
                &ticket.id,
                &ticket.subject,
                &ticket.from,
                &ticket.from_email,
                &ticket.status.to_string(),
                &ticket.priority.to_string(),
                &ticket.category.to_string(),
                &tags,
                &ticket.language,
                &ticket.summary,
                &ticket.translated_subject,
                &ticket.translated_body,
                &ticket.assignee_id,
                &ticket.draft_reply,
                &ticket.last_reply_source.map(|value| value.to_string()),
                &ticket.last_reply_at,
                &ticket.conversation_id,
                &ticket.provider_message_id,
                &ticket.source.to_string(),
                &ticket.created_at,
                &ticket.updated_at,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => {
                let existing = ticket
                    .conversation_id
                    .as_deref()
                    .and_then(|conversation_id| {
                        self.get_ticket_by_conversation_id(conversation_id)
                            .ok()
                            .flatten()
                    });
                match existing {
                    Some(existing) => Err(TicketStoreError::ConversationConflict(existing.id)),
                    None => Err(TicketStoreError::Postgres(err)),
                }
            }
            Err(err) => Err(TicketStoreError::Postgres(err)),
        }
    }

    fn get_ticket(&self, ticket_id: &Uuid) -> Result<Option<Ticket>, TicketStoreError> {
        let tickets = self.query_tickets("WHERE id = $1", &[ticket_id])?;
        Ok(tickets.into_iter().next())
    }

    fn get_ticket_by_conversation_id(
        &self,
        conversation_id: &str,
    ) -> Result<Option<Ticket>, TicketStoreError> {
        let tickets = self.query_tickets("WHERE conversation_id = $1", &[&conversation_id])?;
        Ok(tickets.into_iter().next())
    }

    fn update_ticket(
        &self,
        ticket_id: &Uuid,
        update: &TicketUpdate,
    ) -> Result<(), TicketStoreError> {
        let mut sets: Vec<String> = Vec::new();
        let mut params: Vec<Box<dyn ToSql + Sync>> = Vec::new();

        let push = |sets: &mut Vec<String>,
                    params: &mut Vec<Box<dyn ToSql + Sync>>,
                    column: &str,
                    value: Box<dyn ToSql + Sync>| {
            params.push(value);
            sets.push(format!("{} = ${}", column, params.len()));
        };

        if let Some(status) = update.status {
            push(&mut sets, &mut params, "status", Box::new(status.to_string()));
        }
        if let Some(priority) = update.priority {
            push(
                &mut sets,
                &mut params,
                "priority",
                Box::new(priority.to_string()),
            );
        }
        if let Some(category) = update.category {
            push(
                &mut sets,
                &mut params,
                "category",
                Box::new(category.to_string()),
            );
        }
        if let Some(language) = &update.language {
            push(&mut sets, &mut params, "language", Box::new(language.clone()));
        }
        if let Some(summary) = &update.summary {
            push(&mut sets, &mut params, "summary", Box::new(summary.clone()));
        }
        if let Some(translated_subject) = &update.translated_subject {
            push(
                &mut sets,
                &mut params,
                "translated_subject",
                Box::new(translated_subject.clone()),
            );
        }
        if let Some(translated_body) = &update.translated_body {
            push(
                &mut sets,
                &mut params,
                "translated_body",
                Box::new(translated_body.clone()),
            );
        }
        if let Some(assignee_id) = &update.assignee_id {
            push(
                &mut sets,
                &mut params,
                "assignee_id",
                Box::new(assignee_id.clone()),
            );
        }
        if let Some(draft_reply) = &update.draft_reply {
            push(
                &mut sets,
                &mut params,
                "draft_reply",
                Box::new(draft_reply.clone()),
            );
        }
        if let Some(tags) = &update.tags {
            let tags: Vec<String> = crate::ticket::normalize_tags(tags)
                .iter()
                .map(|tag| tag.to_string())
                .collect();
            push(&mut sets, &mut params, "tags", Box::new(tags));
        }
        if let Some(last_reply_source) = update.last_reply_source {
            push(
                &mut sets,
                &mut params,
                "last_reply_source",
                Box::new(last_reply_source.to_string()),
            );
        }
        if let Some(last_reply_at) = update.last_reply_at {
            push(
                &mut sets,
                &mut params,
                "last_reply_at",
                Box::new(last_reply_at),
            );
        }
        if let Some(provider_message_id) = &update.provider_message_id {
            push(
                &mut sets,
                &mut params,
                "provider_message_id",
                Box::new(provider_message_id.clone()),
            );
        }

        sets.push("updated_at = now()".to_string());
        params.push(Box::new(*ticket_id));
        let statement = format!(
            "UPDATE {table} SET {sets} WHERE id = ${id_param}",
            table = self.tickets_table,
            sets = sets.join(", "),
            id_param = params.len()
        );

        let param_refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|value| value.as_ref()).collect();
        let mut conn = self.connection()?;
        let updated = conn.execute(&statement, &param_refs)?;
        if updated == 0 {
            return Err(TicketStoreError::TicketNotFound(*ticket_id));
        }
        Ok(())
    }

    fn append_message(&self, message: &Message) -> Result<(), TicketStoreError> {
        let mut conn = self.connection()?;
        conn.execute(
            &format!(
                "INSERT INTO {table}
                    (id, ticket_id, direction, body, html_body, translated_body,
                     from_addr, to_addr, provider_message_id, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
                table = self.messages_table
            ),
            &[
                &message.id,
                &message.ticket_id,
                &message.direction.to_string(),
                &message.body,
                &message.html_body,
                &message.translated_body,
                &message.from,
                &message.to,
                &message.provider_message_id,
                &message.created_at,
            ],
        )?;
        Ok(())
    }

    fn get_messages(&self, ticket_id: &Uuid) -> Result<Vec<Message>, TicketStoreError> {
        let mut conn = self.connection()?;
        let rows = conn.query(
            &format!(
                "SELECT id, ticket_id, direction, body, html_body, translated_body,
                        from_addr, to_addr, provider_message_id, created_at
                 FROM {table}
                 WHERE ticket_id = $1
                 ORDER BY created_at, id",
                table = self.messages_table
            ),
            &[ticket_id],
        )?;
        rows.iter().map(row_to_message).collect()
    }

    fn set_message_translation(
        &self,
        ticket_id: &Uuid,
        message_id: &Uuid,
        translated_body: &str,
    ) -> Result<(), TicketStoreError> {
        let mut conn = self.connection()?;
        conn.execute(
            &format!(
                "UPDATE {table} SET translated_body = $3
                 WHERE ticket_id = $1 AND id = $2",
                table = self.messages_table
            ),
            &[ticket_id, message_id, &translated_body],
        )?;
        Ok(())
    }

    fn list_tickets_by_status(
        &self,
        status: TicketStatus,
    ) -> Result<Vec<Ticket>, TicketStoreError> {
        self.query_tickets("WHERE status = $1", &[&status.to_string()])
    }

    fn list_tickets_by_assignee(
        &self,
        assignee_id: &str,
    ) -> Result<Vec<Ticket>, TicketStoreError> {
        self.query_tickets("WHERE assignee_id = $1", &[&assignee_id])
    }

    fn list_all_tickets(&self) -> Result<Vec<Ticket>, TicketStoreError> {
        self.query_tickets("", &[])
    }
}

fn row_to_ticket(row: &Row) -> Result<Ticket, TicketStoreError> {
    let tags: Vec<String> = row.get("tags");
    let tags = tags
        .iter()
        .map(|tag| tag.parse())
        .collect::<Result<Vec<_>, _>>()
        .map_err(TicketStoreError::InvalidRow)?;
    let status: String = row.get("status");
    let priority: String = row.get("priority");
    let category: String = row.get("category");
    let source: String = row.get("source");
    let last_reply_source: Option<String> = row.get("last_reply_source");
    let last_reply_source = last_reply_source
        .map(|value| value.parse().map_err(TicketStoreError::InvalidRow))
        .transpose()?;
    Ok(Ticket {
        id: row.get("id"),
        subject: row.get("subject"),
        from: row.get("from_addr"),
        from_email: row.get("from_email"),
        status: status.parse().map_err(TicketStoreError::InvalidRow)?,
        priority: priority.parse().map_err(TicketStoreError::InvalidRow)?,
        category: category.parse().map_err(TicketStoreError::InvalidRow)?,
        tags,
        language: row.get("language"),
        summary: row.get("summary"),
        translated_subject: row.get("translated_subject"),
        translated_body: row.get("translated_body"),
        assignee_id: row.get("assignee_id"),
        draft_reply: row.get("draft_reply"),
        last_reply_source,
        last_reply_at: row.get("last_reply_at"),
        conversation_id: row.get("conversation_id"),
        provider_message_id: row.get("provider_message_id"),
        source: source.parse().map_err(TicketStoreError::InvalidRow)?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_message(row: &Row) -> Result<Message, TicketStoreError> {
    let direction: String = row.get("direction");
    Ok(Message {
        id: row.get("id"),
        ticket_id: row.get("ticket_id"),
        direction: direction.parse().map_err(TicketStoreError::InvalidRow)?,
        body: row.get("body"),
        html_body: row.get("html_body"),
        translated_body: row.get("translated_body"),
        from: row.get("from_addr"),
        to: row.get("to_addr"),
        provider_message_id: row.get("provider_message_id"),
        created_at: row.get("created_at"),
    })
}

fn is_unique_violation(err: &postgres::Error) -> bool {
    err.code()
        .map(|code| code == &postgres::error::SqlState::UNIQUE_VIOLATION)
        .unwrap_or(false)
}

pub fn resolve_db_url() -> Result<String, TicketStoreError> {
    env::var("TICKET_DB_URL")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .or_else(|| {
            env::var("DATABASE_URL")
                .ok()
                .filter(|value| !value.trim().is_empty())
        })
        .ok_or_else(|| TicketStoreError::Config("missing TICKET_DB_URL/DATABASE_URL".to_string()))
}

fn sanitize_table_name(raw: &str) -> Result<String, TicketStoreError> {
    let parts: Vec<&str> = raw.split('.').collect();
    if parts.is_empty() || parts.len() > 2 {
        return Err(TicketStoreError::Config(format!(
            "invalid table name: {}",
            raw
        )));
    }
    for part in &parts {
        if part.is_empty()
            || !part
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        {
            return Err(TicketStoreError::Config(format!(
                "invalid table name: {}",
                raw
            )));
        }
    }
    Ok(raw.to_string())
}
