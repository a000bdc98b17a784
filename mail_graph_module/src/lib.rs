//! Microsoft Graph mail client: fetch full message content for the
//! ingestion gateway, send replies inside an existing conversation, and
//! maintain the inbox change-notification subscription.

use std::env;
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

const DEFAULT_LOGIN_BASE_URL: &str = "https://login.microsoftonline.com";
const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// Graph caps subscriptions at roughly three days; the renewal schedule
/// re-creates them daily.
const SUBSCRIPTION_TTL: Duration = Duration::from_secs(3 * 24 * 60 * 60);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("missing environment variable: {0}")]
    MissingEnv(&'static str),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("graph returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("token endpoint returned {status}: {body}")]
    Token { status: u16, body: String },
    #[error("token cache lock poisoned")]
    LockPoisoned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailAttachment {
    pub name: String,
    pub content_type: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
}

/// Full content of one inbound email: the plain text feeds AI processing,
/// the HTML is stored for rendering.
#[derive(Debug, Clone)]
pub struct MailContent {
    pub subject: String,
    pub body: String,
    pub html_body: String,
    pub from: String,
    pub from_name: Option<String>,
    pub conversation_id: String,
    pub has_attachments: bool,
    pub attachments: Vec<MailAttachment>,
}

/// Transport seam for the ingestion gateway and the reply path.
pub trait MailProvider: Send + Sync {
    fn fetch_message(&self, message_id: &str) -> Result<MailContent, MailError>;
    /// Returns a synthetic id; Graph's reply endpoint does not expose the
    /// id of the message it creates.
    fn send_reply(&self, parent_message_id: &str, html_body: &str) -> Result<String, MailError>;
    fn create_subscription(&self, webhook_url: &str) -> Result<(), MailError>;
}

#[derive(Debug, Clone)]
pub struct GraphMailConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub mailbox: String,
    pub webhook_secret: String,
    pub login_base_url: String,
    pub graph_base_url: String,
}

impl GraphMailConfig {
    pub fn from_env() -> Result<Self, MailError> {
        dotenvy::dotenv().ok();
        Ok(Self {
            tenant_id: require_env("GRAPH_TENANT_ID")?,
            client_id: require_env("GRAPH_CLIENT_ID")?,
            client_secret: require_env("GRAPH_CLIENT_SECRET")?,
            mailbox: env::var("MAILBOX_ADDRESS")
                .unwrap_or_else(|_| "support@notely.app".to_string()),
            webhook_secret: env::var("WEBHOOK_SECRET")
                .unwrap_or_else(|_| "maildesk-webhook-secret".to_string()),
            login_base_url: env::var("GRAPH_LOGIN_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_LOGIN_BASE_URL.to_string()),
            graph_base_url: env::var("GRAPH_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_GRAPH_BASE_URL.to_string()),
        })
    }
}

fn require_env(key: &'static str) -> Result<String, MailError> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or(MailError::MissingEnv(key))
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct GraphMailClient {
    config: GraphMailConfig,
    client: reqwest::blocking::Client,
    token: Mutex<Option<CachedToken>>,
}

impl GraphMailClient {
    pub fn from_env() -> Result<Self, MailError> {
        Ok(Self::new(GraphMailConfig::from_env()?))
    }

    pub fn new(config: GraphMailConfig) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());
        Self {
            config,
            client,
            token: Mutex::new(None),
        }
    }

    fn access_token(&self) -> Result<String, MailError> {
        {
            let cached = self.token.lock().map_err(|_| MailError::LockPoisoned)?;
            if let Some(token) = cached.as_ref() {
                if Instant::now() < token.expires_at {
                    return Ok(token.value.clone());
                }
            }
        }

        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.config.login_base_url, self.config.tenant_id
        );
        let response = self
            .client
            .post(&url)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("scope", "https://graph.microsoft.com/.default"),
                ("grant_type", "client_credentials"),
            ])
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(MailError::Token {
                status: status.as_u16(),
                body,
            });
        }
        let token: TokenResponse = response.json()?;

        let mut cached = self.token.lock().map_err(|_| MailError::LockPoisoned)?;
        // Refresh 60 seconds before the reported expiry.
        let ttl = token.expires_in.saturating_sub(60);
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(ttl),
        });
        Ok(token.access_token)
    }

    fn check_status(response: reqwest::blocking::Response) -> Result<reqwest::blocking::Response, MailError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().unwrap_or_default();
            Err(MailError::Api {
                status: status.as_u16(),
                body,
            })
        }
    }
}

impl MailProvider for GraphMailClient {
    fn fetch_message(&self, message_id: &str) -> Result<MailContent, MailError> {
        let token = self.access_token()?;
        let base = format!(
            "{}/users/{}/messages/{}",
            self.config.graph_base_url, self.config.mailbox, message_id
        );

        // HTML variant with attachments expanded.
        let response = self
            .client
            .get(&base)
            .bearer_auth(&token)
            .query(&[
                ("$expand", "attachments"),
                ("$select", "subject,body,from,conversationId,hasAttachments"),
            ])
            .send()?;
        let html_message: GraphMessage = Self::check_status(response)?.json()?;

        // Plain-text variant fetched separately.
        let response = self
            .client
            .get(&base)
            .bearer_auth(&token)
            .header("Prefer", "outlook.body-content-type=\"text\"")
            .query(&[("$select", "body")])
            .send()?;
        let text_message: GraphMessage = Self::check_status(response)?.json()?;

        let mut html_body = html_message.body.content;
        let mut attachments = Vec::new();
        for attachment in &html_message.attachments {
            // Inline images arrive as cid: references; rewrite them to data
            // URIs so the stored HTML renders standalone.
            if let (Some(content_id), Some(content_bytes)) =
                (&attachment.content_id, &attachment.content_bytes)
            {
                let data_uri = format!(
                    "data:{};base64,{}",
                    attachment.content_type, content_bytes
                );
                html_body = html_body.replace(&format!("cid:{}", content_id), &data_uri);
            }
            attachments.push(MailAttachment {
                name: attachment.name.clone(),
                content_type: attachment.content_type.clone(),
                size: attachment.size,
                content_id: attachment.content_id.clone(),
            });
        }

        Ok(MailContent {
            subject: html_message.subject.unwrap_or_default(),
            body: text_message.body.content.trim().to_string(),
            html_body,
            from: html_message
                .from
                .as_ref()
                .map(|from| from.email_address.address.clone())
                .unwrap_or_default(),
            from_name: html_message
                .from
                .as_ref()
                .and_then(|from| from.email_address.name.clone())
                .filter(|name| !name.is_empty()),
            conversation_id: html_message.conversation_id.unwrap_or_default(),
            has_attachments: html_message.has_attachments.unwrap_or(false),
            attachments,
        })
    }

    fn send_reply(&self, parent_message_id: &str, html_body: &str) -> Result<String, MailError> {
        let token = self.access_token()?;
        let url = format!(
            "{}/users/{}/messages/{}/reply",
            self.config.graph_base_url, self.config.mailbox, parent_message_id
        );
        let payload = ReplyRequest {
            message: ReplyMessage {
                body: GraphBody {
                    content_type: Some("HTML".to_string()),
                    content: html_body.to_string(),
                },
            },
        };
        let response = self.client.post(&url).bearer_auth(&token).json(&payload).send()?;
        Self::check_status(response)?;

        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis();
        Ok(format!("reply-{}", millis))
    }

    fn create_subscription(&self, webhook_url: &str) -> Result<(), MailError> {
        let token = self.access_token()?;
        let resource = format!("users/{}/mailFolders/inbox/messages", self.config.mailbox);
        info!(
            "creating graph subscription resource={} notification_url={}",
            resource, webhook_url
        );

        let expiration = Utc::now()
            + chrono::Duration::from_std(SUBSCRIPTION_TTL).unwrap_or(chrono::Duration::days(3));
        let payload = SubscriptionRequest {
            change_type: "created".to_string(),
            notification_url: webhook_url.to_string(),
            resource,
            expiration_date_time: expiration.to_rfc3339_opts(SecondsFormat::Millis, true),
            client_state: self.config.webhook_secret.clone(),
        };

        let url = format!("{}/subscriptions", self.config.graph_base_url);
        let response = self.client.post(&url).bearer_auth(&token).json(&payload).send()?;
        let response = Self::check_status(response)?;
        let created: serde_json::Value = response.json().unwrap_or_default();
        info!("graph subscription created: {}", created);
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphMessage {
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    body: GraphBody,
    #[serde(default)]
    from: Option<GraphRecipient>,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    has_attachments: Option<bool>,
    #[serde(default)]
    attachments: Vec<GraphAttachment>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphRecipient {
    email_address: GraphEmailAddress,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphEmailAddress {
    #[serde(default)]
    name: Option<String>,
    address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphAttachment {
    name: String,
    content_type: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    content_id: Option<String>,
    #[serde(default)]
    content_bytes: Option<String>,
}

#[derive(Debug, Serialize)]
struct ReplyRequest {
    message: ReplyMessage,
}

#[derive(Debug, Serialize)]
struct ReplyMessage {
    body: GraphBody,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionRequest {
    change_type: String,
    notification_url: String,
    resource: String,
    expiration_date_time: String,
    client_state: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(server_url: &str) -> GraphMailConfig {
        GraphMailConfig {
            tenant_id: "tenant".to_string(),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            mailbox: "support@notely.app".to_string(),
            webhook_secret: "test-secret".to_string(),
            login_base_url: server_url.to_string(),
            graph_base_url: server_url.to_string(),
        }
    }

    fn token_mock(server: &mut mockito::Server) -> mockito::Mock {
        server
            .mock("POST", "/tenant/oauth2/v2.0/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token": "tok-1", "expires_in": 3600}"#)
            .create()
    }

    #[test]
    fn fetch_message_merges_html_and_text_variants() {
        let mut server = mockito::Server::new();
        let token = token_mock(&mut server);

        let html = server
            .mock("GET", "/users/support@notely.app/messages/msg-1")
            .match_query(mockito::Matcher::Regex("expand".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "subject": "Help",
                    "body": { "contentType": "html", "content": "<p>Hi <img src=\"cid:logo1\"/></p>" },
                    "from": { "emailAddress": { "name": "Alice", "address": "alice@example.com" } },
                    "conversationId": "conv-9",
                    "hasAttachments": true,
                    "attachments": [
                        { "name": "logo.png", "contentType": "image/png", "size": 10,
                          "contentId": "logo1", "contentBytes": "aWNvbg==" }
                    ]
                }"#,
            )
            .create();
        let text = server
            .mock("GET", "/users/support@notely.app/messages/msg-1")
            .match_header("Prefer", "outlook.body-content-type=\"text\"")
            .match_query(mockito::Matcher::Regex("select".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"body": { "contentType": "text", "content": "Hi there\n" }}"#)
            .create();

        let client = GraphMailClient::new(test_config(&server.url()));
        let mail = client.fetch_message("msg-1").expect("fetch");

        assert_eq!(mail.subject, "Help");
        assert_eq!(mail.body, "Hi there");
        assert_eq!(mail.from, "alice@example.com");
        assert_eq!(mail.from_name.as_deref(), Some("Alice"));
        assert_eq!(mail.conversation_id, "conv-9");
        assert!(mail.html_body.contains("data:image/png;base64,aWNvbg=="));
        assert!(!mail.html_body.contains("cid:logo1"));
        assert_eq!(mail.attachments.len(), 1);

        token.assert();
        html.assert();
        text.assert();
    }

    #[test]
    fn send_reply_posts_html_body_and_returns_synthetic_id() {
        let mut server = mockito::Server::new();
        let _token = token_mock(&mut server);
        let reply = server
            .mock("POST", "/users/support@notely.app/messages/msg-1/reply")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"message": {"body": {"contentType": "HTML", "content": "<p>Thanks!</p>"}}}"#
                    .to_string(),
            ))
            .with_status(202)
            .create();

        let client = GraphMailClient::new(test_config(&server.url()));
        let id = client.send_reply("msg-1", "<p>Thanks!</p>").expect("reply");
        assert!(id.starts_with("reply-"));
        reply.assert();
    }

    #[test]
    fn token_is_cached_across_calls() {
        let mut server = mockito::Server::new();
        let token = token_mock(&mut server);
        let reply = server
            .mock("POST", "/users/support@notely.app/messages/msg-1/reply")
            .with_status(202)
            .expect(2)
            .create();

        let client = GraphMailClient::new(test_config(&server.url()));
        client.send_reply("msg-1", "<p>a</p>").expect("first");
        client.send_reply("msg-1", "<p>b</p>").expect("second");

        // One token fetch serves both requests.
        token.assert();
        reply.assert();
    }

    #[test]
    fn create_subscription_sends_client_state() {
        let mut server = mockito::Server::new();
        let _token = token_mock(&mut server);
        let subscription = server
            .mock("POST", "/subscriptions")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"changeType": "created", "clientState": "test-secret",
                    "resource": "users/support@notely.app/mailFolders/inbox/messages"}"#
                    .to_string(),
            ))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id": "sub-1"}"#)
            .create();

        let client = GraphMailClient::new(test_config(&server.url()));
        client
            .create_subscription("https://example.com/webhook")
            .expect("subscription");
        subscription.assert();
    }

    #[test]
    fn graph_error_status_propagates() {
        let mut server = mockito::Server::new();
        let _token = token_mock(&mut server);
        let _missing = server
            .mock("GET", "/users/support@notely.app/messages/missing")
            .match_query(mockito::Matcher::Any)
            .with_status(404)
            .with_body("not found")
            .create();

        let client = GraphMailClient::new(test_config(&server.url()));
        let err = client.fetch_message("missing").expect_err("should fail");
        assert!(matches!(err, MailError::Api { status: 404, .. }));
    }
}
