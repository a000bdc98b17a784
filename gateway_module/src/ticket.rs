use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    Waiting,
    Resolved,
    Closed,
}

impl TicketStatus {
    pub const ALL: [TicketStatus; 5] = [
        TicketStatus::Open,
        TicketStatus::InProgress,
        TicketStatus::Waiting,
        TicketStatus::Resolved,
        TicketStatus::Closed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::Waiting => "waiting",
            TicketStatus::Resolved => "resolved",
            TicketStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "open" => Ok(TicketStatus::Open),
            "in_progress" => Ok(TicketStatus::InProgress),
            "waiting" => Ok(TicketStatus::Waiting),
            "resolved" => Ok(TicketStatus::Resolved),
            "closed" => Ok(TicketStatus::Closed),
            other => Err(format!("unknown ticket status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl TicketPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketPriority::Critical => "critical",
            TicketPriority::High => "high",
            TicketPriority::Medium => "medium",
            TicketPriority::Low => "low",
        }
    }
}

impl fmt::Display for TicketPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketPriority {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "critical" => Ok(TicketPriority::Critical),
            "high" => Ok(TicketPriority::High),
            "medium" => Ok(TicketPriority::Medium),
            "low" => Ok(TicketPriority::Low),
            other => Err(format!("unknown ticket priority: {}", other)),
        }
    }
}

/// Closed category set derived from the real support-tag taxonomy.
/// `Garbage` is the catch-all for spam and nonsensical mail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketCategory {
    SubscriptionCancellation,
    RefundRequest,
    BillingInvoice,
    FlashcardIssues,
    QuizIssues,
    ContentUpload,
    LanguageIssues,
    TechnicalErrors,
    AccountIssues,
    PodcastIssues,
    SummaryIssues,
    MockExamIssues,
    MindmapIssues,
    GeneralHowTo,
    DataLoss,
    Misunderstanding,
    Garbage,
}

impl TicketCategory {
    pub const ALL: [TicketCategory; 17] = [
        TicketCategory::SubscriptionCancellation,
        TicketCategory::RefundRequest,
        TicketCategory::BillingInvoice,
        TicketCategory::FlashcardIssues,
        TicketCategory::QuizIssues,
        TicketCategory::ContentUpload,
        TicketCategory::LanguageIssues,
        TicketCategory::TechnicalErrors,
        TicketCategory::AccountIssues,
        TicketCategory::PodcastIssues,
        TicketCategory::SummaryIssues,
        TicketCategory::MockExamIssues,
        TicketCategory::MindmapIssues,
        TicketCategory::GeneralHowTo,
        TicketCategory::DataLoss,
        TicketCategory::Misunderstanding,
        TicketCategory::Garbage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TicketCategory::SubscriptionCancellation => "subscription_cancellation",
            TicketCategory::RefundRequest => "refund_request",
            TicketCategory::BillingInvoice => "billing_invoice",
            TicketCategory::FlashcardIssues => "flashcard_issues",
            TicketCategory::QuizIssues => "quiz_issues",
            TicketCategory::ContentUpload => "content_upload",
            TicketCategory::LanguageIssues => "language_issues",
            TicketCategory::TechnicalErrors => "technical_errors",
            TicketCategory::AccountIssues => "account_issues",
            TicketCategory::PodcastIssues => "podcast_issues",
            TicketCategory::SummaryIssues => "summary_issues",
            TicketCategory::MockExamIssues => "mock_exam_issues",
            TicketCategory::MindmapIssues => "mindmap_issues",
            TicketCategory::GeneralHowTo => "general_how_to",
            TicketCategory::DataLoss => "data_loss",
            TicketCategory::Misunderstanding => "misunderstanding",
            TicketCategory::Garbage => "garbage",
        }
    }
}

impl fmt::Display for TicketCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketCategory {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        TicketCategory::ALL
            .iter()
            .find(|category| category.as_str() == value)
            .copied()
            .ok_or_else(|| format!("unknown ticket category: {}", value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketTag {
    AiDraft,
    AutoClosed,
    AiProcessed,
    NeedsReview,
}

impl TicketTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketTag::AiDraft => "ai_draft",
            TicketTag::AutoClosed => "auto_closed",
            TicketTag::AiProcessed => "ai_processed",
            TicketTag::NeedsReview => "needs_review",
        }
    }
}

impl fmt::Display for TicketTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketTag {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "ai_draft" => Ok(TicketTag::AiDraft),
            "auto_closed" => Ok(TicketTag::AutoClosed),
            "ai_processed" => Ok(TicketTag::AiProcessed),
            "needs_review" => Ok(TicketTag::NeedsReview),
            other => Err(format!("unknown ticket tag: {}", other)),
        }
    }
}

/// Deduplicate and order-normalize a tag set.
pub fn normalize_tags(tags: &[TicketTag]) -> Vec<TicketTag> {
    let mut out: Vec<TicketTag> = tags.to_vec();
    out.sort();
    out.dedup();
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketSource {
    Web,
    Mobile,
    Email,
}

impl fmt::Display for TicketSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            TicketSource::Web => "web",
            TicketSource::Mobile => "mobile",
            TicketSource::Email => "email",
        };
        f.write_str(value)
    }
}

impl FromStr for TicketSource {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "web" => Ok(TicketSource::Web),
            "mobile" => Ok(TicketSource::Mobile),
            "email" => Ok(TicketSource::Email),
            other => Err(format!("unknown ticket source: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplySource {
    Draft,
    Agent,
}

impl fmt::Display for ReplySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            ReplySource::Draft => "draft",
            ReplySource::Agent => "agent",
        };
        f.write_str(value)
    }
}

impl FromStr for ReplySource {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "draft" => Ok(ReplySource::Draft),
            "agent" => Ok(ReplySource::Agent),
            other => Err(format!("unknown reply source: {}", other)),
        }
    }
}

/// One support case. `conversation_id` correlates the provider's mail
/// thread and is immutable once set; `provider_message_id` tracks the most
/// recent inbound message so replies land in the same thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: Uuid,
    pub subject: String,
    pub from: String,
    pub from_email: String,
    pub status: TicketStatus,
    pub priority: TicketPriority,
    pub category: TicketCategory,
    #[serde(default)]
    pub tags: Vec<TicketTag>,
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft_reply: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reply_source: Option<ReplySource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reply_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,
    pub source: TicketSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

impl fmt::Display for MessageDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            MessageDirection::Inbound => "inbound",
            MessageDirection::Outbound => "outbound",
        };
        f.write_str(value)
    }
}

impl FromStr for MessageDirection {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "inbound" => Ok(MessageDirection::Inbound),
            "outbound" => Ok(MessageDirection::Outbound),
            other => Err(format!("unknown message direction: {}", other)),
        }
    }
}

/// One email inside a ticket thread. Created once; `translated_body` is the
/// only field the worker may back-fill afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub direction: MessageDirection,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_body: Option<String>,
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Attribute-scoped partial update. Each writer role fills only the fields
/// it owns; absent fields are left untouched by the store. `assignee_id`
/// distinguishes "not supplied" (outer `None`) from "clear the assignee"
/// (`Some(None)`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TicketUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TicketStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<TicketPriority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<TicketCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_body: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_clearable_field",
        skip_serializing_if = "Option::is_none"
    )]
    pub assignee_id: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft_reply: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<TicketTag>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reply_source: Option<ReplySource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reply_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,
}

/// Maps an explicit JSON `null` to `Some(None)` so a field can be cleared,
/// while an absent field stays `None` via `#[serde(default)]`.
pub fn deserialize_clearable_field<'de, D>(
    deserializer: D,
) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

impl TicketUpdate {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.priority.is_none()
            && self.category.is_none()
            && self.language.is_none()
            && self.summary.is_none()
            && self.translated_subject.is_none()
            && self.translated_body.is_none()
            && self.assignee_id.is_none()
            && self.draft_reply.is_none()
            && self.tags.is_none()
            && self.last_reply_source.is_none()
            && self.last_reply_at.is_none()
            && self.provider_message_id.is_none()
    }
}
