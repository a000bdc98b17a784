use serde_json::{json, Value};

use crate::language::SUPPORTED_LANGUAGES;

/// Closed category set; must stay in sync with the ticket store's
/// `TicketCategory` parsing.
pub const CATEGORY_VALUES: [&str; 17] = [
    "subscription_cancellation",
    "refund_request",
    "billing_invoice",
    "flashcard_issues",
    "quiz_issues",
    "content_upload",
    "language_issues",
    "technical_errors",
    "account_issues",
    "podcast_issues",
    "summary_issues",
    "mock_exam_issues",
    "mindmap_issues",
    "general_how_to",
    "data_loss",
    "misunderstanding",
    "garbage",
];

pub const PRIORITY_VALUES: [&str; 4] = ["critical", "high", "medium", "low"];

pub fn language_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "language": { "type": "string", "enum": SUPPORTED_LANGUAGES },
            "confidence": { "type": "number" }
        },
        "required": ["language", "confidence"],
        "additionalProperties": false
    })
}

pub fn classification_schema(assignee_values: &[String]) -> Value {
    json!({
        "type": "object",
        "properties": {
            "category": { "type": "string", "enum": CATEGORY_VALUES },
            "priority": { "type": "string", "enum": PRIORITY_VALUES },
            "language": { "type": "string", "enum": SUPPORTED_LANGUAGES },
            "summary": { "type": "string" },
            "translated_subject": { "type": "string" },
            "translated_body": { "type": "string" },
            "suggested_assignee": { "type": "string", "enum": assignee_values },
            "draft_reply": { "type": "string" },
            "should_auto_close": { "type": "boolean" }
        },
        "required": [
            "category",
            "priority",
            "language",
            "summary",
            "translated_subject",
            "translated_body",
            "suggested_assignee",
            "draft_reply",
            "should_auto_close"
        ],
        "additionalProperties": false
    })
}

pub fn draft_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "draft_reply": { "type": "string" }
        },
        "required": ["draft_reply"],
        "additionalProperties": false
    })
}

pub fn update_summary_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "summary": { "type": "string" },
            "translated_body": { "type": "string" }
        },
        "required": ["summary", "translated_body"],
        "additionalProperties": false
    })
}

pub fn translation_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "translated_text": { "type": "string" }
        },
        "required": ["translated_text"],
        "additionalProperties": false
    })
}
