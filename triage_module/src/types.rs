use std::fmt;

use serde::{Deserialize, Serialize};

/// Structured result of the full first-classification pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub category: String,
    pub priority: String,
    pub language: String,
    pub summary: String,
    pub translated_subject: String,
    pub translated_body: String,
    pub suggested_assignee: String,
    pub draft_reply: String,
    pub should_auto_close: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateSummaryResult {
    pub summary: String,
    pub translated_body: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct LanguageDetection {
    pub language: String,
    #[allow(dead_code)]
    pub confidence: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DraftOnly {
    pub draft_reply: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TranslationOnly {
    pub translated_text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadDirection {
    Inbound,
    Outbound,
}

impl fmt::Display for ThreadDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            ThreadDirection::Inbound => "INBOUND",
            ThreadDirection::Outbound => "OUTBOUND",
        };
        f.write_str(value)
    }
}

/// One message of a conversation thread as fed to the re-summarize pass.
#[derive(Debug, Clone)]
pub struct ThreadEntry {
    pub direction: ThreadDirection,
    pub from: String,
    pub body: String,
}
