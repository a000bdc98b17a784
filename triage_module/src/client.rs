use std::env;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::extract::extract_latest_customer_text;
use crate::language::{normalize_language_code, FALLBACK_LANGUAGE};
use crate::prompts::{
    classification_system_prompt, draft_system_prompt, LANGUAGE_SYSTEM_PROMPT,
    TRANSLATE_SYSTEM_PROMPT, UPDATE_SUMMARY_SYSTEM_PROMPT,
};
use crate::schema::{
    classification_schema, draft_schema, language_schema, translation_schema,
    update_summary_schema, CATEGORY_VALUES, PRIORITY_VALUES,
};
use crate::team::TeamDirectory;
use crate::types::{
    ClassificationResult, DraftOnly, LanguageDetection, ThreadDirection, ThreadEntry,
    TranslationOnly, UpdateSummaryResult,
};

const DEFAULT_API_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Model calls can take tens of seconds; the queue's visibility lease
/// covers this, so the HTTP timeout stays generous.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum TriageError {
    #[error("OPENAI_API_KEY not set")]
    MissingApiKey,
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("model returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("failed to parse model output: {0}")]
    Json(#[from] serde_json::Error),
    #[error("model returned empty content")]
    EmptyContent,
    #[error("model returned invalid {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// Structured-output contract the worker and the draft endpoint rely on.
/// Every operation sends a system prompt, user content and a strict JSON
/// schema; enumerations are validated against the fixed closed sets.
pub trait TriageModel: Send + Sync {
    fn detect_language(&self, subject: &str, body: &str, from: &str)
        -> Result<String, TriageError>;
    fn classify_and_draft(
        &self,
        subject: &str,
        body: &str,
        from: &str,
    ) -> Result<ClassificationResult, TriageError>;
    fn generate_draft_reply(
        &self,
        subject: &str,
        body: &str,
        from: &str,
        requested_language: &str,
    ) -> Result<String, TriageError>;
    fn update_summary(
        &self,
        thread: &[ThreadEntry],
        subject: &str,
        language: &str,
    ) -> Result<UpdateSummaryResult, TriageError>;
    fn translate_to_language(&self, text: &str, target_language: &str)
        -> Result<String, TriageError>;
}

#[derive(Debug, Clone)]
pub struct TriageConfig {
    pub api_key: Option<String>,
    pub api_url: String,
    pub model: String,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            api_key: env::var("OPENAI_API_KEY").ok().filter(|v| !v.is_empty()),
            api_url: env::var("OPENAI_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            model: env::var("TRIAGE_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
        }
    }
}

pub struct OpenAiTriageClient {
    config: TriageConfig,
    directory: TeamDirectory,
    client: reqwest::blocking::Client,
}

impl OpenAiTriageClient {
    pub fn from_env(directory: TeamDirectory) -> Self {
        Self::with_config(TriageConfig::default(), directory)
    }

    pub fn with_config(config: TriageConfig, directory: TeamDirectory) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());
        Self {
            config,
            directory,
            client,
        }
    }

    fn invoke_json<T: DeserializeOwned>(
        &self,
        schema_name: &str,
        system_prompt: &str,
        user_content: &str,
        max_tokens: u32,
        schema: Value,
    ) -> Result<T, TriageError> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or(TriageError::MissingApiKey)?;
        let url = format!("{}/chat/completions", self.config.api_url);

        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system_prompt.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user_content.to_string(),
                },
            ],
            max_completion_tokens: max_tokens,
            temperature: 0.0,
            response_format: ResponseFormat {
                kind: "json_schema".to_string(),
                json_schema: JsonSchemaFormat {
                    name: schema_name.to_string(),
                    strict: true,
                    schema,
                },
            },
        };

        debug!("invoking triage model {} for {}", self.config.model, schema_name);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&request)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(TriageError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let completion: ChatResponse = response.json()?;
        let content = completion
            .choices
            .first()
            .map(|choice| choice.message.content.trim().to_string())
            .unwrap_or_default();
        if content.is_empty() {
            return Err(TriageError::EmptyContent);
        }

        Ok(serde_json::from_str(strip_code_fences(&content))?)
    }
}

impl TriageModel for OpenAiTriageClient {
    fn detect_language(
        &self,
        subject: &str,
        body: &str,
        from: &str,
    ) -> Result<String, TriageError> {
        let latest_text = extract_latest_customer_text(body);
        let user_content = format!(
            "Use only this latest customer message text for language detection.\n\n{}\n\nFallback context only if text is empty:\nFrom: {}\nSubject: {}",
            latest_text, from, subject
        );
        let result: LanguageDetection = self.invoke_json(
            "language_detection",
            LANGUAGE_SYSTEM_PROMPT,
            &user_content,
            128,
            language_schema(),
        )?;
        Ok(normalize_language_code(Some(&result.language))
            .unwrap_or_else(|| FALLBACK_LANGUAGE.to_string()))
    }

    fn classify_and_draft(
        &self,
        subject: &str,
        body: &str,
        from: &str,
    ) -> Result<ClassificationResult, TriageError> {
        let latest_text = extract_latest_customer_text(body);
        let detected_language = self.detect_language(subject, body, from)?;

        let user_content = format!(
            "DetectedLanguage: {}\nFrom: {}\nSubject: {}\n\nLatestCustomerMessage:\n{}\n\nFullMessage:\n{}\n\nUse DetectedLanguage as the ticket language and draft reply language. Use LatestCustomerMessage as the primary user intent.",
            detected_language, from, subject, latest_text, body
        );
        let assignees = self.directory.assignable_ids();
        let mut result: ClassificationResult = self.invoke_json(
            "full_classification",
            &classification_system_prompt(&self.directory),
            &user_content,
            1024,
            classification_schema(&assignees),
        )?;

        if !CATEGORY_VALUES.contains(&result.category.as_str()) {
            return Err(TriageError::InvalidValue {
                field: "category",
                value: result.category,
            });
        }
        if !PRIORITY_VALUES.contains(&result.priority.as_str()) {
            return Err(TriageError::InvalidValue {
                field: "priority",
                value: result.priority,
            });
        }
        if !assignees.contains(&result.suggested_assignee) {
            return Err(TriageError::InvalidValue {
                field: "suggested_assignee",
                value: result.suggested_assignee,
            });
        }
        result.language =
            normalize_language_code(Some(&result.language)).unwrap_or(detected_language);
        Ok(result)
    }

    fn generate_draft_reply(
        &self,
        subject: &str,
        body: &str,
        from: &str,
        requested_language: &str,
    ) -> Result<String, TriageError> {
        let latest_text = extract_latest_customer_text(body);
        let language = normalize_language_code(Some(requested_language))
            .unwrap_or_else(|| FALLBACK_LANGUAGE.to_string());

        let user_content = format!(
            "RequestedLanguage: {}\nFrom: {}\nSubject: {}\n\nLatestCustomerMessage:\n{}\n\nFullMessage:\n{}",
            language, from, subject, latest_text, body
        );
        let result: DraftOnly = self.invoke_json(
            "draft_only",
            &draft_system_prompt(&self.directory.brand),
            &user_content,
            700,
            draft_schema(),
        )?;
        Ok(result.draft_reply.trim().to_string())
    }

    fn update_summary(
        &self,
        thread: &[ThreadEntry],
        subject: &str,
        language: &str,
    ) -> Result<UpdateSummaryResult, TriageError> {
        let rendered = thread
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                format!(
                    "[{} #{}] From: {}\n{}",
                    entry.direction,
                    index + 1,
                    entry.from,
                    entry.body
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");

        let latest_inbound = thread
            .iter()
            .rev()
            .find(|entry| entry.direction == ThreadDirection::Inbound);
        let latest_text = latest_inbound
            .map(|entry| extract_latest_customer_text(&entry.body))
            .unwrap_or_default();

        let user_content = format!(
            "TicketLanguage: {}\nSubject: {}\n\nFull conversation thread:\n{}\n\nLatest inbound message to translate:\n{}",
            language, subject, rendered, latest_text
        );
        self.invoke_json(
            "update_summary",
            UPDATE_SUMMARY_SYSTEM_PROMPT,
            &user_content,
            512,
            update_summary_schema(),
        )
    }

    fn translate_to_language(
        &self,
        text: &str,
        target_language: &str,
    ) -> Result<String, TriageError> {
        let user_content = format!(
            "TargetLanguage: {}\n\nText to translate:\n{}",
            target_language, text
        );
        let result: TranslationOnly = self.invoke_json(
            "translation",
            TRANSLATE_SYSTEM_PROMPT,
            &user_content,
            1024,
            translation_schema(),
        )?;
        let translated = result.translated_text.trim().to_string();
        if translated.is_empty() {
            Ok(text.trim().to_string())
        } else {
            Ok(translated)
        }
    }
}

/// Tolerate models that wrap JSON in a fenced code block despite the
/// structured-output request.
fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").or(rest.strip_prefix("JSON")).unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_completion_tokens: u32,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: String,
    json_schema: JsonSchemaFormat,
}

#[derive(Debug, Serialize)]
struct JsonSchemaFormat {
    name: String,
    strict: bool,
    schema: Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}
