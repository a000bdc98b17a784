pub mod client;
pub mod extract;
pub mod language;
pub mod prompts;
pub mod schema;
pub mod team;
pub mod types;

pub use client::{OpenAiTriageClient, TriageConfig, TriageError, TriageModel};
pub use extract::extract_latest_customer_text;
pub use language::{normalize_language_code, FALLBACK_LANGUAGE, SUPPORTED_LANGUAGES};
pub use schema::{CATEGORY_VALUES, PRIORITY_VALUES};
pub use team::{TeamDirectory, TeamMember, TeamRole, UNASSIGNED_ID};
pub use types::{
    ClassificationResult, ThreadDirection, ThreadEntry, UpdateSummaryResult,
};
