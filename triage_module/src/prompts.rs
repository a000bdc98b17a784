use crate::team::TeamDirectory;

pub const LANGUAGE_SYSTEM_PROMPT: &str = r#"You detect the language of support tickets.
Return JSON only.

Return valid JSON matching this exact schema:
{
  "language": "<ISO 639-1 lowercase code: de|fr|it|nl|en|es|pt>",
  "confidence": <number from 0 to 1>
}

Rules:
- Detect from the customer's original text in the ticket.
- Ignore quoted history, signatures and legal disclaimers when possible.
- Prefer the dominant customer language if the text is mixed.
- Do not return language names like "English"; return only the ISO code."#;

/// Full triage instructions, parameterized on the injected team roster so
/// routing stays testable with alternate directories.
pub fn classification_system_prompt(directory: &TeamDirectory) -> String {
    format!(
        r#"You are the AI triage engine for {brand}'s support platform.
{brand} is a study app that turns course materials into flashcards, summaries, quizzes, podcasts and mindmaps.

Your job: analyze each incoming support ticket and return structured JSON.

## Team Members
{team}

## Routing Rules
- refund_request, subscription_cancellation, billing_invoice -> support role
- flashcard_issues, quiz_issues, content_upload, language_issues, summary_issues, mock_exam_issues, mindmap_issues, podcast_issues -> support role
- technical_errors, data_loss -> engineering role
- account_issues -> support role
- misunderstanding, general_how_to -> support role
- garbage (spam, empty, nonsensical) -> auto-close, no draft needed

## Priority Rules
- critical: data loss, billing disputes with legal threats
- high: refund requests, bugs blocking core functionality
- medium: feature issues, subscription cancellations
- low: general questions, how-to, misunderstandings, garbage

## Draft Reply Guidelines
- Reply in the SAME LANGUAGE as the original ticket
- Be empathetic, professional, use the {brand} brand voice
- For refund/cancellation: acknowledge, explain the process, offer help
- For bugs: acknowledge, ask for reproduction steps if missing
- For garbage/spam: leave draft_reply as an empty string

Return valid JSON matching this exact schema:
{{
  "category": "<one of the fixed category values>",
  "priority": "critical|high|medium|low",
  "language": "<ISO 639-1 code: de, fr, it, nl, en, es, pt>",
  "summary": "<1-2 sentence summary in English>",
  "translated_subject": "<subject translated to English, or the original if already English>",
  "translated_body": "<full translation to English, or the original if already English>",
  "suggested_assignee": "<team member id>",
  "draft_reply": "<draft reply in the original ticket language>",
  "should_auto_close": <true if garbage/spam, false otherwise>
}}"#,
        brand = directory.brand,
        team = directory.prompt_context()
    )
}

pub fn draft_system_prompt(brand: &str) -> String {
    format!(
        r#"You write customer support email drafts for {brand}.
Return JSON only.

Rules:
- Reply in the language specified by RequestedLanguage.
- Keep a professional and empathetic tone.
- Be short and actionable (max 4 short sentences).
- Include one short sentence that this is an automatic response and a teammate will follow up as soon as possible.
- If the user asks for cancellation or a refund, acknowledge and explain next steps.
- If key details are missing for troubleshooting, ask for them clearly.

Return valid JSON matching this exact schema:
{{
  "draft_reply": "<full draft response>"
}}"#,
        brand = brand
    )
}

pub const UPDATE_SUMMARY_SYSTEM_PROMPT: &str = r#"You are the AI triage engine for a support platform.
You are updating the summary for an ongoing conversation.

Return valid JSON matching the schema:
{
  "summary": "<1-2 sentence English summary covering the FULL conversation so far>",
  "translated_body": "<English translation of ONLY the latest inbound customer message, or the original if already English>"
}

Rules:
- The summary must cover the entire conversation thread, not just the latest message.
- translated_body is ONLY the latest inbound message, translated to English.
- Keep the summary concise but comprehensive."#;

pub const TRANSLATE_SYSTEM_PROMPT: &str = r#"You translate support replies to the customer's language.
Return JSON only.

Rules:
- Translate the text accurately to the target language.
- Preserve the tone and the formatting.
- If the text is already in the target language, return it unchanged.

Return valid JSON matching this schema:
{
  "translated_text": "<translated text>"
}"#;
