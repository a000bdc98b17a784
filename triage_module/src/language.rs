/// Languages the support templates and prompts cover.
pub const SUPPORTED_LANGUAGES: [&str; 7] = ["de", "fr", "it", "nl", "en", "es", "pt"];

pub const FALLBACK_LANGUAGE: &str = "en";

pub fn is_supported_language(code: &str) -> bool {
    SUPPORTED_LANGUAGES.contains(&code)
}

/// Normalize a model-reported language to a supported base ISO 639-1 code.
/// Regional variants ("en-US") reduce to their base code and English
/// language names map to codes; anything unrecognized yields `None` so the
/// caller can apply its own fallback.
pub fn normalize_language_code(value: Option<&str>) -> Option<String> {
    let value = value?.trim().to_lowercase();
    if value.is_empty() {
        return None;
    }
    if is_supported_language(&value) {
        return Some(value);
    }

    let base = value
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_string();
    if is_supported_language(&base) {
        return Some(base);
    }

    match value.as_str() {
        "english" => Some("en".to_string()),
        "german" => Some("de".to_string()),
        "french" => Some("fr".to_string()),
        "italian" => Some("it".to_string()),
        "dutch" => Some("nl".to_string()),
        "spanish" => Some("es".to_string()),
        "portuguese" => Some("pt".to_string()),
        _ => None,
    }
}
