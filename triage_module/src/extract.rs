use std::sync::OnceLock;

use regex::Regex;

const MAX_KEPT_LINES: usize = 60;
const RAW_FALLBACK_CHARS: usize = 2500;

/// Lines that mark the start of quoted history in common mail clients.
fn stop_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)^on .+wrote:\s*$",
            r"(?i)^from:\s*",
            r"(?i)^sent:\s*",
            r"(?i)^subject:\s*",
            r"(?i)^to:\s*",
            r"(?i)^cc:\s*",
            r"(?i)^-{2,}\s*original message\s*-{2,}$",
            r"^_{5,}\s*$",
        ]
        .iter()
        .map(|pattern| Regex::new(pattern).expect("static quote-marker pattern"))
        .collect()
    })
}

/// Isolate the latest human-authored text from a raw email body.
///
/// Strips the mobile-channel marker, normalizes line endings, and truncates
/// at the first quoted-reply marker or `>`-quoted line so classification and
/// translation see the customer's message instead of the quoted history. If
/// nothing survives the cut, the head of the raw body is used instead.
pub fn extract_latest_customer_text(raw_body: &str) -> String {
    let body = strip_mobile_marker(raw_body).replace("\r\n", "\n");
    let body = body.trim();
    if body.is_empty() {
        return String::new();
    }

    let mut kept: Vec<&str> = Vec::new();
    for raw_line in body.split('\n') {
        let line = raw_line.trim_end();
        if line.starts_with('>') {
            break;
        }
        let trimmed = line.trim();
        if stop_patterns().iter().any(|pattern| pattern.is_match(trimmed)) {
            break;
        }
        kept.push(line);
        if kept.len() >= MAX_KEPT_LINES {
            break;
        }
    }

    let joined = kept.join("\n").trim().to_string();
    if joined.is_empty() {
        truncate_chars(body, RAW_FALLBACK_CHARS).trim().to_string()
    } else {
        joined
    }
}

fn strip_mobile_marker(body: &str) -> &str {
    let trimmed = body.trim_start();
    for prefix in ["MOBILE:", "mobile:", "Mobile:"] {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            return rest.trim_start();
        }
    }
    body
}

fn truncate_chars(value: &str, max_chars: usize) -> &str {
    match value.char_indices().nth(max_chars) {
        Some((index, _)) => &value[..index],
        None => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_text_before_on_wrote_marker() {
        let body = "Thanks, that fixed it!\n\nOn Jan 1, 2026, at 09:00, Support wrote:\n> Hello,\n> please try reinstalling.";
        assert_eq!(extract_latest_customer_text(body), "Thanks, that fixed it!");
    }

    #[test]
    fn stops_at_quoted_line() {
        let body = "Still broken.\n> previous reply\n> more quoted text";
        assert_eq!(extract_latest_customer_text(body), "Still broken.");
    }

    #[test]
    fn stops_at_forwarded_header_block() {
        let body = "See below.\nFrom: someone@example.com\nSent: Monday\nSubject: old thread";
        assert_eq!(extract_latest_customer_text(body), "See below.");
    }

    #[test]
    fn stops_at_original_message_divider() {
        let body = "Answer above.\n---- Original Message ----\nold content";
        assert_eq!(extract_latest_customer_text(body), "Answer above.");
        let body = "Answer above.\n_____\nsignature";
        assert_eq!(extract_latest_customer_text(body), "Answer above.");
    }

    #[test]
    fn strips_mobile_marker_and_crlf() {
        let body = "MOBILE: I need a refund\r\nBest,\r\nA";
        assert_eq!(
            extract_latest_customer_text(body),
            "I need a refund\nBest,\nA"
        );
    }

    #[test]
    fn caps_kept_lines() {
        let body = (0..100)
            .map(|i| format!("line {}", i))
            .collect::<Vec<_>>()
            .join("\n");
        let extracted = extract_latest_customer_text(&body);
        assert_eq!(extracted.lines().count(), 60);
        assert!(extracted.ends_with("line 59"));
    }

    #[test]
    fn falls_back_to_raw_head_when_everything_is_quoted() {
        let body = "> all quoted\n> nothing new";
        let extracted = extract_latest_customer_text(body);
        assert_eq!(extracted, "> all quoted\n> nothing new");
    }

    #[test]
    fn empty_body_yields_empty_string() {
        assert_eq!(extract_latest_customer_text("   \r\n  "), "");
    }
}
