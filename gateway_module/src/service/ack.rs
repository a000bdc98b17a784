//! Immediate auto-acknowledgement sent in the customer's language before
//! the AI pipeline runs. Fixed per-language templates with a required
//! English fallback, so a partially covered language can never fail the
//! lookup at runtime.

/// HTML body for the acknowledgement reply.
pub(super) fn auto_ack_body(display_name: &str, language: &str, brand: &str) -> String {
    match language {
        "de" => format!(
            "Hallo {name},<br/><br/>vielen Dank für Ihre Nachricht. Wir haben Ihre Anfrage erhalten und ein Teammitglied wird sich so schnell wie möglich bei Ihnen melden.<br/><br/>Mit freundlichen Grüßen,<br/>{brand} Team",
            name = display_name,
            brand = brand
        ),
        "fr" => format!(
            "Bonjour {name},<br/><br/>Merci de nous avoir contactés. Nous avons bien reçu votre demande et un membre de notre équipe vous répondra dans les plus brefs délais.<br/><br/>Cordialement,<br/>L'équipe {brand}",
            name = display_name,
            brand = brand
        ),
        "it" => format!(
            "Ciao {name},<br/><br/>Grazie per averci contattato. Abbiamo ricevuto la tua richiesta e un membro del team ti risponderà il prima possibile.<br/><br/>Cordiali saluti,<br/>Il team {brand}",
            name = display_name,
            brand = brand
        ),
        "es" => format!(
            "Hola {name},<br/><br/>Gracias por contactarnos. Hemos recibido tu solicitud y un miembro del equipo te responderá lo antes posible.<br/><br/>Saludos cordiales,<br/>Equipo {brand}",
            name = display_name,
            brand = brand
        ),
        "pt" => format!(
            "Olá {name},<br/><br/>Obrigado por nos contactar. Recebemos o seu pedido e um membro da equipa entrará em contacto consigo o mais brevemente possível.<br/><br/>Com os melhores cumprimentos,<br/>Equipa {brand}",
            name = display_name,
            brand = brand
        ),
        "nl" => format!(
            "Hallo {name},<br/><br/>Bedankt voor uw bericht. We hebben uw verzoek ontvangen en een teamlid zal zo snel mogelijk contact met u opnemen.<br/><br/>Met vriendelijke groet,<br/>{brand} Team",
            name = display_name,
            brand = brand
        ),
        _ => format!(
            "Hello {name},<br/><br/>Thank you for contacting us. We have received your request and a team member will get back to you as soon as possible.<br/><br/>Best regards,<br/>{brand} Team",
            name = display_name,
            brand = brand
        ),
    }
}

/// Prefer the sender's display name; otherwise title-case the local part of
/// the address ("jane.doe" -> "Jane Doe").
pub(super) fn display_name(from_email: &str, from_name: Option<&str>) -> String {
    if let Some(name) = from_name {
        let trimmed = name.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    let local_part = from_email.split('@').next().unwrap_or("");
    if local_part.is_empty() {
        return "there".to_string();
    }
    local_part
        .split(['.', '_', '-'])
        .filter(|part| !part.is_empty())
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

pub(super) fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_language_falls_back_to_english() {
        let body = auto_ack_body("Alice", "ja", "Notely");
        assert!(body.starts_with("Hello Alice"));
        assert!(body.contains("Notely Team"));
    }

    #[test]
    fn german_template_is_localized() {
        let body = auto_ack_body("Max", "de", "Notely");
        assert!(body.starts_with("Hallo Max"));
        assert!(body.contains("Mit freundlichen Grüßen"));
    }

    #[test]
    fn display_name_prefers_sender_name() {
        assert_eq!(display_name("a@x.com", Some(" Alice Doe ")), "Alice Doe");
    }

    #[test]
    fn display_name_title_cases_local_part() {
        assert_eq!(display_name("jane.doe@x.com", None), "Jane Doe");
        assert_eq!(display_name("max_power@x.com", Some("")), "Max Power");
        assert_eq!(display_name("@x.com", None), "there");
    }

    #[test]
    fn html_is_escaped() {
        assert_eq!(
            escape_html(r#"<b>&"quote"'</b>"#),
            "&lt;b&gt;&amp;&quot;quote&quot;&#39;&lt;/b&gt;"
        );
    }
}
