//! Outbound mail via SMTP.
//!
//! Subject and body go through the cleanup helpers before sending; LLM
//! output tends to arrive with stray quotes, escaped newlines, or a whole
//! JSON object where the body should be.

use lettre::message::Message;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{SmtpTransport, Transport};
use serde::Deserialize;
use tracing::info;

use crate::config::SmtpConfig;
use crate::error::DispatchError;

/// Characters of the body included in the dispatch report.
const BODY_PREVIEW_CHARS: usize = 100;

/// Summary of a sent message.
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub recipient: String,
    pub subject: String,
    pub body_preview: String,
}

/// Sends replies over SMTP with STARTTLS.
pub struct MailDispatcher {
    config: SmtpConfig,
}

impl MailDispatcher {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    /// Clean and send one reply. Blocking; callers on the async side run
    /// this under `spawn_blocking`.
    pub fn send(
        &self,
        subject: &str,
        body: &str,
        recipient: &str,
    ) -> Result<DispatchReport, DispatchError> {
        let subject = clean_subject(subject);
        let body = clean_body(body);

        let creds = Credentials::new(
            self.config.username.clone(),
            self.config.password.clone(),
        );

        let transport = SmtpTransport::starttls_relay(&self.config.smtp_host)
            .map_err(|e| DispatchError::Relay(e.to_string()))?
            .port(self.config.smtp_port)
            .credentials(creds)
            .build();

        let email = Message::builder()
            .from(self.config.from_address.parse().map_err(|e| {
                DispatchError::InvalidAddress {
                    address: self.config.from_address.clone(),
                    reason: format!("{e}"),
                }
            })?)
            .to(recipient.parse().map_err(|e| DispatchError::InvalidAddress {
                address: recipient.to_string(),
                reason: format!("{e}"),
            })?)
            .subject(&subject)
            .body(body.clone())
            .map_err(|e| DispatchError::Build(e.to_string()))?;

        transport
            .send(&email)
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        info!(to = %recipient, subject = %subject, "Email sent");

        Ok(DispatchReport {
            recipient: recipient.to_string(),
            subject,
            body_preview: body.chars().take(BODY_PREVIEW_CHARS).collect(),
        })
    }
}

/// Strip wrapping quotes and whitespace from a subject line.
pub fn clean_subject(subject: &str) -> String {
    subject
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim()
        .to_string()
}

#[derive(Debug, Deserialize)]
struct BodyEnvelope {
    body: String,
}

/// Normalize a reply body for sending.
///
/// - Unwraps a `{"body": ...}` JSON envelope if the whole body is one
/// - Converts escaped newlines to real newlines
/// - Strips wrapping quotes
/// - Collapses double backslashes
pub fn clean_body(body: &str) -> String {
    let mut body = body.to_string();

    let trimmed = body.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        if let Ok(envelope) = serde_json::from_str::<BodyEnvelope>(trimmed) {
            body = envelope.body;
        }
    }

    body = body.replace("\\n", "\n");
    body = body
        .trim_matches(|c| c == '"' || c == '\'')
        .to_string();
    body = body.replace("\\\\", "\\");

    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_subject_strips_quotes_and_space() {
        assert_eq!(clean_subject("  \"Your refund\"  "), "Your refund");
        assert_eq!(clean_subject("'Order update'"), "Order update");
        assert_eq!(clean_subject("Plain subject"), "Plain subject");
    }

    #[test]
    fn clean_body_unwraps_json_envelope() {
        let raw = r#"{"body": "Dear customer,\nThank you."}"#;
        assert_eq!(clean_body(raw), "Dear customer,\nThank you.");
    }

    #[test]
    fn clean_body_converts_escaped_newlines() {
        assert_eq!(clean_body("line one\\nline two"), "line one\nline two");
    }

    #[test]
    fn clean_body_strips_wrapping_quotes() {
        assert_eq!(clean_body("\"quoted body\""), "quoted body");
    }

    #[test]
    fn clean_body_collapses_double_backslashes() {
        assert_eq!(clean_body("path C:\\\\temp"), "path C:\\temp");
    }

    #[test]
    fn clean_body_leaves_plain_text_alone() {
        let text = "Hello,\nthis is fine as is.";
        assert_eq!(clean_body(text), text);
    }

    #[test]
    fn clean_body_ignores_json_without_body_field() {
        let raw = r#"{"subject": "no body here"}"#;
        assert_eq!(clean_body(raw), raw);
    }
}
