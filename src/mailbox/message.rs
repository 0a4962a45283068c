//! Inbound message parsing.
//!
//! Wraps mail-parser output in an `InboundEmail` with the fields the
//! routing logic cares about: sender identity, body text, word count, and
//! any named attachments.

use mail_parser::{MessageParser, MimeHeaders};

use crate::error::MailboxError;

/// A named attachment pulled from a message.
#[derive(Debug, Clone)]
pub struct EmailAttachment {
    pub filename: String,
    pub data: Vec<u8>,
}

/// A parsed inbound email.
#[derive(Debug, Clone)]
pub struct InboundEmail {
    /// Raw From header value, e.g. `"Ana Lopez" <ana@example.com>`.
    pub sender_display: String,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<EmailAttachment>,
}

impl InboundEmail {
    /// Parse raw RFC822 text. Fails only when mail-parser cannot make
    /// sense of the input at all.
    pub fn parse(seq: u32, raw: &str) -> Result<Self, MailboxError> {
        let parsed = MessageParser::default()
            .parse(raw.as_bytes())
            .ok_or(MailboxError::UnparseableMessage { seq })?;

        let sender_display = parsed
            .from()
            .and_then(|addr| addr.first())
            .map(|a| {
                let email = a.address().unwrap_or_default();
                match a.name() {
                    Some(name) => format!("{name} <{email}>"),
                    None => email.to_string(),
                }
            })
            .unwrap_or_else(|| "Unknown".to_string());

        let subject = parsed.subject().unwrap_or("No Subject").to_string();

        let body = parsed
            .body_text(0)
            .map(|t| t.to_string())
            .unwrap_or_default();

        let mut attachments = Vec::new();
        for part in parsed.attachments() {
            if let Some(name) = part.attachment_name() {
                attachments.push(EmailAttachment {
                    filename: name.to_string(),
                    data: part.contents().to_vec(),
                });
            }
        }

        Ok(Self {
            sender_display,
            subject,
            body,
            attachments,
        })
    }

    /// Whitespace-separated word count of the body.
    pub fn word_count(&self) -> usize {
        self.body.split_whitespace().count()
    }

    /// Display name of the sender, or "Customer" when none is present.
    pub fn sender_name(&self) -> String {
        extract_name_from_sender(&self.sender_display)
    }

    /// Bare email address of the sender.
    pub fn sender_email(&self) -> String {
        extract_email_from_sender(&self.sender_display)
    }
}

/// Extract a display name from a From header value.
pub fn extract_name_from_sender(from: &str) -> String {
    if let Some(angle) = from.find('<') {
        let name = from[..angle].trim().trim_matches('"').trim();
        if !name.is_empty() {
            return name.to_string();
        }
    }
    "Customer".to_string()
}

/// Extract the bare address from a From header value. Falls back to the
/// whole string when there are no angle brackets.
pub fn extract_email_from_sender(from: &str) -> String {
    if let (Some(start), Some(end)) = (from.find('<'), from.rfind('>'))
        && end > start
    {
        return from[start + 1..end].to_string();
    }
    from.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "From: \"Ana Lopez\" <ana@example.com>\r\n\
        To: support@example.com\r\n\
        Subject: Broken screen\r\n\
        Content-Type: text/plain\r\n\
        \r\n\
        My order arrived with a broken screen and I would like a refund.\r\n";

    #[test]
    fn parse_extracts_fields() {
        let email = InboundEmail::parse(1, SAMPLE).unwrap();
        assert_eq!(email.sender_email(), "ana@example.com");
        assert_eq!(email.sender_name(), "Ana Lopez");
        assert_eq!(email.subject, "Broken screen");
        assert_eq!(email.word_count(), 13);
        assert!(email.attachments.is_empty());
    }

    #[test]
    fn parse_garbage_is_error() {
        assert!(matches!(
            InboundEmail::parse(7, ""),
            Err(MailboxError::UnparseableMessage { seq: 7 })
        ));
    }

    #[test]
    fn name_extraction_variants() {
        assert_eq!(
            extract_name_from_sender("Ana Lopez <ana@example.com>"),
            "Ana Lopez"
        );
        assert_eq!(
            extract_name_from_sender("\"Ana Lopez\" <ana@example.com>"),
            "Ana Lopez"
        );
        assert_eq!(extract_name_from_sender("ana@example.com"), "Customer");
        assert_eq!(extract_name_from_sender("<ana@example.com>"), "Customer");
    }

    #[test]
    fn email_extraction_variants() {
        assert_eq!(
            extract_email_from_sender("Ana Lopez <ana@example.com>"),
            "ana@example.com"
        );
        assert_eq!(
            extract_email_from_sender("ana@example.com"),
            "ana@example.com"
        );
    }

    #[test]
    fn word_count_empty_body() {
        let email = InboundEmail {
            sender_display: "x@y.com".into(),
            subject: "s".into(),
            body: "   ".into(),
            attachments: vec![],
        };
        assert_eq!(email.word_count(), 0);
    }
}
