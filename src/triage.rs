//! Triage engine — turns a customer message into a reply draft.
//!
//! Three staged LLM calls:
//! 1. Analysis: extract structured complaint details (name, issue, order id, refund)
//! 2. Generation: draft a polite support reply from the extracted details
//! 3. Formatting: force the reply into a `{"subject", "body"}` JSON object
//!
//! The formatter output is untrusted text. `resolve_reply` classifies it into
//! a tagged outcome first; unwrapping to a sendable draft is a separate,
//! explicit step.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::TriageError;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};

/// Max tokens for the analysis call (kept tight — runs on every message).
const ANALYSIS_MAX_TOKENS: u64 = 512;

/// Max tokens for reply generation.
const GENERATION_MAX_TOKENS: u64 = 1024;

/// Temperature for analysis and formatting (deterministic-ish).
const EXTRACT_TEMPERATURE: f64 = 0.1;

/// Temperature for reply generation.
const GENERATION_TEMPERATURE: f64 = 0.7;

/// Subject used when the formatter output cannot be parsed.
const FALLBACK_SUBJECT: &str = "Customer Support";

/// Structured details extracted from a customer message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ComplaintDetails {
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub product_issue: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub refund_requested: Option<String>,
}

/// A sendable reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyDraft {
    pub subject: String,
    pub body: String,
}

/// What the formatter call actually produced.
///
/// Callers must match on this before sending anything — raw text is not
/// silently promoted to a structured reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// Parsed `{"subject", "body"}` object.
    Structured(ReplyDraft),
    /// Anything that failed to parse as the expected object.
    RawText(String),
}

impl ReplyOutcome {
    /// Collapse to a sendable draft, substituting the fallback subject for
    /// raw text. This is the single place raw output becomes a draft.
    pub fn into_draft(self) -> ReplyDraft {
        match self {
            ReplyOutcome::Structured(draft) => draft,
            ReplyOutcome::RawText(text) => ReplyDraft {
                subject: FALLBACK_SUBJECT.to_string(),
                body: text,
            },
        }
    }
}

/// Full triage result: extracted details plus the reply to send.
#[derive(Debug, Clone)]
pub struct TriageResult {
    pub details: ComplaintDetails,
    pub reply: ReplyDraft,
}

/// Runs the staged triage pipeline against an `LlmProvider`.
pub struct TriageEngine {
    llm: Arc<dyn LlmProvider>,
}

impl TriageEngine {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    /// Run all three stages for one customer message.
    pub async fn process_complaint(
        &self,
        user_message: &str,
        sender_name: &str,
    ) -> Result<TriageResult, TriageError> {
        info!(model = self.llm.model_name(), "Running triage pipeline");

        let details = self.analyze(user_message, sender_name).await?;
        let reply_text = self.generate_reply(user_message, sender_name, &details).await?;
        let outcome = self.format_reply(&reply_text).await?;

        if let ReplyOutcome::RawText(ref raw) = outcome {
            warn!(
                preview = %raw.chars().take(80).collect::<String>(),
                "Formatter did not return a JSON object, using fallback subject"
            );
        }

        Ok(TriageResult {
            details,
            reply: outcome.into_draft(),
        })
    }

    /// Stage 1: extract structured complaint details.
    async fn analyze(
        &self,
        user_message: &str,
        sender_name: &str,
    ) -> Result<ComplaintDetails, TriageError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_analysis_system_prompt()),
            ChatMessage::user(build_analysis_user_prompt(user_message, sender_name)),
        ])
        .with_temperature(EXTRACT_TEMPERATURE)
        .with_max_tokens(ANALYSIS_MAX_TOKENS);

        let response = self
            .llm
            .complete(request)
            .await
            .map_err(|e| TriageError::Analysis(format!("LLM call failed: {e}")))?;

        // Extraction is best-effort — a parse failure degrades to empty
        // details rather than aborting the reply.
        let json_str = extract_json_object(&response.content);
        match serde_json::from_str::<ComplaintDetails>(&json_str) {
            Ok(details) => Ok(details),
            Err(e) => {
                warn!(
                    raw_response = %response.content,
                    error = %e,
                    "Failed to parse analysis response, continuing with empty details"
                );
                Ok(ComplaintDetails::default())
            }
        }
    }

    /// Stage 2: draft the customer-facing reply.
    async fn generate_reply(
        &self,
        user_message: &str,
        sender_name: &str,
        details: &ComplaintDetails,
    ) -> Result<String, TriageError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_generation_system_prompt()),
            ChatMessage::user(build_generation_user_prompt(user_message, sender_name, details)),
        ])
        .with_temperature(GENERATION_TEMPERATURE)
        .with_max_tokens(GENERATION_MAX_TOKENS);

        let response = self
            .llm
            .complete(request)
            .await
            .map_err(|e| TriageError::Generation(format!("LLM call failed: {e}")))?;

        Ok(response.content)
    }

    /// Stage 3: force the reply into a subject/body JSON object.
    async fn format_reply(&self, reply_text: &str) -> Result<ReplyOutcome, TriageError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_format_system_prompt()),
            ChatMessage::user(format!(
                "Format the following response into a JSON object with 'subject' and 'body' \
                 fields. Return ONLY the JSON object and nothing else:\n\n{reply_text}"
            )),
        ])
        .with_temperature(EXTRACT_TEMPERATURE)
        .with_max_tokens(GENERATION_MAX_TOKENS);

        let response = self
            .llm
            .complete(request)
            .await
            .map_err(|e| TriageError::Formatting(format!("LLM call failed: {e}")))?;

        Ok(resolve_reply(&response.content))
    }
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_analysis_system_prompt() -> String {
    "You are a customer complaint analyzer for a support team.\n\
     Extract structured details from the customer's message.\n\n\
     Respond with ONLY a JSON object:\n\
     {\"customer_name\": \"...\", \"product_issue\": \"...\", \"address\": \"...\", \
     \"order_id\": \"...\", \"refund_requested\": \"...\"}\n\n\
     Rules:\n\
     - customer_name comes from the provided sender name, never from the message text\n\
     - refund_requested is \"yes\" or \"no\"\n\
     - Use null for any detail the message does not contain"
        .to_string()
}

fn build_analysis_user_prompt(user_message: &str, sender_name: &str) -> String {
    format!("Sender name: {sender_name}\n\nMessage:\n{user_message}")
}

fn build_generation_system_prompt() -> String {
    "You are a customer service expert with strong empathy and problem-solving skills.\n\
     Write a polite, professional reply to the customer's message.\n\n\
     Rules:\n\
     - Include a subject line that relates to the customer's query\n\
     - Address the customer by name when one is known\n\
     - Close with: Best regards, supports@.com Customer Service Team, 24*7 support \
     or call us 1-800-123-4567"
        .to_string()
}

fn build_generation_user_prompt(
    user_message: &str,
    sender_name: &str,
    details: &ComplaintDetails,
) -> String {
    let mut prompt = String::with_capacity(512);
    prompt.push_str(&format!("Customer: {sender_name}\n"));
    if let Some(ref issue) = details.product_issue {
        prompt.push_str(&format!("Reported issue: {issue}\n"));
    }
    if let Some(ref order_id) = details.order_id {
        prompt.push_str(&format!("Order ID: {order_id}\n"));
    }
    if let Some(ref refund) = details.refund_requested {
        prompt.push_str(&format!("Refund requested: {refund}\n"));
    }
    prompt.push_str(&format!("\nOriginal message:\n{user_message}"));
    prompt
}

fn build_format_system_prompt() -> String {
    "You format customer service responses into structured JSON.\n\
     Extract an appropriate subject line from the response content, then return \
     a JSON object with 'subject' and 'body' fields and nothing else."
        .to_string()
}

// ── Response parsing ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct FormattedReply {
    subject: String,
    body: String,
}

/// Classify formatter output into a tagged outcome.
///
/// Handles one level of nesting: formatters occasionally wrap the real
/// `{"subject", "body"}` object inside the outer object's `body` field.
pub fn resolve_reply(raw: &str) -> ReplyOutcome {
    let json_str = extract_json_object(raw);

    let Ok(outer) = serde_json::from_str::<FormattedReply>(&json_str) else {
        return ReplyOutcome::RawText(raw.trim().to_string());
    };

    // One level of unnesting only.
    let inner_body = outer.body.trim();
    if inner_body.starts_with('{') && inner_body.ends_with('}') {
        if let Ok(inner) = serde_json::from_str::<FormattedReply>(inner_body) {
            return ReplyOutcome::Structured(ReplyDraft {
                subject: inner.subject,
                body: inner.body,
            });
        }
    }

    ReplyOutcome::Structured(ReplyDraft {
        subject: outer.subject,
        body: outer.body,
    })
}

/// Extract a JSON object from LLM output (handles markdown wrapping).
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    // Already a JSON object
    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    // Wrapped in markdown code block
    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    // Try to find object bounds
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;

    use crate::error::LlmError;
    use crate::llm::provider::{CompletionResponse, FinishReason};

    /// Mock that returns canned responses in call order.
    struct ScriptedLlm {
        responses: std::sync::Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: std::sync::Mutex::new(
                    responses.into_iter().rev().map(String::from).collect(),
                ),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            let content = self.responses.lock().unwrap().pop().unwrap_or_default();
            Ok(CompletionResponse {
                content,
                input_tokens: 100,
                output_tokens: 50,
                finish_reason: FinishReason::Stop,
            })
        }
    }

    #[test]
    fn resolve_reply_plain_object() {
        let outcome = resolve_reply(r#"{"subject": "Refund", "body": "We are on it."}"#);
        assert_eq!(
            outcome,
            ReplyOutcome::Structured(ReplyDraft {
                subject: "Refund".into(),
                body: "We are on it.".into(),
            })
        );
    }

    #[test]
    fn resolve_reply_markdown_fenced() {
        let raw = "Here you go:\n```json\n{\"subject\": \"Order\", \"body\": \"Shipped.\"}\n```";
        let outcome = resolve_reply(raw);
        assert_eq!(
            outcome,
            ReplyOutcome::Structured(ReplyDraft {
                subject: "Order".into(),
                body: "Shipped.".into(),
            })
        );
    }

    #[test]
    fn resolve_reply_one_level_nested() {
        let raw = r#"{"subject": "outer", "body": "{\"subject\": \"inner\", \"body\": \"real text\"}"}"#;
        let outcome = resolve_reply(raw);
        assert_eq!(
            outcome,
            ReplyOutcome::Structured(ReplyDraft {
                subject: "inner".into(),
                body: "real text".into(),
            })
        );
    }

    #[test]
    fn resolve_reply_unparseable_is_raw() {
        let outcome = resolve_reply("Sorry, I cannot format that.");
        assert_eq!(
            outcome,
            ReplyOutcome::RawText("Sorry, I cannot format that.".into())
        );
    }

    #[test]
    fn raw_text_draft_uses_fallback_subject() {
        let draft = ReplyOutcome::RawText("just text".into()).into_draft();
        assert_eq!(draft.subject, FALLBACK_SUBJECT);
        assert_eq!(draft.body, "just text");
    }

    #[test]
    fn extract_json_object_from_prose() {
        let raw = "The answer is {\"a\": 1} as requested.";
        assert_eq!(extract_json_object(raw), "{\"a\": 1}");
    }

    #[tokio::test]
    async fn pipeline_runs_all_three_stages() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            r#"{"customer_name": "Ana", "product_issue": "broken screen", "order_id": "A-1", "refund_requested": "yes"}"#,
            "Dear Ana, we are sorry about the broken screen on order A-1.",
            r#"{"subject": "Your order A-1", "body": "Dear Ana, we are sorry."}"#,
        ]));
        let engine = TriageEngine::new(llm);

        let result = engine
            .process_complaint("My screen arrived broken, order A-1, refund please", "Ana")
            .await
            .unwrap();

        assert_eq!(result.details.order_id.as_deref(), Some("A-1"));
        assert_eq!(result.details.refund_requested.as_deref(), Some("yes"));
        assert_eq!(result.reply.subject, "Your order A-1");
    }

    #[tokio::test]
    async fn analysis_parse_failure_degrades_to_empty_details() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            "I could not extract anything useful.",
            "Thank you for reaching out.",
            r#"{"subject": "Support", "body": "Thank you for reaching out."}"#,
        ]));
        let engine = TriageEngine::new(llm);

        let result = engine.process_complaint("help", "Customer").await.unwrap();
        assert!(result.details.order_id.is_none());
        assert_eq!(result.reply.subject, "Support");
    }
}
