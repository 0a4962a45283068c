//! Mail agent — automated customer-support mailbox.

pub mod attachments;
pub mod config;
pub mod crm;
pub mod dispatch;
pub mod error;
pub mod llm;
pub mod mailbox;
pub mod transcribe;
pub mod triage;
