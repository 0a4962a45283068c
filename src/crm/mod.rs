//! Customer record store.
//!
//! Tracks one row per customer email address with the details extracted
//! during triage. Updates come in two shapes: `upsert_partial` fills in
//! whatever is known without clobbering existing values, and
//! `update_fields` overwrites exactly the fields a patch names.

mod libsql_backend;
mod migrations;

pub use libsql_backend::LibSqlStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;

/// Lifecycle state of a customer query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomerStatus {
    InProgress,
    Solved,
}

impl CustomerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CustomerStatus::InProgress => "in_progress",
            CustomerStatus::Solved => "solved",
        }
    }
}

/// A stored customer query row.
#[derive(Debug, Clone)]
pub struct CustomerRecord {
    pub id: i64,
    pub customer_name: Option<String>,
    pub email: String,
    pub address: Option<String>,
    pub user_message: Option<String>,
    pub agent_mail: Option<String>,
    pub refund_requested: Option<String>,
    pub status: CustomerStatus,
    pub product_issue: Option<String>,
    pub order_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update: each `Some` field is written, each `None` is left alone.
///
/// The field set is closed — callers cannot name arbitrary columns.
#[derive(Debug, Clone, Default)]
pub struct CustomerPatch {
    pub customer_name: Option<String>,
    pub address: Option<String>,
    pub user_message: Option<String>,
    pub agent_mail: Option<String>,
    pub refund_requested: Option<String>,
    pub product_issue: Option<String>,
    pub order_id: Option<String>,
    pub status: Option<CustomerStatus>,
}

impl CustomerPatch {
    pub fn is_empty(&self) -> bool {
        self.customer_name.is_none()
            && self.address.is_none()
            && self.user_message.is_none()
            && self.agent_mail.is_none()
            && self.refund_requested.is_none()
            && self.product_issue.is_none()
            && self.order_id.is_none()
            && self.status.is_none()
    }
}

/// Async customer store interface.
#[async_trait]
pub trait CustomerStore: Send + Sync {
    /// Insert a row for `email`, or fill in missing fields on the existing
    /// row. Existing non-null values are never overwritten.
    async fn upsert_partial(&self, email: &str, patch: CustomerPatch)
        -> Result<(), DatabaseError>;

    /// Overwrite exactly the fields the patch names. Returns `NotFound`
    /// when no row exists for `email`.
    async fn update_fields(&self, email: &str, patch: CustomerPatch)
        -> Result<(), DatabaseError>;

    /// Fetch a record by email address.
    async fn get_by_email(&self, email: &str) -> Result<Option<CustomerRecord>, DatabaseError>;
}
