//! libSQL backend for the customer store.
//!
//! Supports local file and in-memory databases. A single connection is
//! reused for all operations; `libsql::Connection` is `Send + Sync` and
//! safe for concurrent async use.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info, warn};

use crate::crm::{CustomerPatch, CustomerRecord, CustomerStatus, CustomerStore, migrations};
use crate::error::DatabaseError;

/// libSQL customer store.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        info!(path = %path.display(), "Customer database opened");

        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;

        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn str_to_status(s: &str) -> CustomerStatus {
    match s {
        "solved" => CustomerStatus::Solved,
        _ => CustomerStatus::InProgress,
    }
}

fn opt_text(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn row_to_record(row: &libsql::Row) -> Result<CustomerRecord, libsql::Error> {
    let status_str: String = row.get(7)?;
    let created_str: String = row.get(10)?;
    let updated_str: String = row.get(11)?;

    Ok(CustomerRecord {
        id: row.get(0)?,
        customer_name: row.get(1).ok(),
        email: row.get(2)?,
        address: row.get(3).ok(),
        user_message: row.get(4).ok(),
        agent_mail: row.get(5).ok(),
        refund_requested: row.get(6).ok(),
        status: str_to_status(&status_str),
        product_issue: row.get(8).ok(),
        order_id: row.get(9).ok(),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

const RECORD_COLUMNS: &str = "id, customer_name, email, address, user_message, agent_mail, \
     refund_requested, status, product_issue, order_id, created_at, updated_at";

// ── Store implementation ────────────────────────────────────────────

#[async_trait]
impl CustomerStore for LibSqlStore {
    async fn upsert_partial(
        &self,
        email: &str,
        patch: CustomerPatch,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let status = patch
            .status
            .unwrap_or(CustomerStatus::InProgress)
            .as_str();

        conn.execute(
            "INSERT INTO customers_query \
                 (email, customer_name, address, user_message, agent_mail, \
                  refund_requested, status, product_issue, order_id, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10) \
             ON CONFLICT(email) DO UPDATE SET \
                 customer_name = COALESCE(customer_name, excluded.customer_name), \
                 address = COALESCE(address, excluded.address), \
                 user_message = COALESCE(user_message, excluded.user_message), \
                 agent_mail = COALESCE(agent_mail, excluded.agent_mail), \
                 refund_requested = COALESCE(refund_requested, excluded.refund_requested), \
                 product_issue = COALESCE(product_issue, excluded.product_issue), \
                 order_id = COALESCE(order_id, excluded.order_id), \
                 updated_at = excluded.updated_at",
            params![
                email,
                opt_text(patch.customer_name),
                opt_text(patch.address),
                opt_text(patch.user_message),
                opt_text(patch.agent_mail),
                opt_text(patch.refund_requested),
                status,
                opt_text(patch.product_issue),
                opt_text(patch.order_id),
                now,
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("upsert_partial: {e}")))?;

        debug!(email = %email, "Customer record inserted or updated");
        Ok(())
    }

    async fn update_fields(
        &self,
        email: &str,
        patch: CustomerPatch,
    ) -> Result<(), DatabaseError> {
        if patch.is_empty() {
            return Ok(());
        }

        let conn = self.conn();

        // The SET clause is assembled from a closed field list only.
        let mut assignments: Vec<&'static str> = Vec::new();
        let mut values: Vec<libsql::Value> = Vec::new();

        let mut push = |clause: &'static str, value: Option<String>| {
            if let Some(v) = value {
                assignments.push(clause);
                values.push(libsql::Value::Text(v));
            }
        };
        push("customer_name = ?", patch.customer_name);
        push("address = ?", patch.address);
        push("user_message = ?", patch.user_message);
        push("agent_mail = ?", patch.agent_mail);
        push("refund_requested = ?", patch.refund_requested);
        push("product_issue = ?", patch.product_issue);
        push("order_id = ?", patch.order_id);
        if let Some(status) = patch.status {
            assignments.push("status = ?");
            values.push(libsql::Value::Text(status.as_str().to_string()));
        }

        assignments.push("updated_at = ?");
        values.push(libsql::Value::Text(Utc::now().to_rfc3339()));
        values.push(libsql::Value::Text(email.to_string()));

        let sql = format!(
            "UPDATE customers_query SET {} WHERE email = ?",
            assignments.join(", ")
        );

        let changed = conn
            .execute(&sql, libsql::params_from_iter(values))
            .await
            .map_err(|e| DatabaseError::Query(format!("update_fields: {e}")))?;

        if changed == 0 {
            warn!(email = %email, "No customer record found to update");
            return Err(DatabaseError::NotFound {
                email: email.to_string(),
            });
        }

        debug!(email = %email, fields = assignments.len() - 1, "Customer record updated");
        Ok(())
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<CustomerRecord>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {RECORD_COLUMNS} FROM customers_query WHERE email = ?1"),
                params![email],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_by_email: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let record = row_to_record(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_by_email row parse: {e}")))?;
                Ok(Some(record))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_by_email: {e}"))),
        }
    }
}
