//! Audit log
//!
//! Append-only ledger of application mutations. Entries are written only
//! inside the transaction that performs the mutation they describe, so an
//! entry is never visible without its state change (or vice versa). The
//! database rejects UPDATE and DELETE on `audit_entries` outright.

use cardtrack_common::models::{AuditAction, AuditEntry};
use cardtrack_common::Result;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::rows::{parse_stored, user_summary, user_summary_columns};

/// Field snapshot: field name → value
pub type Snapshot = Map<String, Value>;

/// Entry to append, produced by a mutation
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub application_id: i64,
    /// `None` for system-initiated changes
    pub changed_by_id: Option<i64>,
    pub action: AuditAction,
    pub old_value: Option<Snapshot>,
    pub new_value: Option<Snapshot>,
    pub remarks: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Append one entry on the caller's connection (normally an open transaction)
pub async fn append(conn: &mut SqliteConnection, entry: &NewAuditEntry) -> Result<i64> {
    let old_value = entry.old_value.as_ref().map(serde_json::to_string).transpose()?;
    let new_value = entry.new_value.as_ref().map(serde_json::to_string).transpose()?;

    let result = sqlx::query(
        r#"
        INSERT INTO audit_entries (
            application_id, changed_by_id, action, old_value, new_value, remarks, timestamp
        )
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entry.application_id)
    .bind(entry.changed_by_id)
    .bind(entry.action.as_str())
    .bind(old_value)
    .bind(new_value)
    .bind(&entry.remarks)
    .bind(entry.timestamp)
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Read side of the audit log
#[derive(Clone)]
pub struct AuditLog {
    db: SqlitePool,
}

impl AuditLog {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// All entries for one application, newest first. Ties on timestamp are
    /// broken by insertion order.
    pub async fn entries_for(&self, application_id: i64) -> Result<Vec<AuditEntry>> {
        let sql = format!(
            r#"
            SELECT e.id, e.application_id, e.changed_by_id, e.action, e.old_value,
                   e.new_value, e.remarks, e.timestamp, {}
            FROM audit_entries e
            LEFT JOIN users u ON u.id = e.changed_by_id
            WHERE e.application_id = ?
            ORDER BY e.timestamp DESC, e.id DESC
            "#,
            user_summary_columns("u", "changed_by"),
        );

        let rows = sqlx::query(&sql)
            .bind(application_id)
            .fetch_all(&self.db)
            .await?;
        rows.iter().map(entry_from_row).collect()
    }

    /// Number of entries recorded for one application
    pub async fn count_for(&self, application_id: i64) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM audit_entries WHERE application_id = ?")
            .bind(application_id)
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }
}

fn entry_from_row(row: &SqliteRow) -> Result<AuditEntry> {
    let old_value: Option<String> = row.try_get("old_value")?;
    let new_value: Option<String> = row.try_get("new_value")?;

    Ok(AuditEntry {
        id: row.try_get("id")?,
        application_id: row.try_get("application_id")?,
        changed_by_id: row.try_get("changed_by_id")?,
        changed_by: user_summary(row, "changed_by")?,
        action: parse_stored(row.try_get("action")?)?,
        old_value: old_value.as_deref().map(serde_json::from_str).transpose()?,
        new_value: new_value.as_deref().map(serde_json::from_str).transpose()?,
        remarks: row.try_get("remarks")?,
        timestamp: row.try_get("timestamp")?,
    })
}
