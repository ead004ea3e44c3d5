//! Continuation store
//!
//! Externally uploaded cross-check records. Insert-only: a record is never
//! mutated after upload and stays in storage for unmatched reporting.
//! `(app_id, upload_date)` is unique at the storage layer.

use cardtrack_common::models::{ContinuationRecord, NewContinuationRecord, Principal};
use cardtrack_common::{time, Error, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::pagination::{calculate_pagination, Page, DEFAULT_PER_PAGE};
use crate::policy::{self, Operation};
use crate::rows::{decode_extra, encode_extra};

const RECORD_COLUMNS: &str = "id, app_id, upload_date, customer_name, branch_code, \
                              extra_columns, uploaded_by_id, created_at";

#[derive(Debug, Clone, Deserialize)]
pub struct ContinuationFilter {
    pub upload_date: Option<NaiveDate>,
    /// Substring match on `app_id`
    pub app_id: Option<String>,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_per_page")]
    pub per_page: i64,
}

impl Default for ContinuationFilter {
    fn default() -> Self {
        Self {
            upload_date: None,
            app_id: None,
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

fn default_page() -> i64 {
    1
}

fn default_per_page() -> i64 {
    DEFAULT_PER_PAGE
}

#[derive(Clone)]
pub struct ContinuationStore {
    db: SqlitePool,
}

impl ContinuationStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Insert one uploaded record; `DuplicateKey` if the pair already exists
    pub async fn insert(
        &self,
        record: NewContinuationRecord,
        actor: &Principal,
    ) -> Result<ContinuationRecord> {
        policy::require(actor, Operation::IngestBatch, None)?;

        let app_id = record.app_id.trim().to_string();
        if app_id.is_empty() {
            return Err(Error::Validation("app_id is required".to_string()));
        }
        if record.customer_name.trim().is_empty() {
            return Err(Error::Validation("customer_name is required".to_string()));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO continuation_records (
                app_id, upload_date, customer_name, branch_code, extra_columns,
                uploaded_by_id, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&app_id)
        .bind(record.upload_date)
        .bind(record.customer_name.trim())
        .bind(record.branch_code.trim())
        .bind(encode_extra(&record.extra_columns)?)
        .bind(actor.id)
        .bind(time::now())
        .execute(&self.db)
        .await
        .map_err(|e| {
            Error::from_write(e, || {
                format!(
                    "record for App ID {} already exists for {}",
                    app_id, record.upload_date
                )
            })
        })?;

        debug!("Stored continuation record {} for {}", app_id, record.upload_date);

        let row = sqlx::query(&format!(
            "SELECT {} FROM continuation_records WHERE id = ?",
            RECORD_COLUMNS
        ))
        .bind(result.last_insert_rowid())
        .fetch_one(&self.db)
        .await?;
        record_from_row(&row)
    }

    /// Browse uploaded records (every role may read)
    pub async fn list(
        &self,
        filter: &ContinuationFilter,
        actor: &Principal,
    ) -> Result<Page<ContinuationRecord>> {
        policy::require(actor, Operation::ReadContinuation, None)?;

        let mut count_query =
            QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM continuation_records");
        push_filters(&mut count_query, filter);
        let total = count_query.build_query_scalar::<i64>().fetch_one(&self.db).await?;

        let pagination = calculate_pagination(total, filter.page, filter.per_page);

        let mut page_query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM continuation_records",
            RECORD_COLUMNS
        ));
        push_filters(&mut page_query, filter);
        page_query
            .push(" ORDER BY upload_date DESC, id LIMIT ")
            .push_bind(pagination.per_page)
            .push(" OFFSET ")
            .push_bind(pagination.offset);
        let rows = page_query.build().fetch_all(&self.db).await?;
        let items = rows.iter().map(record_from_row).collect::<Result<Vec<_>>>()?;

        Ok(Page::new(items, total, pagination))
    }

    pub async fn count_for_date(&self, upload_date: NaiveDate) -> Result<i64> {
        let count =
            sqlx::query_scalar("SELECT COUNT(*) FROM continuation_records WHERE upload_date = ?")
                .bind(upload_date)
                .fetch_one(&self.db)
                .await?;
        Ok(count)
    }
}

/// All records uploaded for one date, on the caller's connection
pub(crate) async fn load_for_date(
    conn: &mut SqliteConnection,
    upload_date: NaiveDate,
) -> Result<Vec<ContinuationRecord>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM continuation_records WHERE upload_date = ? ORDER BY id",
        RECORD_COLUMNS
    ))
    .bind(upload_date)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(record_from_row).collect()
}

fn push_filters(query: &mut QueryBuilder<'_, Sqlite>, filter: &ContinuationFilter) {
    query.push(" WHERE 1 = 1");
    if let Some(upload_date) = filter.upload_date {
        query.push(" AND upload_date = ").push_bind(upload_date);
    }
    if let Some(app_id) = &filter.app_id {
        query
            .push(" AND app_id LIKE ")
            .push_bind(format!("%{}%", app_id));
    }
}

fn record_from_row(row: &SqliteRow) -> Result<ContinuationRecord> {
    let extra: String = row.try_get("extra_columns")?;
    Ok(ContinuationRecord {
        id: row.try_get("id")?,
        app_id: row.try_get("app_id")?,
        upload_date: row.try_get("upload_date")?,
        customer_name: row.try_get("customer_name")?,
        branch_code: row.try_get("branch_code")?,
        extra_columns: decode_extra(&extra)?,
        uploaded_by_id: row.try_get("uploaded_by_id")?,
        created_at: row.try_get("created_at")?,
    })
}
