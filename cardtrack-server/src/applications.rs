//! Application store
//!
//! Canonical set of application records. Every mutation path (direct update,
//! assignment, match override, reconciliation) funnels through
//! [`write_mutation`], which diffs the before/after records, bumps
//! `updated_at` and `revision`, and appends exactly one audit entry on the
//! same transaction. An empty diff writes nothing.

use cardtrack_common::models::{
    Application, ApplicationPatch, ApplicationRecord, ApplicationStatus, AuditAction, AuditEntry,
    CardPosition, CardType, Choice, NewApplication, Principal, Role,
};
use cardtrack_common::{time, Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::audit::{self, AuditLog, NewAuditEntry, Snapshot};
use crate::pagination::{calculate_pagination, Page, DEFAULT_PER_PAGE};
use crate::policy::{self, Operation};
use crate::rows::{decode_extra, encode_extra, parse_stored, user_summary, user_summary_columns};
use crate::users::require_assignable_officer;

const APPLICATION_COLUMNS: &str = "a.id, a.app_id, a.date, a.branch_code, a.customer_name, \
     a.card_position, a.card_type, a.status, a.remarks, a.work_on, a.inform_to, a.ipt, \
     a.assigned_to_id, a.continuation_matched, a.continuation_remarks, a.extra_columns, \
     a.created_by_id, a.created_at, a.updated_at, a.revision";

/// Snapshot key for the assignee in every audit entry, CREATE included
pub const ASSIGNEE_KEY: &str = "assigned_to";

/// List filters; officers are always scoped to their own rows regardless
/// of what is requested here.
#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationFilter {
    pub status: Option<ApplicationStatus>,
    pub card_type: Option<CardType>,
    pub branch_code: Option<String>,
    /// Honoured for administrators and viewers only
    pub assigned_to: Option<i64>,
    pub matched: Option<bool>,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_per_page")]
    pub per_page: i64,
}

impl Default for ApplicationFilter {
    fn default() -> Self {
        Self {
            status: None,
            card_type: None,
            branch_code: None,
            assigned_to: None,
            matched: None,
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

/// Choice enumerations for form fields
#[derive(Debug, Clone, Serialize)]
pub struct ApplicationChoices {
    pub status_choices: Vec<Choice>,
    pub card_choices: Vec<Choice>,
    pub type_choices: Vec<Choice>,
}

#[derive(Clone)]
pub struct ApplicationStore {
    db: SqlitePool,
    audit: AuditLog,
}

impl ApplicationStore {
    pub fn new(db: SqlitePool) -> Self {
        let audit = AuditLog::new(db.clone());
        Self { db, audit }
    }

    /// Create an application with status UNTOUCH and a CREATE audit entry.
    ///
    /// Fails with `DuplicateKey` if `app_id` is taken; the unique index makes
    /// racing creates resolve to exactly one winner.
    pub async fn create(&self, new_app: NewApplication, actor: &Principal) -> Result<ApplicationRecord> {
        policy::require(actor, Operation::CreateApplication, None)?;
        new_app.validate()?;

        let app_id = new_app.app_id.trim().to_string();
        let now = time::now();

        let mut tx = self.db.begin().await?;
        let result = sqlx::query(
            r#"
            INSERT INTO applications (
                app_id, date, branch_code, customer_name, card_position, card_type,
                status, remarks, work_on, inform_to, ipt, continuation_matched,
                extra_columns, created_by_id, created_at, updated_at, revision
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(&app_id)
        .bind(new_app.date)
        .bind(new_app.branch_code.trim())
        .bind(new_app.customer_name.trim())
        .bind(new_app.card_position.as_str())
        .bind(new_app.card_type.as_str())
        .bind(ApplicationStatus::Untouch.as_str())
        .bind(&new_app.remarks)
        .bind(&new_app.work_on)
        .bind(&new_app.inform_to)
        .bind(&new_app.ipt)
        .bind(encode_extra(&new_app.extra_columns)?)
        .bind(actor.id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::from_write(e, || format!("application {} already exists", app_id)))?;

        let id = result.last_insert_rowid();
        let created = load_application(&mut tx, id).await?;

        audit::append(
            &mut tx,
            &NewAuditEntry {
                application_id: id,
                changed_by_id: Some(actor.id),
                action: AuditAction::Create,
                old_value: None,
                new_value: Some(full_snapshot(&created)?),
                remarks: None,
                timestamp: created.created_at,
            },
        )
        .await?;
        tx.commit().await?;

        info!(actor = actor.id, "Created application {} (id {})", created.app_id, id);
        self.load_record(id).await
    }

    /// Apply a column patch. Officers may only touch workflow fields on
    /// applications assigned to them; `assigned_to` is administrator-only.
    pub async fn update(
        &self,
        id: i64,
        patch: ApplicationPatch,
        actor: &Principal,
    ) -> Result<ApplicationRecord> {
        let mut tx = self.db.begin().await?;
        let current = load_application(&mut tx, id).await?;

        let operation = if patch.assigned_to.is_some() {
            Operation::AssignApplication
        } else {
            Operation::UpdateApplication
        };
        policy::require(actor, operation, current.assigned_to_id)?;
        patch.validate()?;

        if let Some(Some(officer_id)) = patch.assigned_to {
            require_assignable_officer(&mut tx, officer_id).await?;
        }

        let next = apply_patch(&current, patch);
        let written = write_mutation(&mut tx, &current, next, Some(actor.id), None, None).await?;
        tx.commit().await?;

        if written.is_some() {
            info!(actor = actor.id, "Updated application {} (id {})", current.app_id, id);
        } else {
            debug!("Update of application {} changed nothing", id);
        }
        self.load_record(id).await
    }

    /// Assign to an active officer (administrator only), audited as ASSIGN
    pub async fn assign(&self, id: i64, officer_id: i64, actor: &Principal) -> Result<ApplicationRecord> {
        let mut tx = self.db.begin().await?;
        let current = load_application(&mut tx, id).await?;
        policy::require(actor, Operation::AssignApplication, current.assigned_to_id)?;
        require_assignable_officer(&mut tx, officer_id).await?;

        let mut next = current.clone();
        next.assigned_to_id = Some(officer_id);
        let written = write_mutation(
            &mut tx,
            &current,
            next,
            Some(actor.id),
            Some(AuditAction::Assign),
            None,
        )
        .await?;
        tx.commit().await?;

        if written.is_some() {
            info!(
                actor = actor.id,
                "Assigned application {} (id {}) to user {}",
                current.app_id,
                id,
                officer_id
            );
        }
        self.load_record(id).await
    }

    pub async fn get(&self, id: i64, actor: &Principal) -> Result<ApplicationRecord> {
        let record = self.load_record(id).await?;
        policy::require(actor, Operation::ReadApplication, record.application.assigned_to_id)?;
        Ok(record)
    }

    /// Filtered, paginated listing. Role scoping is part of the SQL itself.
    pub async fn list(
        &self,
        filter: &ApplicationFilter,
        actor: &Principal,
    ) -> Result<Page<ApplicationRecord>> {
        let mut count_query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM applications a");
        push_scope(&mut count_query, filter, actor);
        let total = count_query.build_query_scalar::<i64>().fetch_one(&self.db).await?;

        let pagination = calculate_pagination(total, filter.page, filter.per_page);

        let mut page_query = QueryBuilder::<Sqlite>::new(record_select());
        push_scope(&mut page_query, filter, actor);
        page_query
            .push(" ORDER BY a.id LIMIT ")
            .push_bind(pagination.per_page)
            .push(" OFFSET ")
            .push_bind(pagination.offset);
        let rows = page_query.build().fetch_all(&self.db).await?;
        let items = rows.iter().map(record_from_row).collect::<Result<Vec<_>>>()?;

        Ok(Page::new(items, total, pagination))
    }

    /// Applications not yet matched against continuation data, role-scoped
    pub async fn unmatched(&self, actor: &Principal) -> Result<Vec<ApplicationRecord>> {
        let filter = ApplicationFilter {
            matched: Some(false),
            ..ApplicationFilter::default()
        };
        let mut query = QueryBuilder::<Sqlite>::new(record_select());
        push_scope(&mut query, &filter, actor);
        query.push(" ORDER BY a.id");
        let rows = query.build().fetch_all(&self.db).await?;
        rows.iter().map(record_from_row).collect()
    }

    /// Audit entries for one application, newest first
    pub async fn history(&self, id: i64, actor: &Principal) -> Result<Vec<AuditEntry>> {
        let record = self.load_record(id).await?;
        policy::require(actor, Operation::ReadApplication, record.application.assigned_to_id)?;
        self.audit.entries_for(id).await
    }

    pub fn choices() -> ApplicationChoices {
        ApplicationChoices {
            status_choices: ApplicationStatus::choices(),
            card_choices: CardPosition::choices(),
            type_choices: CardType::choices(),
        }
    }

    pub(crate) async fn load_record(&self, id: i64) -> Result<ApplicationRecord> {
        let row = sqlx::query(&format!("{} WHERE a.id = ?", record_select()))
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        match row {
            Some(row) => record_from_row(&row),
            None => Err(Error::NotFound(format!("application {}", id))),
        }
    }
}

fn record_select() -> String {
    format!(
        "SELECT {}, {}, {} FROM applications a \
         LEFT JOIN users assignee ON assignee.id = a.assigned_to_id \
         LEFT JOIN users creator ON creator.id = a.created_by_id",
        APPLICATION_COLUMNS,
        user_summary_columns("assignee", "assigned_to"),
        user_summary_columns("creator", "created_by"),
    )
}

fn push_scope(query: &mut QueryBuilder<'_, Sqlite>, filter: &ApplicationFilter, actor: &Principal) {
    query.push(" WHERE 1 = 1");

    if actor.role == Role::Officer {
        query.push(" AND a.assigned_to_id = ").push_bind(actor.id);
    } else if let Some(assignee) = filter.assigned_to {
        query.push(" AND a.assigned_to_id = ").push_bind(assignee);
    }
    if let Some(status) = filter.status {
        query.push(" AND a.status = ").push_bind(status.as_str());
    }
    if let Some(card_type) = filter.card_type {
        query.push(" AND a.card_type = ").push_bind(card_type.as_str());
    }
    if let Some(branch_code) = &filter.branch_code {
        query.push(" AND a.branch_code = ").push_bind(branch_code.clone());
    }
    if let Some(matched) = filter.matched {
        query.push(" AND a.continuation_matched = ").push_bind(matched);
    }
}

fn apply_patch(current: &Application, patch: ApplicationPatch) -> Application {
    let mut next = current.clone();
    if let Some(status) = patch.status {
        next.status = status;
    }
    if let Some(remarks) = patch.remarks {
        next.remarks = remarks;
    }
    if let Some(work_on) = patch.work_on {
        next.work_on = work_on;
    }
    if let Some(inform_to) = patch.inform_to {
        next.inform_to = inform_to;
    }
    if let Some(ipt) = patch.ipt {
        next.ipt = ipt;
    }
    if let Some(continuation_remarks) = patch.continuation_remarks {
        next.continuation_remarks = continuation_remarks;
    }
    if let Some(assigned_to) = patch.assigned_to {
        next.assigned_to_id = assigned_to;
    }
    next
}

/// Mutable columns that differ between `before` and `after`, as
/// (old snapshot, new snapshot)
pub(crate) fn diff(before: &Application, after: &Application) -> (Snapshot, Snapshot) {
    let mut old = Snapshot::new();
    let mut new = Snapshot::new();
    let mut track = |field: &str, was: Value, now: Value| {
        if was != now {
            old.insert(field.to_string(), was);
            new.insert(field.to_string(), now);
        }
    };

    track("status", before.status.as_str().into(), after.status.as_str().into());
    track("remarks", before.remarks.clone().into(), after.remarks.clone().into());
    track("work_on", before.work_on.clone().into(), after.work_on.clone().into());
    track("inform_to", before.inform_to.clone().into(), after.inform_to.clone().into());
    track("ipt", before.ipt.clone().into(), after.ipt.clone().into());
    track(ASSIGNEE_KEY, before.assigned_to_id.into(), after.assigned_to_id.into());
    track(
        "continuation_matched",
        before.continuation_matched.into(),
        after.continuation_matched.into(),
    );
    track(
        "continuation_remarks",
        before.continuation_remarks.clone().into(),
        after.continuation_remarks.clone().into(),
    );

    (old, new)
}

/// Audit tag for a set of changed fields
pub(crate) fn classify(changed: &Snapshot) -> AuditAction {
    if changed.contains_key("status") {
        AuditAction::StatusChange
    } else if changed.len() == 1 && changed.contains_key(ASSIGNEE_KEY) {
        AuditAction::Assign
    } else {
        AuditAction::Update
    }
}

/// Persist `after` over `before` and append its audit entry on `conn`.
///
/// Returns `None` when nothing changed. The write is guarded by the
/// revision read with `before`; losing that race is a `Conflict` and the
/// caller's transaction must be abandoned.
pub(crate) async fn write_mutation(
    conn: &mut SqliteConnection,
    before: &Application,
    mut after: Application,
    changed_by_id: Option<i64>,
    action: Option<AuditAction>,
    remarks: Option<String>,
) -> Result<Option<Application>> {
    let (old_value, new_value) = diff(before, &after);
    if new_value.is_empty() {
        return Ok(None);
    }
    let action = action.unwrap_or_else(|| classify(&new_value));

    after.updated_at = time::advance_past(before.updated_at);
    after.revision = before.revision + 1;

    let result = sqlx::query(
        r#"
        UPDATE applications
        SET status = ?, remarks = ?, work_on = ?, inform_to = ?, ipt = ?,
            assigned_to_id = ?, continuation_matched = ?, continuation_remarks = ?,
            updated_at = ?, revision = ?
        WHERE id = ? AND revision = ?
        "#,
    )
    .bind(after.status.as_str())
    .bind(&after.remarks)
    .bind(&after.work_on)
    .bind(&after.inform_to)
    .bind(&after.ipt)
    .bind(after.assigned_to_id)
    .bind(after.continuation_matched)
    .bind(&after.continuation_remarks)
    .bind(after.updated_at)
    .bind(after.revision)
    .bind(before.id)
    .bind(before.revision)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::Conflict(format!(
            "application {} was modified concurrently",
            before.app_id
        )));
    }

    audit::append(
        conn,
        &NewAuditEntry {
            application_id: before.id,
            changed_by_id,
            action,
            old_value: Some(old_value),
            new_value: Some(new_value),
            remarks,
            timestamp: after.updated_at,
        },
    )
    .await?;

    Ok(Some(after))
}

/// Load one application on the caller's connection
pub(crate) async fn load_application(conn: &mut SqliteConnection, id: i64) -> Result<Application> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM applications a WHERE a.id = ?",
        APPLICATION_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => application_from_row(&row),
        None => Err(Error::NotFound(format!("application {}", id))),
    }
}

/// Every application, in id order, on the caller's connection
pub(crate) async fn load_all(conn: &mut SqliteConnection) -> Result<Vec<Application>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM applications a ORDER BY a.id",
        APPLICATION_COLUMNS
    ))
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(application_from_row).collect()
}

fn full_snapshot(application: &Application) -> Result<Snapshot> {
    let mut snapshot = match serde_json::to_value(application)? {
        Value::Object(map) => map,
        other => return Err(Error::Internal(format!("unexpected snapshot shape: {}", other))),
    };
    if let Some(assignee) = snapshot.remove("assigned_to_id") {
        snapshot.insert(ASSIGNEE_KEY.to_string(), assignee);
    }
    Ok(snapshot)
}

pub(crate) fn application_from_row(row: &SqliteRow) -> Result<Application> {
    let extra: String = row.try_get("extra_columns")?;
    Ok(Application {
        id: row.try_get("id")?,
        app_id: row.try_get("app_id")?,
        date: row.try_get("date")?,
        branch_code: row.try_get("branch_code")?,
        customer_name: row.try_get("customer_name")?,
        card_position: parse_stored(row.try_get("card_position")?)?,
        card_type: parse_stored(row.try_get("card_type")?)?,
        status: parse_stored(row.try_get("status")?)?,
        remarks: row.try_get("remarks")?,
        work_on: row.try_get("work_on")?,
        inform_to: row.try_get("inform_to")?,
        ipt: row.try_get("ipt")?,
        assigned_to_id: row.try_get("assigned_to_id")?,
        continuation_matched: row.try_get("continuation_matched")?,
        continuation_remarks: row.try_get("continuation_remarks")?,
        extra_columns: decode_extra(&extra)?,
        created_by_id: row.try_get("created_by_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        revision: row.try_get("revision")?,
    })
}

fn record_from_row(row: &SqliteRow) -> Result<ApplicationRecord> {
    Ok(ApplicationRecord {
        application: application_from_row(row)?,
        assigned_to: user_summary(row, "assigned_to")?,
        created_by: user_summary(row, "created_by")?,
    })
}
