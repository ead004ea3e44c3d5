//! Database schema migrations
//!
//! Versioned, idempotent schema changes applied on top of the baseline tables
//! created in [`crate::db::init`]. Progress is tracked in `schema_version`.
//!
//! # Migration Guidelines
//!
//! 1. **Never modify existing migrations** - databases in the field already ran them
//! 2. **Always add new migrations** - one function per schema change
//! 3. **Stay idempotent** - use `IF NOT EXISTS` or check `sqlite_master` first

use crate::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Current schema version
///
/// **IMPORTANT:** Increment this when adding new migrations
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Get current schema version from database
///
/// Returns 0 if schema_version table doesn't exist or has no rows
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name='schema_version'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("✓ Migration v1 completed");
    }

    if current_version < 2 {
        migrate_v2(pool).await?;
        set_schema_version(pool, 2).await?;
        info!("✓ Migration v2 completed");
    }

    Ok(())
}

/// Migration v1: append-only guards
///
/// Audit entries may never be updated or deleted, and applications are never
/// physically deleted. Enforced in the database so no code path can bypass it.
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v1: append-only guards");

    let statements = [
        r#"
        CREATE TRIGGER IF NOT EXISTS audit_entries_no_update
        BEFORE UPDATE ON audit_entries
        BEGIN
            SELECT RAISE(ABORT, 'audit entries are append-only');
        END
        "#,
        r#"
        CREATE TRIGGER IF NOT EXISTS audit_entries_no_delete
        BEFORE DELETE ON audit_entries
        BEGIN
            SELECT RAISE(ABORT, 'audit entries are append-only');
        END
        "#,
        r#"
        CREATE TRIGGER IF NOT EXISTS applications_no_delete
        BEFORE DELETE ON applications
        BEGIN
            SELECT RAISE(ABORT, 'applications are never deleted');
        END
        "#,
        r#"
        CREATE TRIGGER IF NOT EXISTS applications_app_id_immutable
        BEFORE UPDATE OF app_id ON applications
        WHEN NEW.app_id <> OLD.app_id
        BEGIN
            SELECT RAISE(ABORT, 'app_id is immutable');
        END
        "#,
    ];

    for sql in statements {
        sqlx::query(sql).execute(pool).await?;
    }

    Ok(())
}

/// Migration v2: lookup indexes for scoped listing, history and reconciliation
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v2: lookup indexes");

    let statements = [
        "CREATE INDEX IF NOT EXISTS idx_applications_assigned_to ON applications(assigned_to_id)",
        "CREATE INDEX IF NOT EXISTS idx_applications_status ON applications(status)",
        "CREATE INDEX IF NOT EXISTS idx_continuation_upload_date ON continuation_records(upload_date)",
        "CREATE INDEX IF NOT EXISTS idx_audit_application ON audit_entries(application_id, timestamp)",
    ];

    for sql in statements {
        sqlx::query(sql).execute(pool).await?;
    }

    Ok(())
}
