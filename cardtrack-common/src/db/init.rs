//! Database initialization
//!
//! Creates the database file and baseline schema on first run, then applies
//! versioned migrations. Safe to call on every startup.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// How long a writer waits on SQLite's lock before failing the unit
const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Foreign keys, WAL and busy timeout are per-connection settings, so they
    // go on the connect options rather than a one-off PRAGMA.
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // Baseline schema (idempotent)
    create_schema_version_table(&pool).await?;
    create_users_table(&pool).await?;
    create_applications_table(&pool).await?;
    create_continuation_records_table(&pool).await?;
    create_audit_entries_table(&pool).await?;

    crate::db::migrations::run_migrations(&pool).await?;

    Ok(pool)
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_users_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            role TEXT NOT NULL DEFAULT 'OFFICER'
                CHECK (role IN ('ADMIN', 'OFFICER', 'VIEWER')),
            employee_id TEXT UNIQUE,
            department TEXT,
            phone_number TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the applications table
///
/// `app_id` uniqueness is enforced here so racing creates cannot both succeed.
async fn create_applications_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS applications (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            app_id TEXT NOT NULL UNIQUE,
            date DATE NOT NULL,
            branch_code TEXT NOT NULL,
            customer_name TEXT NOT NULL,
            card_position TEXT NOT NULL CHECK (card_position IN ('MAIN', 'SUPPLE')),
            card_type TEXT NOT NULL CHECK (card_type IN ('CLASSIC', 'GOLD', 'PLATINUM')),
            status TEXT NOT NULL DEFAULT 'UNTOUCH'
                CHECK (status IN ('UNTOUCH', 'PENDING', 'HOLD', 'DONE')),
            remarks TEXT,
            work_on TEXT,
            inform_to TEXT,
            ipt TEXT,
            assigned_to_id INTEGER REFERENCES users(id),
            continuation_matched INTEGER NOT NULL DEFAULT 0,
            continuation_remarks TEXT,
            extra_columns TEXT NOT NULL DEFAULT '{}',
            created_by_id INTEGER REFERENCES users(id),
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP NOT NULL,
            revision INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the continuation_records table
///
/// Unrecognized upload columns are kept as a JSON document in `extra_columns`.
async fn create_continuation_records_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS continuation_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            app_id TEXT NOT NULL,
            upload_date DATE NOT NULL,
            customer_name TEXT NOT NULL,
            branch_code TEXT NOT NULL DEFAULT '',
            extra_columns TEXT NOT NULL DEFAULT '{}',
            uploaded_by_id INTEGER REFERENCES users(id),
            created_at TIMESTAMP NOT NULL,
            UNIQUE (app_id, upload_date)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_audit_entries_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            application_id INTEGER NOT NULL REFERENCES applications(id),
            changed_by_id INTEGER REFERENCES users(id),
            action TEXT NOT NULL
                CHECK (action IN ('CREATE', 'UPDATE', 'ASSIGN', 'STATUS_CHANGE', 'REMARK_ADDED')),
            old_value TEXT,
            new_value TEXT,
            remarks TEXT,
            timestamp TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
