//! Tests for database initialization, migrations and storage-level guards
//!
//! Covers:
//! - Automatic database creation on first run, reopening on later runs
//! - Migration bookkeeping in schema_version
//! - Unique constraints and append-only triggers enforced by SQLite itself

use cardtrack_common::db::{get_schema_version, init_database, CURRENT_SCHEMA_VERSION};
use cardtrack_common::{time, Error};
use sqlx::SqlitePool;
use tempfile::TempDir;

async fn fresh_pool(dir: &TempDir) -> SqlitePool {
    init_database(&dir.path().join("cardtrack.db")).await.unwrap()
}

async fn insert_user(pool: &SqlitePool, username: &str) -> i64 {
    let now = time::now();
    sqlx::query(
        "INSERT INTO users (username, email, role, is_active, created_at, updated_at)
         VALUES (?, ?, 'ADMIN', 1, ?, ?)",
    )
    .bind(username)
    .bind(format!("{}@example.com", username))
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .unwrap()
    .last_insert_rowid()
}

async fn insert_application(pool: &SqlitePool, app_id: &str) -> Result<i64, sqlx::Error> {
    let now = time::now();
    let result = sqlx::query(
        "INSERT INTO applications (app_id, date, branch_code, customer_name, card_position,
             card_type, created_at, updated_at)
         VALUES (?, '2024-06-01', 'B01', 'Jane Roe', 'MAIN', 'GOLD', ?, ?)",
    )
    .bind(app_id)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

#[tokio::test]
async fn test_database_creation_when_missing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("sub").join("cardtrack.db");
    assert!(!db_path.exists());

    let result = init_database(&db_path).await;
    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("cardtrack.db");

    let pool1 = init_database(&db_path).await.unwrap();
    insert_application(&pool1, "APP1").await.unwrap();
    pool1.close().await;

    let pool2 = init_database(&db_path).await.unwrap();
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM applications")
        .fetch_one(&pool2)
        .await
        .unwrap();
    assert_eq!(count, 1, "Existing rows must survive reinitialization");
}

#[tokio::test]
async fn test_migrations_recorded() {
    let dir = TempDir::new().unwrap();
    let pool = fresh_pool(&dir).await;

    assert_eq!(get_schema_version(&pool).await.unwrap(), CURRENT_SCHEMA_VERSION);

    let triggers: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'trigger' ORDER BY name",
    )
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(
        triggers,
        vec![
            "applications_app_id_immutable",
            "applications_no_delete",
            "audit_entries_no_delete",
            "audit_entries_no_update",
        ]
    );
}

#[tokio::test]
async fn test_app_id_unique_at_storage_layer() {
    let dir = TempDir::new().unwrap();
    let pool = fresh_pool(&dir).await;

    insert_application(&pool, "APP20001").await.unwrap();
    let err = insert_application(&pool, "APP20001").await.unwrap_err();

    let mapped = Error::from_write(err, || "application APP20001".to_string());
    assert!(matches!(mapped, Error::DuplicateKey(_)), "got {:?}", mapped);
}

#[tokio::test]
async fn test_continuation_pair_unique_per_date() {
    let dir = TempDir::new().unwrap();
    let pool = fresh_pool(&dir).await;
    let insert = |date: &'static str| {
        let pool = pool.clone();
        async move {
            sqlx::query(
                "INSERT INTO continuation_records (app_id, upload_date, customer_name, created_at)
                 VALUES ('APP1', ?, 'Jane Roe', ?)",
            )
            .bind(date)
            .bind(time::now())
            .execute(&pool)
            .await
        }
    };

    insert("2024-06-01").await.unwrap();
    // Same app id on another date is a distinct batch
    insert("2024-06-02").await.unwrap();
    assert!(insert("2024-06-01").await.is_err());
}

#[tokio::test]
async fn test_audit_entries_are_append_only() {
    let dir = TempDir::new().unwrap();
    let pool = fresh_pool(&dir).await;
    let user_id = insert_user(&pool, "admin").await;
    let app_id = insert_application(&pool, "APP1").await.unwrap();

    let entry_id = sqlx::query(
        "INSERT INTO audit_entries (application_id, changed_by_id, action, timestamp)
         VALUES (?, ?, 'CREATE', ?)",
    )
    .bind(app_id)
    .bind(user_id)
    .bind(time::now())
    .execute(&pool)
    .await
    .unwrap()
    .last_insert_rowid();

    let update = sqlx::query("UPDATE audit_entries SET remarks = 'edited' WHERE id = ?")
        .bind(entry_id)
        .execute(&pool)
        .await;
    assert!(update.is_err(), "audit entries must reject UPDATE");

    let delete = sqlx::query("DELETE FROM audit_entries WHERE id = ?")
        .bind(entry_id)
        .execute(&pool)
        .await;
    assert!(delete.is_err(), "audit entries must reject DELETE");
}

#[tokio::test]
async fn test_applications_never_deleted_and_app_id_immutable() {
    let dir = TempDir::new().unwrap();
    let pool = fresh_pool(&dir).await;
    let id = insert_application(&pool, "APP1").await.unwrap();

    let delete = sqlx::query("DELETE FROM applications WHERE id = ?")
        .bind(id)
        .execute(&pool)
        .await;
    assert!(delete.is_err());

    let rename = sqlx::query("UPDATE applications SET app_id = 'APP2' WHERE id = ?")
        .bind(id)
        .execute(&pool)
        .await;
    assert!(rename.is_err());

    // Other columns stay writable
    sqlx::query("UPDATE applications SET status = 'PENDING' WHERE id = ?")
        .bind(id)
        .execute(&pool)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_enum_columns_checked() {
    let dir = TempDir::new().unwrap();
    let pool = fresh_pool(&dir).await;
    let id = insert_application(&pool, "APP1").await.unwrap();

    let result = sqlx::query("UPDATE applications SET status = 'LOST' WHERE id = ?")
        .bind(id)
        .execute(&pool)
        .await;
    assert!(result.is_err());
}
