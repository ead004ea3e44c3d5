//! Test helper utilities
//!
//! Shared fixtures for cardtrack-server integration tests. Every test gets
//! its own database in a temporary directory.

#![allow(dead_code)]

use cardtrack_common::db::init_database;
use cardtrack_common::models::{
    ApplicationRecord, CardPosition, CardType, ExtraColumns, NewApplication, NewUser, Principal,
    Role,
};
use cardtrack_server::audit::AuditLog;
use cardtrack_server::ingest::{RawValue, Row};
use cardtrack_server::users::UserDirectory;
use cardtrack_server::AppState;
use chrono::NaiveDate;
use sqlx::SqlitePool;
use tempfile::TempDir;

pub struct TestEnv {
    _dir: TempDir,
    pub pool: SqlitePool,
    pub state: AppState,
    pub admin: Principal,
}

impl TestEnv {
    pub async fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let pool = init_database(&dir.path().join("cardtrack.db"))
            .await
            .expect("Failed to initialize database");

        let admin_user = UserDirectory::new(pool.clone())
            .bootstrap_admin("admin", "admin@example.com")
            .await
            .expect("Failed to bootstrap admin");

        Self {
            _dir: dir,
            state: AppState::new(pool.clone()),
            pool,
            admin: Principal {
                id: admin_user.id,
                role: Role::Admin,
            },
        }
    }

    pub async fn user(&self, username: &str, role: Role) -> Principal {
        let user = self
            .state
            .users
            .create_user(
                NewUser {
                    username: username.to_string(),
                    email: format!("{}@example.com", username),
                    role,
                    employee_id: None,
                    department: None,
                    phone_number: None,
                },
                &self.admin,
            )
            .await
            .expect("Failed to create user");
        Principal { id: user.id, role }
    }

    pub async fn officer(&self, username: &str) -> Principal {
        self.user(username, Role::Officer).await
    }

    pub async fn viewer(&self, username: &str) -> Principal {
        self.user(username, Role::Viewer).await
    }

    pub async fn create_application(&self, app_id: &str) -> ApplicationRecord {
        self.state
            .applications
            .create(new_application(app_id), &self.admin)
            .await
            .expect("Failed to create application")
    }

    /// Create an application already assigned to `officer`
    pub async fn assigned_application(&self, app_id: &str, officer: &Principal) -> ApplicationRecord {
        let created = self.create_application(app_id).await;
        self.state
            .applications
            .assign(created.application.id, officer.id, &self.admin)
            .await
            .expect("Failed to assign application")
    }

    pub async fn audit_count(&self, application_id: i64) -> i64 {
        AuditLog::new(self.pool.clone())
            .count_for(application_id)
            .await
            .expect("Failed to count audit entries")
    }
}

pub fn new_application(app_id: &str) -> NewApplication {
    NewApplication {
        app_id: app_id.to_string(),
        date: date(2024, 6, 1),
        branch_code: "B01".to_string(),
        customer_name: format!("Customer {}", app_id),
        card_position: CardPosition::Main,
        card_type: CardType::Gold,
        remarks: None,
        work_on: None,
        inform_to: None,
        ipt: None,
        extra_columns: ExtraColumns::new(),
    }
}

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

pub fn row(cells: &[(&str, RawValue)]) -> Row {
    cells
        .iter()
        .map(|(column, value)| (column.to_string(), value.clone()))
        .collect()
}

/// Continuation upload row with the two required columns
pub fn continuation_row(app_id: &str, name: &str) -> Row {
    row(&[("App ID", app_id.into()), ("Name", name.into())])
}
