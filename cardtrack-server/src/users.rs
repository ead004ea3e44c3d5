//! User directory
//!
//! Accounts are soft-deleted only (`is_active = false`) so historical
//! assignment and audit references stay valid. Listing defaults to active
//! users. Credentials are not stored here; the identity provider in front of
//! the service authenticates callers and names them by user id.

use cardtrack_common::models::{Choice, NewUser, Principal, Role, User, UserPatch};
use cardtrack_common::{time, Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::info;

use crate::policy::{self, Operation};
use crate::rows::parse_stored;

const USER_COLUMNS: &str = "id, username, email, role, employee_id, department, phone_number, \
                            is_active, created_at, updated_at";

#[derive(Clone)]
pub struct UserDirectory {
    db: SqlitePool,
}

impl UserDirectory {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Identity boundary: map a caller's user id to an active principal
    pub async fn resolve_principal(&self, user_id: i64) -> Result<Principal> {
        let user = fetch_user(&self.db, user_id).await?;
        match user {
            Some(user) if user.is_active => Ok(Principal {
                id: user.id,
                role: user.role,
            }),
            Some(_) => Err(Error::Unauthenticated(format!("user {} is inactive", user_id))),
            None => Err(Error::Unauthenticated(format!("unknown user {}", user_id))),
        }
    }

    /// Seed an administrator without an acting principal (first-run setup)
    pub async fn bootstrap_admin(&self, username: &str, email: &str) -> Result<User> {
        let new_user = NewUser {
            username: username.to_string(),
            email: email.to_string(),
            role: Role::Admin,
            employee_id: None,
            department: None,
            phone_number: None,
        };
        let user = self.insert_user(new_user).await?;
        info!("Bootstrapped administrator {} (id {})", user.username, user.id);
        Ok(user)
    }

    pub async fn create_user(&self, new_user: NewUser, actor: &Principal) -> Result<User> {
        policy::require(actor, Operation::ManageUsers, None)?;
        let user = self.insert_user(new_user).await?;
        info!(
            actor = actor.id,
            "Created user {} (id {}, role {})",
            user.username,
            user.id,
            user.role
        );
        Ok(user)
    }

    async fn insert_user(&self, new_user: NewUser) -> Result<User> {
        validate_identity_fields(&new_user.username, &new_user.email)?;

        let now = time::now();
        let username = new_user.username.trim().to_string();
        let result = sqlx::query(
            r#"
            INSERT INTO users (
                username, email, role, employee_id, department, phone_number,
                is_active, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)
            "#,
        )
        .bind(&username)
        .bind(new_user.email.trim())
        .bind(new_user.role.as_str())
        .bind(&new_user.employee_id)
        .bind(&new_user.department)
        .bind(&new_user.phone_number)
        .bind(now)
        .bind(now)
        .execute(&self.db)
        .await
        .map_err(|e| {
            Error::from_write(e, || {
                format!("username, email or employee id of '{}' already in use", username)
            })
        })?;

        self.load(result.last_insert_rowid()).await
    }

    pub async fn get_user(&self, id: i64, actor: &Principal) -> Result<User> {
        policy::require(actor, Operation::ReadUser, Some(id))?;
        self.load(id).await
    }

    /// Administrators may change every field; officers only their own
    /// email, phone number and department.
    pub async fn update_user(&self, id: i64, patch: UserPatch, actor: &Principal) -> Result<User> {
        let touches_admin_fields = patch.username.is_some()
            || patch.role.is_some()
            || patch.employee_id.is_some()
            || patch.is_active.is_some();
        if touches_admin_fields {
            policy::require(actor, Operation::ManageUsers, Some(id))?;
        } else {
            policy::require(actor, Operation::UpdateOwnProfile, Some(id))?;
        }

        let mut user = self.load(id).await?;
        if let Some(username) = patch.username {
            user.username = username;
        }
        if let Some(email) = patch.email {
            user.email = email;
        }
        if let Some(role) = patch.role {
            user.role = role;
        }
        if let Some(employee_id) = patch.employee_id {
            user.employee_id = employee_id;
        }
        if let Some(department) = patch.department {
            user.department = department;
        }
        if let Some(phone_number) = patch.phone_number {
            user.phone_number = phone_number;
        }
        if let Some(is_active) = patch.is_active {
            user.is_active = is_active;
        }
        validate_identity_fields(&user.username, &user.email)?;
        user.updated_at = time::advance_past(user.updated_at);

        sqlx::query(
            r#"
            UPDATE users
            SET username = ?, email = ?, role = ?, employee_id = ?, department = ?,
                phone_number = ?, is_active = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(user.username.trim())
        .bind(user.email.trim())
        .bind(user.role.as_str())
        .bind(&user.employee_id)
        .bind(&user.department)
        .bind(&user.phone_number)
        .bind(user.is_active)
        .bind(user.updated_at)
        .bind(id)
        .execute(&self.db)
        .await
        .map_err(|e| {
            Error::from_write(e, || format!("username, email or employee id of user {} already in use", id))
        })?;

        info!(actor = actor.id, "Updated user {}", id);
        self.load(id).await
    }

    /// Soft delete. Applications already assigned to the user keep the
    /// reference; the user can no longer receive new assignments.
    pub async fn deactivate_user(&self, id: i64, actor: &Principal) -> Result<User> {
        let patch = UserPatch {
            is_active: Some(false),
            ..UserPatch::default()
        };
        self.update_user(id, patch, actor).await
    }

    /// Officers see only themselves; other roles see active users, or all
    /// users when `include_inactive` is set.
    pub async fn list_users(&self, actor: &Principal, include_inactive: bool) -> Result<Vec<User>> {
        if actor.role == Role::Officer {
            return Ok(vec![self.load(actor.id).await?]);
        }
        policy::require(actor, Operation::ListUsers, None)?;

        let sql = if include_inactive {
            format!("SELECT {} FROM users ORDER BY id", USER_COLUMNS)
        } else {
            format!("SELECT {} FROM users WHERE is_active = 1 ORDER BY id", USER_COLUMNS)
        };
        let rows = sqlx::query(&sql).fetch_all(&self.db).await?;
        rows.iter().map(user_from_row).collect()
    }

    /// Active officers, for assignment pickers
    pub async fn list_officers(&self, actor: &Principal) -> Result<Vec<User>> {
        policy::require(actor, Operation::ListUsers, None)?;
        let rows = sqlx::query(&format!(
            "SELECT {} FROM users WHERE role = 'OFFICER' AND is_active = 1 ORDER BY id",
            USER_COLUMNS
        ))
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(user_from_row).collect()
    }

    pub fn roles() -> Vec<Choice> {
        Role::choices()
    }

    async fn load(&self, id: i64) -> Result<User> {
        fetch_user(&self.db, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("user {}", id)))
    }
}

/// Fail with `InvalidAssignee` unless `user_id` is an active Officer
pub(crate) async fn require_assignable_officer(
    conn: &mut SqliteConnection,
    user_id: i64,
) -> Result<()> {
    let row = sqlx::query("SELECT role, is_active FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;

    let Some(row) = row else {
        return Err(Error::InvalidAssignee(format!("user {} does not exist", user_id)));
    };
    let role: Role = parse_stored(row.try_get("role")?)?;
    let is_active: bool = row.try_get("is_active")?;

    if role != Role::Officer {
        return Err(Error::InvalidAssignee(format!(
            "user {} has role {}, not OFFICER",
            user_id, role
        )));
    }
    if !is_active {
        return Err(Error::InvalidAssignee(format!("user {} is inactive", user_id)));
    }
    Ok(())
}

async fn fetch_user(db: &SqlitePool, id: i64) -> Result<Option<User>> {
    let row = sqlx::query(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
        .bind(id)
        .fetch_optional(db)
        .await?;
    row.as_ref().map(user_from_row).transpose()
}

fn user_from_row(row: &SqliteRow) -> Result<User> {
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        role: parse_stored(row.try_get("role")?)?,
        employee_id: row.try_get("employee_id")?,
        department: row.try_get("department")?,
        phone_number: row.try_get("phone_number")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn validate_identity_fields(username: &str, email: &str) -> Result<()> {
    if username.trim().is_empty() {
        return Err(Error::Validation("username is required".to_string()));
    }
    if !email.contains('@') {
        return Err(Error::Validation(format!("'{}' is not an email address", email)));
    }
    Ok(())
}
