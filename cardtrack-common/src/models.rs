//! Domain models shared by the store, the engines and the HTTP layer

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Unrecognized source columns, captured verbatim (column name → cell text)
pub type ExtraColumns = BTreeMap<String, String>;

/// Selectable value with its display label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Choice {
    pub value: &'static str,
    pub label: &'static str,
}

/// Closed enumeration stored as upper-case text.
///
/// Parsing is exact: unknown values are rejected with `Error::Validation`.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $what:literal {
            $($variant:ident => $text:literal, $label:literal;)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }

            pub fn label(&self) -> &'static str {
                match self {
                    $($name::$variant => $label,)+
                }
            }

            pub fn choices() -> Vec<Choice> {
                Self::ALL
                    .iter()
                    .map(|v| Choice { value: v.as_str(), label: v.label() })
                    .collect()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(Error::Validation(format!(
                        "invalid {} '{}' (expected one of: {})",
                        $what,
                        other,
                        [$($text),+].join(", ")
                    ))),
                }
            }
        }
    };
}

text_enum! {
    /// Caller role, governs read/write scope
    Role, "role" {
        Admin => "ADMIN", "Administrator";
        Officer => "OFFICER", "Officer";
        Viewer => "VIEWER", "Viewer";
    }
}

text_enum! {
    /// Workflow status of an application (initial: `Untouch`)
    ApplicationStatus, "status" {
        Untouch => "UNTOUCH", "Untouched";
        Pending => "PENDING", "Pending";
        Hold => "HOLD", "Hold";
        Done => "DONE", "Done";
    }
}

text_enum! {
    CardPosition, "card position" {
        Main => "MAIN", "Main Card";
        Supple => "SUPPLE", "Supplementary Card";
    }
}

text_enum! {
    CardType, "card type" {
        Classic => "CLASSIC", "Classic";
        Gold => "GOLD", "Gold";
        Platinum => "PLATINUM", "Platinum";
    }
}

text_enum! {
    /// Audit entry tag
    AuditAction, "audit action" {
        Create => "CREATE", "Created";
        Update => "UPDATE", "Updated";
        Assign => "ASSIGN", "Assigned";
        StatusChange => "STATUS_CHANGE", "Status Changed";
        RemarkAdded => "REMARK_ADDED", "Remark Added";
    }
}

/// The acting caller, as supplied by the identity provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: i64,
    pub role: Role,
}

/// User account. Never physically deleted; `is_active = false` is a soft delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub employee_id: Option<String>,
    pub department: Option<String>,
    pub phone_number: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Nested user reference embedded in application and audit payloads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
    pub role: Role,
    pub employee_id: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    #[serde(default = "default_new_user_role")]
    pub role: Role,
    #[serde(default)]
    pub employee_id: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
}

fn default_new_user_role() -> Role {
    Role::Officer
}

/// Partial user update. Inner `None` on a nullable field clears it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserPatch {
    pub username: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
    #[serde(default, deserialize_with = "double_option")]
    pub employee_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub department: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub phone_number: Option<Option<String>>,
    pub is_active: Option<bool>,
}

/// One physical application form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: i64,
    pub app_id: String,
    pub date: NaiveDate,
    pub branch_code: String,
    pub customer_name: String,
    pub card_position: CardPosition,
    pub card_type: CardType,
    pub status: ApplicationStatus,
    pub remarks: Option<String>,
    pub work_on: Option<String>,
    pub inform_to: Option<String>,
    pub ipt: Option<String>,
    pub assigned_to_id: Option<i64>,
    pub continuation_matched: bool,
    pub continuation_remarks: Option<String>,
    pub extra_columns: ExtraColumns,
    pub created_by_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency counter, bumped with every mutation
    pub revision: i64,
}

/// Application payload with expanded user references
#[derive(Debug, Clone, Serialize)]
pub struct ApplicationRecord {
    #[serde(flatten)]
    pub application: Application,
    pub assigned_to: Option<UserSummary>,
    pub created_by: Option<UserSummary>,
}

/// Fields accepted when creating an application
#[derive(Debug, Clone, Deserialize)]
pub struct NewApplication {
    pub app_id: String,
    pub date: NaiveDate,
    pub branch_code: String,
    pub customer_name: String,
    pub card_position: CardPosition,
    pub card_type: CardType,
    #[serde(default)]
    pub remarks: Option<String>,
    #[serde(default)]
    pub work_on: Option<String>,
    #[serde(default)]
    pub inform_to: Option<String>,
    #[serde(default)]
    pub ipt: Option<String>,
    #[serde(default)]
    pub extra_columns: ExtraColumns,
}

impl NewApplication {
    /// Field-level checks (required text present, column widths respected)
    pub fn validate(&self) -> crate::Result<()> {
        require_text("app_id", &self.app_id, 20)?;
        require_text("branch_code", &self.branch_code, 10)?;
        require_text("customer_name", &self.customer_name, 255)?;
        limit_text("work_on", self.work_on.as_deref(), 100)?;
        limit_text("inform_to", self.inform_to.as_deref(), 100)?;
        limit_text("ipt", self.ipt.as_deref(), 50)?;
        Ok(())
    }
}

/// Column patch for `update`. Only present keys take part in the diff;
/// inner `None` on a nullable field clears it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApplicationPatch {
    pub status: Option<ApplicationStatus>,
    #[serde(default, deserialize_with = "double_option")]
    pub remarks: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub work_on: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub inform_to: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub ipt: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub continuation_remarks: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub assigned_to: Option<Option<i64>>,
}

impl ApplicationPatch {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.remarks.is_none()
            && self.work_on.is_none()
            && self.inform_to.is_none()
            && self.ipt.is_none()
            && self.continuation_remarks.is_none()
            && self.assigned_to.is_none()
    }

    pub fn validate(&self) -> crate::Result<()> {
        limit_text("work_on", self.work_on.as_ref().and_then(|v| v.as_deref()), 100)?;
        limit_text("inform_to", self.inform_to.as_ref().and_then(|v| v.as_deref()), 100)?;
        limit_text("ipt", self.ipt.as_ref().and_then(|v| v.as_deref()), 50)?;
        Ok(())
    }
}

/// Externally uploaded cross-check entry, unique per `(app_id, upload_date)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuationRecord {
    pub id: i64,
    pub app_id: String,
    pub upload_date: NaiveDate,
    pub customer_name: String,
    pub branch_code: String,
    pub extra_columns: ExtraColumns,
    pub uploaded_by_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewContinuationRecord {
    pub app_id: String,
    pub upload_date: NaiveDate,
    pub customer_name: String,
    #[serde(default)]
    pub branch_code: String,
    #[serde(default)]
    pub extra_columns: ExtraColumns,
}

/// Immutable record of one mutation
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: i64,
    pub application_id: i64,
    pub changed_by_id: Option<i64>,
    pub changed_by: Option<UserSummary>,
    pub action: AuditAction,
    pub old_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
    pub remarks: Option<String>,
    pub timestamp: DateTime<Utc>,
}

fn require_text(field: &str, value: &str, max_len: usize) -> crate::Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("{} is required", field)));
    }
    limit_text(field, Some(value), max_len)
}

fn limit_text(field: &str, value: Option<&str>, max_len: usize) -> crate::Result<()> {
    match value {
        Some(v) if v.chars().count() > max_len => Err(Error::Validation(format!(
            "{} exceeds {} characters",
            field, max_len
        ))),
        _ => Ok(()),
    }
}

/// Distinguishes an absent key (`None`) from an explicit `null` (`Some(None)`)
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
