//! Access policy
//!
//! The single decision point mapping (role, ownership, operation) to
//! allow/deny. Pure: no I/O, no side effects. Every engine operation consults
//! it before touching state, so permission logic cannot diverge between
//! call sites.

use cardtrack_common::models::{Principal, Role};
use cardtrack_common::{Error, Result};

/// Operations gated by the policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Read one application (or its audit history)
    ReadApplication,
    /// Write workflow fields (status, remarks, tracking fields, match override)
    UpdateApplication,
    /// Change `assigned_to`
    AssignApplication,
    /// Create a single application directly
    CreateApplication,
    /// Bulk application intake or continuation upload
    IngestBatch,
    /// Run reconciliation for an upload date
    Reconcile,
    /// Browse continuation records and cross-check summaries
    ReadContinuation,
    /// Read a user profile (resource owner = the profile's user id)
    ReadUser,
    /// Enumerate users or officers
    ListUsers,
    /// Edit contact fields of a profile (resource owner = the profile's user id)
    UpdateOwnProfile,
    /// Create users, change roles, deactivate
    ManageUsers,
}

impl Operation {
    fn is_mutation(self) -> bool {
        matches!(
            self,
            Operation::UpdateApplication
                | Operation::AssignApplication
                | Operation::CreateApplication
                | Operation::IngestBatch
                | Operation::Reconcile
                | Operation::UpdateOwnProfile
                | Operation::ManageUsers
        )
    }
}

/// Outcome of a policy query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(String),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    /// Turn a denial into `Error::Permission`
    pub fn into_result(self) -> Result<()> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny(reason) => Err(Error::Permission(reason)),
        }
    }
}

/// Decide whether `principal_id` acting as `role` may perform `operation` on a
/// resource owned by `resource_owner` (the assignee for applications, the
/// profile's user for user operations).
pub fn authorize(
    role: Role,
    principal_id: i64,
    operation: Operation,
    resource_owner: Option<i64>,
) -> Decision {
    match role {
        Role::Admin => Decision::Allow,
        Role::Viewer => {
            if operation.is_mutation() {
                Decision::Deny(format!("viewers cannot perform {:?}", operation))
            } else {
                Decision::Allow
            }
        }
        Role::Officer => officer_decision(principal_id, operation, resource_owner),
    }
}

fn officer_decision(principal_id: i64, operation: Operation, owner: Option<i64>) -> Decision {
    let owns = owner == Some(principal_id);
    match operation {
        Operation::ReadApplication | Operation::UpdateApplication => {
            if owns {
                Decision::Allow
            } else {
                Decision::Deny("application is not assigned to you".to_string())
            }
        }
        Operation::ReadUser | Operation::UpdateOwnProfile => {
            if owns {
                Decision::Allow
            } else {
                Decision::Deny("officers may only access their own profile".to_string())
            }
        }
        Operation::ReadContinuation => Decision::Allow,
        Operation::AssignApplication
        | Operation::CreateApplication
        | Operation::IngestBatch
        | Operation::Reconcile
        | Operation::ListUsers
        | Operation::ManageUsers => {
            Decision::Deny(format!("{:?} requires the administrator role", operation))
        }
    }
}

/// Convenience wrapper: authorize a principal, failing with `Error::Permission`
pub fn require(
    principal: &Principal,
    operation: Operation,
    resource_owner: Option<i64>,
) -> Result<()> {
    let decision = authorize(principal.role, principal.id, operation, resource_owner);
    if let Decision::Deny(reason) = &decision {
        tracing::warn!(
            principal = principal.id,
            role = %principal.role,
            ?operation,
            "Access denied: {}",
            reason
        );
    }
    decision.into_result()
}
