//! Integration tests for the application store, audit log and access policy
//!
//! Covers:
//! - Create / duplicate rejection and the CREATE audit entry
//! - Field-diff updates with one audit entry per non-empty diff
//! - Assignment rules (administrator only, active officers only)
//! - Ownership isolation for officers, read-only viewers
//! - Role-scoped listing, pagination and history ordering

mod helpers;

use cardtrack_common::models::{ApplicationPatch, ApplicationStatus, AuditAction, CardType};
use cardtrack_common::Error;
use cardtrack_server::applications::ApplicationFilter;
use helpers::{new_application, TestEnv};
use serde_json::{json, Value};

fn status_patch(status: ApplicationStatus) -> ApplicationPatch {
    ApplicationPatch {
        status: Some(status),
        ..ApplicationPatch::default()
    }
}

// =============================================================================
// Create
// =============================================================================

#[tokio::test]
async fn test_create_sets_initial_state_and_audits() {
    let env = TestEnv::new().await;

    let record = env.create_application("APP20001").await;
    let app = &record.application;
    assert_eq!(app.status, ApplicationStatus::Untouch);
    assert!(!app.continuation_matched);
    assert_eq!(app.assigned_to_id, None);
    assert_eq!(record.created_by.as_ref().map(|u| u.username.as_str()), Some("admin"));

    let history = env.state.applications.history(app.id, &env.admin).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].action, AuditAction::Create);
    assert!(history[0].old_value.is_none());
    let snapshot = history[0].new_value.as_ref().unwrap();
    assert_eq!(snapshot["app_id"], "APP20001");
    assert_eq!(snapshot["status"], "UNTOUCH");
}

#[tokio::test]
async fn test_duplicate_app_id_rejected_and_store_unchanged() {
    let env = TestEnv::new().await;
    let first = env.create_application("APP20001").await;

    let mut again = new_application("APP20001");
    again.customer_name = "Someone Else".to_string();
    let result = env.state.applications.create(again, &env.admin).await;
    assert!(matches!(result, Err(Error::DuplicateKey(_))), "got {:?}", result);

    let page = env
        .state
        .applications
        .list(&ApplicationFilter::default(), &env.admin)
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].application.customer_name, first.application.customer_name);
    assert_eq!(env.audit_count(first.application.id).await, 1);
}

#[tokio::test]
async fn test_concurrent_creates_yield_one_winner() {
    let env = TestEnv::new().await;

    let store_a = env.state.applications.clone();
    let store_b = env.state.applications.clone();
    let admin = env.admin;
    let (a, b) = tokio::join!(
        tokio::spawn(async move { store_a.create(new_application("APP-RACE"), &admin).await }),
        tokio::spawn(async move { store_b.create(new_application("APP-RACE"), &admin).await }),
    );
    let results = [a.unwrap(), b.unwrap()];

    let successes = results.iter().filter(|r| r.is_ok()).count();
    let duplicates = results
        .iter()
        .filter(|r| matches!(r, Err(Error::DuplicateKey(_))))
        .count();
    assert_eq!((successes, duplicates), (1, 1));

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM applications WHERE app_id = 'APP-RACE'")
        .fetch_one(&env.pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_create_validates_fields_and_requires_admin() {
    let env = TestEnv::new().await;
    let officer = env.officer("o1").await;

    let mut blank = new_application("APP1");
    blank.customer_name = "  ".to_string();
    assert!(matches!(
        env.state.applications.create(blank, &env.admin).await,
        Err(Error::Validation(_))
    ));

    assert!(matches!(
        env.state.applications.create(new_application("APP1"), &officer).await,
        Err(Error::Permission(_))
    ));
}

// =============================================================================
// Update and audit
// =============================================================================

#[tokio::test]
async fn test_scenario_create_assign_officer_sets_pending() {
    let env = TestEnv::new().await;
    let o1 = env.officer("o1").await;

    let created = env.create_application("APP20001").await;
    let id = created.application.id;
    env.state.applications.assign(id, o1.id, &env.admin).await.unwrap();

    let updated = env
        .state
        .applications
        .update(id, status_patch(ApplicationStatus::Pending), &o1)
        .await
        .unwrap();
    assert_eq!(updated.application.status, ApplicationStatus::Pending);

    // Newest first
    let history = env.state.applications.history(id, &o1).await.unwrap();
    let actions: Vec<AuditAction> = history.iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![AuditAction::StatusChange, AuditAction::Assign, AuditAction::Create]
    );

    let status_entry = &history[0];
    assert_eq!(status_entry.old_value, Some(json!({"status": "UNTOUCH"})));
    assert_eq!(status_entry.new_value, Some(json!({"status": "PENDING"})));
    assert_eq!(status_entry.changed_by_id, Some(o1.id));
    assert_eq!(status_entry.changed_by.as_ref().unwrap().username, "o1");
    assert!(history[0].timestamp > history[1].timestamp);
    assert!(history[1].timestamp > history[2].timestamp);
}

#[tokio::test]
async fn test_audit_entry_matches_stored_values() {
    let env = TestEnv::new().await;
    let o1 = env.officer("o1").await;
    let record = env.assigned_application("APP1", &o1).await;
    let id = record.application.id;

    let patch: ApplicationPatch = serde_json::from_value(json!({
        "remarks": "called customer",
        "work_on": "KYC docs",
    }))
    .unwrap();
    let updated = env.state.applications.update(id, patch, &o1).await.unwrap();
    assert!(updated.application.updated_at > record.application.updated_at);
    assert_eq!(updated.application.revision, record.application.revision + 1);

    let history = env.state.applications.history(id, &env.admin).await.unwrap();
    let latest = &history[0];
    assert_eq!(latest.action, AuditAction::Update);
    assert_eq!(
        latest.old_value,
        Some(json!({"remarks": Value::Null, "work_on": Value::Null}))
    );
    assert_eq!(
        latest.new_value,
        Some(json!({"remarks": "called customer", "work_on": "KYC docs"}))
    );
    assert_eq!(latest.timestamp, updated.application.updated_at);
}

#[tokio::test]
async fn test_update_without_changes_writes_nothing() {
    let env = TestEnv::new().await;
    let record = env.create_application("APP1").await;
    let id = record.application.id;

    let unchanged = env
        .state
        .applications
        .update(id, status_patch(ApplicationStatus::Untouch), &env.admin)
        .await
        .unwrap();

    assert_eq!(unchanged.application.updated_at, record.application.updated_at);
    assert_eq!(env.audit_count(id).await, 1);
}

#[tokio::test]
async fn test_update_unknown_id_is_not_found() {
    let env = TestEnv::new().await;
    let result = env
        .state
        .applications
        .update(9999, status_patch(ApplicationStatus::Done), &env.admin)
        .await;
    assert!(matches!(result, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_clearing_a_field_is_audited() {
    let env = TestEnv::new().await;
    let mut new_app = new_application("APP1");
    new_app.remarks = Some("initial".to_string());
    let record = env.state.applications.create(new_app, &env.admin).await.unwrap();
    let id = record.application.id;

    let patch: ApplicationPatch = serde_json::from_value(json!({"remarks": null})).unwrap();
    let updated = env.state.applications.update(id, patch, &env.admin).await.unwrap();
    assert_eq!(updated.application.remarks, None);

    let history = env.state.applications.history(id, &env.admin).await.unwrap();
    assert_eq!(history[0].old_value, Some(json!({"remarks": "initial"})));
    assert_eq!(history[0].new_value, Some(json!({"remarks": Value::Null})));
}

// =============================================================================
// Assignment
// =============================================================================

#[tokio::test]
async fn test_assign_rejects_non_officers_and_inactive_officers() {
    let env = TestEnv::new().await;
    let viewer = env.viewer("v1").await;
    let o1 = env.officer("o1").await;
    let id = env.create_application("APP1").await.application.id;

    for target in [viewer.id, env.admin.id, 4242] {
        let result = env.state.applications.assign(id, target, &env.admin).await;
        assert!(matches!(result, Err(Error::InvalidAssignee(_))), "target {}", target);
    }

    env.state.users.deactivate_user(o1.id, &env.admin).await.unwrap();
    let result = env.state.applications.assign(id, o1.id, &env.admin).await;
    assert!(matches!(result, Err(Error::InvalidAssignee(_))));
    assert_eq!(env.audit_count(id).await, 1);
}

#[tokio::test]
async fn test_update_with_assignee_validates_like_assign() {
    let env = TestEnv::new().await;
    let viewer = env.viewer("v1").await;
    let o1 = env.officer("o1").await;
    let id = env.create_application("APP1").await.application.id;

    let to_viewer: ApplicationPatch =
        serde_json::from_value(json!({"assigned_to": viewer.id})).unwrap();
    assert!(matches!(
        env.state.applications.update(id, to_viewer, &env.admin).await,
        Err(Error::InvalidAssignee(_))
    ));

    let to_officer: ApplicationPatch =
        serde_json::from_value(json!({"assigned_to": o1.id})).unwrap();
    let record = env.state.applications.update(id, to_officer, &env.admin).await.unwrap();
    assert_eq!(record.assigned_to.as_ref().map(|u| u.id), Some(o1.id));

    let history = env.state.applications.history(id, &env.admin).await.unwrap();
    assert_eq!(history[0].action, AuditAction::Assign);
    assert_eq!(history[0].new_value, Some(json!({"assigned_to": o1.id})));
}

#[tokio::test]
async fn test_create_and_assign_entries_share_assignee_key() {
    let env = TestEnv::new().await;
    let o1 = env.officer("o1").await;
    let id = env.assigned_application("APP1", &o1).await.application.id;

    let history = env.state.applications.history(id, &env.admin).await.unwrap();
    assert_eq!(history.len(), 2);
    let (assign, create) = (&history[0], &history[1]);
    assert_eq!(create.action, AuditAction::Create);
    assert_eq!(assign.action, AuditAction::Assign);

    let created = create.new_value.as_ref().unwrap();
    assert_eq!(created["assigned_to"], serde_json::Value::Null);
    assert!(created.get("assigned_to_id").is_none());
    assert_eq!(assign.old_value, Some(json!({"assigned_to": null})));
    assert_eq!(assign.new_value, Some(json!({"assigned_to": o1.id})));
}

#[tokio::test]
async fn test_deactivated_officer_keeps_existing_assignment() {
    let env = TestEnv::new().await;
    let o1 = env.officer("o1").await;
    let record = env.assigned_application("APP1", &o1).await;

    env.state.users.deactivate_user(o1.id, &env.admin).await.unwrap();

    let reloaded = env.state.applications.get(record.application.id, &env.admin).await.unwrap();
    assert_eq!(reloaded.application.assigned_to_id, Some(o1.id));
    assert!(!reloaded.assigned_to.unwrap().is_active);
}

// =============================================================================
// Access policy
// =============================================================================

#[tokio::test]
async fn test_officer_cannot_touch_unassigned_application() {
    let env = TestEnv::new().await;
    let o1 = env.officer("o1").await;
    let o2 = env.officer("o2").await;
    let record = env.assigned_application("APP20001", &o1).await;
    let id = record.application.id;
    let audit_before = env.audit_count(id).await;

    let patches = [
        status_patch(ApplicationStatus::Pending),
        serde_json::from_value::<ApplicationPatch>(json!({"remarks": "x"})).unwrap(),
        serde_json::from_value::<ApplicationPatch>(json!({"ipt": "IPT-1"})).unwrap(),
        serde_json::from_value::<ApplicationPatch>(json!({"ipt": "X".repeat(51)})).unwrap(),
    ];
    for patch in patches {
        let result = env.state.applications.update(id, patch, &o2).await;
        assert!(matches!(result, Err(Error::Permission(_))), "got {:?}", result);
    }
    assert!(matches!(
        env.state.applications.get(id, &o2).await,
        Err(Error::Permission(_))
    ));
    assert!(matches!(
        env.state.applications.history(id, &o2).await,
        Err(Error::Permission(_))
    ));

    let stored = env.state.applications.get(id, &env.admin).await.unwrap();
    assert_eq!(stored.application, record.application);
    assert_eq!(env.audit_count(id).await, audit_before);
}

#[tokio::test]
async fn test_failed_audit_write_rolls_back_update() {
    let env = TestEnv::new().await;
    let o1 = env.officer("o1").await;
    let record = env.assigned_application("APP1", &o1).await;
    let id = record.application.id;

    sqlx::query(
        r#"
        CREATE TRIGGER fail_status_change
        BEFORE INSERT ON audit_entries
        WHEN NEW.action = 'STATUS_CHANGE'
        BEGIN
            SELECT RAISE(ABORT, 'audit write failed');
        END
        "#,
    )
    .execute(&env.pool)
    .await
    .unwrap();

    let result = env
        .state
        .applications
        .update(id, status_patch(ApplicationStatus::Pending), &o1)
        .await;
    assert!(matches!(result, Err(Error::Database(_))), "got {:?}", result);

    let stored = env.state.applications.get(id, &env.admin).await.unwrap();
    assert_eq!(stored.application, record.application);
    assert_eq!(env.audit_count(id).await, 2);
}

#[tokio::test]
async fn test_officer_cannot_reassign_even_own_application() {
    let env = TestEnv::new().await;
    let o1 = env.officer("o1").await;
    let o2 = env.officer("o2").await;
    let id = env.assigned_application("APP1", &o1).await.application.id;

    let patch: ApplicationPatch = serde_json::from_value(json!({"assigned_to": o2.id})).unwrap();
    assert!(matches!(
        env.state.applications.update(id, patch, &o1).await,
        Err(Error::Permission(_))
    ));
    assert!(matches!(
        env.state.applications.assign(id, o2.id, &o1).await,
        Err(Error::Permission(_))
    ));
}

#[tokio::test]
async fn test_viewer_reads_everything_writes_nothing() {
    let env = TestEnv::new().await;
    let viewer = env.viewer("v1").await;
    let id = env.create_application("APP1").await.application.id;

    assert!(env.state.applications.get(id, &viewer).await.is_ok());
    assert!(env.state.applications.history(id, &viewer).await.is_ok());
    assert!(matches!(
        env.state
            .applications
            .update(id, status_patch(ApplicationStatus::Done), &viewer)
            .await,
        Err(Error::Permission(_))
    ));
}

// =============================================================================
// Listing
// =============================================================================

#[tokio::test]
async fn test_list_is_scoped_for_officers() {
    let env = TestEnv::new().await;
    let o1 = env.officer("o1").await;
    let o2 = env.officer("o2").await;
    env.assigned_application("APP1", &o1).await;
    env.assigned_application("APP2", &o2).await;
    env.create_application("APP3").await;

    // An officer asking for someone else's rows still only sees their own
    let filter = ApplicationFilter {
        assigned_to: Some(o2.id),
        ..ApplicationFilter::default()
    };
    let page = env.state.applications.list(&filter, &o1).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].application.app_id, "APP1");

    let page = env.state.applications.list(&filter, &env.admin).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].application.app_id, "APP2");

    let unmatched = env.state.applications.unmatched(&o2).await.unwrap();
    assert_eq!(unmatched.len(), 1);
    assert_eq!(unmatched[0].application.app_id, "APP2");
}

#[tokio::test]
async fn test_list_filters_and_pagination() {
    let env = TestEnv::new().await;
    for n in 0..25 {
        let mut new_app = new_application(&format!("APP{:03}", n));
        if n % 5 == 0 {
            new_app.card_type = CardType::Platinum;
        }
        env.state.applications.create(new_app, &env.admin).await.unwrap();
    }

    let page = env
        .state
        .applications
        .list(&ApplicationFilter::default(), &env.admin)
        .await
        .unwrap();
    assert_eq!(page.total, 25);
    assert_eq!(page.items.len(), 20);
    assert_eq!(page.pages, 2);

    let second = ApplicationFilter {
        page: 2,
        ..ApplicationFilter::default()
    };
    let page = env.state.applications.list(&second, &env.admin).await.unwrap();
    assert_eq!(page.items.len(), 5);
    assert_eq!(page.current_page, 2);

    let platinum = ApplicationFilter {
        card_type: Some(CardType::Platinum),
        ..ApplicationFilter::default()
    };
    let page = env.state.applications.list(&platinum, &env.admin).await.unwrap();
    assert_eq!(page.total, 5);
    assert!(page
        .items
        .iter()
        .all(|r| r.application.card_type == CardType::Platinum));
}
