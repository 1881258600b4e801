//! OpenCatalogStore interface tests.
//!
//! These tests verify the contract of the OpenCatalogStore trait.
//! Each storage implementation should run these tests. Every test uses its
//! own source IDs and process keys so they can share one database.

use chrono::Utc;

use opencatalog::model::{
    AuditNode, AuditState, MutationGuard, NewRecord, OpenStatus, RecordMutation,
};
use opencatalog::storage::{OpenCatalogStore, StorageError};

const UPDATER: u64 = 7;

fn node(id: &str) -> AuditNode {
    AuditNode {
        id: id.to_string(),
        name: format!("Node {id}"),
    }
}

// =============================================================================
// create / get tests
// =============================================================================

pub async fn test_create_and_get<S: OpenCatalogStore>(store: &S) {
    let now = Utc::now();
    let created = store
        .create(NewRecord::auditing("test_src_create", 11, "test_proc_create", now, UPDATER))
        .await
        .expect("create should succeed");

    let fetched = store
        .get_by_id(created.id)
        .await
        .expect("get should succeed")
        .expect("record should exist");

    assert_eq!(fetched.id, created.id);
    assert_eq!(fetched.source_id, "test_src_create");
    assert_eq!(fetched.apply_sequence, Some(11));
    assert_eq!(fetched.audit_state, AuditState::Auditing);
    assert_eq!(fetched.open_status, OpenStatus::NotOpen);
    assert_eq!(fetched.process_definition_key.as_deref(), Some("test_proc_create"));
    assert_eq!(fetched.updater_id, UPDATER);
    assert!(fetched.open_at.is_none());
    assert!(fetched.audit_node.is_none());

    let by_source = store
        .get_by_source_id("test_src_create")
        .await
        .unwrap()
        .expect("record should be found by source");
    assert_eq!(by_source.id, created.id);
}

pub async fn test_create_opened_sets_open_at<S: OpenCatalogStore>(store: &S) {
    let now = Utc::now();
    let created = store
        .create(NewRecord::opened("test_src_opened", now, UPDATER))
        .await
        .unwrap();

    let fetched = store.get_by_id(created.id).await.unwrap().unwrap();
    assert_eq!(fetched.open_status, OpenStatus::Opened);
    assert_eq!(fetched.audit_state, AuditState::Pass);
    assert_eq!(fetched.open_at, Some(now));
    assert!(fetched.apply_sequence.is_none());
    assert!(fetched.is_consistent());
}

pub async fn test_get_nonexistent<S: OpenCatalogStore>(store: &S) {
    assert!(store.get_by_id(987_654_321).await.unwrap().is_none());
    assert!(store
        .get_by_source_id("test_src_nonexistent")
        .await
        .unwrap()
        .is_none());
}

pub async fn test_create_duplicate_source_conflicts<S: OpenCatalogStore>(store: &S) {
    let now = Utc::now();
    store
        .create(NewRecord::opened("test_src_dup", now, UPDATER))
        .await
        .unwrap();

    let result = store
        .create(NewRecord::auditing("test_src_dup", 1, "test_proc_dup", now, UPDATER))
        .await;
    assert!(
        matches!(result, Err(StorageError::Conflict(_))),
        "second live record for a source should conflict, got {result:?}"
    );
}

// =============================================================================
// transaction tests
// =============================================================================

pub async fn test_rollback_discards_create<S: OpenCatalogStore>(store: &S) {
    let mut tx = store.begin().await.unwrap();
    let created = tx
        .create(NewRecord::opened("test_src_rollback", Utc::now(), UPDATER))
        .await
        .unwrap();
    assert!(
        tx.get_by_id(created.id).await.unwrap().is_some(),
        "transaction should see its own write"
    );
    tx.rollback().await.unwrap();

    assert!(store.get_by_id(created.id).await.unwrap().is_none());
    assert!(store
        .get_by_source_id("test_src_rollback")
        .await
        .unwrap()
        .is_none());
}

pub async fn test_commit_publishes_create<S: OpenCatalogStore>(store: &S) {
    let mut tx = store.begin().await.unwrap();
    let created = tx
        .create(NewRecord::opened("test_src_commit", Utc::now(), UPDATER))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    assert!(store.get_by_id(created.id).await.unwrap().is_some());
}

pub async fn test_finished_transaction_rejects_use<S: OpenCatalogStore>(store: &S) {
    let mut tx = store.begin().await.unwrap();
    tx.commit().await.unwrap();

    let result = tx.get_by_id(1).await;
    assert!(matches!(result, Err(StorageError::TransactionClosed)));
}

pub async fn test_save_overwrites_fields<S: OpenCatalogStore>(store: &S) {
    let now = Utc::now();
    let mut record = store
        .create(NewRecord::opened("test_src_save", now, UPDATER))
        .await
        .unwrap();

    record.mark_auditing(42, "test_proc_save", Utc::now(), 9);
    record.audit_advice = Some("needs review".to_string());
    store.save(&record).await.unwrap();

    let fetched = store.get_by_id(record.id).await.unwrap().unwrap();
    assert_eq!(fetched.audit_state, AuditState::Auditing);
    assert_eq!(fetched.open_status, OpenStatus::NotOpen);
    assert_eq!(fetched.apply_sequence, Some(42));
    assert_eq!(fetched.process_definition_key.as_deref(), Some("test_proc_save"));
    assert_eq!(fetched.audit_advice.as_deref(), Some("needs review"));
    assert_eq!(fetched.updater_id, 9);
    assert_eq!(fetched.created_at, now);
}

pub async fn test_save_missing_is_not_found<S: OpenCatalogStore>(store: &S) {
    let mut record = NewRecord::opened("test_src_save_missing", Utc::now(), UPDATER)
        .into_record(987_654_322);
    record.audit_advice = Some("ghost".to_string());

    let result = store.save(&record).await;
    assert!(matches!(result, Err(StorageError::NotFound(987_654_322))));
}

// =============================================================================
// delete tests
// =============================================================================

pub async fn test_delete_hides_record<S: OpenCatalogStore>(store: &S) {
    let created = store
        .create(NewRecord::opened("test_src_delete", Utc::now(), UPDATER))
        .await
        .unwrap();

    assert!(store.delete(created.id, UPDATER).await.unwrap());
    assert!(store.get_by_id(created.id).await.unwrap().is_none());
    assert!(store
        .get_by_source_id("test_src_delete")
        .await
        .unwrap()
        .is_none());

    assert!(
        !store.delete(created.id, UPDATER).await.unwrap(),
        "second delete should report nothing deleted"
    );
}

pub async fn test_recreate_after_delete<S: OpenCatalogStore>(store: &S) {
    let first = store
        .create(NewRecord::opened("test_src_recreate", Utc::now(), UPDATER))
        .await
        .unwrap();
    store.delete(first.id, UPDATER).await.unwrap();

    let second = store
        .create(NewRecord::auditing("test_src_recreate", 5, "test_proc_recreate", Utc::now(), UPDATER))
        .await
        .expect("a deleted record should not block a new one");

    assert_ne!(second.id, first.id);
    let live = store
        .get_by_source_id("test_src_recreate")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(live.id, second.id);
}

// =============================================================================
// apply_by_correlation tests
// =============================================================================

pub async fn test_apply_matching_sequence<S: OpenCatalogStore>(store: &S) {
    let created = store
        .create(NewRecord::auditing("test_src_apply", 21, "test_proc_apply", Utc::now(), UPDATER))
        .await
        .unwrap();

    let now = Utc::now();
    let applied = store
        .apply_by_correlation(created.id, 21, &MutationGuard::while_auditing(), &RecordMutation::pass(now))
        .await
        .unwrap();
    assert!(applied);

    let fetched = store.get_by_id(created.id).await.unwrap().unwrap();
    assert_eq!(fetched.audit_state, AuditState::Pass);
    assert_eq!(fetched.open_status, OpenStatus::Opened);
    assert_eq!(fetched.open_at, Some(now));
    assert!(fetched.is_consistent());
}

pub async fn test_apply_stale_sequence_is_noop<S: OpenCatalogStore>(store: &S) {
    let created = store
        .create(NewRecord::auditing("test_src_stale", 31, "test_proc_stale", Utc::now(), UPDATER))
        .await
        .unwrap();

    let applied = store
        .apply_by_correlation(
            created.id,
            30,
            &MutationGuard::while_auditing(),
            &RecordMutation::reject(Some("old".to_string()), Utc::now()),
        )
        .await
        .unwrap();
    assert!(!applied);

    let fetched = store.get_by_id(created.id).await.unwrap().unwrap();
    assert_eq!(fetched.audit_state, AuditState::Auditing);
    assert!(fetched.audit_advice.is_none());
}

pub async fn test_apply_duplicate_is_noop<S: OpenCatalogStore>(store: &S) {
    let created = store
        .create(NewRecord::auditing("test_src_duplicate", 41, "test_proc_duplicate", Utc::now(), UPDATER))
        .await
        .unwrap();
    let guard = MutationGuard::while_auditing();

    let first_at = Utc::now();
    assert!(store
        .apply_by_correlation(created.id, 41, &guard, &RecordMutation::pass(first_at))
        .await
        .unwrap());
    assert!(!store
        .apply_by_correlation(created.id, 41, &guard, &RecordMutation::pass(Utc::now()))
        .await
        .unwrap());

    let fetched = store.get_by_id(created.id).await.unwrap().unwrap();
    assert_eq!(fetched.open_at, Some(first_at), "open_at is set once");
}

pub async fn test_apply_node_guard<S: OpenCatalogStore>(store: &S) {
    let created = store
        .create(NewRecord::auditing("test_src_node", 51, "test_proc_node", Utc::now(), UPDATER))
        .await
        .unwrap();

    assert!(store
        .apply_by_correlation(
            created.id,
            51,
            &MutationGuard::while_auditing_and_not_at("n1"),
            &RecordMutation::advance(node("n1"), Utc::now()),
        )
        .await
        .unwrap());
    assert!(
        !store
            .apply_by_correlation(
                created.id,
                51,
                &MutationGuard::while_auditing_and_not_at("n1"),
                &RecordMutation::advance(node("n1"), Utc::now()),
            )
            .await
            .unwrap(),
        "repeat advance to the same node should be skipped"
    );
    assert!(store
        .apply_by_correlation(
            created.id,
            51,
            &MutationGuard::while_auditing_and_not_at("n2"),
            &RecordMutation::advance(node("n2"), Utc::now()),
        )
        .await
        .unwrap());

    let fetched = store.get_by_id(created.id).await.unwrap().unwrap();
    assert_eq!(fetched.audit_node, Some(node("n2")));
    assert_eq!(fetched.audit_state, AuditState::Auditing);
}

pub async fn test_apply_ignores_deleted<S: OpenCatalogStore>(store: &S) {
    let created = store
        .create(NewRecord::auditing("test_src_apply_deleted", 61, "test_proc_apply_deleted", Utc::now(), UPDATER))
        .await
        .unwrap();
    store.delete(created.id, UPDATER).await.unwrap();

    let applied = store
        .apply_by_correlation(created.id, 61, &MutationGuard::while_auditing(), &RecordMutation::pass(Utc::now()))
        .await
        .unwrap();
    assert!(!applied);
}

// =============================================================================
// bulk_transition tests
// =============================================================================

pub async fn test_bulk_transition_auditing_only<S: OpenCatalogStore>(store: &S) {
    let now = Utc::now();
    let a = store
        .create(NewRecord::auditing("test_src_bulk_a", 1, "test_proc_bulk", now, UPDATER))
        .await
        .unwrap();
    let b = store
        .create(NewRecord::auditing("test_src_bulk_b", 2, "test_proc_bulk", now, UPDATER))
        .await
        .unwrap();
    let other = store
        .create(NewRecord::auditing("test_src_bulk_c", 3, "test_proc_bulk_other", now, UPDATER))
        .await
        .unwrap();
    // Decided before the process was retired.
    store
        .apply_by_correlation(b.id, 2, &MutationGuard::while_auditing(), &RecordMutation::pass(now))
        .await
        .unwrap();

    let keys = vec!["test_proc_bulk".to_string()];
    let changed = store
        .bulk_transition(&keys, AuditState::Auditing, &RecordMutation::undone(Utc::now()))
        .await
        .unwrap();
    assert_eq!(changed, 1);

    let a = store.get_by_id(a.id).await.unwrap().unwrap();
    assert_eq!(a.audit_state, AuditState::Undone);
    assert_eq!(a.open_status, OpenStatus::NotOpen);

    let b = store.get_by_id(b.id).await.unwrap().unwrap();
    assert_eq!(b.audit_state, AuditState::Pass);

    let other = store.get_by_id(other.id).await.unwrap().unwrap();
    assert_eq!(other.audit_state, AuditState::Auditing);

    let rerun = store
        .bulk_transition(&keys, AuditState::Auditing, &RecordMutation::undone(Utc::now()))
        .await
        .unwrap();
    assert_eq!(rerun, 0, "sweep should be idempotent");
}

pub async fn test_bulk_transition_empty_keys<S: OpenCatalogStore>(store: &S) {
    let changed = store
        .bulk_transition(&[], AuditState::Auditing, &RecordMutation::undone(Utc::now()))
        .await
        .unwrap();
    assert_eq!(changed, 0);
}

// =============================================================================
// Test runner macro
// =============================================================================

/// Run all OpenCatalogStore interface tests against a store implementation.
#[macro_export]
macro_rules! run_open_catalog_store_tests {
    ($store:expr) => {
        use $crate::storage::open_catalog_store_tests::*;

        // create / get tests
        test_create_and_get($store).await;
        println!("  test_create_and_get: PASSED");

        test_create_opened_sets_open_at($store).await;
        println!("  test_create_opened_sets_open_at: PASSED");

        test_get_nonexistent($store).await;
        println!("  test_get_nonexistent: PASSED");

        test_create_duplicate_source_conflicts($store).await;
        println!("  test_create_duplicate_source_conflicts: PASSED");

        // transaction tests
        test_rollback_discards_create($store).await;
        println!("  test_rollback_discards_create: PASSED");

        test_commit_publishes_create($store).await;
        println!("  test_commit_publishes_create: PASSED");

        test_finished_transaction_rejects_use($store).await;
        println!("  test_finished_transaction_rejects_use: PASSED");

        test_save_overwrites_fields($store).await;
        println!("  test_save_overwrites_fields: PASSED");

        test_save_missing_is_not_found($store).await;
        println!("  test_save_missing_is_not_found: PASSED");

        // delete tests
        test_delete_hides_record($store).await;
        println!("  test_delete_hides_record: PASSED");

        test_recreate_after_delete($store).await;
        println!("  test_recreate_after_delete: PASSED");

        // apply_by_correlation tests
        test_apply_matching_sequence($store).await;
        println!("  test_apply_matching_sequence: PASSED");

        test_apply_stale_sequence_is_noop($store).await;
        println!("  test_apply_stale_sequence_is_noop: PASSED");

        test_apply_duplicate_is_noop($store).await;
        println!("  test_apply_duplicate_is_noop: PASSED");

        test_apply_node_guard($store).await;
        println!("  test_apply_node_guard: PASSED");

        test_apply_ignores_deleted($store).await;
        println!("  test_apply_ignores_deleted: PASSED");

        // bulk_transition tests
        test_bulk_transition_auditing_only($store).await;
        println!("  test_bulk_transition_auditing_only: PASSED");

        test_bulk_transition_empty_keys($store).await;
        println!("  test_bulk_transition_empty_keys: PASSED");
    };
}
