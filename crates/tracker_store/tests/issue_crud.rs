use rusqlite::Connection;
use serde_json::json;
use tracker_store::db::DbError;
use tracker_store::{
    AuditPayload, EventType, Issue, IssueFilter, IssueStore, IssueType, IssueUpdate,
    IssueValidationError, SqliteIssueStore, Status, StoreError, StoreOptions, TxState,
};

#[test]
fn create_assigns_unique_increasing_ids() {
    let store = memory_store();

    let numbers: Vec<u64> = (0..5)
        .map(|n| {
            let created = store
                .create_issue(&Issue::new(format!("issue {n}")), "alice")
                .unwrap();
            id_number(&created.id)
        })
        .collect();

    assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
}

#[test]
fn create_then_get_returns_input_plus_server_fields() {
    let store = memory_store();
    let input = detailed_issue();

    let created = store.create_issue(&input, "alice").unwrap();
    assert_eq!(created.id, "bd-1");
    assert!(created.created_at > 0);
    assert_eq!(created.created_at, created.updated_at);

    let loaded = store.get_issue(&created.id).unwrap().unwrap();
    let mut expected = input;
    expected.id = created.id.clone();
    expected.created_at = created.created_at;
    expected.updated_at = created.updated_at;
    assert_eq!(loaded, expected);
}

#[test]
fn get_missing_issue_is_none_not_error() {
    let store = memory_store();
    assert_eq!(store.get_issue("bd-404").unwrap(), None);
}

#[test]
fn invalid_issue_is_rejected_before_allocation() {
    let store = memory_store();

    let err = store.create_issue(&Issue::new(""), "alice").unwrap_err();
    assert!(matches!(
        err,
        StoreError::Validation(IssueValidationError::TitleLength { chars: 0 })
    ));

    let mut bad_priority = Issue::new("too urgent");
    bad_priority.priority = 9;
    let err = store.create_issue(&bad_priority, "alice").unwrap_err();
    assert!(matches!(
        err,
        StoreError::Validation(IssueValidationError::PriorityOutOfRange(9))
    ));
    assert_eq!(err.tx_state(), TxState::NotStarted);

    let mut bad_estimate = Issue::new("negative");
    bad_estimate.estimated_minutes = Some(-5);
    assert!(store.create_issue(&bad_estimate, "alice").is_err());

    assert!(all_issues(&store).is_empty());
    let created = store.create_issue(&Issue::new("first"), "alice").unwrap();
    assert_eq!(created.id, "bd-1");
}

#[test]
fn explicit_id_is_kept_and_allocation_skips_past_it() {
    let store = memory_store();

    let imported = Issue::with_id("bd-10", "imported").unwrap();
    let created = store.create_issue(&imported, "importer").unwrap();
    assert_eq!(created.id, "bd-10");

    let next = store.create_issue(&Issue::new("fresh"), "alice").unwrap();
    assert_eq!(next.id, "bd-11");
}

#[test]
fn malformed_explicit_id_is_a_validation_error() {
    let store = memory_store();

    let mut issue = Issue::new("odd id");
    issue.id = "BD 7".to_string();
    let err = store.create_issue(&issue, "alice").unwrap_err();
    assert!(matches!(
        err,
        StoreError::Validation(IssueValidationError::InvalidId(_))
    ));
}

#[test]
fn duplicate_explicit_id_rolls_back_without_extra_event() {
    let store = memory_store();
    let issue = Issue::with_id("bd-3", "original").unwrap();
    store.create_issue(&issue, "alice").unwrap();

    let duplicate = Issue::with_id("bd-3", "impostor").unwrap();
    let err = store.create_issue(&duplicate, "mallory").unwrap_err();
    assert!(matches!(
        err,
        StoreError::Storage {
            state: TxState::RolledBack,
            ..
        }
    ));

    let stored = store.get_issue("bd-3").unwrap().unwrap();
    assert_eq!(stored.title, "original");
    assert_eq!(store.events_for_issue("bd-3").unwrap().len(), 1);
}

#[test]
fn update_with_unknown_field_leaves_row_unchanged() {
    let store = memory_store();
    let created = store.create_issue(&Issue::new("stable"), "alice").unwrap();

    let fields = json!({"title": "changed", "owner": "mallory"});
    let err = store
        .update_issue_fields(&created.id, fields.as_object().unwrap(), "mallory")
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::Validation(IssueValidationError::UnknownField(ref name)) if name == "owner"
    ));

    assert_eq!(store.get_issue(&created.id).unwrap().unwrap(), created);
    assert_eq!(store.events_for_issue(&created.id).unwrap().len(), 1);
}

#[test]
fn update_with_string_keys_applies_allowed_fields() {
    let store = memory_store();
    let created = store.create_issue(&Issue::new("keyed"), "alice").unwrap();

    let fields = json!({"assignee": "bob", "estimated_minutes": 45, "issue_type": "bug"});
    store
        .update_issue_fields(&created.id, fields.as_object().unwrap(), "alice")
        .unwrap();

    let loaded = store.get_issue(&created.id).unwrap().unwrap();
    assert_eq!(loaded.assignee.as_deref(), Some("bob"));
    assert_eq!(loaded.estimated_minutes, Some(45));
    assert_eq!(loaded.issue_type, IssueType::Bug);
}

#[test]
fn update_priority_accepts_zero_to_four_only() {
    let store = memory_store();
    let created = store.create_issue(&Issue::new("prioritize"), "alice").unwrap();

    let err = store
        .update_issue(&created.id, &[IssueUpdate::Priority(5)], "alice")
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::Validation(IssueValidationError::PriorityOutOfRange(5))
    ));
    assert_eq!(store.get_issue(&created.id).unwrap().unwrap(), created);

    for priority in 0..=4 {
        store
            .update_issue(&created.id, &[IssueUpdate::Priority(priority)], "alice")
            .unwrap();
        let loaded = store.get_issue(&created.id).unwrap().unwrap();
        assert_eq!(loaded.priority, priority);
    }
}

#[test]
fn update_missing_issue_is_not_found_without_event() {
    let store = memory_store();

    let err = store
        .update_issue("bd-77", &[IssueUpdate::Notes("n".into())], "alice")
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(ref id) if id == "bd-77"));
    assert!(store.events_for_issue("bd-77").unwrap().is_empty());
}

#[test]
fn update_records_previous_snapshot_and_change_set() {
    let store = memory_store();
    let created = store.create_issue(&Issue::new("before"), "alice").unwrap();

    store
        .update_issue(
            &created.id,
            &[
                IssueUpdate::Title("after".into()),
                IssueUpdate::Priority(0),
            ],
            "bob",
        )
        .unwrap();

    let loaded = store.get_issue(&created.id).unwrap().unwrap();
    assert_eq!(loaded.title, "after");
    assert_eq!(loaded.priority, 0);
    assert!(loaded.updated_at >= created.updated_at);
    assert_eq!(loaded.created_at, created.created_at);

    let events = store.events_for_issue(&created.id).unwrap();
    assert_eq!(events.len(), 2);
    let event = &events[1];
    assert_eq!(event.event_type, EventType::Updated);
    assert_eq!(event.actor, "bob");
    assert_eq!(event.comment, None);

    match event.decode_old_value().unwrap() {
        Some(AuditPayload::Snapshot { issue }) => assert_eq!(issue, created),
        other => panic!("unexpected old value: {other:?}"),
    }
    match event.decode_new_value().unwrap() {
        Some(AuditPayload::Changes { changes }) => {
            assert_eq!(changes.len(), 2);
            assert_eq!(changes["title"], json!("after"));
            assert_eq!(changes["priority"], json!(0));
        }
        other => panic!("unexpected new value: {other:?}"),
    }
}

#[test]
fn status_updates_choose_event_type_and_track_closed_at() {
    let store = memory_store();
    let created = store.create_issue(&Issue::new("lifecycle"), "alice").unwrap();

    store
        .update_issue(&created.id, &[IssueUpdate::Status(Status::InProgress)], "alice")
        .unwrap();
    store
        .update_issue(&created.id, &[IssueUpdate::Status(Status::Closed)], "alice")
        .unwrap();
    let closed = store.get_issue(&created.id).unwrap().unwrap();
    assert!(closed.is_closed());
    assert!(closed.closed_at.is_some());

    store
        .update_issue(&created.id, &[IssueUpdate::Status(Status::Open)], "alice")
        .unwrap();
    let reopened = store.get_issue(&created.id).unwrap().unwrap();
    assert_eq!(reopened.status, Status::Open);
    assert_eq!(reopened.closed_at, None);

    let kinds: Vec<EventType> = store
        .events_for_issue(&created.id)
        .unwrap()
        .into_iter()
        .map(|event| event.event_type)
        .collect();
    assert_eq!(
        kinds,
        vec![
            EventType::Created,
            EventType::StatusChanged,
            EventType::Closed,
            EventType::StatusChanged,
        ]
    );
}

#[test]
fn repeated_field_in_update_is_rejected() {
    let store = memory_store();
    let created = store.create_issue(&Issue::new("twice"), "alice").unwrap();

    let err = store
        .update_issue(
            &created.id,
            &[IssueUpdate::Notes("a".into()), IssueUpdate::Notes("b".into())],
            "alice",
        )
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::Validation(IssueValidationError::DuplicateField("notes"))
    ));
}

#[test]
fn close_issue_stamps_closed_at_and_records_reason() {
    let store = memory_store();
    let created = store.create_issue(&Issue::new("finish me"), "alice").unwrap();

    store.close_issue(&created.id, "shipped in v2", "carol").unwrap();

    let closed = store.get_issue(&created.id).unwrap().unwrap();
    assert_eq!(closed.status, Status::Closed);
    assert_eq!(closed.closed_at, Some(closed.updated_at));

    let events = store.events_for_issue(&created.id).unwrap();
    let event = events.last().unwrap();
    assert_eq!(event.event_type, EventType::Closed);
    assert_eq!(event.actor, "carol");
    assert_eq!(event.comment.as_deref(), Some("shipped in v2"));
    assert_eq!(event.old_value, None);
    assert_eq!(event.new_value, None);
}

#[test]
fn creating_closed_issue_stamps_closed_at() {
    let store = memory_store();
    let mut issue = Issue::new("already done");
    issue.status = Status::Closed;

    let created = store.create_issue(&issue, "importer").unwrap();
    assert_eq!(created.closed_at, Some(created.created_at));
    let loaded = store.get_issue(&created.id).unwrap().unwrap();
    assert_eq!(loaded.closed_at, Some(created.created_at));

    let mut imported = Issue::new("closed long ago");
    imported.status = Status::Closed;
    imported.closed_at = Some(1_600_000_000_000);
    let created = store.create_issue(&imported, "importer").unwrap();
    assert_eq!(created.closed_at, Some(1_600_000_000_000));
}

#[test]
fn close_missing_issue_is_not_found_and_writes_no_event() {
    let store = memory_store();

    let err = store.close_issue("bd-99", "never existed", "alice").unwrap_err();
    assert!(matches!(err, StoreError::NotFound(ref id) if id == "bd-99"));
    assert!(store.events_for_issue("bd-99").unwrap().is_empty());
}

#[test]
fn every_mutation_writes_exactly_one_event_with_actor() {
    let store = memory_store();
    let created = store.create_issue(&Issue::new("audited"), "alice").unwrap();
    assert_eq!(store.events_for_issue(&created.id).unwrap().len(), 1);

    store
        .update_issue(&created.id, &[IssueUpdate::Assignee(Some("bob".into()))], "bob")
        .unwrap();
    assert_eq!(store.events_for_issue(&created.id).unwrap().len(), 2);

    store.close_issue(&created.id, "done", "carol").unwrap();
    let events = store.events_for_issue(&created.id).unwrap();
    assert_eq!(events.len(), 3);

    let actors: Vec<&str> = events.iter().map(|event| event.actor.as_str()).collect();
    assert_eq!(actors, vec!["alice", "bob", "carol"]);
    assert!(events.iter().all(|event| event.issue_id == created.id));
    assert!(events.windows(2).all(|pair| pair[0].id < pair[1].id));
}

#[test]
fn created_event_holds_full_snapshot() {
    let store = memory_store();
    let created = store.create_issue(&detailed_issue(), "alice").unwrap();

    let events = store.events_for_issue(&created.id).unwrap();
    assert_eq!(events[0].event_type, EventType::Created);
    assert_eq!(events[0].old_value, None);
    match events[0].decode_new_value().unwrap() {
        Some(AuditPayload::Snapshot { issue }) => assert_eq!(issue, created),
        other => panic!("unexpected payload: {other:?}"),
    }
}

#[test]
fn reopened_file_store_keeps_data_and_continues_ids() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tracker").join("issues.db");

    let store = SqliteIssueStore::open(&path, &StoreOptions::default()).unwrap();
    store.create_issue(&Issue::new("one"), "alice").unwrap();
    store.create_issue(&Issue::new("two"), "alice").unwrap();
    store.close().unwrap();

    let store = SqliteIssueStore::open(&path, &StoreOptions::default()).unwrap();
    assert_eq!(store.get_issue("bd-2").unwrap().unwrap().title, "two");
    let third = store.create_issue(&Issue::new("three"), "alice").unwrap();
    assert_eq!(third.id, "bd-3");
}

#[test]
fn custom_prefix_is_used_for_allocation() {
    let store = SqliteIssueStore::open_in_memory(&StoreOptions::with_prefix("vc")).unwrap();
    assert_eq!(store.id_prefix(), "vc");

    let created = store.create_issue(&Issue::new("prefixed"), "alice").unwrap();
    assert_eq!(created.id, "vc-1");
}

#[test]
fn invalid_prefix_fails_construction() {
    let result = SqliteIssueStore::open_in_memory(&StoreOptions::with_prefix("no-dash"));
    assert!(matches!(result, Err(StoreError::InvalidConfig(_))));
}

#[test]
fn adopting_unmigrated_connection_fails_construction() {
    let conn = Connection::open_in_memory().unwrap();

    let result = SqliteIssueStore::from_connection(conn, &StoreOptions::default());
    assert!(matches!(
        result,
        Err(StoreError::Initialization(
            DbError::UninitializedConnection { .. }
        ))
    ));
}

fn memory_store() -> SqliteIssueStore {
    SqliteIssueStore::open_in_memory(&StoreOptions::default()).unwrap()
}

fn all_issues(store: &SqliteIssueStore) -> Vec<Issue> {
    store.search_issues("", &IssueFilter::default()).unwrap()
}

fn id_number(id: &str) -> u64 {
    id.rsplit_once('-').unwrap().1.parse().unwrap()
}

fn detailed_issue() -> Issue {
    let mut issue = Issue::new("Crash when saving draft");
    issue.description = "Saving a draft with an empty body panics.".to_string();
    issue.design = "Guard the empty case in the serializer.".to_string();
    issue.acceptance_criteria = "Empty drafts save without error.".to_string();
    issue.notes = "Seen on 0.3.1".to_string();
    issue.status = Status::InProgress;
    issue.priority = 1;
    issue.issue_type = IssueType::Bug;
    issue.assignee = Some("bob".to_string());
    issue.estimated_minutes = Some(90);
    issue.approved_at = Some(1_700_000_000_000);
    issue.approved_by = Some("lead".to_string());
    issue
}
