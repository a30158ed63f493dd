use std::collections::HashSet;
use std::time::Duration;
use tempfile::TempDir;
use wbs_store::{Document, DocumentStore, Error, Role, StoreConfig, Task, User};

fn config_in(dir: &TempDir) -> StoreConfig {
    StoreConfig::new(dir.path().join("wbs_data.json"))
        .lock_timeout(Duration::from_millis(500))
        .poll_interval(Duration::from_millis(10))
}

fn store_in(dir: &TempDir) -> DocumentStore {
    DocumentStore::new(config_in(dir))
}

fn empty_doc() -> Document {
    serde_json::from_str(r#"{"tasks":[],"users":[],"meta":{}}"#).unwrap()
}

// ---- load -------------------------------------------------------------------

#[test]
fn load_missing_file_is_none() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    assert_eq!(store.load().unwrap(), None);
    assert_eq!(store.version().unwrap(), None);
}

#[test]
fn load_blank_file_is_none() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    std::fs::write(store.path(), "  \n").unwrap();
    assert_eq!(store.load().unwrap(), None);
}

#[test]
fn load_garbage_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    std::fs::write(store.path(), "{\"meta\": {\"version\": ").unwrap();
    assert!(matches!(store.load(), Err(Error::Corrupt(_))));
}

#[test]
fn load_wrong_shape_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    std::fs::write(store.path(), r#"{"users": "nobody"}"#).unwrap();
    assert!(matches!(store.load(), Err(Error::Corrupt(_))));
}

// ---- write ------------------------------------------------------------------

#[test]
fn unconditional_write_on_empty_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);

    let v1 = store.write(empty_doc(), None).unwrap();
    assert!(!v1.is_empty());

    let doc = store.load().unwrap().unwrap();
    assert_eq!(doc.meta.version, v1);
    assert!(doc.meta.last_updated > 0);
    assert_eq!(store.version().unwrap().as_deref(), Some(v1.as_str()));
}

#[test]
fn chained_writes_then_stale_write_conflicts() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);

    let v1 = store.write(empty_doc(), None).unwrap();
    let doc_copy = store.load().unwrap().unwrap();
    let doc_copy2 = doc_copy.clone();

    let v2 = store.write(doc_copy, Some(v1.as_str())).unwrap();
    assert_ne!(v1, v2);

    let before = std::fs::read(store.path()).unwrap();
    let err = store.write(doc_copy2, Some(v1.as_str())).unwrap_err();
    assert_eq!(
        err,
        Error::Conflict {
            expected: v1.clone(),
            actual: Some(v2.clone()),
        }
    );
    assert_eq!(std::fs::read(store.path()).unwrap(), before);
    assert_eq!(store.version().unwrap(), Some(v2));
}

#[test]
fn expected_version_against_missing_document_conflicts() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);

    let err = store.write(empty_doc(), Some("some-version")).unwrap_err();
    assert!(matches!(err, Error::Conflict { actual: None, .. }));
    assert!(!store.path().exists());
}

#[test]
fn empty_expected_version_is_unconditional() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    store.write(empty_doc(), None).unwrap();
    store.write(empty_doc(), Some("")).unwrap();
}

#[test]
fn unconditional_write_ignores_stored_version() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);

    store.write(empty_doc(), None).unwrap();
    store.write(empty_doc(), None).unwrap();
    let mut doc = empty_doc();
    doc.meta.version = "made-up".into();
    let v3 = store.write(doc, None).unwrap();
    assert_ne!(v3, "made-up");
    assert_eq!(store.version().unwrap(), Some(v3));
}

#[test]
fn every_write_produces_a_new_version() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);

    let mut seen = HashSet::new();
    let mut expected: Option<String> = None;
    for _ in 0..50 {
        let v = store.write(empty_doc(), expected.as_deref()).unwrap();
        assert!(seen.insert(v.clone()), "version {v} was reused");
        expected = Some(v);
    }
}

#[test]
fn write_creates_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("deeper").join("wbs.json");
    let store = DocumentStore::new(StoreConfig::new(&path));
    store.write(empty_doc(), None).unwrap();
    assert!(path.exists());
}

#[test]
fn write_leaves_no_scratch_or_lock_files() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    store.write(empty_doc(), None).unwrap();

    let names: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(names, vec!["wbs_data.json".to_string()]);
}

#[test]
fn write_over_corrupt_file_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    std::fs::write(store.path(), "not json").unwrap();

    assert!(matches!(store.write(empty_doc(), None), Err(Error::Corrupt(_))));
    assert_eq!(std::fs::read_to_string(store.path()).unwrap(), "not json");
    assert!(!store.coordinator().is_locked());
}

#[test]
fn conflict_releases_the_lock() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    store.write(empty_doc(), None).unwrap();

    let _ = store.write(empty_doc(), Some("stale")).unwrap_err();
    assert!(!store.coordinator().path().exists());
    store.write(empty_doc(), None).unwrap();
}

// ---- document contents ------------------------------------------------------

#[test]
fn unknown_fields_survive_a_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    std::fs::write(
        store.path(),
        r#"{
            "meta": {"version": "v0", "last_updated": 1},
            "tasks": [{"id": "t1", "name": "Design", "color": "red"}],
            "users": [],
            "config": {"admin_password_hash": ""},
            "settings": {"theme": "dark"}
        }"#,
    )
    .unwrap();

    let doc = store.load().unwrap().unwrap();
    let v1 = store.write(doc, Some("v0")).unwrap();

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
    assert_eq!(raw["settings"]["theme"], "dark");
    assert_eq!(raw["tasks"][0]["color"], "red");
    assert_eq!(raw["meta"]["version"], v1.as_str());
}

#[test]
fn tasks_are_written_back_exactly_as_read() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    let tasks = serde_json::json!([
        {"id": "t1", "dependencies": null, "progress": 50},
        {"id": "t2", "progress": 12.5, "start": 20240101, "owner": {"team": "ops"}},
        "not even an object"
    ]);
    std::fs::write(
        store.path(),
        serde_json::json!({"meta": {"version": "v0"}, "tasks": tasks}).to_string(),
    )
    .unwrap();

    let doc = store.load().unwrap().unwrap();
    store.write(doc, Some("v0")).unwrap();

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
    assert_eq!(raw["tasks"], tasks);
    assert_eq!(raw["tasks"][0]["progress"].to_string(), "50");
}

#[test]
fn null_and_unknown_values_do_not_corrupt_the_document() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    std::fs::write(
        store.path(),
        r#"{
            "meta": {"version": "v0", "last_updated": null},
            "config": null,
            "tasks": null,
            "users": [
                {"id": "u1", "name": null, "role": "observer"},
                {"id": "u2", "name": "Ken", "role": null}
            ]
        }"#,
    )
    .unwrap();

    let doc = store.load().unwrap().unwrap();
    assert_eq!(doc.meta.last_updated, 0);
    assert!(doc.tasks.is_empty());
    assert_eq!(doc.users[0].role, Role::Other("observer".into()));
    assert_eq!(doc.users[1].role, Role::Member);

    store.write(doc, None).unwrap();
    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
    assert_eq!(raw["users"][0]["role"], "observer");
    assert_eq!(raw["users"][1]["role"], "member");
}

#[test]
fn typed_task_view_tolerates_nulls() {
    let task = Task::from_value(&serde_json::json!({
        "id": "t1",
        "name": "Design",
        "dependencies": null,
        "progress": 50,
        "color": "red"
    }))
    .unwrap();
    assert!(task.dependencies.is_empty());
    assert_eq!(task.progress, 50.0);
    assert_eq!(task.extra["color"], "red");

    let value: serde_json::Value = task.into();
    assert_eq!(value["progress"].to_string(), "50");
    assert_eq!(value["color"], "red");

    assert!(matches!(
        Task::from_value(&serde_json::json!("t1")),
        Err(Error::Corrupt(_))
    ));
}

#[test]
fn pretty_output_keeps_non_ascii_readable() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    let mut doc = empty_doc();
    doc.users.push(User {
        id: "u1".into(),
        name: "管理者".into(),
        role: Default::default(),
    });
    store.write(doc, None).unwrap();

    let raw = std::fs::read_to_string(store.path()).unwrap();
    assert!(raw.contains('\n'));
    assert!(raw.contains("  \"meta\""));
    assert!(raw.contains("管理者"));
}

#[test]
fn compact_output_fits_on_one_line() {
    let dir = tempfile::tempdir().unwrap();
    let store = DocumentStore::new(config_in(&dir).pretty(false));
    store.write(empty_doc(), None).unwrap();
    let raw = std::fs::read_to_string(store.path()).unwrap();
    assert!(!raw.contains('\n'));
}

#[test]
fn updated_by_is_kept() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    let mut doc = empty_doc();
    doc.meta.updated_by = Some("alice".into());
    store.write(doc, None).unwrap();
    let doc = store.load().unwrap().unwrap();
    assert_eq!(doc.meta.updated_by.as_deref(), Some("alice"));
}

// ---- modify -----------------------------------------------------------------

#[test]
fn modify_applies_change_and_returns_output() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    let v1 = store.write(empty_doc(), None).unwrap();

    let (v2, count) = store
        .modify(Some(v1.as_str()), |doc| {
            doc.push_task(Task {
                id: "t-1".into(),
                name: "Kickoff".into(),
                ..Task::default()
            });
            Ok(doc.tasks.len())
        })
        .unwrap();

    assert_eq!(count, 1);
    assert_ne!(v1, v2);
    let doc = store.load().unwrap().unwrap();
    assert_eq!(doc.task("t-1").unwrap()["name"], "Kickoff");
    assert_eq!(doc.meta.version, v2);
}

#[test]
fn modify_error_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    let v1 = store.write(empty_doc(), None).unwrap();

    let err = store
        .modify(None, |doc| {
            doc.users.clear();
            Err::<(), _>(Error::InvalidInput("nope".into()))
        })
        .unwrap_err();
    assert_eq!(err, Error::InvalidInput("nope".into()));
    assert_eq!(store.version().unwrap(), Some(v1));
}

#[test]
fn modify_missing_document_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    let err = store.modify(None, |_| Ok(())).unwrap_err();
    assert_eq!(err, Error::NotFound);
}

#[test]
fn modify_with_stale_version_conflicts() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    let v1 = store.write(empty_doc(), None).unwrap();
    store.write(empty_doc(), Some(v1.as_str())).unwrap();

    let err = store
        .modify(Some(v1.as_str()), |_| panic!("must not run on conflict"))
        .map(|(_, ())| ())
        .unwrap_err();
    assert!(matches!(err, Error::Conflict { .. }));
}

// ---- create_if_absent -------------------------------------------------------

#[test]
fn create_if_absent_only_creates_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);

    let first = store.create_if_absent(empty_doc()).unwrap();
    assert!(first.is_created());
    let created = first.into_document();

    let mut other = empty_doc();
    other.push_task(Task {
        id: "t-x".into(),
        ..Task::default()
    });
    let second = store.create_if_absent(other).unwrap();
    assert!(!second.is_created());
    let existing = second.into_document();
    assert_eq!(existing.meta.version, created.meta.version);
    assert!(existing.tasks.is_empty());
}

// ---- debug ------------------------------------------------------------------

#[test]
fn debug_impl_names_the_path() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    let dbg = format!("{store:?}");
    assert!(dbg.contains("DocumentStore"));
    assert!(dbg.contains("wbs_data.json"));
}
