use gtd_core::db::migrations::{current_user_version, latest_version};
use gtd_core::{
    is_sentinel, open_db, open_db_in_memory, Channel, DbError, EntityId, EntityKind, ErrorKind,
    GtdTree, PersistenceAdapter, RecordStore, SqliteRecordStore, StoreError, StoreResult, StoredRecord,
    PROJECT_NONE, REALM_NONE,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use uuid::Uuid;

fn snapshot(tree: &GtdTree) -> Vec<StoredRecord> {
    let mut records = EntityKind::ALL
        .into_iter()
        .flat_map(|kind| tree.ids(kind).to_vec())
        .filter(|id| !is_sentinel(*id))
        .map(|id| StoredRecord::from_tree(tree, id).unwrap())
        .collect::<Vec<_>>();
    records.sort_by_key(|record| record.id);
    records
}

struct Scenario {
    realm: EntityId,
    area: EntityId,
    project: EntityId,
    task: EntityId,
    errands: EntityId,
}

fn build_scenario(tree: &mut GtdTree) -> Scenario {
    let realm = tree.create_realm("Personal").unwrap();
    let area = tree.create_area("Home", realm).unwrap();
    let project = tree.create_project("Fix sink", area).unwrap();
    let errands = tree.create_context("Errands").unwrap();
    let task = tree.create_task("buy wrench", project, &[errands]).unwrap();
    tree.create_task("call plumber", project, &[]).unwrap();
    tree.create_task("stray thought", PROJECT_NONE, &[]).unwrap();
    tree.create_area("Unfiled", REALM_NONE).unwrap();

    tree.set_due(task, Some(1_700_000_000_000)).unwrap();
    tree.set_notes(project, "kitchen, not bathroom").unwrap();
    tree.set_waiting(task, true).unwrap();
    let hidden = tree.create_realm("Work").unwrap();
    tree.set_visible(hidden, false).unwrap();

    Scenario {
        realm,
        area,
        project,
        task,
        errands,
    }
}

fn sqlite_adapter() -> Rc<PersistenceAdapter<SqliteRecordStore>> {
    let store = SqliteRecordStore::try_new(open_db_in_memory().unwrap()).unwrap();
    Rc::new(PersistenceAdapter::new(store))
}

#[test]
fn write_through_then_reload_reproduces_tree() {
    let adapter = sqlite_adapter();
    let mut tree = GtdTree::new();
    PersistenceAdapter::attach(&adapter, &mut tree);
    let scenario = build_scenario(&mut tree);

    assert_eq!(adapter.store().count(EntityKind::Task).unwrap(), 3);
    assert_eq!(adapter.store().count(EntityKind::Realm).unwrap(), 2);
    assert_eq!(adapter.store().count(EntityKind::Area).unwrap(), 2);

    let mut reloaded = GtdTree::new();
    let report = adapter.load(&mut reloaded).unwrap();
    assert_eq!(report.loaded, 9);
    assert_eq!(report.skipped, 0);

    assert_eq!(snapshot(&reloaded), snapshot(&tree));
    for kind in EntityKind::ALL {
        assert_eq!(reloaded.count(kind), tree.count(kind));
    }
    assert_eq!(
        reloaded.children(scenario.project),
        tree.children(scenario.project)
    );
    assert_eq!(reloaded.children(scenario.area), &[scenario.project]);
    assert_eq!(reloaded.realm_of(scenario.task), Some(scenario.realm));
    assert_eq!(
        reloaded.task(scenario.task).unwrap().contexts(),
        &[scenario.errands]
    );
    assert_eq!(reloaded.children(REALM_NONE).len(), 2);
    reloaded.validate_links().unwrap();
}

#[test]
fn renames_removals_and_visibility_are_written_through() {
    let adapter = sqlite_adapter();
    let mut tree = GtdTree::new();
    PersistenceAdapter::attach(&adapter, &mut tree);
    let scenario = build_scenario(&mut tree);

    tree.set_title(scenario.area, "House").unwrap();
    tree.set_visible(scenario.realm, false).unwrap();
    tree.remove_context(scenario.task, scenario.errands).unwrap();
    tree.remove(scenario.errands).unwrap();
    tree.reparent(scenario.task, PROJECT_NONE).unwrap();

    let mut reloaded = GtdTree::new();
    adapter.load(&mut reloaded).unwrap();
    assert_eq!(reloaded.title(scenario.area), Some("House"));
    assert!(!reloaded.realm(scenario.realm).unwrap().is_visible());
    assert!(!reloaded.contains(scenario.errands));
    assert!(reloaded.task(scenario.task).unwrap().contexts().is_empty());
    assert_eq!(reloaded.parent_of(scenario.task), Some(PROJECT_NONE));
    assert_eq!(adapter.store().count(EntityKind::Context).unwrap(), 0);
}

#[test]
fn file_backed_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gtd.sqlite3");

    let mut tree = GtdTree::new();
    let scenario = {
        let store = SqliteRecordStore::try_new(open_db(&path).unwrap()).unwrap();
        let adapter = Rc::new(PersistenceAdapter::new(store));
        let subscription = PersistenceAdapter::attach(&adapter, &mut tree);
        let scenario = build_scenario(&mut tree);
        assert!(PersistenceAdapter::<SqliteRecordStore>::detach(
            &mut tree,
            subscription
        ));
        scenario
    };

    let store = SqliteRecordStore::try_new(open_db(&path).unwrap()).unwrap();
    let adapter = PersistenceAdapter::new(store);
    let mut reloaded = GtdTree::new();
    let report = adapter.load(&mut reloaded).unwrap();
    assert_eq!(report.skipped, 0);
    assert_eq!(snapshot(&reloaded), snapshot(&tree));
    assert_eq!(reloaded.title(scenario.project), Some("Fix sink"));
}

#[test]
fn malformed_rows_are_skipped_and_the_rest_loads() {
    let adapter = sqlite_adapter();
    let mut tree = GtdTree::new();
    PersistenceAdapter::attach(&adapter, &mut tree);
    let scenario = build_scenario(&mut tree);

    let orphan = Uuid::new_v4();
    let conn = adapter.store().connection();
    conn.execute(
        "INSERT INTO entities (uuid, kind, title, parent_uuid, created_at, updated_at)
         VALUES (?1, 'area', 'Broken parent', 'not-a-uuid', 0, 0);",
        [Uuid::new_v4().to_string()],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO entities (uuid, kind, title, parent_uuid, created_at, updated_at)
         VALUES (?1, 'area', 'Lost realm', ?2, 0, 0);",
        [orphan.to_string(), Uuid::new_v4().to_string()],
    )
    .unwrap();

    let mut reloaded = GtdTree::new();
    let report = adapter.load(&mut reloaded).unwrap();
    assert_eq!(report.loaded, 9);
    assert_eq!(report.skipped, 2);
    assert_eq!(report.skipped_ids, vec![orphan]);
    assert!(!reloaded.contains(orphan));
    assert!(reloaded.contains(scenario.task));
}

/// Vec-backed store that lists records newest first, so children arrive
/// before their parents.
#[derive(Default)]
struct ReversedStore {
    records: RefCell<Vec<StoredRecord>>,
    writes: Cell<usize>,
}

impl RecordStore for ReversedStore {
    fn upsert(&self, record: &StoredRecord) -> StoreResult<()> {
        record.validate()?;
        self.writes.set(self.writes.get() + 1);
        let mut records = self.records.borrow_mut();
        match records.iter_mut().find(|current| current.id == record.id) {
            Some(current) => *current = record.clone(),
            None => records.push(record.clone()),
        }
        Ok(())
    }

    fn delete(&self, id: EntityId) -> StoreResult<bool> {
        let mut records = self.records.borrow_mut();
        let before = records.len();
        records.retain(|record| record.id != id);
        Ok(records.len() != before)
    }

    fn list(&self) -> StoreResult<Vec<StoreResult<StoredRecord>>> {
        Ok(self.records.borrow().iter().rev().cloned().map(Ok).collect())
    }

    fn count(&self, kind: EntityKind) -> StoreResult<usize> {
        Ok(self
            .records
            .borrow()
            .iter()
            .filter(|record| record.kind == kind)
            .count())
    }
}

#[test]
fn forward_references_resolve_through_any_store() {
    let adapter = Rc::new(PersistenceAdapter::new(ReversedStore::default()));
    let mut tree = GtdTree::new();
    PersistenceAdapter::attach(&adapter, &mut tree);
    let scenario = build_scenario(&mut tree);

    let listed = adapter
        .store()
        .list()
        .unwrap()
        .into_iter()
        .map(|record| record.unwrap().id)
        .collect::<Vec<_>>();
    let position = |id| listed.iter().position(|current| *current == id).unwrap();
    assert!(position(scenario.task) < position(scenario.project));
    assert!(position(scenario.area) < position(scenario.realm));

    let mut reloaded = GtdTree::new();
    let report = adapter.load(&mut reloaded).unwrap();
    assert_eq!(report.skipped, 0);
    assert_eq!(snapshot(&reloaded), snapshot(&tree));
    assert_eq!(reloaded.parent_of(scenario.area), Some(scenario.realm));
}

#[test]
fn reload_does_not_write_back() {
    let adapter = Rc::new(PersistenceAdapter::new(ReversedStore::default()));
    let mut tree = GtdTree::new();
    PersistenceAdapter::attach(&adapter, &mut tree);
    build_scenario(&mut tree);

    let mut reloaded = GtdTree::new();
    PersistenceAdapter::attach(&adapter, &mut reloaded);
    let writes = adapter.store().writes.get();
    adapter.load(&mut reloaded).unwrap();
    assert_eq!(adapter.store().writes.get(), writes);
    assert_eq!(reloaded.count(EntityKind::Task), 3);

    reloaded.set_title(PROJECT_NONE, "nope").unwrap_err();
    let task = reloaded.create_task("after load", PROJECT_NONE, &[]).unwrap();
    assert_eq!(adapter.store().writes.get(), writes + 1);
    assert!(reloaded.contains(task));
}

#[test]
fn sentinel_field_edits_are_refused_so_reload_matches_the_live_tree() {
    let adapter = Rc::new(PersistenceAdapter::new(ReversedStore::default()));
    let mut tree = GtdTree::new();
    PersistenceAdapter::attach(&adapter, &mut tree);
    build_scenario(&mut tree);
    let writes = adapter.store().writes.get();

    assert_eq!(
        tree.set_visible(REALM_NONE, false).unwrap_err().kind(),
        ErrorKind::InvalidOperation
    );
    assert_eq!(
        tree.set_notes(PROJECT_NONE, "inbox notes").unwrap_err().kind(),
        ErrorKind::InvalidOperation
    );
    assert_eq!(
        tree.set_complete(PROJECT_NONE, true).unwrap_err().kind(),
        ErrorKind::InvalidOperation
    );
    assert_eq!(adapter.store().writes.get(), writes);

    let mut reloaded = GtdTree::new();
    adapter.load(&mut reloaded).unwrap();
    for current in [&tree, &reloaded] {
        assert!(current.realm(REALM_NONE).unwrap().is_visible());
        let inbox = current.action_state(PROJECT_NONE).unwrap();
        assert_eq!(inbox.notes(), "");
        assert!(!inbox.is_complete());
    }
    assert_eq!(snapshot(&reloaded), snapshot(&tree));
}

#[test]
fn save_all_writes_a_tree_built_without_an_adapter() {
    let mut tree = GtdTree::new();
    build_scenario(&mut tree);

    let adapter = PersistenceAdapter::new(ReversedStore::default());
    assert_eq!(adapter.save_all(&tree).unwrap(), 9);
    assert_eq!(adapter.store().count(EntityKind::Task).unwrap(), 3);
    assert_eq!(adapter.store().count(EntityKind::Area).unwrap(), 2);
}

struct FailingStore;

impl RecordStore for FailingStore {
    fn upsert(&self, _record: &StoredRecord) -> StoreResult<()> {
        Err(StoreError::MalformedRecord("disk unavailable".to_string()))
    }

    fn delete(&self, _id: EntityId) -> StoreResult<bool> {
        Err(StoreError::MalformedRecord("disk unavailable".to_string()))
    }

    fn list(&self) -> StoreResult<Vec<StoreResult<StoredRecord>>> {
        Ok(Vec::new())
    }

    fn count(&self, _kind: EntityKind) -> StoreResult<usize> {
        Ok(0)
    }
}

#[test]
fn store_failures_do_not_block_the_tree_or_later_handlers() {
    let adapter = Rc::new(PersistenceAdapter::new(FailingStore));
    let mut tree = GtdTree::new();
    PersistenceAdapter::attach(&adapter, &mut tree);

    let seen = Rc::new(RefCell::new(0));
    let sink = Rc::clone(&seen);
    tree.subscribe_many(&Channel::all(), "counter", move |_, _| {
        *sink.borrow_mut() += 1;
        Ok(())
    });

    let context = tree.create_context("Phone").unwrap();
    tree.remove(context).unwrap();
    assert_eq!(*seen.borrow(), 2);
    assert!(!tree.contains(context));
}

#[test]
fn migrations_set_latest_schema_version() {
    let conn = open_db_in_memory().unwrap();
    assert_eq!(current_user_version(&conn).unwrap(), latest_version());
    assert!(SqliteRecordStore::try_new(conn).is_ok());
}

#[test]
fn newer_schema_version_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.sqlite3");
    {
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch("PRAGMA user_version = 99;").unwrap();
    }

    match open_db(&path) {
        Err(DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        }) => {
            assert_eq!(db_version, 99);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("expected unsupported schema version, got {other:?}"),
    }
}

#[test]
fn raw_connection_without_schema_is_refused() {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    let err = SqliteRecordStore::try_new(conn).unwrap_err();
    assert!(matches!(err, StoreError::UninitializedConnection { .. }));
}
