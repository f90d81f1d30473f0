//! Replays stored records into a task tree.
//!
//! # Responsibility
//! - Materialize records in any order, resolving forward references depth-first.
//! - Skip records that cannot be materialized without aborting the load.
//!
//! # Invariants
//! - Each record is materialized at most once.
//! - A record whose parent failed also fails; it never lands under a
//!   different parent.
//! - Sentinel ids in parent slots resolve to the tree's own sentinels.
//! - Reference cycles fail every record on the cycle.

use crate::model::entity::{is_sentinel, EntityId, EntityKind};
use crate::model::tree::{GtdTree, TreeError};
use crate::repo::entity_repo::{StoreError, StoreResult};
use crate::repo::record::StoredRecord;
use log::warn;
use std::collections::HashMap;

#[derive(Debug)]
enum Slot {
    Pending(Box<StoredRecord>),
    InProgress,
    Materialized,
    Failed,
}

/// Outcome of one load pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: usize,
    pub skipped: usize,
    /// Ids of skipped records. Rows too malformed to yield an id are only
    /// counted.
    pub skipped_ids: Vec<EntityId>,
}

/// Per-load cache from record id to materialization state.
#[derive(Debug, Default)]
pub struct ResolveCache {
    slots: HashMap<EntityId, Slot>,
    order: Vec<EntityId>,
    duplicates: Vec<EntityId>,
}

impl ResolveCache {
    /// Indexes `records`. A repeated id keeps the first record.
    pub fn new<I>(records: I) -> Self
    where
        I: IntoIterator<Item = StoredRecord>,
    {
        let mut cache = Self::default();
        for record in records {
            let id = record.id;
            if cache.slots.contains_key(&id) {
                warn!(
                    "event=load_record module=service status=skipped reason=duplicate_id id={}",
                    id
                );
                cache.duplicates.push(id);
                continue;
            }
            cache.slots.insert(id, Slot::Pending(Box::new(record)));
            cache.order.push(id);
        }
        cache
    }

    /// Whether `id` has been materialized into the tree by this cache.
    pub fn is_materialized(&self, id: EntityId) -> bool {
        matches!(self.slots.get(&id), Some(Slot::Materialized))
    }

    /// Materializes every pending record in input order.
    pub fn materialize_all(&mut self, tree: &mut GtdTree) -> LoadReport {
        let mut report = LoadReport::default();
        for id in self.order.clone() {
            let _ = self.materialize(tree, id);
            match self.slots.get(&id) {
                Some(Slot::Materialized) => report.loaded += 1,
                _ => {
                    report.skipped += 1;
                    report.skipped_ids.push(id);
                }
            }
        }
        report.skipped += self.duplicates.len();
        report.skipped_ids.extend(self.duplicates.iter().copied());
        report
    }

    /// Materializes record `id` (and, first, whatever it references).
    ///
    /// Already materialized ids succeed without touching the tree.
    pub fn materialize(&mut self, tree: &mut GtdTree, id: EntityId) -> StoreResult<()> {
        let record = match self.slots.get(&id) {
            Some(Slot::Pending(_)) => match self.slots.insert(id, Slot::InProgress) {
                Some(Slot::Pending(record)) => record,
                _ => return Ok(()),
            },
            Some(Slot::Materialized) => return Ok(()),
            Some(Slot::InProgress) => {
                return Err(StoreError::MalformedRecord(format!(
                    "reference cycle through {id}"
                )))
            }
            Some(Slot::Failed) => {
                return Err(StoreError::MalformedRecord(format!(
                    "record {id} failed to load"
                )))
            }
            None => return Err(StoreError::Tree(TreeError::NotFound(id))),
        };

        let result = self.build(tree, &record);
        let slot = match &result {
            Ok(()) => Slot::Materialized,
            Err(err) => {
                warn!(
                    "event=load_record module=service status=skipped kind={} id={} error={}",
                    record.kind, id, err
                );
                Slot::Failed
            }
        };
        self.slots.insert(id, slot);
        result
    }

    /// Turns a stored reference into a live id of `expected` kind.
    pub fn resolve(
        &mut self,
        tree: &mut GtdTree,
        id: EntityId,
        expected: EntityKind,
    ) -> StoreResult<EntityId> {
        if !is_sentinel(id) && self.slots.contains_key(&id) {
            self.materialize(tree, id)?;
        }
        match tree.kind_of(id) {
            Some(actual) if actual == expected => Ok(id),
            Some(actual) => Err(StoreError::Tree(TreeError::WrongKind {
                id,
                expected,
                actual,
            })),
            None => Err(StoreError::Tree(TreeError::NotFound(id))),
        }
    }

    fn build(&mut self, tree: &mut GtdTree, record: &StoredRecord) -> StoreResult<()> {
        record.validate()?;

        let parent = match (record.kind.parent_kind(), record.parent) {
            (Some(kind), Some(parent)) => Some(self.resolve(tree, parent, kind)?),
            _ => None,
        };
        let require_parent = || {
            parent.ok_or_else(|| {
                StoreError::MalformedRecord(format!("{} {} has no parent", record.kind, record.id))
            })
        };

        match record.kind {
            EntityKind::Context => {
                tree.create_context_with_id(record.id, record.title.as_str())?;
            }
            EntityKind::Realm => {
                tree.create_realm_with_id(record.id, record.title.as_str())?;
                if !record.visible {
                    tree.set_visible(record.id, false)?;
                }
            }
            EntityKind::Area => {
                tree.create_area_with_id(record.id, record.title.as_str(), require_parent()?)?;
            }
            EntityKind::Project => {
                tree.create_project_with_id(record.id, record.title.as_str(), require_parent()?)?;
                apply_action_fields(tree, record)?;
            }
            EntityKind::Task => {
                let contexts = self.resolve_contexts(tree, record);
                tree.create_task_with_id(
                    record.id,
                    record.title.as_str(),
                    require_parent()?,
                    &contexts,
                )?;
                apply_action_fields(tree, record)?;
                if record.waiting {
                    tree.set_waiting(record.id, true)?;
                }
            }
        }
        Ok(())
    }

    /// Context links that cannot be resolved are dropped, not fatal.
    fn resolve_contexts(&mut self, tree: &mut GtdTree, record: &StoredRecord) -> Vec<EntityId> {
        let mut contexts = Vec::with_capacity(record.contexts.len());
        for context in &record.contexts {
            match self.resolve(tree, *context, EntityKind::Context) {
                Ok(id) => contexts.push(id),
                Err(err) => warn!(
                    "event=load_context_link module=service status=dropped task={} context={} error={}",
                    record.id, context, err
                ),
            }
        }
        contexts
    }
}

fn apply_action_fields(tree: &mut GtdTree, record: &StoredRecord) -> Result<(), TreeError> {
    if !record.notes.is_empty() {
        tree.set_notes(record.id, record.notes.as_str())?;
    }
    if record.start_at.is_some() {
        tree.set_start(record.id, record.start_at)?;
    }
    if record.due_at.is_some() {
        tree.set_due(record.id, record.due_at)?;
    }
    if record.complete {
        tree.set_complete(record.id, true)?;
    }
    Ok(())
}

/// Loads `records` into `tree`. Rows that already failed to parse are
/// counted as skipped.
pub fn load_records<I>(tree: &mut GtdTree, records: I) -> LoadReport
where
    I: IntoIterator<Item = StoreResult<StoredRecord>>,
{
    let mut unreadable = 0;
    let parsed = records
        .into_iter()
        .filter_map(|record| match record {
            Ok(record) => Some(record),
            Err(err) => {
                unreadable += 1;
                warn!(
                    "event=load_record module=service status=skipped reason=unreadable error={}",
                    err
                );
                None
            }
        })
        .collect::<Vec<_>>();

    let mut cache = ResolveCache::new(parsed);
    let mut report = cache.materialize_all(tree);
    report.skipped += unreadable;
    report
}

#[cfg(test)]
mod tests {
    use super::{load_records, ResolveCache};
    use crate::model::entity::{EntityKind, AREA_NONE, PROJECT_NONE};
    use crate::model::tree::GtdTree;
    use crate::repo::entity_repo::StoreError;
    use crate::repo::record::StoredRecord;
    use uuid::Uuid;

    #[test]
    fn child_before_parent_is_resolved_depth_first() {
        let realm = StoredRecord::new(Uuid::new_v4(), EntityKind::Realm, "Work", None);
        let area = StoredRecord::new(Uuid::new_v4(), EntityKind::Area, "Ops", Some(realm.id));
        let project = StoredRecord::new(Uuid::new_v4(), EntityKind::Project, "Move", Some(area.id));

        let mut tree = GtdTree::new();
        let report = load_records(
            &mut tree,
            vec![Ok(project.clone()), Ok(area.clone()), Ok(realm.clone())],
        );
        assert_eq!(report.loaded, 3);
        assert_eq!(report.skipped, 0);
        assert_eq!(tree.parent_of(project.id), Some(area.id));
        assert_eq!(tree.children(realm.id), &[area.id]);
    }

    #[test]
    fn missing_parent_skips_record_and_dependents() {
        let project = StoredRecord::new(
            Uuid::new_v4(),
            EntityKind::Project,
            "orphan",
            Some(Uuid::new_v4()),
        );
        let task = StoredRecord::new(Uuid::new_v4(), EntityKind::Task, "t", Some(project.id));
        let loose = StoredRecord::new(Uuid::new_v4(), EntityKind::Task, "loose", Some(PROJECT_NONE));

        let mut tree = GtdTree::new();
        let report = load_records(&mut tree, vec![Ok(task.clone()), Ok(project.clone()), Ok(loose.clone())]);
        assert_eq!(report.loaded, 1);
        assert_eq!(report.skipped, 2);
        assert!(report.skipped_ids.contains(&task.id));
        assert!(report.skipped_ids.contains(&project.id));
        assert!(tree.contains(loose.id));
        assert!(!tree.contains(task.id));
    }

    #[test]
    fn unreadable_rows_are_counted() {
        let mut tree = GtdTree::new();
        let report = load_records(
            &mut tree,
            vec![Err(StoreError::MalformedRecord("bad uuid".to_string()))],
        );
        assert_eq!(report.loaded, 0);
        assert_eq!(report.skipped, 1);
        assert!(report.skipped_ids.is_empty());
    }

    #[test]
    fn cycle_fails_every_member() {
        let first_id = Uuid::new_v4();
        let second_id = Uuid::new_v4();
        let first = StoredRecord::new(first_id, EntityKind::Area, "a", Some(second_id));
        let second = StoredRecord::new(second_id, EntityKind::Area, "b", Some(first_id));

        let mut tree = GtdTree::new();
        let mut cache = ResolveCache::new(vec![first, second]);
        let report = cache.materialize_all(&mut tree);
        assert_eq!(report.loaded, 0);
        assert_eq!(report.skipped, 2);
    }

    #[test]
    fn duplicate_ids_keep_first_record() {
        let id = Uuid::new_v4();
        let first = StoredRecord::new(id, EntityKind::Project, "first", Some(AREA_NONE));
        let second = StoredRecord::new(id, EntityKind::Project, "second", Some(AREA_NONE));

        let mut tree = GtdTree::new();
        let report = load_records(&mut tree, vec![Ok(first), Ok(second)]);
        assert_eq!(report.loaded, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(tree.title(id), Some("first"));
    }
}
