//! Flat storage shape of one entity.

use crate::model::entity::{is_sentinel, ActionState, EntityId, EntityKind};
use crate::model::tree::{GtdTree, TreeError};
use crate::repo::entity_repo::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};

/// One persisted entity.
///
/// Fields that do not apply to `kind` keep their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: EntityId,
    pub kind: EntityKind,
    pub title: String,
    /// Owning container. `None` for contexts and realms.
    pub parent: Option<EntityId>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub start_at: Option<i64>,
    #[serde(default)]
    pub due_at: Option<i64>,
    #[serde(default)]
    pub complete: bool,
    #[serde(default)]
    pub waiting: bool,
    #[serde(default = "default_visible")]
    pub visible: bool,
    /// Task context memberships in order.
    #[serde(default)]
    pub contexts: Vec<EntityId>,
}

fn default_visible() -> bool {
    true
}

impl StoredRecord {
    /// Bare record of `kind` with default fields.
    pub fn new(
        id: EntityId,
        kind: EntityKind,
        title: impl Into<String>,
        parent: Option<EntityId>,
    ) -> Self {
        Self {
            id,
            kind,
            title: title.into(),
            parent,
            notes: String::new(),
            start_at: None,
            due_at: None,
            complete: false,
            waiting: false,
            visible: true,
            contexts: Vec::new(),
        }
    }

    /// Snapshots entity `id` from `tree`.
    ///
    /// # Errors
    /// - `Tree(NotFound)` when `id` is not in the tree.
    /// - `Tree(InvalidOperation)` for sentinel ids, which are never stored.
    pub fn from_tree(tree: &GtdTree, id: EntityId) -> StoreResult<Self> {
        if is_sentinel(id) {
            return Err(StoreError::Tree(TreeError::InvalidOperation(format!(
                "sentinel {id} is not persisted"
            ))));
        }
        let kind = tree.kind_of(id).ok_or(TreeError::NotFound(id))?;
        let title = tree.title(id).unwrap_or_default();
        let mut record = Self::new(id, kind, title, tree.parent_of(id));

        match kind {
            EntityKind::Context | EntityKind::Area => {}
            EntityKind::Realm => {
                record.visible = tree.realm(id).map_or(true, |realm| realm.is_visible());
            }
            EntityKind::Project => {
                if let Some(state) = tree.action_state(id) {
                    record.apply_state(state);
                }
            }
            EntityKind::Task => {
                if let Some(task) = tree.task(id) {
                    record.apply_state(task.state());
                    record.waiting = task.is_waiting();
                    record.contexts = task.contexts().to_vec();
                }
            }
        }
        Ok(record)
    }

    fn apply_state(&mut self, state: &ActionState) {
        self.notes = state.notes().to_string();
        self.start_at = state.start_at();
        self.due_at = state.due_at();
        self.complete = state.is_complete();
    }

    /// Checks the shape invariants storage relies on.
    ///
    /// # Errors
    /// - `MalformedRecord` when the id is nil or a sentinel, the title is
    ///   blank, the parent slot does not match the kind, or task-only fields
    ///   are set on another kind.
    pub fn validate(&self) -> StoreResult<()> {
        if self.id.is_nil() || is_sentinel(self.id) {
            return Err(self.malformed("reserved id"));
        }
        if self.title.trim().is_empty() {
            return Err(self.malformed("blank title"));
        }
        match (self.kind.parent_kind(), self.parent) {
            (Some(_), None) => return Err(self.malformed("missing parent")),
            (None, Some(_)) => return Err(self.malformed("unexpected parent")),
            _ => {}
        }
        if self.parent == Some(self.id) {
            return Err(self.malformed("entity is its own parent"));
        }
        if self.kind != EntityKind::Task && (self.waiting || !self.contexts.is_empty()) {
            return Err(self.malformed("task fields on non-task record"));
        }
        Ok(())
    }

    fn malformed(&self, reason: &str) -> StoreError {
        StoreError::MalformedRecord(format!("{} {}: {reason}", self.kind, self.id))
    }
}
