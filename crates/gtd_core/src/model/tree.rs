//! In-memory GTD task tree.
//!
//! # Responsibility
//! - Own every entity and the containment links between them.
//! - Apply mutations and publish exactly one event per observable change.
//!
//! # Invariants
//! - A child's parent back-reference always names a container whose child
//!   collection holds the child (reparenting is validated first, then applied
//!   in one step).
//! - Events are emitted after the mutation is applied.
//! - A failed operation applies nothing and emits nothing.
//! - Sentinel entities are never retitled, moved or removed.

use crate::model::entity::{
    is_sentinel, ActionState, Area, Context, EntityId, EntityKind, Project, Realm, Task,
    AREA_NONE, PROJECT_NONE, REALM_NONE, SENTINEL_TITLE,
};
use crate::notify::bus::{
    deliver, Channel, EventBus, EventKind, HandlerError, ModelEvent, SubscriptionId,
};
use log::debug;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type TreeResult<T> = Result<T, TreeError>;

/// Coarse error classification shared by the model and persistence layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidOperation,
    NotEmpty,
    NotFound,
    MalformedRecord,
}

/// Errors from task tree operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// Operation not allowed on this entity (sentinel edits, blank titles, ...).
    InvalidOperation(String),
    /// Entity still owns children (or, for contexts, is attached to tasks).
    NotEmpty { kind: EntityKind, id: EntityId },
    /// No entity with this id exists.
    NotFound(EntityId),
    /// Entity exists but has a different kind than the operation needs.
    WrongKind {
        id: EntityId,
        expected: EntityKind,
        actual: EntityKind,
    },
}

impl TreeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidOperation(_) | Self::WrongKind { .. } => ErrorKind::InvalidOperation,
            Self::NotEmpty { .. } => ErrorKind::NotEmpty,
            Self::NotFound(_) => ErrorKind::NotFound,
        }
    }
}

impl Display for TreeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidOperation(message) => write!(f, "invalid operation: {message}"),
            Self::NotEmpty { kind, id } => write!(f, "{kind} is not empty: {id}"),
            Self::NotFound(id) => write!(f, "entity not found: {id}"),
            Self::WrongKind {
                id,
                expected,
                actual,
            } => write!(f, "entity {id} is a {actual}, expected {expected}"),
        }
    }
}

impl Error for TreeError {}

#[derive(Debug)]
struct Arena<T> {
    items: HashMap<EntityId, T>,
    order: Vec<EntityId>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self {
            items: HashMap::new(),
            order: Vec::new(),
        }
    }
}

impl<T> Arena<T> {
    fn insert(&mut self, id: EntityId, item: T) {
        if self.items.insert(id, item).is_none() {
            self.order.push(id);
        }
    }

    fn get(&self, id: EntityId) -> Option<&T> {
        self.items.get(&id)
    }

    fn get_mut(&mut self, id: EntityId) -> Option<&mut T> {
        self.items.get_mut(&id)
    }

    fn remove(&mut self, id: EntityId) -> Option<T> {
        let removed = self.items.remove(&id)?;
        self.order.retain(|current| *current != id);
        Some(removed)
    }

    fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.order.iter().filter_map(|id| self.items.get(id))
    }
}

/// The task tree: single writer for all GTD entities.
#[derive(Debug)]
pub struct GtdTree {
    contexts: Arena<Context>,
    realms: Arena<Realm>,
    areas: Arena<Area>,
    projects: Arena<Project>,
    tasks: Arena<Task>,
    kinds: HashMap<EntityId, EntityKind>,
    bus: EventBus,
}

impl Default for GtdTree {
    fn default() -> Self {
        Self::new()
    }
}

impl GtdTree {
    /// Creates a tree holding only the sentinel chain
    /// `REALM_NONE -> AREA_NONE -> PROJECT_NONE`. No events are emitted.
    pub fn new() -> Self {
        let mut tree = Self {
            contexts: Arena::default(),
            realms: Arena::default(),
            areas: Arena::default(),
            projects: Arena::default(),
            tasks: Arena::default(),
            kinds: HashMap::new(),
            bus: EventBus::new(),
        };

        tree.realms.insert(
            REALM_NONE,
            Realm {
                id: REALM_NONE,
                title: SENTINEL_TITLE.to_string(),
                visible: true,
                areas: vec![AREA_NONE],
            },
        );
        tree.areas.insert(
            AREA_NONE,
            Area {
                id: AREA_NONE,
                title: SENTINEL_TITLE.to_string(),
                realm: REALM_NONE,
                projects: vec![PROJECT_NONE],
            },
        );
        tree.projects.insert(
            PROJECT_NONE,
            Project {
                id: PROJECT_NONE,
                title: SENTINEL_TITLE.to_string(),
                area: AREA_NONE,
                state: ActionState::default(),
                tasks: Vec::new(),
            },
        );
        tree.kinds.insert(REALM_NONE, EntityKind::Realm);
        tree.kinds.insert(AREA_NONE, EntityKind::Area);
        tree.kinds.insert(PROJECT_NONE, EntityKind::Project);
        tree
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Subscribes on the bus owned by this tree.
    pub fn subscribe<F>(
        &mut self,
        channel: Channel,
        name: impl Into<String>,
        handler: F,
    ) -> SubscriptionId
    where
        F: Fn(&mut GtdTree, &ModelEvent) -> Result<(), HandlerError> + 'static,
    {
        self.bus.subscribe(channel, name, handler)
    }

    pub fn subscribe_many<F>(
        &mut self,
        channels: &[Channel],
        name: impl Into<String>,
        handler: F,
    ) -> SubscriptionId
    where
        F: Fn(&mut GtdTree, &ModelEvent) -> Result<(), HandlerError> + 'static,
    {
        self.bus.subscribe_many(channels, name, handler)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    // ---- lookups ----

    pub fn kind_of(&self, id: EntityId) -> Option<EntityKind> {
        self.kinds.get(&id).copied()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.kinds.contains_key(&id)
    }

    pub fn context(&self, id: EntityId) -> Option<&Context> {
        self.contexts.get(id)
    }

    pub fn realm(&self, id: EntityId) -> Option<&Realm> {
        self.realms.get(id)
    }

    pub fn area(&self, id: EntityId) -> Option<&Area> {
        self.areas.get(id)
    }

    pub fn project(&self, id: EntityId) -> Option<&Project> {
        self.projects.get(id)
    }

    pub fn task(&self, id: EntityId) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn contexts(&self) -> impl Iterator<Item = &Context> + '_ {
        self.contexts.iter()
    }

    pub fn realms(&self) -> impl Iterator<Item = &Realm> + '_ {
        self.realms.iter()
    }

    pub fn areas(&self) -> impl Iterator<Item = &Area> + '_ {
        self.areas.iter()
    }

    pub fn projects(&self) -> impl Iterator<Item = &Project> + '_ {
        self.projects.iter()
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> + '_ {
        self.tasks.iter()
    }

    /// Ids of one kind in creation order. Includes sentinels.
    pub fn ids(&self, kind: EntityKind) -> &[EntityId] {
        match kind {
            EntityKind::Context => &self.contexts.order,
            EntityKind::Realm => &self.realms.order,
            EntityKind::Area => &self.areas.order,
            EntityKind::Project => &self.projects.order,
            EntityKind::Task => &self.tasks.order,
        }
    }

    /// Entity count for one kind. Includes sentinels.
    pub fn count(&self, kind: EntityKind) -> usize {
        self.ids(kind).len()
    }

    pub fn title(&self, id: EntityId) -> Option<&str> {
        match self.kind_of(id)? {
            EntityKind::Context => self.contexts.get(id).map(Context::title),
            EntityKind::Realm => self.realms.get(id).map(Realm::title),
            EntityKind::Area => self.areas.get(id).map(Area::title),
            EntityKind::Project => self.projects.get(id).map(Project::title),
            EntityKind::Task => self.tasks.get(id).map(Task::title),
        }
    }

    /// Notes/schedule/completion for projects and tasks.
    pub fn action_state(&self, id: EntityId) -> Option<&ActionState> {
        match self.kind_of(id)? {
            EntityKind::Project => self.projects.get(id).map(Project::state),
            EntityKind::Task => self.tasks.get(id).map(Task::state),
            _ => None,
        }
    }

    pub fn parent_of(&self, id: EntityId) -> Option<EntityId> {
        match self.kind_of(id)? {
            EntityKind::Area => self.areas.get(id).map(Area::realm),
            EntityKind::Project => self.projects.get(id).map(Project::area),
            EntityKind::Task => self.tasks.get(id).map(Task::project),
            EntityKind::Context | EntityKind::Realm => None,
        }
    }

    /// Ordered child collection; empty for leaves and unknown ids.
    pub fn children(&self, id: EntityId) -> &[EntityId] {
        match self.kind_of(id) {
            Some(EntityKind::Realm) => self.realms.get(id).map(Realm::areas),
            Some(EntityKind::Area) => self.areas.get(id).map(Area::projects),
            Some(EntityKind::Project) => self.projects.get(id).map(Project::tasks),
            _ => None,
        }
        .unwrap_or(&[])
    }

    /// Owning realm of a hierarchy entity (a realm owns itself).
    pub fn realm_of(&self, id: EntityId) -> Option<EntityId> {
        let mut cursor = id;
        loop {
            match self.kind_of(cursor)? {
                EntityKind::Realm => return Some(cursor),
                EntityKind::Context => return None,
                _ => cursor = self.parent_of(cursor)?,
            }
        }
    }

    /// Whether `id` is `ancestor` or lies below it.
    pub fn is_within(&self, id: EntityId, ancestor: EntityId) -> bool {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.parent_of(current);
        }
        false
    }

    /// False only when the owning realm exists and is hidden.
    pub fn is_in_visible_realm(&self, id: EntityId) -> bool {
        self.realm_of(id)
            .and_then(|realm| self.realms.get(realm))
            .map_or(true, Realm::is_visible)
    }

    /// Tasks below `realm`, in area/project/task order.
    pub fn tasks_in_realm(&self, realm: EntityId) -> TreeResult<Vec<EntityId>> {
        self.expect_kind(realm, EntityKind::Realm)?;
        let tasks = self
            .children(realm)
            .iter()
            .flat_map(|area| self.children(*area))
            .flat_map(|project| self.children(*project))
            .copied()
            .collect();
        Ok(tasks)
    }

    /// Tasks tagged with `context`, in task creation order.
    pub fn tasks_for_context(&self, context: EntityId) -> TreeResult<Vec<EntityId>> {
        self.expect_kind(context, EntityKind::Context)?;
        Ok(self
            .tasks
            .iter()
            .filter(|task| task.has_context(context))
            .map(Task::id)
            .collect())
    }

    /// Checks every parent/child link in both directions.
    pub fn validate_links(&self) -> TreeResult<()> {
        for (&id, &kind) in &self.kinds {
            if let Some(parent) = self.parent_of(id) {
                let expected = kind.parent_kind();
                if self.kind_of(parent) != expected {
                    return Err(TreeError::InvalidOperation(format!(
                        "{kind} {id} points at missing or mistyped parent {parent}"
                    )));
                }
                let listed = self
                    .children(parent)
                    .iter()
                    .filter(|child| **child == id)
                    .count();
                if listed != 1 {
                    return Err(TreeError::InvalidOperation(format!(
                        "{kind} {id} listed {listed} times under parent {parent}"
                    )));
                }
            }
            for child in self.children(id) {
                if self.parent_of(*child) != Some(id) {
                    return Err(TreeError::InvalidOperation(format!(
                        "child {child} of {kind} {id} points elsewhere"
                    )));
                }
            }
        }
        for task in self.tasks.iter() {
            for context in task.contexts() {
                if self.kind_of(*context) != Some(EntityKind::Context) {
                    return Err(TreeError::InvalidOperation(format!(
                        "task {} references missing context {context}",
                        task.id
                    )));
                }
            }
        }
        Ok(())
    }

    // ---- creation ----

    pub fn create_context(&mut self, title: impl Into<String>) -> TreeResult<EntityId> {
        self.create_context_with_id(Uuid::new_v4(), title)
    }

    pub fn create_context_with_id(
        &mut self,
        id: EntityId,
        title: impl Into<String>,
    ) -> TreeResult<EntityId> {
        self.ensure_fresh_id(id)?;
        let title = normalize_title(title.into())?;

        self.contexts.insert(id, Context { id, title });
        self.kinds.insert(id, EntityKind::Context);
        self.emit(EntityKind::Context, EventKind::Added, id, None);
        Ok(id)
    }

    /// New realms start visible.
    pub fn create_realm(&mut self, title: impl Into<String>) -> TreeResult<EntityId> {
        self.create_realm_with_id(Uuid::new_v4(), title)
    }

    pub fn create_realm_with_id(
        &mut self,
        id: EntityId,
        title: impl Into<String>,
    ) -> TreeResult<EntityId> {
        self.ensure_fresh_id(id)?;
        let title = normalize_title(title.into())?;

        self.realms.insert(
            id,
            Realm {
                id,
                title,
                visible: true,
                areas: Vec::new(),
            },
        );
        self.kinds.insert(id, EntityKind::Realm);
        self.emit(EntityKind::Realm, EventKind::Added, id, None);
        Ok(id)
    }

    pub fn create_area(
        &mut self,
        title: impl Into<String>,
        realm: EntityId,
    ) -> TreeResult<EntityId> {
        self.create_area_with_id(Uuid::new_v4(), title, realm)
    }

    pub fn create_area_with_id(
        &mut self,
        id: EntityId,
        title: impl Into<String>,
        realm: EntityId,
    ) -> TreeResult<EntityId> {
        self.ensure_fresh_id(id)?;
        let title = normalize_title(title.into())?;
        self.expect_kind(realm, EntityKind::Realm)?;

        self.areas.insert(
            id,
            Area {
                id,
                title,
                realm,
                projects: Vec::new(),
            },
        );
        self.kinds.insert(id, EntityKind::Area);
        self.attach_child(realm, id);
        self.emit(EntityKind::Area, EventKind::Added, id, Some(realm));
        Ok(id)
    }

    pub fn create_project(
        &mut self,
        title: impl Into<String>,
        area: EntityId,
    ) -> TreeResult<EntityId> {
        self.create_project_with_id(Uuid::new_v4(), title, area)
    }

    pub fn create_project_with_id(
        &mut self,
        id: EntityId,
        title: impl Into<String>,
        area: EntityId,
    ) -> TreeResult<EntityId> {
        self.ensure_fresh_id(id)?;
        let title = normalize_title(title.into())?;
        self.expect_kind(area, EntityKind::Area)?;

        self.projects.insert(
            id,
            Project {
                id,
                title,
                area,
                state: ActionState::default(),
                tasks: Vec::new(),
            },
        );
        self.kinds.insert(id, EntityKind::Project);
        self.attach_child(area, id);
        self.emit(EntityKind::Project, EventKind::Added, id, Some(area));
        Ok(id)
    }

    /// Duplicate context ids are collapsed, keeping first occurrence order.
    pub fn create_task(
        &mut self,
        title: impl Into<String>,
        project: EntityId,
        contexts: &[EntityId],
    ) -> TreeResult<EntityId> {
        self.create_task_with_id(Uuid::new_v4(), title, project, contexts)
    }

    pub fn create_task_with_id(
        &mut self,
        id: EntityId,
        title: impl Into<String>,
        project: EntityId,
        contexts: &[EntityId],
    ) -> TreeResult<EntityId> {
        self.ensure_fresh_id(id)?;
        let title = normalize_title(title.into())?;
        self.expect_kind(project, EntityKind::Project)?;

        let mut unique = Vec::with_capacity(contexts.len());
        for context in contexts {
            self.expect_kind(*context, EntityKind::Context)?;
            if !unique.contains(context) {
                unique.push(*context);
            }
        }

        self.tasks.insert(
            id,
            Task {
                id,
                title,
                project,
                state: ActionState::default(),
                waiting: false,
                contexts: unique,
            },
        );
        self.kinds.insert(id, EntityKind::Task);
        self.attach_child(project, id);
        self.emit(EntityKind::Task, EventKind::Added, id, Some(project));
        Ok(id)
    }

    // ---- field mutation ----

    /// Emits `renamed`; an unchanged title is a silent no-op.
    pub fn set_title(&mut self, id: EntityId, title: impl Into<String>) -> TreeResult<()> {
        let kind = self.require(id)?;
        if is_sentinel(id) {
            return Err(TreeError::InvalidOperation(format!(
                "sentinel {kind} cannot be retitled"
            )));
        }
        let title = normalize_title(title.into())?;

        let slot = match kind {
            EntityKind::Context => self.contexts.get_mut(id).map(|item| &mut item.title),
            EntityKind::Realm => self.realms.get_mut(id).map(|item| &mut item.title),
            EntityKind::Area => self.areas.get_mut(id).map(|item| &mut item.title),
            EntityKind::Project => self.projects.get_mut(id).map(|item| &mut item.title),
            EntityKind::Task => self.tasks.get_mut(id).map(|item| &mut item.title),
        }
        .ok_or(TreeError::NotFound(id))?;
        if *slot == title {
            return Ok(());
        }
        *slot = title;

        let parent = self.parent_of(id);
        self.emit(kind, EventKind::Renamed, id, parent);
        Ok(())
    }

    /// Emits `visible_changed` on every call, even when the flag is unchanged.
    /// The sentinel realm stays visible.
    pub fn set_visible(&mut self, realm: EntityId, visible: bool) -> TreeResult<()> {
        self.expect_kind(realm, EntityKind::Realm)?;
        if is_sentinel(realm) {
            return Err(TreeError::InvalidOperation(
                "sentinel realm cannot be hidden or shown".to_string(),
            ));
        }
        if let Some(item) = self.realms.get_mut(realm) {
            item.visible = visible;
        }
        self.emit(EntityKind::Realm, EventKind::VisibleChanged, realm, None);
        Ok(())
    }

    pub fn set_notes(&mut self, id: EntityId, notes: impl Into<String>) -> TreeResult<()> {
        let notes = notes.into();
        self.update_action_state(id, move |state| state.notes = notes)
    }

    pub fn set_start(&mut self, id: EntityId, start_at: Option<i64>) -> TreeResult<()> {
        self.update_action_state(id, move |state| state.start_at = start_at)
    }

    pub fn set_due(&mut self, id: EntityId, due_at: Option<i64>) -> TreeResult<()> {
        self.update_action_state(id, move |state| state.due_at = due_at)
    }

    pub fn set_complete(&mut self, id: EntityId, complete: bool) -> TreeResult<()> {
        self.update_action_state(id, move |state| state.complete = complete)
    }

    pub fn set_waiting(&mut self, task: EntityId, waiting: bool) -> TreeResult<()> {
        self.expect_kind(task, EntityKind::Task)?;
        let parent = match self.tasks.get_mut(task) {
            Some(item) => {
                item.waiting = waiting;
                item.project
            }
            None => return Err(TreeError::NotFound(task)),
        };
        self.emit(EntityKind::Task, EventKind::Modified, task, Some(parent));
        Ok(())
    }

    /// Moves a task, project or area under `new_parent`.
    ///
    /// All checks run before any link changes, so the old-parent detach, the
    /// new-parent attach and the back-reference update land together. Moving
    /// to the current parent is a no-op.
    pub fn reparent(&mut self, child: EntityId, new_parent: EntityId) -> TreeResult<()> {
        let kind = self.require(child)?;
        if is_sentinel(child) {
            return Err(TreeError::InvalidOperation(format!(
                "sentinel {kind} cannot be moved"
            )));
        }
        let parent_kind = kind.parent_kind().ok_or_else(|| {
            TreeError::InvalidOperation(format!("{kind} entities have no parent"))
        })?;
        self.expect_kind(new_parent, parent_kind)?;
        let old_parent = self.parent_of(child).ok_or(TreeError::NotFound(child))?;
        if old_parent == new_parent {
            return Ok(());
        }

        self.detach_child(old_parent, child);
        self.attach_child(new_parent, child);
        match kind {
            EntityKind::Area => {
                if let Some(item) = self.areas.get_mut(child) {
                    item.realm = new_parent;
                }
            }
            EntityKind::Project => {
                if let Some(item) = self.projects.get_mut(child) {
                    item.area = new_parent;
                }
            }
            EntityKind::Task => {
                if let Some(item) = self.tasks.get_mut(child) {
                    item.project = new_parent;
                }
            }
            EntityKind::Context | EntityKind::Realm => {}
        }

        self.emit(kind, EventKind::Modified, child, Some(new_parent));
        Ok(())
    }

    /// Tags `task` with `context`. Returns `false` when already tagged.
    pub fn add_context(&mut self, task: EntityId, context: EntityId) -> TreeResult<bool> {
        self.expect_kind(task, EntityKind::Task)?;
        self.expect_kind(context, EntityKind::Context)?;
        let parent = match self.tasks.get_mut(task) {
            Some(item) if item.has_context(context) => return Ok(false),
            Some(item) => {
                item.contexts.push(context);
                item.project
            }
            None => return Err(TreeError::NotFound(task)),
        };
        self.emit(EntityKind::Task, EventKind::Modified, task, Some(parent));
        Ok(true)
    }

    /// Untags `task`. Returns `false` when it was not tagged.
    pub fn remove_context(&mut self, task: EntityId, context: EntityId) -> TreeResult<bool> {
        self.expect_kind(task, EntityKind::Task)?;
        self.expect_kind(context, EntityKind::Context)?;
        let parent = match self.tasks.get_mut(task) {
            Some(item) if !item.has_context(context) => return Ok(false),
            Some(item) => {
                item.contexts.retain(|current| *current != context);
                item.project
            }
            None => return Err(TreeError::NotFound(task)),
        };
        self.emit(EntityKind::Task, EventKind::Modified, task, Some(parent));
        Ok(true)
    }

    /// Detaches and drops one entity. Never cascades.
    ///
    /// # Errors
    /// - `NotEmpty` when a realm/area/project still owns children, or a
    ///   context is still attached to a task.
    /// - `InvalidOperation` for sentinels.
    pub fn remove(&mut self, id: EntityId) -> TreeResult<()> {
        let kind = self.require(id)?;
        if is_sentinel(id) {
            return Err(TreeError::InvalidOperation(format!(
                "sentinel {kind} cannot be removed"
            )));
        }
        let occupied = match kind {
            EntityKind::Context => self.tasks.iter().any(|task| task.has_context(id)),
            _ => !self.children(id).is_empty(),
        };
        if occupied {
            return Err(TreeError::NotEmpty { kind, id });
        }

        let parent = self.parent_of(id);
        if let Some(parent) = parent {
            self.detach_child(parent, id);
        }
        let dropped = match kind {
            EntityKind::Context => self.contexts.remove(id).is_some(),
            EntityKind::Realm => self.realms.remove(id).is_some(),
            EntityKind::Area => self.areas.remove(id).is_some(),
            EntityKind::Project => self.projects.remove(id).is_some(),
            EntityKind::Task => self.tasks.remove(id).is_some(),
        };
        if !dropped {
            return Err(TreeError::NotFound(id));
        }
        self.kinds.remove(&id);

        self.emit(kind, EventKind::Removed, id, parent);
        Ok(())
    }

    // ---- internals ----

    fn update_action_state(
        &mut self,
        id: EntityId,
        apply: impl FnOnce(&mut ActionState),
    ) -> TreeResult<()> {
        let kind = self.require(id)?;
        let (state, parent) = match kind {
            EntityKind::Project => self
                .projects
                .get_mut(id)
                .map(|item| (&mut item.state, item.area)),
            EntityKind::Task => self
                .tasks
                .get_mut(id)
                .map(|item| (&mut item.state, item.project)),
            other => {
                return Err(TreeError::InvalidOperation(format!(
                    "{other} has no notes, dates or completion"
                )))
            }
        }
        .ok_or(TreeError::NotFound(id))?;
        if is_sentinel(id) {
            return Err(TreeError::InvalidOperation(format!(
                "sentinel {kind} has fixed notes, dates and completion"
            )));
        }
        apply(state);

        self.emit(kind, EventKind::Modified, id, Some(parent));
        Ok(())
    }

    fn require(&self, id: EntityId) -> TreeResult<EntityKind> {
        self.kind_of(id).ok_or(TreeError::NotFound(id))
    }

    fn expect_kind(&self, id: EntityId, expected: EntityKind) -> TreeResult<()> {
        let actual = self.require(id)?;
        if actual != expected {
            return Err(TreeError::WrongKind {
                id,
                expected,
                actual,
            });
        }
        Ok(())
    }

    fn ensure_fresh_id(&self, id: EntityId) -> TreeResult<()> {
        if id.is_nil() {
            return Err(TreeError::InvalidOperation("entity id must not be nil".into()));
        }
        if self.contains(id) {
            return Err(TreeError::InvalidOperation(format!(
                "entity id already in use: {id}"
            )));
        }
        Ok(())
    }

    fn child_list_mut(&mut self, parent: EntityId) -> Option<&mut Vec<EntityId>> {
        match self.kind_of(parent)? {
            EntityKind::Realm => self.realms.get_mut(parent).map(|item| &mut item.areas),
            EntityKind::Area => self.areas.get_mut(parent).map(|item| &mut item.projects),
            EntityKind::Project => self.projects.get_mut(parent).map(|item| &mut item.tasks),
            EntityKind::Context | EntityKind::Task => None,
        }
    }

    fn attach_child(&mut self, parent: EntityId, child: EntityId) {
        if let Some(children) = self.child_list_mut(parent) {
            if !children.contains(&child) {
                children.push(child);
            }
        }
    }

    /// Removing a sentinel child from a sentinel container is ignored so the
    /// `REALM_NONE -> AREA_NONE -> PROJECT_NONE` chain stays intact.
    fn detach_child(&mut self, parent: EntityId, child: EntityId) {
        if is_sentinel(parent) && is_sentinel(child) {
            return;
        }
        if let Some(children) = self.child_list_mut(parent) {
            children.retain(|current| *current != child);
        }
    }

    fn emit(&mut self, kind: EntityKind, event: EventKind, id: EntityId, parent: Option<EntityId>) {
        let event = ModelEvent {
            channel: Channel::new(kind, event),
            id,
            parent,
        };
        debug!(
            "event=model_change module=model status=ok channel={} id={}",
            event.channel, id
        );
        deliver(self, event);
    }
}

fn normalize_title(value: String) -> TreeResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(TreeError::InvalidOperation(
            "title must not be blank".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::{normalize_title, ErrorKind, GtdTree, TreeError};
    use crate::model::entity::{EntityKind, AREA_NONE, PROJECT_NONE, REALM_NONE};

    #[test]
    fn new_tree_holds_linked_sentinel_chain() {
        let tree = GtdTree::new();
        assert_eq!(tree.children(REALM_NONE), &[AREA_NONE]);
        assert_eq!(tree.children(AREA_NONE), &[PROJECT_NONE]);
        assert_eq!(tree.realm_of(PROJECT_NONE), Some(REALM_NONE));
        assert!(tree.validate_links().is_ok());
    }

    #[test]
    fn detach_ignores_sentinel_child_of_sentinel_container() {
        let mut tree = GtdTree::new();
        tree.detach_child(REALM_NONE, AREA_NONE);
        tree.detach_child(AREA_NONE, PROJECT_NONE);
        assert_eq!(tree.children(REALM_NONE), &[AREA_NONE]);
        assert_eq!(tree.children(AREA_NONE), &[PROJECT_NONE]);
    }

    #[test]
    fn normalize_title_trims_and_rejects_blank() {
        assert_eq!(normalize_title("  Home ".to_string()).unwrap(), "Home");
        let err = normalize_title("   ".to_string()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOperation);
    }

    #[test]
    fn wrong_kind_reports_invalid_operation() {
        let mut tree = GtdTree::new();
        let context = tree.create_context("Errands").unwrap();
        let err = tree.create_area("Home", context).unwrap_err();
        assert!(matches!(
            err,
            TreeError::WrongKind {
                expected: EntityKind::Realm,
                actual: EntityKind::Context,
                ..
            }
        ));
        assert_eq!(err.kind(), ErrorKind::InvalidOperation);
    }
}
