//! GTD entity records.
//!
//! # Responsibility
//! - Define the five entity kinds and their containment back-references.
//! - Define the sentinel ("None") ids used for unassigned parents.
//!
//! # Invariants
//! - `id` is stable and never reused for another entity.
//! - Every Area/Project/Task holds exactly one parent id (possibly a sentinel).
//! - Child collections keep insertion order and never contain duplicates.
//! - Fields are crate-private: mutation only goes through `GtdTree`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier for every GTD entity.
pub type EntityId = Uuid;

/// Realm assigned to areas that have no real realm.
pub const REALM_NONE: EntityId = Uuid::from_u128(0x0000_0000_0000_4000_8000_0000_0000_0001);
/// Area assigned to projects that have no real area. Lives in `REALM_NONE`.
pub const AREA_NONE: EntityId = Uuid::from_u128(0x0000_0000_0000_4000_8000_0000_0000_0002);
/// Project assigned to tasks that have no real project. Lives in `AREA_NONE`.
pub const PROJECT_NONE: EntityId = Uuid::from_u128(0x0000_0000_0000_4000_8000_0000_0000_0003);

/// Title carried by every sentinel entity.
pub const SENTINEL_TITLE: &str = "None";

/// Returns whether `id` is one of the sentinel ids.
pub fn is_sentinel(id: EntityId) -> bool {
    id == REALM_NONE || id == AREA_NONE || id == PROJECT_NONE
}

/// Entity category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Context,
    Realm,
    Area,
    Project,
    Task,
}

impl EntityKind {
    /// All kinds in load-dependency order (parents before children).
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Context,
        EntityKind::Realm,
        EntityKind::Area,
        EntityKind::Project,
        EntityKind::Task,
    ];

    /// Stable lowercase name used in storage and log lines.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Context => "context",
            Self::Realm => "realm",
            Self::Area => "area",
            Self::Project => "project",
            Self::Task => "task",
        }
    }

    /// Parses the storage name produced by [`EntityKind::as_str`].
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "context" => Some(Self::Context),
            "realm" => Some(Self::Realm),
            "area" => Some(Self::Area),
            "project" => Some(Self::Project),
            "task" => Some(Self::Task),
            _ => None,
        }
    }

    /// Kind of the owning container, if this kind has one.
    pub fn parent_kind(self) -> Option<Self> {
        match self {
            Self::Area => Some(Self::Realm),
            Self::Project => Some(Self::Area),
            Self::Task => Some(Self::Project),
            Self::Context | Self::Realm => None,
        }
    }

    /// Kind held in this kind's child collection, if any.
    pub fn child_kind(self) -> Option<Self> {
        match self {
            Self::Realm => Some(Self::Area),
            Self::Area => Some(Self::Project),
            Self::Project => Some(Self::Task),
            Self::Context | Self::Task => None,
        }
    }

    /// Sentinel id for this level of the hierarchy, if it has one.
    pub fn sentinel(self) -> Option<EntityId> {
        match self {
            Self::Realm => Some(REALM_NONE),
            Self::Area => Some(AREA_NONE),
            Self::Project => Some(PROJECT_NONE),
            Self::Context | Self::Task => None,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-qualified entity reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: EntityId,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: EntityId) -> Self {
        Self { kind, id }
    }
}

/// Notes, schedule and completion shared by projects and tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionState {
    pub(crate) notes: String,
    /// Unix epoch milliseconds.
    pub(crate) start_at: Option<i64>,
    /// Unix epoch milliseconds.
    pub(crate) due_at: Option<i64>,
    pub(crate) complete: bool,
}

impl ActionState {
    pub fn notes(&self) -> &str {
        &self.notes
    }

    pub fn start_at(&self) -> Option<i64> {
        self.start_at
    }

    pub fn due_at(&self) -> Option<i64> {
        self.due_at
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }
}

/// Situational tag for tasks ("Errands", "Computer").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    pub(crate) id: EntityId,
    pub(crate) title: String,
}

impl Context {
    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }
}

/// Top-level life grouping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Realm {
    pub(crate) id: EntityId,
    pub(crate) title: String,
    pub(crate) visible: bool,
    #[serde(default)]
    pub(crate) areas: Vec<EntityId>,
}

impl Realm {
    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Hidden realms hide every descendant in realm-scoped views.
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn areas(&self) -> &[EntityId] {
        &self.areas
    }
}

/// Area of responsibility inside one realm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Area {
    pub(crate) id: EntityId,
    pub(crate) title: String,
    pub(crate) realm: EntityId,
    #[serde(default)]
    pub(crate) projects: Vec<EntityId>,
}

impl Area {
    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn realm(&self) -> EntityId {
        self.realm
    }

    pub fn projects(&self) -> &[EntityId] {
        &self.projects
    }
}

/// Multi-task goal inside one area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub(crate) id: EntityId,
    pub(crate) title: String,
    pub(crate) area: EntityId,
    #[serde(flatten)]
    pub(crate) state: ActionState,
    #[serde(default)]
    pub(crate) tasks: Vec<EntityId>,
}

impl Project {
    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn area(&self) -> EntityId {
        self.area
    }

    pub fn state(&self) -> &ActionState {
        &self.state
    }

    pub fn tasks(&self) -> &[EntityId] {
        &self.tasks
    }
}

/// Actionable item inside one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub(crate) id: EntityId,
    pub(crate) title: String,
    pub(crate) project: EntityId,
    #[serde(flatten)]
    pub(crate) state: ActionState,
    pub(crate) waiting: bool,
    #[serde(default)]
    pub(crate) contexts: Vec<EntityId>,
}

impl Task {
    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn project(&self) -> EntityId {
        self.project
    }

    pub fn state(&self) -> &ActionState {
        &self.state
    }

    /// Delegated or blocked on someone else.
    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    pub fn contexts(&self) -> &[EntityId] {
        &self.contexts
    }

    pub fn has_context(&self, context: EntityId) -> bool {
        self.contexts.contains(&context)
    }
}
