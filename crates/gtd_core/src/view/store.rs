//! Live, filtered, sorted projections of the task tree.
//!
//! # Responsibility
//! - Materialize one base collection of rows per store.
//! - Maintain any number of independent filtered views over that base.
//! - Track model events incrementally once bound to a tree.
//!
//! # Invariants
//! - Visible rows keep the base collection's relative order.
//! - `refilter` is a single pass and idempotent.
//! - Incremental inserts are checked against every view's filter before they
//!   become visible.
//! - Synthetic action rows stay at the end of the base and are always visible.
//! - Filters changing their own state do not notify the store; the owner
//!   calls `refilter`/`refilter_view`.

use crate::filter::AndFilter;
use crate::model::entity::{is_sentinel, EntityId, EntityKind};
use crate::model::tree::GtdTree;
use crate::notify::bus::{Channel, EventKind, HandlerError, ModelEvent, SubscriptionId};
use crate::view::row::{RowValue, StoreRow};
use log::debug;
use std::cell::RefCell;
use std::rc::Rc;

/// What the base collection holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Every entity of one kind, in tree order.
    Kind(EntityKind),
    /// Realms, each followed by its areas (`depth = 1`).
    RealmAreas,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Insertion,
    /// Case-insensitive, stable.
    Title,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    pub source: Source,
    /// Include the kind's "None" sentinel row (always first).
    pub include_sentinel: bool,
    /// Append a synthetic "create new ..." row for this kind.
    pub action: Option<EntityKind>,
    pub sort: SortKey,
}

impl StoreConfig {
    /// Flat list of one kind, insertion order, no sentinel, no action row.
    pub fn list(kind: EntityKind) -> Self {
        Self {
            source: Source::Kind(kind),
            include_sentinel: false,
            action: None,
            sort: SortKey::Insertion,
        }
    }

    pub fn realm_areas() -> Self {
        Self {
            source: Source::RealmAreas,
            include_sentinel: false,
            action: None,
            sort: SortKey::Insertion,
        }
    }

    pub fn with_sentinel(mut self) -> Self {
        self.include_sentinel = true;
        self
    }

    pub fn with_action(mut self, kind: EntityKind) -> Self {
        self.action = Some(kind);
        self
    }

    pub fn sorted_by_title(mut self) -> Self {
        self.sort = SortKey::Title;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Population {
    /// No domain rows (synthetic rows do not count).
    Empty,
    Populated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filtering {
    /// Empty filter: the view equals the base.
    Unfiltered,
    Filtered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreState {
    pub population: Population,
    pub filtering: Filtering,
}

#[derive(Debug)]
struct FilteredView {
    id: ViewId,
    filter: AndFilter,
    /// Parallel to `ViewStore::base`.
    mask: Vec<bool>,
}

/// One derived store.
#[derive(Debug)]
pub struct ViewStore {
    name: String,
    config: StoreConfig,
    base: Vec<StoreRow>,
    views: Vec<FilteredView>,
    next_view: u32,
}

impl ViewStore {
    pub fn new(name: impl Into<String>, config: StoreConfig) -> Self {
        Self {
            name: name.into(),
            config,
            base: Vec::new(),
            views: Vec::new(),
            next_view: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Rebuilds the base collection and every view from `tree`.
    pub fn populate(&mut self, tree: &GtdTree) {
        self.base = self.build_base(tree);
        self.refilter(tree);
        debug!(
            "event=store_populate module=view status=ok store={} rows={}",
            self.name,
            self.base.len()
        );
    }

    /// Adds an independent filtered view and evaluates it immediately.
    pub fn attach_view(&mut self, tree: &GtdTree, filter: AndFilter) -> ViewId {
        self.next_view += 1;
        let id = ViewId(self.next_view);
        let mask = compute_mask(tree, &filter, &self.base);
        self.views.push(FilteredView { id, filter, mask });
        id
    }

    /// Drops a view, handing back its filter.
    pub fn detach_view(&mut self, view: ViewId) -> Option<AndFilter> {
        let index = self.views.iter().position(|item| item.id == view)?;
        Some(self.views.remove(index).filter)
    }

    pub fn filter(&self, view: ViewId) -> Option<&AndFilter> {
        self.view(view).map(|item| &item.filter)
    }

    /// Edit a view's filter in place; call `refilter_view` afterwards.
    pub fn filter_mut(&mut self, view: ViewId) -> Option<&mut AndFilter> {
        self.views
            .iter_mut()
            .find(|item| item.id == view)
            .map(|item| &mut item.filter)
    }

    /// Recomputes every view.
    pub fn refilter(&mut self, tree: &GtdTree) {
        for view in &mut self.views {
            view.mask = compute_mask(tree, &view.filter, &self.base);
        }
    }

    /// Recomputes one view. Returns `false` for an unknown view.
    pub fn refilter_view(&mut self, tree: &GtdTree, view: ViewId) -> bool {
        let base = &self.base;
        match self.views.iter_mut().find(|item| item.id == view) {
            Some(item) => {
                item.mask = compute_mask(tree, &item.filter, base);
                true
            }
            None => false,
        }
    }

    pub fn base_rows(&self) -> &[StoreRow] {
        &self.base
    }

    /// Visible rows of `view` in display order; empty for an unknown view.
    pub fn rows(&self, view: ViewId) -> impl Iterator<Item = &StoreRow> + '_ {
        let mask = self.view(view).map_or(&[][..], |item| item.mask.as_slice());
        self.base
            .iter()
            .zip(mask.iter())
            .filter(|(_, visible)| **visible)
            .map(|(row, _)| row)
    }

    pub fn visible_len(&self, view: ViewId) -> usize {
        self.rows(view).count()
    }

    /// Display position of `id` in `view`, if visible.
    pub fn position_of(&self, view: ViewId, id: EntityId) -> Option<usize> {
        self.rows(view).position(|row| row.value.id() == Some(id))
    }

    pub fn state(&self, view: ViewId) -> Option<StoreState> {
        let item = self.view(view)?;
        let population = if self.base.iter().any(|row| !row.value.is_action()) {
            Population::Populated
        } else {
            Population::Empty
        };
        let filtering = if item.filter.is_empty() {
            Filtering::Unfiltered
        } else {
            Filtering::Filtered
        };
        Some(StoreState {
            population,
            filtering,
        })
    }

    /// Applies one model event.
    ///
    /// Events for this store's own kind update a single row; events for
    /// other kinds (ancestors, realm visibility) trigger a full refilter.
    /// Structural stores rebuild.
    pub fn apply(&mut self, tree: &GtdTree, event: &ModelEvent) {
        let kind = match self.config.source {
            Source::RealmAreas => {
                if matches!(event.kind(), EntityKind::Realm | EntityKind::Area) {
                    self.populate(tree);
                } else {
                    self.refilter(tree);
                }
                return;
            }
            Source::Kind(kind) => kind,
        };
        if event.kind() != kind {
            self.refilter(tree);
            return;
        }

        match event.event() {
            EventKind::Added => self.insert_row(tree, kind, event.id),
            EventKind::Removed => {
                self.remove_row(event.id);
            }
            EventKind::Renamed if self.config.sort == SortKey::Title => {
                if self.remove_row(event.id) {
                    self.insert_row(tree, kind, event.id);
                }
            }
            EventKind::Renamed | EventKind::Modified | EventKind::VisibleChanged => {
                self.recheck_row(tree, event.id)
            }
        }
    }

    /// Populates `store` and keeps it in sync with `tree` until `unbind`.
    ///
    /// The subscription holds only a weak reference; a dropped store turns
    /// its handler into a no-op.
    pub fn bind(store: &Rc<RefCell<ViewStore>>, tree: &mut GtdTree) -> SubscriptionId {
        let (channels, name) = {
            let mut current = store.borrow_mut();
            current.populate(tree);
            (watched_channels(&current.config), format!("view:{}", current.name))
        };

        let weak = Rc::downgrade(store);
        tree.subscribe_many(&channels, name, move |tree, event| {
            let Some(store) = weak.upgrade() else {
                return Ok(());
            };
            let mut store = store
                .try_borrow_mut()
                .map_err(|_| HandlerError::new("view store is already borrowed"))?;
            store.apply(tree, event);
            Ok(())
        })
    }

    pub fn unbind(tree: &mut GtdTree, subscription: SubscriptionId) -> bool {
        tree.unsubscribe(subscription)
    }

    // ---- internals ----

    fn view(&self, view: ViewId) -> Option<&FilteredView> {
        self.views.iter().find(|item| item.id == view)
    }

    fn build_base(&self, tree: &GtdTree) -> Vec<StoreRow> {
        let mut rows = match self.config.source {
            Source::Kind(kind) => {
                let (mut sentinels, mut entities): (Vec<_>, Vec<_>) = tree
                    .ids(kind)
                    .iter()
                    .filter(|id| self.config.include_sentinel || !is_sentinel(**id))
                    .map(|id| StoreRow::top(RowValue::from_entity(kind, *id)))
                    .partition(|row| row.value.is_sentinel());
                self.sort_rows(tree, &mut entities);
                sentinels.append(&mut entities);
                sentinels
            }
            Source::RealmAreas => {
                let mut realms = self.domain_rows(tree, tree.ids(EntityKind::Realm), EntityKind::Realm);
                self.sort_rows(tree, &mut realms);
                let mut rows = Vec::new();
                for realm in realms {
                    let Some(realm_id) = realm.value.id() else {
                        continue;
                    };
                    rows.push(realm);
                    let mut areas = self
                        .domain_rows(tree, tree.children(realm_id), EntityKind::Area)
                        .into_iter()
                        .map(|row| StoreRow::nested(row.value))
                        .collect::<Vec<_>>();
                    self.sort_rows(tree, &mut areas);
                    rows.extend(areas);
                }
                rows
            }
        };

        if let Some(kind) = self.config.action {
            rows.push(StoreRow::top(RowValue::Action(kind)));
        }
        rows
    }

    fn domain_rows(&self, tree: &GtdTree, ids: &[EntityId], kind: EntityKind) -> Vec<StoreRow> {
        let (mut sentinels, entities): (Vec<_>, Vec<_>) = ids
            .iter()
            .filter(|id| self.config.include_sentinel || !is_sentinel(**id))
            .filter(|id| tree.kind_of(**id) == Some(kind))
            .map(|id| StoreRow::top(RowValue::from_entity(kind, *id)))
            .partition(|row| row.value.is_sentinel());
        sentinels.extend(entities);
        sentinels
    }

    fn sort_rows(&self, tree: &GtdTree, rows: &mut [StoreRow]) {
        if self.config.sort != SortKey::Title {
            return;
        }
        let start = rows.iter().take_while(|row| row.value.is_sentinel()).count();
        rows[start..].sort_by_cached_key(|row| title_key(tree, row));
    }

    /// Index where a new domain row goes: after sentinels, before action rows.
    fn insertion_index(&self, tree: &GtdTree, row: &StoreRow) -> usize {
        let end = self
            .base
            .iter()
            .position(|current| current.value.is_action())
            .unwrap_or(self.base.len());
        if row.value.is_sentinel() {
            return 0;
        }
        if self.config.sort != SortKey::Title {
            return end;
        }
        let key = title_key(tree, row);
        self.base[..end]
            .iter()
            .position(|current| !current.value.is_sentinel() && title_key(tree, current) > key)
            .unwrap_or(end)
    }

    fn insert_row(&mut self, tree: &GtdTree, kind: EntityKind, id: EntityId) {
        if !self.config.include_sentinel && is_sentinel(id) {
            return;
        }
        if self.base_index(id).is_some() {
            self.recheck_row(tree, id);
            return;
        }

        let row = StoreRow::top(RowValue::from_entity(kind, id));
        let index = self.insertion_index(tree, &row);
        self.base.insert(index, row);
        for view in &mut self.views {
            let visible = view.filter.matches(tree, &row.value);
            view.mask.insert(index, visible);
        }
    }

    fn remove_row(&mut self, id: EntityId) -> bool {
        let Some(index) = self.base_index(id) else {
            return false;
        };
        self.base.remove(index);
        for view in &mut self.views {
            view.mask.remove(index);
        }
        true
    }

    fn recheck_row(&mut self, tree: &GtdTree, id: EntityId) {
        let Some(index) = self.base_index(id) else {
            return;
        };
        let value = self.base[index].value;
        for view in &mut self.views {
            view.mask[index] = view.filter.matches(tree, &value);
        }
    }

    fn base_index(&self, id: EntityId) -> Option<usize> {
        self.base.iter().position(|row| row.value.id() == Some(id))
    }
}

fn title_key(tree: &GtdTree, row: &StoreRow) -> String {
    row.value
        .id()
        .and_then(|id| tree.title(id))
        .unwrap_or_default()
        .to_lowercase()
}

/// One pass over the base. Nested rows are hidden with their parent row.
fn compute_mask(tree: &GtdTree, filter: &AndFilter, base: &[StoreRow]) -> Vec<bool> {
    let mut parent_visible = true;
    base.iter()
        .map(|row| {
            if row.value.is_action() {
                return true;
            }
            let passes = filter.matches(tree, &row.value);
            if row.depth == 0 {
                parent_visible = passes;
                passes
            } else {
                parent_visible && passes
            }
        })
        .collect()
}

/// Own-kind channels plus everything that can change ancestry or realm
/// visibility of the rows.
fn watched_channels(config: &StoreConfig) -> Vec<Channel> {
    match config.source {
        Source::RealmAreas => {
            let mut channels = Channel::for_kind(EntityKind::Realm);
            channels.extend(Channel::for_kind(EntityKind::Area));
            channels
        }
        Source::Kind(kind) => {
            let mut channels = Channel::for_kind(kind);
            let mut ancestor = kind.parent_kind();
            while let Some(current) = ancestor {
                channels.push(Channel::new(current, EventKind::Modified));
                channels.push(Channel::new(current, EventKind::Removed));
                ancestor = current.parent_kind();
            }
            if kind != EntityKind::Realm && kind != EntityKind::Context {
                channels.push(Channel::new(EntityKind::Realm, EventKind::VisibleChanged));
            }
            channels
        }
    }
}
