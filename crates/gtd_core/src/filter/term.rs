//! Leaf predicates and the live cells they read.
//!
//! # Responsibility
//! - Evaluate one condition against one entity of the tree.
//! - Hold UI-owned state (selection, search text, due window) in shared
//!   cells, so changing the state never requires rebuilding a filter.
//!
//! # Invariants
//! - A term that does not apply to an entity's kind evaluates to `true`.
//! - An empty selection / empty search text matches everything.
//! - Cell equality is identity: two cells are equal only if they are clones
//!   of the same handle.

use crate::model::entity::{EntityId, EntityKind, EntityRef};
use crate::model::tree::GtdTree;
use log::warn;
use regex::{Regex, RegexBuilder};
use std::cell::RefCell;
use std::fmt::{Debug, Formatter};
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Shared single-entity selection (combo box, list selection).
#[derive(Clone, Default)]
pub struct Selection(Rc<RefCell<Option<EntityId>>>);

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(id: EntityId) -> Self {
        let selection = Self::new();
        selection.set(Some(id));
        selection
    }

    pub fn set(&self, id: Option<EntityId>) {
        *self.0.borrow_mut() = id;
    }

    pub fn get(&self) -> Option<EntityId> {
        *self.0.borrow()
    }

    pub fn clear(&self) {
        self.set(None);
    }
}

impl PartialEq for Selection {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Debug for Selection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Selection").field(&self.get()).finish()
    }
}

#[derive(Default)]
struct SearchState {
    text: String,
    tokens: Vec<Regex>,
}

/// Shared search box text. Every whitespace-separated token must appear
/// (case-insensitively) in the title or notes.
#[derive(Clone, Default)]
pub struct SearchText(Rc<RefCell<SearchState>>);

impl SearchText {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, text: impl Into<String>) {
        let text = text.into();
        let tokens = text
            .split_whitespace()
            .filter_map(|token| {
                RegexBuilder::new(&regex::escape(token))
                    .case_insensitive(true)
                    .build()
                    .map_err(|err| {
                        warn!(
                            "event=search_compile module=filter status=error token_len={} error={}",
                            token.len(),
                            err
                        );
                    })
                    .ok()
            })
            .collect();
        let mut state = self.0.borrow_mut();
        state.text = text;
        state.tokens = tokens;
    }

    pub fn text(&self) -> String {
        self.0.borrow().text.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().tokens.is_empty()
    }

    /// True when every token is found in at least one of `haystacks`.
    pub fn matches(&self, haystacks: &[&str]) -> bool {
        self.0.borrow().tokens.iter().all(|token| {
            haystacks
                .iter()
                .any(|haystack| token.is_match(haystack))
        })
    }
}

impl PartialEq for SearchText {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Debug for SearchText {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SearchText").field(&self.text()).finish()
    }
}

/// Due-date bucket. Timestamps are Unix epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueBucket {
    Any,
    /// Due strictly before "now".
    Overdue,
    /// Due strictly before the given instant.
    Before(i64),
    /// Due in `[start, end)`.
    Between(i64, i64),
    /// No due date set.
    NoDate,
}

#[derive(Debug)]
struct WindowState {
    bucket: DueBucket,
    now: i64,
}

/// Shared due-date window with a settable reference "now".
#[derive(Clone)]
pub struct DateWindow(Rc<RefCell<WindowState>>);

impl DateWindow {
    pub fn new(bucket: DueBucket) -> Self {
        Self(Rc::new(RefCell::new(WindowState {
            bucket,
            now: now_epoch_ms(),
        })))
    }

    pub fn set_bucket(&self, bucket: DueBucket) {
        self.0.borrow_mut().bucket = bucket;
    }

    pub fn bucket(&self) -> DueBucket {
        self.0.borrow().bucket
    }

    pub fn set_now(&self, now: i64) {
        self.0.borrow_mut().now = now;
    }

    pub fn now(&self) -> i64 {
        self.0.borrow().now
    }

    pub fn matches(&self, due_at: Option<i64>) -> bool {
        let state = self.0.borrow();
        match (state.bucket, due_at) {
            (DueBucket::Any, _) => true,
            (DueBucket::NoDate, due) => due.is_none(),
            (_, None) => false,
            (DueBucket::Overdue, Some(due)) => due < state.now,
            (DueBucket::Before(limit), Some(due)) => due < limit,
            (DueBucket::Between(start, end), Some(due)) => start <= due && due < end,
        }
    }
}

impl PartialEq for DateWindow {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Debug for DateWindow {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = self.0.borrow();
        f.debug_struct("DateWindow")
            .field("bucket", &state.bucket)
            .field("now", &state.now)
            .finish()
    }
}

/// Leaf predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterTerm {
    /// Owning realm is visible. Contexts always pass.
    RealmVisible,
    /// Entity is the selected realm or lies below it.
    InRealm(Selection),
    /// Entity is the selected area or lies below it.
    InArea(Selection),
    /// Entity is the selected project or lies below it.
    InProject(Selection),
    /// Task carries the selected context.
    HasContext(Selection),
    TitleMatches(SearchText),
    Complete(bool),
    Waiting(bool),
    Due(DateWindow),
    Kind(EntityKind),
}

impl FilterTerm {
    /// `entity` must exist in `tree`.
    pub fn matches(&self, tree: &GtdTree, entity: EntityRef) -> bool {
        match self {
            Self::RealmVisible => tree.is_in_visible_realm(entity.id),
            Self::InRealm(selection) => {
                scoped_match(tree, entity, selection, EntityKind::Realm)
            }
            Self::InArea(selection) => scoped_match(tree, entity, selection, EntityKind::Area),
            Self::InProject(selection) => {
                scoped_match(tree, entity, selection, EntityKind::Project)
            }
            Self::HasContext(selection) => match (entity.kind, selection.get()) {
                (EntityKind::Task, Some(context)) => tree
                    .task(entity.id)
                    .map_or(false, |task| task.has_context(context)),
                _ => true,
            },
            Self::TitleMatches(search) => {
                if search.is_empty() {
                    return true;
                }
                let title = tree.title(entity.id).unwrap_or_default();
                let notes = tree
                    .action_state(entity.id)
                    .map(|state| state.notes())
                    .unwrap_or_default();
                search.matches(&[title, notes])
            }
            Self::Complete(expected) => tree
                .action_state(entity.id)
                .map_or(true, |state| state.is_complete() == *expected),
            Self::Waiting(expected) => match entity.kind {
                EntityKind::Task => tree
                    .task(entity.id)
                    .map_or(false, |task| task.is_waiting() == *expected),
                _ => true,
            },
            Self::Due(window) => tree
                .action_state(entity.id)
                .map_or(true, |state| window.matches(state.due_at())),
            Self::Kind(kind) => entity.kind == *kind,
        }
    }
}

/// Applies to `scope` and every kind below it; kinds above or beside the
/// hierarchy pass.
fn scoped_match(
    tree: &GtdTree,
    entity: EntityRef,
    selection: &Selection,
    scope: EntityKind,
) -> bool {
    let Some(selected) = selection.get() else {
        return true;
    };
    if !kind_at_or_below(entity.kind, scope) {
        return true;
    }
    tree.is_within(entity.id, selected)
}

fn kind_at_or_below(kind: EntityKind, scope: EntityKind) -> bool {
    let mut cursor = Some(kind);
    while let Some(current) = cursor {
        if current == scope {
            return true;
        }
        cursor = current.parent_kind();
    }
    false
}

pub(crate) fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as i64)
}

#[cfg(test)]
mod tests {
    use super::{kind_at_or_below, DateWindow, DueBucket, SearchText, Selection};
    use crate::model::entity::EntityKind;
    use uuid::Uuid;

    #[test]
    fn selection_equality_is_identity() {
        let first = Selection::new();
        let alias = first.clone();
        let other = Selection::new();
        assert_eq!(first, alias);
        assert_ne!(first, other);

        let id = Uuid::new_v4();
        first.set(Some(id));
        assert_eq!(alias.get(), Some(id));
    }

    #[test]
    fn search_tokens_are_case_insensitive_and_literal() {
        let search = SearchText::new();
        search.set("WRENCH buy");
        assert!(search.matches(&["buy wrench", ""]));
        assert!(search.matches(&["wrench", "remember to buy"]));
        assert!(!search.matches(&["buy hammer", ""]));

        search.set("a.c");
        assert!(!search.matches(&["abc"]));
        assert!(search.matches(&["a.c"]));
    }

    #[test]
    fn blank_search_is_empty() {
        let search = SearchText::new();
        search.set("   ");
        assert!(search.is_empty());
    }

    #[test]
    fn date_window_buckets() {
        let window = DateWindow::new(DueBucket::Overdue);
        window.set_now(1_000);
        assert!(window.matches(Some(999)));
        assert!(!window.matches(Some(1_000)));
        assert!(!window.matches(None));

        window.set_bucket(DueBucket::Between(100, 200));
        assert!(window.matches(Some(100)));
        assert!(!window.matches(Some(200)));

        window.set_bucket(DueBucket::NoDate);
        assert!(window.matches(None));
        assert!(!window.matches(Some(5)));

        window.set_bucket(DueBucket::Any);
        assert!(window.matches(None));
    }

    #[test]
    fn scope_applies_to_kinds_below() {
        assert!(kind_at_or_below(EntityKind::Task, EntityKind::Realm));
        assert!(kind_at_or_below(EntityKind::Area, EntityKind::Area));
        assert!(!kind_at_or_below(EntityKind::Realm, EntityKind::Area));
        assert!(!kind_at_or_below(EntityKind::Context, EntityKind::Realm));
    }
}
