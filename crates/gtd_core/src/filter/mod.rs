//! Composable row predicates.
//!
//! # Responsibility
//! - Combine leaf terms with AND/OR/NOT into one predicate per view.
//! - Keep combinators mutable so live UI terms can be attached and detached.
//!
//! # Invariants
//! - Synthetic action rows always pass.
//! - Rows whose entity is no longer in the tree never pass.
//! - An empty `AndFilter` and an empty `OrFilter` both match everything.
//! - `remove` uses structural equality and is a no-op when nothing matches.

pub mod term;

use crate::model::entity::EntityRef;
use crate::model::tree::GtdTree;
use crate::view::row::RowValue;
pub use term::{DateWindow, DueBucket, FilterTerm, SearchText, Selection};

/// Filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All(AndFilter),
    Any(OrFilter),
    Not(Box<Filter>),
    Term(FilterTerm),
}

impl Filter {
    pub fn not(filter: impl Into<Filter>) -> Self {
        Self::Not(Box::new(filter.into()))
    }

    pub fn matches(&self, tree: &GtdTree, row: &RowValue) -> bool {
        match row.entity() {
            None => true,
            Some(entity) => tree.contains(entity.id) && self.eval(tree, entity),
        }
    }

    fn eval(&self, tree: &GtdTree, entity: EntityRef) -> bool {
        match self {
            Self::All(filter) => filter.eval(tree, entity),
            Self::Any(filter) => filter.eval(tree, entity),
            Self::Not(filter) => !filter.eval(tree, entity),
            Self::Term(term) => term.matches(tree, entity),
        }
    }
}

impl From<FilterTerm> for Filter {
    fn from(value: FilterTerm) -> Self {
        Self::Term(value)
    }
}

impl From<AndFilter> for Filter {
    fn from(value: AndFilter) -> Self {
        Self::All(value)
    }
}

impl From<OrFilter> for Filter {
    fn from(value: OrFilter) -> Self {
        Self::Any(value)
    }
}

/// True iff every child is true; vacuously true when empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AndFilter {
    children: Vec<Filter>,
}

impl AndFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`AndFilter::append`].
    pub fn with(mut self, filter: impl Into<Filter>) -> Self {
        self.append(filter);
        self
    }

    pub fn append(&mut self, filter: impl Into<Filter>) {
        self.children.push(filter.into());
    }

    pub fn extend<I>(&mut self, filters: I)
    where
        I: IntoIterator,
        I::Item: Into<Filter>,
    {
        self.children.extend(filters.into_iter().map(Into::into));
    }

    /// Removes the first structurally equal child. Returns whether one was found.
    pub fn remove(&mut self, filter: &Filter) -> bool {
        remove_first(&mut self.children, filter)
    }

    pub fn clear(&mut self) {
        self.children.clear();
    }

    pub fn contains(&self, filter: &Filter) -> bool {
        self.children.contains(filter)
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Filter> + '_ {
        self.children.iter()
    }

    pub fn matches(&self, tree: &GtdTree, row: &RowValue) -> bool {
        match row.entity() {
            None => true,
            Some(entity) => tree.contains(entity.id) && self.eval(tree, entity),
        }
    }

    fn eval(&self, tree: &GtdTree, entity: EntityRef) -> bool {
        self.children.iter().all(|child| child.eval(tree, entity))
    }
}

/// True iff any child is true.
///
/// Empty is treated as true, matching `AndFilter`, so an OR group with no
/// selected options does not hide everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrFilter {
    children: Vec<Filter>,
}

impl OrFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, filter: impl Into<Filter>) -> Self {
        self.append(filter);
        self
    }

    pub fn append(&mut self, filter: impl Into<Filter>) {
        self.children.push(filter.into());
    }

    pub fn extend<I>(&mut self, filters: I)
    where
        I: IntoIterator,
        I::Item: Into<Filter>,
    {
        self.children.extend(filters.into_iter().map(Into::into));
    }

    pub fn remove(&mut self, filter: &Filter) -> bool {
        remove_first(&mut self.children, filter)
    }

    pub fn clear(&mut self) {
        self.children.clear();
    }

    pub fn contains(&self, filter: &Filter) -> bool {
        self.children.contains(filter)
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Filter> + '_ {
        self.children.iter()
    }

    pub fn matches(&self, tree: &GtdTree, row: &RowValue) -> bool {
        match row.entity() {
            None => true,
            Some(entity) => tree.contains(entity.id) && self.eval(tree, entity),
        }
    }

    fn eval(&self, tree: &GtdTree, entity: EntityRef) -> bool {
        self.children.is_empty() || self.children.iter().any(|child| child.eval(tree, entity))
    }
}

fn remove_first(children: &mut Vec<Filter>, filter: &Filter) -> bool {
    match children.iter().position(|child| child == filter) {
        Some(index) => {
            children.remove(index);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::{AndFilter, Filter, FilterTerm, OrFilter, Selection};
    use crate::model::entity::EntityKind;
    use crate::model::tree::GtdTree;
    use crate::view::row::RowValue;

    fn task_row(tree: &mut GtdTree) -> RowValue {
        let realm = tree.create_realm("Personal").unwrap();
        let area = tree.create_area("Home", realm).unwrap();
        let project = tree.create_project("Fix sink", area).unwrap();
        let task = tree.create_task("buy wrench", project, &[]).unwrap();
        RowValue::from_entity(EntityKind::Task, task)
    }

    #[test]
    fn empty_combinators_match_everything() {
        let mut tree = GtdTree::new();
        let row = task_row(&mut tree);
        assert!(AndFilter::new().matches(&tree, &row));
        assert!(OrFilter::new().matches(&tree, &row));
    }

    #[test]
    fn remove_absent_filter_is_noop() {
        let mut filter = AndFilter::new().with(FilterTerm::RealmVisible);
        assert!(!filter.remove(&Filter::Term(FilterTerm::Complete(true))));
        assert_eq!(filter.len(), 1);
        assert!(filter.remove(&Filter::Term(FilterTerm::RealmVisible)));
        assert!(filter.is_empty());
    }

    #[test]
    fn remove_matches_live_terms_by_cell_identity() {
        let selection = Selection::new();
        let mut filter = AndFilter::new().with(FilterTerm::InRealm(selection.clone()));
        assert!(!filter.remove(&FilterTerm::InRealm(Selection::new()).into()));
        assert!(filter.remove(&FilterTerm::InRealm(selection).into()));
    }

    #[test]
    fn action_rows_always_pass() {
        let tree = GtdTree::new();
        let filter = AndFilter::new().with(FilterTerm::Kind(EntityKind::Task));
        assert!(filter.matches(&tree, &RowValue::Action(EntityKind::Project)));
    }

    #[test]
    fn not_inverts_child() {
        let mut tree = GtdTree::new();
        let row = task_row(&mut tree);
        let filter = Filter::not(FilterTerm::Kind(EntityKind::Task));
        assert!(!filter.matches(&tree, &row));
    }

    #[test]
    fn or_needs_one_true_child() {
        let mut tree = GtdTree::new();
        let row = task_row(&mut tree);
        let mut filter = OrFilter::new()
            .with(FilterTerm::Kind(EntityKind::Project))
            .with(FilterTerm::Complete(true));
        assert!(!filter.matches(&tree, &row));
        filter.append(FilterTerm::Kind(EntityKind::Task));
        assert!(filter.matches(&tree, &row));
    }
}
