//! Derived, filtered projections of the task tree for presentation.
//!
//! # Responsibility
//! - Turn tree contents into ordered rows a list or tree widget can render.
//! - Keep those rows current by listening on the tree's bus.

pub mod row;
pub mod store;

pub use row::{RowValue, StoreRow};
pub use store::{
    Filtering, Population, SortKey, Source, StoreConfig, StoreState, ViewId, ViewStore,
};
