//! Core domain logic for the GTD task manager.
//! This crate is the single source of truth for task tree invariants.

pub mod config;
pub mod db;
pub mod filter;
pub mod logging;
pub mod model;
pub mod notify;
pub mod repo;
pub mod service;
pub mod view;

pub use config::{ConfigError, CoreConfig};
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use filter::{
    AndFilter, DateWindow, DueBucket, Filter, FilterTerm, OrFilter, SearchText, Selection,
};
pub use logging::{
    default_log_level, init_from_config, init_logging, logging_status, LogError, LogSettings,
};
pub use model::entity::{
    is_sentinel, ActionState, Area, Context, EntityId, EntityKind, EntityRef, Project, Realm,
    Task, AREA_NONE, PROJECT_NONE, REALM_NONE, SENTINEL_TITLE,
};
pub use model::tree::{ErrorKind, GtdTree, TreeError, TreeResult};
pub use notify::bus::{Channel, EventBus, EventKind, HandlerError, ModelEvent, SubscriptionId};
pub use repo::{RecordStore, SqliteRecordStore, StoreError, StoreResult, StoredRecord};
pub use service::{LoadReport, PersistenceAdapter, ResolveCache};
pub use view::{RowValue, StoreConfig, StoreRow, ViewId, ViewStore};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
