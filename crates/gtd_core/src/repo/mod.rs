//! Record persistence contracts and the SQLite implementation.
//!
//! # Responsibility
//! - Define the flat record shape each entity is stored as.
//! - Isolate SQL details from the adapter that keeps a tree in sync.
//!
//! # Invariants
//! - Records are validated before they are written.
//! - Reads return per-row results so one malformed row never hides the rest.

pub mod entity_repo;
pub mod record;

pub use entity_repo::{RecordStore, SqliteRecordStore, StoreError, StoreResult};
pub use record::StoredRecord;
