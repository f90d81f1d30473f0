//! Use-case services over the task tree.
//!
//! # Responsibility
//! - Connect the in-memory tree to durable storage.
//!
//! # Invariants
//! - Services stay storage-agnostic; they talk to `RecordStore` only.

pub mod loader;
pub mod persistence;

pub use loader::{load_records, LoadReport, ResolveCache};
pub use persistence::PersistenceAdapter;
