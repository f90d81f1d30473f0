//! GTD domain model.
//!
//! # Responsibility
//! - Define contexts, realms, areas, projects and tasks.
//! - Own the containment tree and its mutation events.
//!
//! # Invariants
//! - Every entity is identified by a stable `EntityId`.
//! - Every area/project/task has a parent; unassigned means a sentinel.

pub mod entity;
pub mod tree;
