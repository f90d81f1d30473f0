//! Change notification for the task tree.
//!
//! # Responsibility
//! - Route every model mutation to the views and adapters observing it.
//!
//! # Invariants
//! - Delivery is a plain synchronous call chain; nothing is queued.

pub mod bus;
