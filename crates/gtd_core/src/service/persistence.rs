//! Keeps a record store in step with a live task tree.
//!
//! # Responsibility
//! - Write every entity change to the store as it happens.
//! - Replay the store into a fresh tree at startup.
//!
//! # Invariants
//! - Store write failures surface as handler errors; the bus isolates them.
//! - Writes are suspended while the adapter itself is replaying records.
//! - Sentinel entities are never written.

use crate::model::entity::{is_sentinel, EntityKind};
use crate::model::tree::GtdTree;
use crate::notify::bus::{Channel, EventKind, HandlerError, ModelEvent, SubscriptionId};
use crate::repo::entity_repo::{RecordStore, StoreResult};
use crate::repo::record::StoredRecord;
use crate::service::loader::{load_records, LoadReport};
use log::{debug, info};
use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

const SUBSCRIBER_NAME: &str = "persistence";

/// Bridges one [`RecordStore`] and the trees it persists.
pub struct PersistenceAdapter<S: RecordStore> {
    store: S,
    replaying: Cell<bool>,
}

impl<S: RecordStore + 'static> PersistenceAdapter<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            replaying: Cell::new(false),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Subscribes `adapter` to every persistent change on `tree`.
    ///
    /// Adds, renames, field changes and visibility changes share one save
    /// path; removals delete.
    pub fn attach(adapter: &Rc<Self>, tree: &mut GtdTree) -> SubscriptionId {
        let channels = Channel::all();
        let adapter = Rc::clone(adapter);
        tree.subscribe_many(&channels, SUBSCRIBER_NAME, move |tree, event| {
            adapter.on_event(tree, event)
        })
    }

    pub fn detach(tree: &mut GtdTree, subscription: SubscriptionId) -> bool {
        tree.unsubscribe(subscription)
    }

    /// Replays every stored record into `tree`.
    ///
    /// Failures are per-record: they are logged, counted and skipped. Only a
    /// failure to read the store at all is returned as an error.
    pub fn load(&self, tree: &mut GtdTree) -> StoreResult<LoadReport> {
        let started_at = Instant::now();
        let records = self.store.list()?;
        let total = records.len();

        self.replaying.set(true);
        let report = load_records(tree, records);
        self.replaying.set(false);

        info!(
            "event=tree_load module=service status=ok records={} loaded={} skipped={} duration_ms={}",
            total,
            report.loaded,
            report.skipped,
            started_at.elapsed().as_millis()
        );
        Ok(report)
    }

    /// Writes every non-sentinel entity of `tree`, parents first.
    pub fn save_all(&self, tree: &GtdTree) -> StoreResult<usize> {
        let mut written = 0;
        for kind in EntityKind::ALL {
            for id in tree.ids(kind) {
                if is_sentinel(*id) {
                    continue;
                }
                self.store.upsert(&StoredRecord::from_tree(tree, *id)?)?;
                written += 1;
            }
        }
        info!("event=tree_save module=service status=ok written={written}");
        Ok(written)
    }

    fn on_event(&self, tree: &GtdTree, event: &ModelEvent) -> Result<(), HandlerError> {
        if self.replaying.get() || is_sentinel(event.id) {
            return Ok(());
        }

        let outcome = match event.event() {
            EventKind::Removed => self.store.delete(event.id).map(|_| ()),
            EventKind::Added
            | EventKind::Renamed
            | EventKind::Modified
            | EventKind::VisibleChanged => StoredRecord::from_tree(tree, event.id)
                .and_then(|record| self.store.upsert(&record)),
        };

        match outcome {
            Ok(()) => {
                debug!(
                    "event=persist module=service status=ok channel={} id={}",
                    event.channel, event.id
                );
                Ok(())
            }
            Err(err) => Err(HandlerError::new(format!(
                "persisting {} {} failed: {err}",
                event.channel, event.id
            ))),
        }
    }
}

impl<S: RecordStore> std::fmt::Debug for PersistenceAdapter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceAdapter")
            .field("replaying", &self.replaying.get())
            .finish_non_exhaustive()
    }
}
