//! Per-channel publish/subscribe for model mutations.
//!
//! # Responsibility
//! - Keep one ordered subscriber list per (entity kind, event kind) channel.
//! - Deliver model events synchronously, right after the mutation is applied.
//!
//! # Invariants
//! - Delivery order on a channel is subscription order.
//! - The subscriber list is snapshotted before delivery; handlers may
//!   subscribe, unsubscribe or mutate the tree while being delivered to.
//! - A nested mutation finishes its own delivery before the outer delivery
//!   moves on to the next subscriber.
//! - A failing or panicking handler never stops delivery to the others.

use crate::logging::panic_payload_text;
use crate::model::entity::{EntityId, EntityKind};
use crate::model::tree::GtdTree;
use log::{error, trace, warn};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

/// Mutation category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Added,
    Renamed,
    Removed,
    Modified,
    /// Realm only.
    VisibleChanged,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::Added,
        EventKind::Renamed,
        EventKind::Removed,
        EventKind::Modified,
        EventKind::VisibleChanged,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Renamed => "renamed",
            Self::Removed => "removed",
            Self::Modified => "modified",
            Self::VisibleChanged => "visible_changed",
        }
    }
}

/// One named event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Channel {
    pub kind: EntityKind,
    pub event: EventKind,
}

impl Channel {
    pub fn new(kind: EntityKind, event: EventKind) -> Self {
        Self { kind, event }
    }

    /// `VisibleChanged` exists for realms only.
    pub fn is_valid(self) -> bool {
        self.event != EventKind::VisibleChanged || self.kind == EntityKind::Realm
    }

    /// Every valid channel, kind-major.
    pub fn all() -> Vec<Channel> {
        EntityKind::ALL
            .into_iter()
            .flat_map(Self::for_kind)
            .collect()
    }

    /// Every valid channel for one entity kind.
    pub fn for_kind(kind: EntityKind) -> Vec<Channel> {
        EventKind::ALL
            .into_iter()
            .map(|event| Channel::new(kind, event))
            .filter(|channel| channel.is_valid())
            .collect()
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.kind.as_str(), self.event.as_str())
    }
}

/// Payload delivered to subscribers.
///
/// For `Removed`, `parent` is the container the entity was detached from;
/// the entity itself is no longer in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelEvent {
    pub channel: Channel,
    pub id: EntityId,
    pub parent: Option<EntityId>,
}

impl ModelEvent {
    pub fn kind(&self) -> EntityKind {
        self.channel.kind
    }

    pub fn event(&self) -> EventKind {
        self.channel.event
    }
}

/// Failure reported by one subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError(String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl Display for HandlerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Error for HandlerError {}

/// Subscriber callback. Receives the tree in its post-mutation state.
pub type Handler = Rc<dyn Fn(&mut GtdTree, &ModelEvent) -> Result<(), HandlerError>>;

/// Handle returned by `subscribe`; covers every channel it was registered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    name: String,
    handler: Handler,
}

/// Channel registry owned by one `GtdTree`.
#[derive(Default)]
pub struct EventBus {
    channels: HashMap<Channel, Vec<Rc<Subscriber>>>,
    next_id: u64,
}

impl Debug for EventBus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut channels = self
            .channels
            .iter()
            .map(|(channel, subscribers)| (channel.to_string(), subscribers.len()))
            .collect::<Vec<_>>();
        channels.sort();
        f.debug_struct("EventBus")
            .field("channels", &channels)
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `handler` to the end of `channel`'s subscriber list.
    pub fn subscribe<F>(
        &mut self,
        channel: Channel,
        name: impl Into<String>,
        handler: F,
    ) -> SubscriptionId
    where
        F: Fn(&mut GtdTree, &ModelEvent) -> Result<(), HandlerError> + 'static,
    {
        self.subscribe_many(&[channel], name, handler)
    }

    /// Registers one handler on several channels under a single id.
    ///
    /// Invalid channels (`VisibleChanged` on a non-realm kind) are skipped.
    pub fn subscribe_many<F>(
        &mut self,
        channels: &[Channel],
        name: impl Into<String>,
        handler: F,
    ) -> SubscriptionId
    where
        F: Fn(&mut GtdTree, &ModelEvent) -> Result<(), HandlerError> + 'static,
    {
        self.next_id += 1;
        let subscriber = Rc::new(Subscriber {
            id: SubscriptionId(self.next_id),
            name: name.into(),
            handler: Rc::new(handler),
        });

        for channel in channels {
            if !channel.is_valid() {
                warn!(
                    "event=subscribe module=notify status=skipped reason=invalid_channel channel={} subscriber={}",
                    channel, subscriber.name
                );
                continue;
            }
            self.channels
                .entry(*channel)
                .or_default()
                .push(Rc::clone(&subscriber));
        }

        subscriber.id
    }

    /// Removes a subscription from every channel. Returns whether it existed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let mut removed = false;
        for subscribers in self.channels.values_mut() {
            let before = subscribers.len();
            subscribers.retain(|subscriber| subscriber.id != id);
            removed |= subscribers.len() != before;
        }
        removed
    }

    pub fn subscriber_count(&self, channel: Channel) -> usize {
        self.channels.get(&channel).map_or(0, Vec::len)
    }

    /// Subscriber names on `channel`, in delivery order.
    pub fn subscriber_names(&self, channel: Channel) -> Vec<String> {
        self.channels.get(&channel).map_or_else(Vec::new, |subscribers| {
            subscribers
                .iter()
                .map(|subscriber| subscriber.name.clone())
                .collect()
        })
    }

    fn snapshot(&self, channel: Channel) -> Vec<Rc<Subscriber>> {
        self.channels.get(&channel).cloned().unwrap_or_default()
    }
}

/// Delivers `event` to every subscriber of its channel.
///
/// Returns the number of subscribers that failed or panicked.
pub(crate) fn deliver(tree: &mut GtdTree, event: ModelEvent) -> usize {
    let subscribers = tree.bus().snapshot(event.channel);
    trace!(
        "event=deliver module=notify status=start channel={} id={} subscribers={}",
        event.channel,
        event.id,
        subscribers.len()
    );

    let mut failures = 0;
    for subscriber in subscribers {
        let handler = Rc::clone(&subscriber.handler);
        let outcome = catch_unwind(AssertUnwindSafe(|| handler(tree, &event)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                failures += 1;
                warn!(
                    "event=deliver module=notify status=error channel={} id={} subscriber={} error={}",
                    event.channel, event.id, subscriber.name, err
                );
            }
            Err(payload) => {
                failures += 1;
                error!(
                    "event=deliver module=notify status=panic channel={} id={} subscriber={} payload={}",
                    event.channel,
                    event.id,
                    subscriber.name,
                    panic_payload_text(payload.as_ref())
                );
            }
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::{Channel, EventBus, EventKind};
    use crate::model::entity::EntityKind;

    #[test]
    fn all_channels_include_visibility_for_realm_only() {
        let channels = Channel::all();
        assert_eq!(channels.len(), 21);
        let visibility = channels
            .iter()
            .filter(|channel| channel.event == EventKind::VisibleChanged)
            .collect::<Vec<_>>();
        assert_eq!(visibility.len(), 1);
        assert_eq!(visibility[0].kind, EntityKind::Realm);
    }

    #[test]
    fn subscribe_many_shares_one_id_and_unsubscribes_everywhere() {
        let mut bus = EventBus::new();
        let added = Channel::new(EntityKind::Task, EventKind::Added);
        let removed = Channel::new(EntityKind::Task, EventKind::Removed);
        let id = bus.subscribe_many(&[added, removed], "probe", |_, _| Ok(()));

        assert_eq!(bus.subscriber_count(added), 1);
        assert_eq!(bus.subscriber_count(removed), 1);
        assert!(bus.unsubscribe(id));
        assert_eq!(bus.subscriber_count(added), 0);
        assert_eq!(bus.subscriber_count(removed), 0);
        assert!(!bus.unsubscribe(id));
    }

    #[test]
    fn invalid_channels_are_not_registered() {
        let mut bus = EventBus::new();
        let invalid = Channel::new(EntityKind::Task, EventKind::VisibleChanged);
        bus.subscribe(invalid, "probe", |_, _| Ok(()));
        assert_eq!(bus.subscriber_count(invalid), 0);
    }

    #[test]
    fn subscriber_names_follow_insertion_order() {
        let mut bus = EventBus::new();
        let channel = Channel::new(EntityKind::Realm, EventKind::VisibleChanged);
        bus.subscribe(channel, "first", |_, _| Ok(()));
        bus.subscribe(channel, "second", |_, _| Ok(()));
        assert_eq!(bus.subscriber_names(channel), vec!["first", "second"]);
    }
}
