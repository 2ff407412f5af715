//! Subscription registry: at most one live subscription per topic on the
//! active push session. Owned by the connection manager.

use std::collections::HashMap;

use dispatchlink_protocol::Topic;
use dispatchlink_transport::{FrameHandler, PushSession, SubscriptionHandle};
use tracing::debug;

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: HashMap<Topic, SubscriptionHandle>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `topic` on `session` unless it already has a live entry.
    /// Returns true when a new subscription was created.
    pub fn subscribe(
        &mut self,
        session: &dyn PushSession,
        topic: &Topic,
        on_frame: FrameHandler,
    ) -> bool {
        if self.entries.contains_key(topic) {
            return false;
        }
        let handle = session.subscribe(&topic.destination(), on_frame);
        debug!(
            component = "registry",
            event = "registry.subscribed",
            topic = %topic,
            subscription_id = handle.id(),
            "Subscribed"
        );
        self.entries.insert(topic.clone(), handle);
        true
    }

    /// Tear down and forget `topic`. No-op when absent.
    pub fn unsubscribe(&mut self, topic: &Topic) -> bool {
        match self.entries.remove(topic) {
            Some(handle) => {
                handle.unsubscribe();
                true
            }
            None => false,
        }
    }

    /// Unsubscribe every entry.
    pub fn clear(&mut self) {
        for (topic, handle) in self.entries.drain() {
            debug!(
                component = "registry",
                event = "registry.unsubscribed",
                topic = %topic,
                subscription_id = handle.id(),
                "Unsubscribed"
            );
            handle.unsubscribe();
        }
    }

    pub fn contains(&self, topic: &Topic) -> bool {
        self.entries.contains_key(topic)
    }

    pub fn topics(&self) -> Vec<Topic> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeSession;
    use std::sync::Arc;

    fn noop() -> FrameHandler {
        Arc::new(|_: &str| {})
    }

    #[test]
    fn subscribing_twice_keeps_one_entry() {
        let session = FakeSession::new();
        let mut registry = SubscriptionRegistry::new();
        let topic = Topic::new("dispatcher-notifications");

        assert!(registry.subscribe(&session, &topic, noop()));
        assert!(!registry.subscribe(&session, &topic, noop()));

        assert_eq!(registry.len(), 1);
        assert_eq!(session.live_destinations(), vec!["/topic/dispatcher-notifications"]);
    }

    #[test]
    fn unsubscribe_runs_teardown_and_is_idempotent() {
        let session = FakeSession::new();
        let mut registry = SubscriptionRegistry::new();
        let topic = Topic::new("admin-notifications");
        registry.subscribe(&session, &topic, noop());

        assert!(registry.unsubscribe(&topic));
        assert!(!registry.unsubscribe(&topic));
        assert!(session.live_destinations().is_empty());
        assert_eq!(session.unsubscribe_count(), 1);
    }

    #[test]
    fn clear_empties_registry_and_later_unsubscribe_is_safe() {
        let session = FakeSession::new();
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe(&session, &Topic::new("a"), noop());
        registry.subscribe(&session, &Topic::new("b"), noop());

        registry.clear();

        assert!(registry.is_empty());
        assert!(session.live_destinations().is_empty());
        assert!(!registry.unsubscribe(&Topic::new("a")));
        assert!(!registry.unsubscribe(&Topic::new("missing")));
        assert_eq!(session.unsubscribe_count(), 2);
    }
}
