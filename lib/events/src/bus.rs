//! Synchronous in-process publish/subscribe bus.

use crate::event::EventRecord;
use crate::filter::EventFilter;
use amber_relay_core::SubscriptionId;
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Mutex, PoisonError};
use tracing::warn;
use wildmatch::WildMatch;

/// Default number of events retained in the bus history ring.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Callback invoked for each delivered event.
pub type SubscriberCallback = std::sync::Arc<dyn Fn(&EventRecord) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    pattern: String,
    matcher: WildMatch,
    filters: Vec<EventFilter>,
    tag: Option<String>,
    callback: SubscriberCallback,
}

impl Subscription {
    fn accepts(&self, event: &EventRecord) -> bool {
        if !self.matcher.matches(&event.topic) {
            return false;
        }
        // With filters present, at least one must match.
        self.filters.is_empty() || self.filters.iter().any(|filter| filter.matches(event))
    }
}

struct BusInner {
    subscriptions: Vec<Subscription>,
    history: VecDeque<EventRecord>,
    history_capacity: usize,
}

/// In-process publish/subscribe with glob topic matching.
///
/// Delivery is synchronous on the emitting thread, in registration order.
/// Subscriber callbacks are expected to be brief; the engine's subscription,
/// for example, only enqueues the event. The bus retains a bounded history
/// ring, appended before subscribers are notified.
pub struct EventBus {
    inner: Mutex<BusInner>,
}

impl EventBus {
    /// Creates a bus with the default history capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_history_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    /// Creates a bus retaining at most `capacity` events of history.
    #[must_use]
    pub fn with_history_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(BusInner {
                subscriptions: Vec::new(),
                history: VecDeque::with_capacity(capacity),
                history_capacity: capacity,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribes a callback to every event whose topic matches `pattern`.
    pub fn subscribe<F>(&self, pattern: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&EventRecord) + Send + Sync + 'static,
    {
        self.subscribe_with(pattern, Vec::new(), None, callback)
    }

    /// Subscribes with per-event filters and an optional owner tag.
    ///
    /// The tag groups subscriptions so an owner can drop all of its
    /// registrations at once via [`EventBus::clear_tag`].
    pub fn subscribe_with<F>(
        &self,
        pattern: &str,
        filters: Vec<EventFilter>,
        tag: Option<&str>,
        callback: F,
    ) -> SubscriptionId
    where
        F: Fn(&EventRecord) + Send + Sync + 'static,
    {
        let id = SubscriptionId::new();
        let subscription = Subscription {
            id,
            pattern: pattern.to_string(),
            matcher: WildMatch::new(pattern),
            filters,
            tag: tag.map(str::to_string),
            callback: std::sync::Arc::new(callback),
        };
        self.lock().subscriptions.push(subscription);
        id
    }

    /// Removes a subscription. Returns false when the handle is unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.lock();
        let before = inner.subscriptions.len();
        inner.subscriptions.retain(|sub| sub.id != id);
        inner.subscriptions.len() < before
    }

    /// Removes every subscription registered under `tag`. Returns the count.
    pub fn clear_tag(&self, tag: &str) -> usize {
        let mut inner = self.lock();
        let before = inner.subscriptions.len();
        inner.subscriptions.retain(|sub| sub.tag.as_deref() != Some(tag));
        before - inner.subscriptions.len()
    }

    /// Removes every subscription. Returns the count.
    pub fn clear(&self) -> usize {
        let mut inner = self.lock();
        let before = inner.subscriptions.len();
        inner.subscriptions.clear();
        before
    }

    /// Returns the number of live subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.lock().subscriptions.len()
    }

    /// Publishes an event to every matching subscription.
    ///
    /// The event is appended to history first, then callbacks run
    /// synchronously in registration order. A panicking callback is caught
    /// and logged; it still counts as notified and later callbacks still
    /// run. Returns the number of callbacks invoked.
    pub fn emit(&self, event: EventRecord) -> usize {
        let recipients: Vec<(SubscriptionId, SubscriberCallback)> = {
            let mut inner = self.lock();
            if inner.history.len() >= inner.history_capacity {
                inner.history.pop_front();
            }
            inner.history.push_back(event.clone());

            inner
                .subscriptions
                .iter()
                .filter(|sub| sub.accepts(&event))
                .map(|sub| (sub.id, std::sync::Arc::clone(&sub.callback)))
                .collect()
        };

        // Callbacks run outside the lock so they may freely re-enter the bus.
        let mut notified = 0;
        for (id, callback) in recipients {
            let outcome = catch_unwind(AssertUnwindSafe(|| callback(&event)));
            if outcome.is_err() {
                warn!(subscription = %id, topic = %event.topic, "subscriber callback panicked");
            }
            notified += 1;
        }
        notified
    }

    /// Returns up to `limit` retained events, oldest first.
    ///
    /// With a topic, only events whose topic is exactly equal are returned.
    #[must_use]
    pub fn get_history(&self, topic: Option<&str>, limit: usize) -> Vec<EventRecord> {
        let inner = self.lock();
        let matched: Vec<EventRecord> = inner
            .history
            .iter()
            .filter(|event| topic.is_none_or(|t| event.topic == t))
            .cloned()
            .collect();
        let skip = matched.len().saturating_sub(limit);
        matched.into_iter().skip(skip).collect()
    }

    /// Returns the topics of live subscriptions, in registration order.
    #[must_use]
    pub fn subscribed_patterns(&self) -> Vec<String> {
        self.lock()
            .subscriptions
            .iter()
            .map(|sub| sub.pattern.clone())
            .collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn chat_event(text: &str) -> EventRecord {
        let mut payload = Map::new();
        payload.insert("text".to_string(), json!(text));
        EventRecord::new("chat.message", payload, "test")
    }

    #[test]
    fn glob_pattern_routes_matching_topics() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits_clone = Arc::clone(&hits);
        bus.subscribe("chat.*", move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(bus.emit(chat_event("hi")), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let tick = EventRecord::new("system.tick", Map::new(), "clock");
        assert_eq!(bus.emit(tick), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delivery_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            bus.subscribe("chat.*", move |_| {
                order.lock().expect("lock").push(label);
            });
        }

        bus.emit(chat_event("hi"));
        assert_eq!(
            *order.lock().expect("lock"),
            vec!["first", "second", "third"]
        );
    }

    #[test]
    fn any_filter_admits_the_event() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let filters = vec![
            EventFilter::compile("chat.*", "text == 'nope'").expect("compile"),
            EventFilter::compile("chat.*", "text == 'hi'").expect("compile"),
        ];
        let hits_clone = Arc::clone(&hits);
        bus.subscribe_with("chat.*", filters, None, move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(bus.emit(chat_event("hi")), 1);
        assert_eq!(bus.emit(chat_event("bye")), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits_clone = Arc::clone(&hits);
        let id = bus.subscribe("chat.*", move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(chat_event("one"));
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.emit(chat_event("two"));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clear_tag_only_drops_that_owner() {
        let bus = EventBus::new();

        bus.subscribe_with("chat.*", Vec::new(), Some("engine"), |_| {});
        bus.subscribe_with("chat.*", Vec::new(), Some("engine"), |_| {});
        bus.subscribe_with("chat.*", Vec::new(), Some("other"), |_| {});

        assert_eq!(bus.clear_tag("engine"), 2);
        assert_eq!(bus.subscription_count(), 1);

        assert_eq!(bus.clear(), 1);
        assert_eq!(bus.subscription_count(), 0);
    }

    #[test]
    fn panicking_callback_does_not_block_later_subscribers() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        bus.subscribe("chat.*", |_| panic!("boom"));
        let hits_clone = Arc::clone(&hits);
        bus.subscribe("chat.*", move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(bus.emit(chat_event("hi")), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn history_is_bounded_and_appended_before_notification() {
        let bus = Arc::new(EventBus::with_history_capacity(3));

        let seen = Arc::new(AtomicUsize::new(0));
        let bus_clone = Arc::clone(&bus);
        let seen_clone = Arc::clone(&seen);
        bus.subscribe("chat.*", move |event| {
            let history = bus_clone.get_history(None, 10);
            if history.iter().any(|recorded| recorded.id == event.id) {
                seen_clone.fetch_add(1, Ordering::SeqCst);
            }
        });

        for i in 0..5 {
            bus.emit(chat_event(&format!("m{i}")));
        }

        assert_eq!(seen.load(Ordering::SeqCst), 5);
        assert_eq!(bus.get_history(None, 10).len(), 3);
    }

    #[test]
    fn history_filters_by_exact_topic() {
        let bus = EventBus::new();
        bus.emit(chat_event("one"));
        bus.emit(EventRecord::new("system.tick", Map::new(), "clock"));
        bus.emit(chat_event("two"));

        let chat = bus.get_history(Some("chat.message"), 10);
        assert_eq!(chat.len(), 2);
        assert_eq!(chat[0].payload_str("text"), Some("one"));
        assert_eq!(chat[1].payload_str("text"), Some("two"));

        let limited = bus.get_history(Some("chat.message"), 1);
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].payload_str("text"), Some("two"));
    }
}
