//! Event filters: a topic pattern plus an optional condition.

use crate::condition::Condition;
use crate::error::ConditionError;
use crate::event::EventRecord;
use wildmatch::WildMatch;

/// A compiled filter matched against individual events.
///
/// The pattern uses glob-style wildcards (`*`, `?`) against the event topic.
/// The optional condition is evaluated against the payload only when the
/// pattern matched.
#[derive(Debug, Clone)]
pub struct EventFilter {
    pattern: String,
    matcher: WildMatch,
    condition: Option<Condition>,
}

impl EventFilter {
    /// Creates a filter matching a topic pattern with no condition.
    #[must_use]
    pub fn new(pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        let matcher = WildMatch::new(&pattern);
        Self {
            pattern,
            matcher,
            condition: None,
        }
    }

    /// Attaches a parsed condition to this filter.
    #[must_use]
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Compiles a filter from raw pattern and condition text.
    ///
    /// An empty or whitespace-only condition is treated as absent.
    ///
    /// # Errors
    ///
    /// Returns a [`ConditionError`] when the condition text does not parse.
    pub fn compile(pattern: &str, condition: &str) -> Result<Self, ConditionError> {
        let filter = Self::new(pattern);
        if condition.trim().is_empty() {
            Ok(filter)
        } else {
            Ok(filter.with_condition(Condition::parse(condition)?))
        }
    }

    /// Returns the topic pattern this filter was built from.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Returns true when the event's topic matches the pattern and the
    /// condition, if any, holds.
    #[must_use]
    pub fn matches(&self, event: &EventRecord) -> bool {
        if !self.matcher.matches(&event.topic) {
            return false;
        }
        self.condition
            .as_ref()
            .is_none_or(|condition| condition.evaluate(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, Value as JsonValue, json};

    fn chat_event(text: &str) -> EventRecord {
        let mut payload = Map::new();
        payload.insert("text".to_string(), json!(text));
        EventRecord::new("chat.message", payload, "test")
    }

    #[test]
    fn pattern_only_filter() {
        let filter = EventFilter::new("chat.*");
        assert!(filter.matches(&chat_event("hi")));

        let tick = EventRecord::new("system.tick", Map::new(), "clock");
        assert!(!filter.matches(&tick));
    }

    #[test]
    fn condition_gates_a_matching_pattern() {
        let filter = EventFilter::compile("chat.*", "text == 'hi'").expect("compile");
        assert!(filter.matches(&chat_event("hi")));
        assert!(!filter.matches(&chat_event("bye")));
    }

    #[test]
    fn condition_not_checked_when_pattern_misses() {
        let filter = EventFilter::compile("system.*", "text == 'hi'").expect("compile");
        assert!(!filter.matches(&chat_event("hi")));
    }

    #[test]
    fn blank_condition_is_absent() {
        let filter = EventFilter::compile("chat.*", "   ").expect("compile");
        assert!(filter.matches(&chat_event("anything")));
    }

    #[test]
    fn bad_condition_is_an_error() {
        let result = EventFilter::compile("chat.*", "text ~ 'hi'");
        assert!(result.is_err());
    }

    #[test]
    fn question_mark_wildcard() {
        let filter = EventFilter::new("chat.messag?");
        assert!(filter.matches(&chat_event("hi")));

        let mut payload = Map::new();
        payload.insert("x".to_string(), JsonValue::Null);
        let other = EventRecord::new("chat.msg", payload, "test");
        assert!(!filter.matches(&other));
    }
}
