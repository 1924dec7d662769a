//! Conversation context - everything the dialogue has learned so far
//!
//! The context is an append-only audit trail: each key keeps every value it
//! was ever given together with the second it was recorded. Reads can ask for
//! the latest value or for the value known before a point in time, which lets
//! a multi-turn dialogue ignore information learned after a question was
//! asked.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// One recorded value of a context key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub key: String,
    /// Seconds since the Unix epoch
    pub timestamp: i64,
    pub value: Value,
}

/// Per-key timestamped value history
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationContext {
    entries: HashMap<String, Vec<ContextEntry>>,
}

impl ConversationContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a value for `key` at the current time
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.set_at(key, value, Utc::now().timestamp());
    }

    /// Record a value for `key` with an explicit timestamp
    pub fn set_at(&mut self, key: impl Into<String>, value: impl Into<Value>, timestamp: i64) {
        let key = key.into();
        self.entries.entry(key.clone()).or_default().push(ContextEntry {
            key,
            timestamp,
            value: value.into(),
        });
    }

    /// Value of `key`, optionally as known strictly before `at`
    ///
    /// Without `at` the most recently recorded value is returned. With `at`
    /// the history is scanned newest first and the first entry whose timestamp
    /// is below `at` wins.
    pub fn get(&self, key: &str, at: Option<i64>) -> Option<&Value> {
        let history = self.entries.get(key)?;
        let entry = match at {
            None => history.last(),
            Some(at) => history.iter().rev().find(|entry| entry.timestamp < at),
        };
        entry.map(|entry| &entry.value)
    }

    /// Like [`get`](Self::get) with a fallback value
    pub fn get_or(&self, key: &str, default: Value, at: Option<i64>) -> Value {
        self.get(key, at).cloned().unwrap_or(default)
    }

    /// Typed read; `None` when absent or not deserializable as `T`
    pub fn get_as<T: DeserializeOwned>(&self, key: &str, at: Option<i64>) -> Option<T> {
        self.get(key, at)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Every value recorded for `key`, oldest first
    pub fn history(&self, key: &str) -> &[ContextEntry] {
        self.entries.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    /// Keys that have at least one recorded value
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_point_in_time_lookup() {
        let mut context = ConversationContext::new();
        context.set_at("city", "NYC", 100);
        context.set_at("city", "Boston", 200);

        assert_eq!(context.get("city", Some(150)), Some(&json!("NYC")));
        assert_eq!(context.get("city", None), Some(&json!("Boston")));
        assert_eq!(context.get_or("missing", json!("X"), None), json!("X"));
    }

    #[test]
    fn test_timestamp_bound_is_strict() {
        let mut context = ConversationContext::new();
        context.set_at("city", "NYC", 100);

        assert_eq!(context.get("city", Some(100)), None);
        assert_eq!(context.get("city", Some(101)), Some(&json!("NYC")));
    }

    #[test]
    fn test_nothing_before_timestamp_returns_default() {
        let mut context = ConversationContext::new();
        context.set_at("city", "Boston", 200);

        assert_eq!(context.get_or("city", json!("X"), Some(50)), json!("X"));
    }

    #[test]
    fn test_history_is_append_only() {
        let mut context = ConversationContext::new();
        context.set_at("unit", "celsius", 1);
        context.set_at("unit", "fahrenheit", 2);
        context.set_at("unit", "celsius", 3);

        let values: Vec<_> = context.history("unit").iter().map(|e| e.value.clone()).collect();
        assert_eq!(values, vec![json!("celsius"), json!("fahrenheit"), json!("celsius")]);
        assert!(context.history("other").is_empty());
    }

    #[test]
    fn test_set_uses_current_time() {
        let before = Utc::now().timestamp();
        let mut context = ConversationContext::new();
        context.set("city", "Paris");

        let entry = &context.history("city")[0];
        assert!(entry.timestamp >= before);
        assert_eq!(entry.key, "city");
    }

    #[test]
    fn test_typed_read() {
        let mut context = ConversationContext::new();
        context.set_at("guests", 4, 10);
        context.set_at("name", "Ada", 10);

        assert_eq!(context.get_as::<u32>("guests", None), Some(4));
        assert_eq!(context.get_as::<u32>("name", None), None);
    }
}
