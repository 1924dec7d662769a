//! In-process lanes for skill-to-skill notifications
//!
//! A skill subscribes to a named lane and any other skill in the process can
//! push data onto it. Delivery is synchronous and in subscription order.

use serde_json::Value;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{error, trace};

type LaneCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Lane-based publish/subscribe bus
#[derive(Default)]
pub struct Highway {
    roads: RwLock<Vec<(String, LaneCallback)>>,
}

impl Highway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a callback to a lane
    pub fn on<F>(&self, lane: impl Into<String>, callback: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.roads
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((lane.into(), Arc::new(callback)));
    }

    /// Deliver data to every subscriber of a lane
    ///
    /// Returns the number of callbacks that completed. A panicking callback
    /// is logged and skipped.
    pub fn push(&self, lane: &str, data: &Value) -> usize {
        let subscribers: Vec<LaneCallback> = self
            .roads
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(road, _)| road == lane)
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        trace!("Pushing onto lane {} with {} subscriber(s)", lane, subscribers.len());

        subscribers
            .into_iter()
            .filter(|callback| {
                let delivered = catch_unwind(AssertUnwindSafe(|| callback(data))).is_ok();
                if !delivered {
                    error!("Subscriber on lane {} panicked", lane);
                }
                delivered
            })
            .count()
    }
}

impl std::fmt::Debug for Highway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let roads = self.roads.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Highway")
            .field("subscriptions", &roads.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[test]
    fn test_push_reaches_only_its_lane() {
        let highway = Highway::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        highway.on("lights", move |data| sink.lock().unwrap().push(data.clone()));
        highway.on("music", |_| panic!("wrong lane"));

        assert_eq!(highway.push("lights", &json!({ "room": "kitchen" })), 1);
        assert_eq!(*seen.lock().unwrap(), vec![json!({ "room": "kitchen" })]);
    }

    #[test]
    fn test_panicking_subscriber_is_skipped() {
        let highway = Highway::new();
        let count = Arc::new(Mutex::new(0));

        highway.on("alarm", |_| panic!("subscriber bug"));
        let counter = Arc::clone(&count);
        highway.on("alarm", move |_| *counter.lock().unwrap() += 1);

        assert_eq!(highway.push("alarm", &Value::Bool(true)), 1);
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn test_push_without_subscribers() {
        assert_eq!(Highway::new().push("nobody", &Value::Null), 0);
    }
}
