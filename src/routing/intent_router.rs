//! Intent router for skill dispatch
//!
//! Every registration whose patterns match the utterance runs, in
//! registration order, with no precedence between exact and wildcard
//! patterns. This lets observer skills (telemetry, logging) coexist with the
//! skill that actually answers: observers return `None`, answering skills
//! return an [`IntentResponse`], and the last answer in registration order
//! is the one that is kept.

use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error, warn};

use crate::error::{DialogError, DialogResult};
use crate::handlers::{HandlerId, IntentHandler, QuestionHandler};
use crate::routing::pattern::RoutePattern;
use crate::value_objects::{ClassifiedUtterance, IntentResponse};

/// A handler bound to a skill/intent pattern pair
#[derive(Clone)]
struct HandlerRegistration {
    id: HandlerId,
    skill: RoutePattern,
    intent: RoutePattern,
    handler: Arc<dyn IntentHandler>,
}

impl HandlerRegistration {
    fn matches(&self, utterance: &ClassifiedUtterance) -> bool {
        self.skill.matches(utterance.skill()) && self.intent.matches(utterance.intent())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct QuestionKey {
    skill: String,
    intent: String,
    slot: String,
}

/// Combined outcome of running every matching handler
#[derive(Debug, Default)]
pub struct DispatchResult {
    /// At least one handler answered with a response
    pub matched: bool,

    /// Response of the last handler that answered
    pub response: Option<IntentResponse>,

    /// Number of handlers that ran
    pub invoked: usize,

    /// Failures of individual handlers, in the order they occurred
    pub errors: Vec<DialogError>,
}

impl DispatchResult {
    fn no_endpoint(route: String) -> Self {
        Self {
            errors: vec![DialogError::NoEndpoint { route }],
            ..Self::default()
        }
    }

    /// Whether no handler was registered for the utterance
    pub fn is_no_endpoint(&self) -> bool {
        self.errors
            .iter()
            .any(|e| matches!(e, DialogError::NoEndpoint { .. }))
    }
}

/// Registry of intent and question handlers
#[derive(Default)]
pub struct IntentRouter {
    handlers: RwLock<Vec<HandlerRegistration>>,
    questions: RwLock<HashMap<QuestionKey, Arc<dyn QuestionHandler>>>,
}

impl IntentRouter {
    /// Create an empty router
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a skill/intent pattern pair
    ///
    /// Either pattern may be `*`. Registrations are never deduplicated.
    pub fn on<H>(
        &self,
        skill: impl Into<RoutePattern>,
        intent: impl Into<RoutePattern>,
        handler: H,
    ) -> HandlerId
    where
        H: IntentHandler + 'static,
    {
        let registration = HandlerRegistration {
            id: HandlerId::new(),
            skill: skill.into(),
            intent: intent.into(),
            handler: Arc::new(handler),
        };
        let id = registration.id;
        debug!(
            "Registered handler {} for {}${}",
            id, registration.skill, registration.intent
        );
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(registration);
        id
    }

    /// Register the follow-up for a missing slot of an exact skill and intent
    ///
    /// Registering the same triple again replaces the earlier handler.
    pub fn on_question<H>(
        &self,
        skill: impl Into<String>,
        intent: impl Into<String>,
        slot: impl Into<String>,
        handler: H,
    ) where
        H: QuestionHandler + 'static,
    {
        let key = QuestionKey {
            skill: skill.into(),
            intent: intent.into(),
            slot: slot.into(),
        };
        debug!(
            "Registered question for {}${} slot {}",
            key.skill, key.intent, key.slot
        );
        self.questions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Arc::new(handler));
    }

    /// Question handler for an exact skill, intent and slot
    pub fn question(&self, skill: &str, intent: &str, slot: &str) -> Option<Arc<dyn QuestionHandler>> {
        let key = QuestionKey {
            skill: skill.to_string(),
            intent: intent.to_string(),
            slot: slot.to_string(),
        };
        self.questions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
    }

    /// Number of registered intent handlers
    pub fn handler_count(&self) -> usize {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Run every handler matching the utterance and combine their results
    ///
    /// Handlers run one after another in registration order. A handler that
    /// fails or panics is logged and recorded in [`DispatchResult::errors`];
    /// the remaining handlers still run.
    pub async fn dispatch(&self, utterance: &ClassifiedUtterance) -> DispatchResult {
        let route = utterance.route();

        // Snapshot so registration never waits on a running handler
        let matching: Vec<HandlerRegistration> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|registration| registration.matches(utterance))
            .cloned()
            .collect();

        if matching.is_empty() {
            warn!("No endpoint registered for {}", route);
            return DispatchResult::no_endpoint(route);
        }

        let mut result = DispatchResult::default();
        for registration in matching {
            result.invoked += 1;
            let outcome = AssertUnwindSafe(registration.handler.handle(utterance))
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(Some(response))) => {
                    result.matched = true;
                    result.response = Some(response);
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    error!(
                        "Handler {} ({}${}) failed for {}: {:#}",
                        registration.id, registration.skill, registration.intent, route, e
                    );
                    result.errors.push(DialogError::handler(route.clone(), &e));
                }
                Err(_) => {
                    error!(
                        "Handler {} ({}${}) panicked for {}",
                        registration.id, registration.skill, registration.intent, route
                    );
                    result.errors.push(DialogError::Handler {
                        route: route.clone(),
                        message: "handler panicked".to_string(),
                    });
                }
            }
        }

        debug!(
            "Dispatched {} to {} handler(s), matched: {}",
            route, result.invoked, result.matched
        );
        result
    }

    /// Build an utterance from a raw NLU payload and dispatch it
    pub async fn handle(&self, payload: Value) -> DialogResult<DispatchResult> {
        let utterance = ClassifiedUtterance::from_json(payload)?;
        Ok(self.dispatch(&utterance).await)
    }
}

impl std::fmt::Debug for IntentRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let questions = self.questions.read().unwrap_or_else(PoisonError::into_inner).len();
        f.debug_struct("IntentRouter")
            .field("handlers", &self.handler_count())
            .field("questions", &questions)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{HandlerOutput, intent_fn, question_fn};
    use serde_json::json;
    use std::sync::Mutex;

    type CallLog = Arc<Mutex<Vec<&'static str>>>;

    fn recording(log: &CallLog, name: &'static str, answer: bool) -> impl IntentHandler + 'static {
        let log = Arc::clone(log);
        intent_fn(move |_utterance: ClassifiedUtterance| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(name);
                Ok(answer.then(|| IntentResponse::single_text(name)))
            }
        })
    }

    fn weather() -> ClassifiedUtterance {
        ClassifiedUtterance::new("How's the weather?", "Weather", "getWeather")
    }

    #[tokio::test]
    async fn test_all_matching_handlers_run_in_order() {
        let router = IntentRouter::new();
        let log = CallLog::default();
        router.on("*", "*", recording(&log, "everything", false));
        router.on("Weather", "*", recording(&log, "weather_skill", false));
        router.on("Music", "*", recording(&log, "music_skill", false));
        router.on("*", "getWeather", recording(&log, "get_weather_any_skill", false));
        router.on("Weather", "getWeather", recording(&log, "exact", false));

        let result = router.dispatch(&weather()).await;

        assert_eq!(
            *log.lock().unwrap(),
            vec!["everything", "weather_skill", "get_weather_any_skill", "exact"]
        );
        assert_eq!(result.invoked, 4);
        assert!(!result.matched);
        assert!(result.response.is_none());
        assert!(!result.is_no_endpoint());
    }

    #[tokio::test]
    async fn test_last_answer_wins() {
        let router = IntentRouter::new();
        let log = CallLog::default();
        router.on("Weather", "getWeather", recording(&log, "first", true));
        router.on("*", "*", recording(&log, "observer", false));
        router.on("Weather", "*", recording(&log, "second", true));
        router.on("*", "*", recording(&log, "late_observer", false));

        let result = router.dispatch(&weather()).await;

        assert!(result.matched);
        assert_eq!(result.response, Some(IntentResponse::single_text("second")));
        assert_eq!(result.invoked, 4);
    }

    #[tokio::test]
    async fn test_no_endpoint() {
        let router = IntentRouter::new();
        let log = CallLog::default();
        router.on("Music", "play", recording(&log, "music", true));

        let result = router.dispatch(&weather()).await;

        assert!(!result.matched);
        assert!(result.response.is_none());
        assert_eq!(result.invoked, 0);
        assert!(result.is_no_endpoint());
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_stop_siblings() {
        let router = IntentRouter::new();
        let log = CallLog::default();
        router.on(
            "*",
            "*",
            intent_fn(|_u: ClassifiedUtterance| async move { Err(anyhow::anyhow!("telemetry down")) }),
        );
        router.on("Weather", "getWeather", recording(&log, "answer", true));

        let result = router.dispatch(&weather()).await;

        assert!(result.matched);
        assert_eq!(result.invoked, 2);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].to_string().contains("telemetry down"));
    }

    struct Panicky;

    #[async_trait::async_trait]
    impl IntentHandler for Panicky {
        async fn handle(&self, _utterance: &ClassifiedUtterance) -> HandlerOutput {
            panic!("handler bug")
        }
    }

    #[tokio::test]
    async fn test_panicking_handler_is_isolated() {
        let router = IntentRouter::new();
        let log = CallLog::default();
        router.on("Weather", "*", Panicky);
        router.on("Weather", "*", recording(&log, "after_panic", true));

        let result = router.dispatch(&weather()).await;

        assert!(result.matched);
        assert_eq!(*log.lock().unwrap(), vec!["after_panic"]);
        assert!(matches!(result.errors[0], DialogError::Handler { .. }));
    }

    #[tokio::test]
    async fn test_wildcard_matches_unclassified_utterance() {
        let router = IntentRouter::new();
        let log = CallLog::default();
        router.on("*", "*", recording(&log, "fallback", true));
        router.on("Weather", "*", recording(&log, "weather", true));

        let result = router.dispatch(&ClassifiedUtterance::unclassified("mumble")).await;

        assert_eq!(*log.lock().unwrap(), vec!["fallback"]);
        assert_eq!(result.response, Some(IntentResponse::single_text("fallback")));
    }

    #[tokio::test]
    async fn test_handle_raw_payload() {
        let router = IntentRouter::new();
        let log = CallLog::default();
        router.on("Weather", "getWeather", recording(&log, "weather", true));

        let result = router
            .handle(json!({
                "input": "weather",
                "intent": { "intentName": "Weather$getWeather", "probability": 0.9 },
                "slots": []
            }))
            .await
            .unwrap();
        assert!(result.matched);

        let malformed = router.handle(json!({ "input": "weather" })).await;
        assert!(matches!(malformed, Err(DialogError::MalformedMessage { .. })));
    }

    #[tokio::test]
    async fn test_question_lookup_is_exact() {
        let router = IntentRouter::new();
        router.on_question(
            "Weather",
            "getWeather",
            "city",
            question_fn(|_, _| Ok(Some(json!("Which city?")))),
        );

        assert!(router.question("Weather", "getWeather", "city").is_some());
        assert!(router.question("Weather", "getWeather", "date").is_none());
        assert!(router.question("*", "getWeather", "city").is_none());
    }

    #[test]
    fn test_handler_ids_returned() {
        let router = IntentRouter::new();
        let log = CallLog::default();
        let a = router.on("A", "x", recording(&log, "a", false));
        let b = router.on("A", "x", recording(&log, "a", false));

        assert_ne!(a, b);
        assert_eq!(router.handler_count(), 2);
    }
}
