//! Slot filling across dialogue turns
//!
//! [`DialogueOrchestrator::require`] looks for a required slot value in three
//! places, stopping at the first hit:
//! 1. the utterance itself, resolved through the [`EntityResolver`]
//! 2. the conversation context, as known before an optional point in time,
//!    under the slot key and then under each alias
//! 3. the question handler registered for the utterance's skill, intent and
//!    slot key
//!
//! `None` means the slot is still unresolved and the caller should ask again.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::aggregate::ConversationContext;
use crate::entities::EntityResolver;
use crate::routing::IntentRouter;
use crate::value_objects::ClassifiedUtterance;

/// Optional parameters of [`DialogueOrchestrator::require`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequireOptions {
    /// Only consider context learned strictly before this second
    pub at_timestamp: Option<i64>,
    /// Further context keys to try, in order
    pub context_aliases: Vec<String>,
}

impl RequireOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ignore context recorded at or after `timestamp`
    pub fn before(mut self, timestamp: i64) -> Self {
        self.at_timestamp = Some(timestamp);
        self
    }

    /// Also look up these context keys
    pub fn aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.context_aliases = aliases.into_iter().map(Into::into).collect();
        self
    }
}

/// Resolves required slots from utterance, context and follow-up questions
#[derive(Debug, Clone)]
pub struct DialogueOrchestrator {
    router: Arc<IntentRouter>,
    resolver: Arc<EntityResolver>,
}

impl DialogueOrchestrator {
    pub fn new(router: Arc<IntentRouter>, resolver: Arc<EntityResolver>) -> Self {
        Self { router, resolver }
    }

    pub fn router(&self) -> &Arc<IntentRouter> {
        &self.router
    }

    pub fn resolver(&self) -> &Arc<EntityResolver> {
        &self.resolver
    }

    /// Resolve the value of `key` for the current turn
    pub async fn require(
        &self,
        key: &str,
        utterance: &ClassifiedUtterance,
        context: &ConversationContext,
        options: &RequireOptions,
    ) -> Option<Value> {
        if let Some(value) = utterance.slot_value(key, &self.resolver) {
            debug!("Slot {} filled from utterance", key);
            return Some(value);
        }

        let from_context = std::iter::once(key)
            .chain(options.context_aliases.iter().map(String::as_str))
            .find_map(|candidate| {
                context
                    .get(candidate, options.at_timestamp)
                    .filter(|value| !value.is_null())
                    .map(|value| (candidate, value.clone()))
            });
        if let Some((candidate, value)) = from_context {
            debug!("Slot {} filled from context key {}", key, candidate);
            return Some(value);
        }

        let (Some(skill), Some(intent)) = (utterance.skill(), utterance.intent()) else {
            debug!("Slot {} unresolved for unclassified utterance", key);
            return None;
        };
        let Some(question) = self.router.question(skill, intent, key) else {
            debug!("Slot {} unresolved, no question for {}${}", key, skill, intent);
            return None;
        };

        match question.ask(utterance, context).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!("Question for {}${} slot {} failed: {:#}", skill, intent, key, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::question_fn;
    use crate::value_objects::Slot;
    use serde_json::json;

    fn orchestrator() -> DialogueOrchestrator {
        DialogueOrchestrator::new(Arc::new(IntentRouter::new()), Arc::new(EntityResolver::new()))
    }

    fn weather_without_city() -> ClassifiedUtterance {
        ClassifiedUtterance::new("weather please", "Weather", "getWeather")
            .with_slot(Slot::new("city", "").with_value(Value::Null))
    }

    fn boston_context() -> ConversationContext {
        let mut context = ConversationContext::new();
        context.set_at("city", "Boston", 50);
        context
    }

    #[tokio::test]
    async fn test_context_before_timestamp_fills_slot() {
        let value = orchestrator()
            .require(
                "city",
                &weather_without_city(),
                &boston_context(),
                &RequireOptions::new().before(100),
            )
            .await;

        assert_eq!(value, Some(json!("Boston")));
    }

    #[tokio::test]
    async fn test_falls_through_to_question() {
        let dialogue = orchestrator();
        dialogue.router().on_question(
            "Weather",
            "getWeather",
            "city",
            question_fn(|_, _| Ok(Some(json!("For which city?")))),
        );

        let value = dialogue
            .require(
                "city",
                &weather_without_city(),
                &boston_context(),
                &RequireOptions::new().before(10),
            )
            .await;

        assert_eq!(value, Some(json!("For which city?")));
    }

    #[tokio::test]
    async fn test_unresolved_without_question() {
        let value = orchestrator()
            .require(
                "city",
                &weather_without_city(),
                &boston_context(),
                &RequireOptions::new().before(10),
            )
            .await;

        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn test_utterance_slot_wins_over_context() {
        let dialogue = orchestrator();
        dialogue
            .resolver()
            .register("city", |slot: &Slot| -> anyhow::Result<Value> {
                Ok(json!(slot.raw_value.to_uppercase()))
            });
        let utterance = ClassifiedUtterance::new("weather in paris", "Weather", "getWeather")
            .with_slot(Slot::new("city", "paris").with_entity("city"));

        let value = dialogue
            .require("city", &utterance, &boston_context(), &RequireOptions::new())
            .await;

        assert_eq!(value, Some(json!("PARIS")));
    }

    #[tokio::test]
    async fn test_aliases_tried_in_order() {
        let mut context = ConversationContext::new();
        context.set_at("home_city", "Denver", 5);
        context.set_at("last_city", "Austin", 6);

        let value = orchestrator()
            .require(
                "city",
                &weather_without_city(),
                &context,
                &RequireOptions::new().aliases(["missing", "home_city", "last_city"]),
            )
            .await;

        assert_eq!(value, Some(json!("Denver")));
    }

    #[tokio::test]
    async fn test_unclassified_utterance_skips_questions() {
        let dialogue = orchestrator();
        dialogue.router().on_question(
            "Weather",
            "getWeather",
            "city",
            question_fn(|_, _| Ok(Some(json!("asked")))),
        );

        let value = dialogue
            .require(
                "city",
                &ClassifiedUtterance::unclassified("hmm"),
                &ConversationContext::new(),
                &RequireOptions::new(),
            )
            .await;

        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn test_failing_question_is_unresolved() {
        let dialogue = orchestrator();
        dialogue.router().on_question(
            "Weather",
            "getWeather",
            "city",
            question_fn(|_, _| Err(anyhow::anyhow!("prompt store unavailable"))),
        );

        let value = dialogue
            .require(
                "city",
                &weather_without_city(),
                &ConversationContext::new(),
                &RequireOptions::new(),
            )
            .await;

        assert_eq!(value, None);
    }
}
