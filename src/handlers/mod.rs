//! Skill handler traits
//!
//! Skill code plugs into the router through two traits:
//! - [`IntentHandler`] answers (or merely observes) a classified utterance
//! - [`QuestionHandler`] is consulted when a required slot could not be
//!   filled from the utterance or the conversation context
//!
//! Both return `anyhow::Result`; failures are logged by the router and never
//! abort sibling handlers. Closures can be adapted with [`intent_fn`] and
//! [`question_fn`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use uuid::Uuid;

use crate::aggregate::ConversationContext;
use crate::value_objects::{ClassifiedUtterance, IntentResponse};

/// Outcome of an intent handler: `Some` answers the utterance, `None` is a
/// side-effect-only observation
pub type HandlerOutput = anyhow::Result<Option<IntentResponse>>;

/// Unique identifier of a handler registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandlerId(pub Uuid);

impl HandlerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for HandlerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Handles utterances routed to a skill
#[async_trait]
pub trait IntentHandler: Send + Sync {
    async fn handle(&self, utterance: &ClassifiedUtterance) -> HandlerOutput;
}

/// Produces a follow-up for a slot nothing else could fill
///
/// The returned value, typically a clarification prompt or a synthesized
/// default, is handed back to the caller of `require` unchanged.
#[async_trait]
pub trait QuestionHandler: Send + Sync {
    async fn ask(
        &self,
        utterance: &ClassifiedUtterance,
        context: &ConversationContext,
    ) -> anyhow::Result<Option<Value>>;
}

/// Intent handler backed by an async closure
pub struct FnIntentHandler<F> {
    f: F,
}

/// Adapt an async closure into an [`IntentHandler`]
pub fn intent_fn<F, Fut>(f: F) -> FnIntentHandler<F>
where
    F: Fn(ClassifiedUtterance) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerOutput> + Send + 'static,
{
    FnIntentHandler { f }
}

#[async_trait]
impl<F, Fut> IntentHandler for FnIntentHandler<F>
where
    F: Fn(ClassifiedUtterance) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerOutput> + Send + 'static,
{
    async fn handle(&self, utterance: &ClassifiedUtterance) -> HandlerOutput {
        (self.f)(utterance.clone()).await
    }
}

/// Question handler backed by a synchronous closure
pub struct FnQuestionHandler<F> {
    f: F,
}

/// Adapt a closure into a [`QuestionHandler`]
pub fn question_fn<F>(f: F) -> FnQuestionHandler<F>
where
    F: Fn(&ClassifiedUtterance, &ConversationContext) -> anyhow::Result<Option<Value>>
        + Send
        + Sync
        + 'static,
{
    FnQuestionHandler { f }
}

#[async_trait]
impl<F> QuestionHandler for FnQuestionHandler<F>
where
    F: Fn(&ClassifiedUtterance, &ConversationContext) -> anyhow::Result<Option<Value>>
        + Send
        + Sync
        + 'static,
{
    async fn ask(
        &self,
        utterance: &ClassifiedUtterance,
        context: &ConversationContext,
    ) -> anyhow::Result<Option<Value>> {
        (self.f)(utterance, context)
    }
}
