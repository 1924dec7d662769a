//! Skill responses
//!
//! A skill answers with several alternative phrasings per channel; one of
//! them is picked when the response is resolved for delivery.

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Alternative phrasings for the text channel
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TextResponse {
    pub responses: Vec<String>,
}

/// Alternative phrasings for the speech channel
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SpeechResponse {
    pub responses: Vec<String>,
}

/// Graphical card for clients with a display
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CardResponse {
    pub head: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl TextResponse {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: responses.into_iter().map(Into::into).collect(),
        }
    }
}

impl SpeechResponse {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: responses.into_iter().map(Into::into).collect(),
        }
    }
}

impl CardResponse {
    pub fn new(head: impl Into<String>) -> Self {
        Self {
            head: head.into(),
            ..Self::default()
        }
    }
}

/// Structured answer of a skill handler
///
/// Returning one of these from a handler marks the utterance as answered.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IntentResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<TextResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speech: Option<SpeechResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card: Option<CardResponse>,
}

impl IntentResponse {
    /// Response with no content; still counts as an answer
    pub fn empty() -> Self {
        Self::default()
    }

    /// Response with text phrasings
    pub fn text<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            text: Some(TextResponse::new(responses)),
            ..Self::default()
        }
    }

    pub fn single_text(text: impl Into<String>) -> Self {
        Self::text([text.into()])
    }

    pub fn single_speech(speech: impl Into<String>) -> Self {
        Self::empty().with_speech([speech.into()])
    }

    pub fn single_card(card: CardResponse) -> Self {
        Self::empty().with_card(card)
    }

    /// Set speech phrasings distinct from the text ones
    pub fn with_speech<I, S>(mut self, responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.speech = Some(SpeechResponse::new(responses));
        self
    }

    pub fn with_card(mut self, card: CardResponse) -> Self {
        self.card = Some(card);
        self
    }

    /// Substitute `$name` placeholders in every text and speech phrasing
    ///
    /// Keys may be given with or without the leading `$`. Each phrasing is
    /// scanned once: the longest key matching at a `$` wins, so `$temp`
    /// never clobbers `$temperature`, and substituted values are never
    /// scanned again.
    pub fn apply_values<'a, I>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut values: Vec<(String, &str)> = values
            .into_iter()
            .map(|(key, value)| {
                let placeholder = if key.starts_with('$') {
                    key.to_string()
                } else {
                    format!("${key}")
                };
                (placeholder, value)
            })
            .collect();
        values.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        let substitute = |phrasing: &mut String| {
            *phrasing = substitute_placeholders(phrasing, &values);
        };

        if let Some(text) = self.text.as_mut() {
            text.responses.iter_mut().for_each(substitute);
        }
        if let Some(speech) = self.speech.as_mut() {
            speech.responses.iter_mut().for_each(substitute);
        }
        self
    }

    /// Pick one phrasing per channel with a custom picker
    ///
    /// Speech falls back to the text phrasings when no speech was given.
    pub fn resolve_with<F>(&self, picker: F) -> ResolvedIntentResponse
    where
        F: Fn(&[String]) -> Option<String>,
    {
        let text = self.text.as_ref().and_then(|t| picker(&t.responses));
        let speech = match &self.speech {
            Some(speech) => picker(&speech.responses),
            None => self.text.as_ref().and_then(|t| picker(&t.responses)),
        };
        ResolvedIntentResponse {
            text,
            speech,
            card: self.card.clone(),
        }
    }

    /// Pick one phrasing per channel at random
    pub fn resolve_random(&self) -> ResolvedIntentResponse {
        self.resolve_with(|responses| responses.choose(&mut rand::thread_rng()).cloned())
    }
}

/// Replace placeholders in one left-to-right pass
///
/// `values` must be sorted longest placeholder first.
fn substitute_placeholders(phrasing: &str, values: &[(String, &str)]) -> String {
    let mut substituted = String::with_capacity(phrasing.len());
    let mut rest = phrasing;
    while let Some(index) = rest.find('$') {
        substituted.push_str(&rest[..index]);
        let tail = &rest[index..];
        match values
            .iter()
            .find(|(placeholder, _)| tail.starts_with(placeholder.as_str()))
        {
            Some((placeholder, value)) => {
                substituted.push_str(value);
                rest = &tail[placeholder.len()..];
            }
            None => {
                substituted.push('$');
                rest = &tail[1..];
            }
        }
    }
    substituted.push_str(rest);
    substituted
}

/// Response with exactly one phrasing per channel, ready for delivery
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResolvedIntentResponse {
    pub text: Option<String>,
    pub speech: Option<String>,
    pub card: Option<CardResponse>,
}
