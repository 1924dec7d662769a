//! Classified utterances as produced by the NLU service

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::entities::EntityResolver;
use crate::error::{DialogError, DialogResult};

/// Character span of a slot inside the input text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRange {
    pub start: usize,
    pub end: usize,
}

/// Value the NLU extracted for a slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotValue {
    /// Extraction kind, e.g. `Custom`
    #[serde(default)]
    pub kind: String,
    /// Extracted value
    #[serde(default)]
    pub value: Value,
}

/// Slot record in the NLU payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NluSlot {
    #[serde(default)]
    pub range: Option<SlotRange>,
    #[serde(default)]
    pub raw_value: String,
    #[serde(default)]
    pub value: Option<SlotValue>,
    #[serde(default)]
    pub entity: Option<String>,
    pub slot_name: String,
    /// Resolution already performed upstream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<Value>,
}

/// Intent classification in the NLU payload
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NluIntent {
    /// Combined `Skill$Intent` identifier, absent when nothing matched
    #[serde(default)]
    pub intent_name: Option<String>,
    #[serde(default)]
    pub probability: Option<f64>,
}

/// Classification result exactly as the NLU service sends it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NluPayload {
    pub input: String,
    pub intent: NluIntent,
    pub slots: Vec<NluSlot>,
}

/// A named piece of information extracted from an utterance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    /// Slot name, e.g. `city`
    pub name: String,
    /// Text as it appeared in the input
    pub raw_value: String,
    /// Declared entity type used to pick a resolver
    pub entity: Option<String>,
    /// Value the NLU extracted, `Null` when none
    pub value: Value,
    /// Value resolved upstream, takes precedence over local resolvers
    pub resolved: Option<Value>,
    /// Span inside the input text
    pub range: Option<SlotRange>,
}

impl Slot {
    /// Create a slot whose extracted value is its raw text
    pub fn new(name: impl Into<String>, raw_value: impl Into<String>) -> Self {
        let raw_value = raw_value.into();
        Self {
            name: name.into(),
            value: Value::String(raw_value.clone()),
            raw_value,
            entity: None,
            resolved: None,
            range: None,
        }
    }

    /// Declare the entity type of this slot
    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    /// Override the extracted value
    pub fn with_value(mut self, value: Value) -> Self {
        self.value = value;
        self
    }

    /// Attach an upstream resolution
    pub fn with_resolved(mut self, resolved: Value) -> Self {
        self.resolved = Some(resolved);
        self
    }
}

impl From<NluSlot> for Slot {
    fn from(slot: NluSlot) -> Self {
        Self {
            name: slot.slot_name,
            raw_value: slot.raw_value,
            entity: slot.entity,
            value: slot.value.map(|v| v.value).unwrap_or(Value::Null),
            resolved: slot.resolved.filter(|v| !v.is_null()),
            range: slot.range,
        }
    }
}

/// An utterance the NLU service classified into a skill and intent
///
/// Immutable once built. When `skill` and `intent` are present they are both
/// non-empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedUtterance {
    input: String,
    skill: Option<String>,
    intent: Option<String>,
    probability: f64,
    slots: HashMap<String, Slot>,
}

impl ClassifiedUtterance {
    /// Create an utterance for a known skill and intent
    pub fn new(input: impl Into<String>, skill: impl Into<String>, intent: impl Into<String>) -> Self {
        let skill = skill.into();
        let intent = intent.into();
        let classified = !skill.is_empty() && !intent.is_empty();
        Self {
            input: input.into(),
            skill: classified.then_some(skill),
            intent: classified.then_some(intent),
            probability: 1.0,
            slots: HashMap::new(),
        }
    }

    /// Create an utterance the NLU could not classify
    pub fn unclassified(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            skill: None,
            intent: None,
            probability: 0.0,
            slots: HashMap::new(),
        }
    }

    /// Build from the NLU payload, splitting `Skill$Intent`
    pub fn from_nlu(payload: NluPayload) -> Self {
        let (skill, intent) = payload
            .intent
            .intent_name
            .as_deref()
            .and_then(split_intent_name)
            .map_or((None, None), |(s, i)| (Some(s), Some(i)));

        Self {
            input: payload.input,
            skill,
            intent,
            probability: payload.intent.probability.unwrap_or(0.0),
            slots: payload
                .slots
                .into_iter()
                .map(|slot| (slot.slot_name.clone(), Slot::from(slot)))
                .collect(),
        }
    }

    /// Build from an NLU payload held as JSON
    pub fn from_json(value: Value) -> DialogResult<Self> {
        let payload: NluPayload = serde_json::from_value(value).map_err(DialogError::malformed)?;
        Ok(Self::from_nlu(payload))
    }

    /// Add a slot, replacing any slot with the same name
    pub fn with_slot(mut self, slot: Slot) -> Self {
        self.slots.insert(slot.name.clone(), slot);
        self
    }

    /// Set the classification confidence
    pub fn with_probability(mut self, probability: f64) -> Self {
        self.probability = probability;
        self
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn skill(&self) -> Option<&str> {
        self.skill.as_deref()
    }

    pub fn intent(&self) -> Option<&str> {
        self.intent.as_deref()
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }

    pub fn slots(&self) -> &HashMap<String, Slot> {
        &self.slots
    }

    pub fn slot(&self, name: &str) -> Option<&Slot> {
        self.slots.get(name)
    }

    /// `Skill$Intent` label used in logs
    pub fn route(&self) -> String {
        match (&self.skill, &self.intent) {
            (Some(skill), Some(intent)) => format!("{skill}${intent}"),
            _ => "<unclassified>".to_string(),
        }
    }

    /// Resolved value of a slot, `None` when the slot is absent or null
    pub fn slot_value(&self, name: &str, resolver: &EntityResolver) -> Option<Value> {
        self.slot(name)
            .map(|slot| resolver.resolve(slot))
            .filter(|value| !value.is_null())
    }
}

/// Split `Skill$Intent` at the first `$`; both halves must be non-empty
fn split_intent_name(name: &str) -> Option<(String, String)> {
    let (skill, intent) = name.split_once('$')?;
    if skill.is_empty() || intent.is_empty() {
        return None;
    }
    Some((skill.to_string(), intent.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn weather_payload() -> Value {
        json!({
            "input": "How's the weather in New York?",
            "intent": {
                "intentName": "Weather$getWeather",
                "probability": 0.963
            },
            "slots": [{
                "range": { "start": 21, "end": 29 },
                "rawValue": "New York",
                "value": { "kind": "Custom", "value": "New York" },
                "entity": "city",
                "slotName": "city_name"
            }]
        })
    }

    #[test]
    fn test_from_nlu_splits_intent_name() {
        let utterance = ClassifiedUtterance::from_json(weather_payload()).unwrap();

        assert_eq!(utterance.skill(), Some("Weather"));
        assert_eq!(utterance.intent(), Some("getWeather"));
        assert_eq!(utterance.route(), "Weather$getWeather");
        assert!((utterance.probability() - 0.963).abs() < f64::EPSILON);

        let slot = utterance.slot("city_name").unwrap();
        assert_eq!(slot.raw_value, "New York");
        assert_eq!(slot.entity.as_deref(), Some("city"));
        assert_eq!(slot.value, json!("New York"));
        assert_eq!(slot.range, Some(SlotRange { start: 21, end: 29 }));
        assert!(slot.resolved.is_none());
    }

    #[test]
    fn test_missing_intent_name_is_unclassified() {
        let utterance = ClassifiedUtterance::from_json(json!({
            "input": "blah",
            "intent": { "intentName": null, "probability": 0.1 },
            "slots": []
        }))
        .unwrap();

        assert_eq!(utterance.skill(), None);
        assert_eq!(utterance.intent(), None);
        assert_eq!(utterance.route(), "<unclassified>");
    }

    #[test]
    fn test_intent_name_without_separator_is_unclassified() {
        for name in ["Weather", "$getWeather", "Weather$"] {
            let utterance = ClassifiedUtterance::from_json(json!({
                "input": "x",
                "intent": { "intentName": name },
                "slots": []
            }))
            .unwrap();
            assert_eq!(utterance.skill(), None, "{name}");
            assert_eq!(utterance.intent(), None, "{name}");
        }
    }

    #[test]
    fn test_intent_name_splits_at_first_separator() {
        assert_eq!(
            split_intent_name("Wetter$Bericht$morgen"),
            Some(("Wetter".to_string(), "Bericht$morgen".to_string()))
        );
    }

    #[test]
    fn test_missing_required_field_is_malformed() {
        let result = ClassifiedUtterance::from_json(json!({ "input": "hi" }));
        assert!(matches!(result, Err(DialogError::MalformedMessage { .. })));
    }

    #[test]
    fn test_null_resolution_is_ignored() {
        let utterance = ClassifiedUtterance::from_json(json!({
            "input": "tomorrow",
            "intent": { "intentName": "Weather$getWeather" },
            "slots": [{ "rawValue": "morgen", "slotName": "time", "resolved": null }]
        }))
        .unwrap();

        let slot = utterance.slot("time").unwrap();
        assert!(slot.resolved.is_none());
        assert_eq!(slot.value, Value::Null);
    }

    #[test]
    fn test_new_with_empty_names_is_unclassified() {
        let utterance = ClassifiedUtterance::new("hello", "", "greet");
        assert_eq!(utterance.skill(), None);
        assert_eq!(utterance.intent(), None);
    }
}
