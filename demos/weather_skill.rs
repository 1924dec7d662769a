//! Weather Skill Example
//!
//! This example demonstrates how to:
//! - Register intent and question handlers on a router
//! - Normalize slot values with an entity normalizer
//! - Fill a missing slot from the conversation context
//! - Answer intent messages through a skill host
//!
//! The device server is simulated in-process with a memory connector.

use serde_json::{Value, json};
use skill_dialog_sdk::{
    ClassifiedUtterance, ClientConfig, ConnectionClient, ConnectionState, ConversationContext,
    DialogueOrchestrator, EntityResolver, IntentResponse, IntentRouter, MemoryConnector,
    RequireOptions, SkillHost, Slot, intent_fn, question_fn,
};
use std::sync::Arc;
use tokio::sync::Mutex;

fn nlu(input: &str, slots: Value) -> Value {
    json!({
        "$endpoint": "skill/intent",
        "$reqid": uuid::Uuid::new_v4().to_string(),
        "input": input,
        "intent": { "intentName": "Weather$getWeather", "probability": 0.97 },
        "slots": slots
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter("skill_dialog_sdk=debug").init();

    println!("=== Weather Skill Example ===\n");

    // Step 1: Entity normalizer for city names
    let resolver = Arc::new(EntityResolver::new());
    resolver.register("city", |slot: &Slot| -> anyhow::Result<Value> {
        let mut chars = slot.raw_value.chars();
        let city = match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
            None => anyhow::bail!("empty city"),
        };
        Ok(json!(city))
    });

    // Step 2: Handlers
    let router = Arc::new(IntentRouter::new());
    let dialogue = Arc::new(DialogueOrchestrator::new(router.clone(), resolver));
    let context = Arc::new(Mutex::new(ConversationContext::new()));

    router.on_question(
        "Weather",
        "getWeather",
        "city",
        question_fn(|_, _| Ok(Some(json!("Which city?")))),
    );

    let handler_dialogue = dialogue.clone();
    let handler_context = context.clone();
    router.on(
        "Weather",
        "getWeather",
        intent_fn(move |utterance: ClassifiedUtterance| {
            let dialogue = handler_dialogue.clone();
            let context = handler_context.clone();
            async move {
                let mut context = context.lock().await;
                let city = dialogue
                    .require("city", &utterance, &context, &RequireOptions::new())
                    .await;
                let Some(city) = city.as_ref().and_then(Value::as_str).map(str::to_string) else {
                    return Ok(None);
                };
                if city.ends_with('?') {
                    return Ok(Some(IntentResponse::single_text(city)));
                }

                context.set("city", city.clone());
                let response = IntentResponse::text([
                    "It is sunny in $city.",
                    "Expect clear skies over $city.",
                ])
                .apply_values([("city", city.as_str())]);
                Ok(Some(response))
            }
        }),
    );

    // Step 3: Connect through the simulated server
    let (connector, mut peers) = MemoryConnector::new();
    let client = ConnectionClient::builder(ClientConfig::new("demo-device"))
        .connector(connector)
        .build();
    let _host = SkillHost::attach(&client, router);

    client.connect();
    let mut server = peers.recv().await.ok_or("no connection")?;
    client.wait_for(ConnectionState::Open).await;
    println!("1. Connected to {}\n", server.url());

    // Step 4: Conversation turns
    let turns = [
        ("what's the weather", json!([])),
        (
            "what's the weather in oslo",
            json!([{
                "range": { "start": 22, "end": 26 },
                "rawValue": "oslo",
                "value": { "kind": "Custom", "value": "oslo" },
                "entity": "city",
                "slotName": "city"
            }]),
        ),
        ("and the weather now", json!([])),
    ];

    for (turn, (input, slots)) in turns.into_iter().enumerate() {
        println!("{}. User: {}", turn + 2, input);
        server.send(&nlu(input, slots));

        let reply = server.recv().await.ok_or("connection closed")?;
        let text = reply
            .get("response")
            .and_then(|response| response.get("text"))
            .and_then(Value::as_str)
            .unwrap_or("<no answer>");
        println!("   Skill: {}\n", text);
    }

    client.disconnect();
    println!("=== Example Complete ===");
    Ok(())
}
