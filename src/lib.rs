//! Skill dialog SDK
//!
//! Client library for building voice/chat skills against a device server.
//! It provides:
//! - A correlated JSON message connection over WebSocket
//! - Routing of classified utterances (`Skill$Intent`) to skill handlers
//! - Entity normalization of extracted slots
//! - A timestamped conversation context with point-in-time reads
//! - Slot filling across turns via context lookups and follow-up questions
//!
//! A skill registers handlers on an [`IntentRouter`], attaches a
//! [`SkillHost`] to a [`ConnectionClient`] and connects; intent messages are
//! then dispatched and answered automatically.

pub mod aggregate;
pub mod config;
pub mod connection;
pub mod dialogue;
pub mod entities;
pub mod error;
pub mod handlers;
pub mod host;
pub mod routing;
pub mod tasks;
pub mod value_objects;

// Re-export main types
pub use aggregate::{ContextEntry, ConversationContext};

pub use config::ClientConfig;

pub use connection::{
    ConnectionBuilder, ConnectionClient, ConnectionId, ConnectionObserver, ConnectionState,
    Connector, MemoryConnector, MemoryPeer, PendingRequests, StreamSender, WebSocketConnector,
};

pub use dialogue::{DialogueOrchestrator, RequireOptions};

pub use entities::{EntityNormalizer, EntityResolver};

pub use error::{DialogError, DialogResult};

pub use handlers::{
    HandlerId, HandlerOutput, IntentHandler, QuestionHandler, intent_fn, question_fn,
};

pub use host::{IntentReply, SkillHost};

pub use routing::{DispatchResult, Highway, IntentRouter, RoutePattern};

pub use tasks::{TaskId, TaskScheduler};

pub use value_objects::{
    CardResponse, ClassifiedUtterance, IntentResponse, Message, NluPayload,
    ResolvedIntentResponse, Slot, SpeechResponse, TextResponse,
};
