//! Routing of classified utterances to skill handlers

pub mod highway;
pub mod intent_router;
pub mod pattern;

pub use highway::Highway;
pub use intent_router::{DispatchResult, IntentRouter};
pub use pattern::{RoutePattern, WILDCARD};
