//! Value objects for the skill dialog domain
//!
//! - [`ClassifiedUtterance`] and [`Slot`]: what the NLU service understood
//! - [`Message`]: the flat wire envelope exchanged with the device server
//! - [`IntentResponse`] and friends: what a skill answers with

pub mod message;
pub mod response;
pub mod utterance;

pub use message::Message;
pub use response::{
    CardResponse, IntentResponse, ResolvedIntentResponse, SpeechResponse, TextResponse,
};
pub use utterance::{ClassifiedUtterance, NluIntent, NluPayload, NluSlot, Slot, SlotRange, SlotValue};
