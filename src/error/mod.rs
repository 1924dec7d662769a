//! Error types for the skill dialog SDK
//!
//! Transport and parse failures never reach `request` callers; they are
//! logged at the connection boundary. The variants below surface only where
//! a caller explicitly asked for a result (`call`, configuration loading) or
//! where failures are collected for inspection (dispatch results).

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the SDK
#[derive(Debug, Error)]
pub enum DialogError {
    /// The transport could not be opened or dropped unexpectedly
    #[error("transport failure on {url}: {message}")]
    Transport {
        /// Address the connector tried to reach
        url: String,
        /// Human-readable failure description
        message: String,
    },

    /// A response was awaited on a connection that is not open
    #[error("connection is not open, cannot call '{endpoint}'")]
    NotConnected {
        /// Endpoint of the rejected call
        endpoint: String,
    },

    /// No response arrived within the configured timeout
    #[error("call to '{endpoint}' timed out after {timeout_ms}ms")]
    Timeout {
        /// Endpoint of the call
        endpoint: String,
        /// Timeout that elapsed
        timeout_ms: u64,
    },

    /// The pending request was dropped because its connection went away
    #[error("request {request_id} was abandoned by its connection")]
    Abandoned {
        /// Correlation id of the abandoned request
        request_id: String,
    },

    /// An inbound payload was not JSON or lacked required fields
    #[error("malformed message: {message}")]
    MalformedMessage {
        /// Description of what was wrong
        message: String,
        /// Underlying JSON error, when there is one
        #[source]
        source: Option<serde_json::Error>,
    },

    /// Skill code failed while handling an utterance
    #[error("handler for {route} failed: {message}")]
    Handler {
        /// `Skill$Intent` route (or pattern) of the failing handler
        route: String,
        /// Failure description, including the cause chain
        message: String,
    },

    /// No handler is registered for the utterance's skill and intent
    #[error("no endpoint registered for {route}")]
    NoEndpoint {
        /// `Skill$Intent` route of the utterance
        route: String,
    },

    /// Configuration could not be parsed or is invalid
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the problem
        message: String,
    },

    /// Reading a configuration file failed
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that was read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl DialogError {
    /// Build a `MalformedMessage` from a JSON error
    pub fn malformed(error: serde_json::Error) -> Self {
        Self::MalformedMessage {
            message: error.to_string(),
            source: Some(error),
        }
    }

    /// Build a `Handler` error from skill code's `anyhow` failure
    pub fn handler(route: impl Into<String>, error: &anyhow::Error) -> Self {
        Self::Handler {
            route: route.into(),
            message: format!("{error:#}"),
        }
    }
}

/// Result alias used throughout the crate
pub type DialogResult<T> = Result<T, DialogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_error_keeps_cause_chain() {
        let cause = anyhow::anyhow!("city lookup failed").context("weather api");
        let error = DialogError::handler("Weather$getWeather", &cause);

        let rendered = error.to_string();
        assert!(rendered.contains("Weather$getWeather"));
        assert!(rendered.contains("weather api"));
        assert!(rendered.contains("city lookup failed"));
    }

    #[test]
    fn test_malformed_from_json_error() {
        let json_error = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let error = DialogError::malformed(json_error);

        assert!(matches!(error, DialogError::MalformedMessage { source: Some(_), .. }));
    }
}
