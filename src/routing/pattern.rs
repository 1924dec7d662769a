//! Skill and intent patterns used to match handler registrations

use serde::{Deserialize, Serialize};

/// Wildcard accepted in place of a skill or intent name
pub const WILDCARD: &str = "*";

/// A literal skill/intent name or the `*` wildcard
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoutePattern {
    /// Matches anything, including an unclassified utterance
    Any,
    /// Matches exactly this name
    Exact(String),
}

impl RoutePattern {
    /// Whether the pattern accepts the given name
    ///
    /// A literal never matches an absent name.
    pub fn matches(&self, name: Option<&str>) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(expected) => name == Some(expected.as_str()),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Self::Any)
    }
}

impl From<&str> for RoutePattern {
    fn from(pattern: &str) -> Self {
        if pattern == WILDCARD {
            Self::Any
        } else {
            Self::Exact(pattern.to_string())
        }
    }
}

impl From<String> for RoutePattern {
    fn from(pattern: String) -> Self {
        if pattern == WILDCARD {
            Self::Any
        } else {
            Self::Exact(pattern)
        }
    }
}

impl std::fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Any => f.write_str(WILDCARD),
            Self::Exact(name) => f.write_str(name),
        }
    }
}
