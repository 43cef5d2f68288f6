use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical identifier correlating a field to its error-display slot and to
/// remote error payload keys. Must be unique among fields displaying errors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeName(pub String);

impl AttributeName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AttributeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AttributeName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// How a field is validated. Fixed at initialization from declarative
/// per-field metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldMode {
    /// Validated purely client-side via constraint checks.
    Local,
    /// Additionally participates in server round-trips.
    Remote,
}

/// Authoritative per-field validity driving the aggregate submit gate.
///
/// `Unknown` is the pre-validation state of every field; the gate treats it
/// as not-valid, so an unvalidated form never allows submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Validity {
    Unknown,
    Valid,
    Invalid { message: String },
}

impl Validity {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validity::Valid)
    }

    /// The message currently attached to an invalid field, if any.
    pub fn message(&self) -> Option<&str> {
        match self {
            Validity::Invalid { message } => Some(message),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_and_invalid_are_not_valid() {
        assert!(!Validity::Unknown.is_valid());
        assert!(!Validity::Invalid {
            message: "required".into()
        }
        .is_valid());
        assert!(Validity::Valid.is_valid());
    }

    #[test]
    fn message_is_only_present_for_invalid() {
        assert_eq!(Validity::Unknown.message(), None);
        assert_eq!(Validity::Valid.message(), None);
        assert_eq!(
            Validity::Invalid {
                message: "taken".into()
            }
            .message(),
            Some("taken")
        );
    }
}
