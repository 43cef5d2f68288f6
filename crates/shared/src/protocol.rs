use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// Outbound frames on the form validation channel.
///
/// `Validate` carries a full snapshot of the form's current values keyed by
/// input name, not a diff and not a single field. There is no per-request
/// correlation token; the server replies with a whole-form verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    Validate { fields: BTreeMap<String, String> },
}

/// Whole-form verdict delivered asynchronously by the channel.
///
/// Wire keys are camelCase (`baseErrors` / `modelErrors`) for compatibility
/// with the channel's JSON payloads. `model_errors` may omit keys for valid
/// fields; both collections default to empty when absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOutcome {
    /// Form-level errors not attributable to a single field.
    #[serde(default)]
    pub base_errors: Vec<String>,
    /// Per-attribute error messages, keyed by logical attribute name.
    #[serde(default)]
    pub model_errors: HashMap<String, Vec<String>>,
}

impl ValidationOutcome {
    /// A verdict with no errors of any kind.
    pub fn clean() -> Self {
        Self::default()
    }

    pub fn is_clean(&self) -> bool {
        self.base_errors.is_empty() && self.model_errors.is_empty()
    }
}
