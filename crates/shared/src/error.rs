use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Transport,
    Protocol,
    Internal,
}

/// Serializable error shape the channel may deliver alongside verdicts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelError {
    pub code: ErrorCode,
    pub message: String,
}

impl ChannelError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
#[error("{code:?}: {message}")]
pub struct ChannelException {
    pub code: ErrorCode,
    pub message: String,
}

impl ChannelException {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<ChannelException> for ChannelError {
    fn from(value: ChannelException) -> Self {
        Self {
            code: value.code,
            message: value.message,
        }
    }
}
