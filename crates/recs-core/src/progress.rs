//! Progress events pushed by the generation stream.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RecsError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Queued,
    Processing,
    Complete,
    Error,
}

/// One message of the progress stream.
///
/// Events are applied in transport order. `progress` is not guaranteed to
/// increase: a stage may be reported more than once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(default)]
    pub stage: String,
    #[serde(default)]
    pub progress: u8,
    pub status: ProgressStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressEvent {
    /// Decodes one raw stream message.
    ///
    /// Rejects anything that is not valid JSON, a progress above 100, a
    /// `complete` without a result and an `error` without a message.
    pub fn parse(raw: &str) -> Result<Self> {
        let event: ProgressEvent = serde_json::from_str(raw.trim())
            .map_err(|e| RecsError::parse(format!("invalid progress message: {e}")))?;

        if event.progress > 100 {
            return Err(RecsError::parse(format!(
                "progress {} is outside 0..=100",
                event.progress
            )));
        }

        match event.status {
            ProgressStatus::Complete if event.result.as_ref().is_none_or(Value::is_null) => {
                Err(RecsError::parse("complete event without a result"))
            }
            ProgressStatus::Error
                if event.error.as_deref().is_none_or(|m| m.trim().is_empty()) =>
            {
                Err(RecsError::parse("error event without a message"))
            }
            _ => Ok(event),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, ProgressStatus::Complete | ProgressStatus::Error)
    }

    /// Deserializes the `result` of a `complete` event into the expected type.
    pub fn decode_result<T: DeserializeOwned>(&self) -> Result<T> {
        let value = self
            .result
            .clone()
            .ok_or_else(|| RecsError::parse("event carries no result"))?;
        serde_json::from_value(value)
            .map_err(|e| RecsError::parse(format!("unexpected result shape: {e}")))
    }

    /// The error message of an `error` event.
    pub fn error_message(&self) -> &str {
        self.error.as_deref().unwrap_or("generation failed")
    }
}
