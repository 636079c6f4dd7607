// Envelopes exchanged with the background process
// One JSON object per frame, correlated by `id`

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::CorrelationId;

/// UI -> background
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OutgoingEnvelope {
    pub id: CorrelationId,
    pub message: String,
    pub request: Value,
}

/// Background -> UI
///
/// `error` wins over `response` when both are present. A frame with
/// neither is a success carrying `null`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct IncomingEnvelope {
    pub id: CorrelationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ErrorInfo {
    pub message: String,
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl ErrorInfo {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl IncomingEnvelope {
    pub fn response(id: impl Into<CorrelationId>, payload: Value) -> Self {
        Self {
            id: id.into(),
            response: Some(payload),
            error: None,
        }
    }

    pub fn error(id: impl Into<CorrelationId>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            response: None,
            error: Some(ErrorInfo::new(message)),
        }
    }

    /// Split into the success payload or the remote error.
    pub fn into_result(self) -> Result<Value, ErrorInfo> {
        match (self.error, self.response) {
            (Some(error), _) => Err(error),
            (None, Some(payload)) => Ok(payload),
            (None, None) => Ok(Value::Null),
        }
    }
}
