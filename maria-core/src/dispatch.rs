// ABOUTME: Normalized outcome of a router-mediated send, built once at the adapter boundary.
// ABOUTME: Delivered carries the platform's raw response; Failed carries an ErrorTag.

use crate::error::ErrorTag;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Send operation attempted through the router
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    SendText,
    SendAudio,
    SendFile,
    SendImage,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendText => "send_text",
            Self::SendAudio => "send_audio",
            Self::SendFile => "send_file",
            Self::SendImage => "send_image",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Delivered {
        #[serde(default)]
        response: Value,
    },
    Failed {
        error_type: ErrorTag,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchResult {
    pub platform: String,
    pub operation: Operation,
    #[serde(flatten)]
    pub outcome: DispatchOutcome,
}

impl DispatchResult {
    pub fn delivered(platform: impl Into<String>, operation: Operation, response: Value) -> Self {
        Self {
            platform: platform.into(),
            operation,
            outcome: DispatchOutcome::Delivered { response },
        }
    }

    pub fn failed(
        platform: impl Into<String>,
        operation: Operation,
        error_type: ErrorTag,
        message: impl Into<String>,
    ) -> Self {
        Self {
            platform: platform.into(),
            operation,
            outcome: DispatchOutcome::Failed {
                error_type,
                message: message.into(),
            },
        }
    }

    /// Failure detected before any I/O
    pub fn invalid(platform: impl Into<String>, operation: Operation, message: impl Into<String>) -> Self {
        Self::failed(platform, operation, ErrorTag::Validation, message)
    }

    /// Relabel the operation, used when one send is an alias of another
    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operation = operation;
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, DispatchOutcome::Delivered { .. })
    }

    pub fn error_type(&self) -> Option<ErrorTag> {
        match &self.outcome {
            DispatchOutcome::Failed { error_type, .. } => Some(*error_type),
            DispatchOutcome::Delivered { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            DispatchOutcome::Failed { message, .. } => Some(message),
            DispatchOutcome::Delivered { .. } => None,
        }
    }

    pub fn response(&self) -> Option<&Value> {
        match &self.outcome {
            DispatchOutcome::Delivered { response } => Some(response),
            DispatchOutcome::Failed { .. } => None,
        }
    }

    /// Metrics label for this outcome
    pub fn outcome_label(&self) -> &'static str {
        match &self.outcome {
            DispatchOutcome::Delivered { .. } => "delivered",
            DispatchOutcome::Failed { error_type, .. } => error_type.as_str(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_delivered_serializes_flat() {
        let result = DispatchResult::delivered("slack", Operation::SendText, json!({"ts": "1.2"}));
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value,
            json!({
                "platform": "slack",
                "operation": "send_text",
                "status": "delivered",
                "response": {"ts": "1.2"}
            })
        );
        assert!(result.is_success());
        assert_eq!(result.outcome_label(), "delivered");
    }

    #[test]
    fn test_failed_carries_tag_and_message() {
        let result = DispatchResult::failed(
            "telegram",
            Operation::SendFile,
            ErrorTag::PayloadTooLarge,
            "file is too big",
        );
        assert!(!result.is_success());
        assert_eq!(result.error_type(), Some(ErrorTag::PayloadTooLarge));
        assert_eq!(result.error_message(), Some("file is too big"));
        assert!(result.response().is_none());

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["error_type"], "payload_too_large");
    }

    #[test]
    fn test_deserialize_round_trip_keeps_outcome() {
        let raw = json!({
            "platform": "slack",
            "operation": "send_image",
            "status": "failed",
            "error_type": "validation",
            "message": "File data cannot be empty"
        });
        let result: DispatchResult = serde_json::from_value(raw).unwrap();
        assert_eq!(result.operation, Operation::SendImage);
        assert_eq!(result.error_type(), Some(ErrorTag::Validation));
    }

    #[test]
    fn test_with_operation_relabels() {
        let result = DispatchResult::delivered("slack", Operation::SendFile, json!({}))
            .with_operation(Operation::SendImage);
        assert_eq!(result.operation, Operation::SendImage);
    }
}
