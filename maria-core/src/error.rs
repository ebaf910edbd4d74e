// ABOUTME: Typed errors raised at the router boundary and the fixed error-tag taxonomy.
// ABOUTME: Adapters map platform failures onto ErrorTag with substring rules.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised synchronously by the router and adapter construction
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MessagingError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Platform '{platform}' is not supported. Supported platforms: {}", list_or_none(.supported))]
    UnsupportedPlatform {
        platform: String,
        supported: Vec<String>,
    },

    #[error("Capability '{capability}' is not supported by platform '{platform}'")]
    UnsupportedCapability {
        platform: String,
        capability: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl MessagingError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// True for every error caused by malformed caller input
    pub fn is_validation(&self) -> bool {
        !matches!(self, Self::Configuration(_))
    }
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

/// Normalized failure category carried by a failed dispatch
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorTag {
    Validation,
    TargetNotFound,
    PermissionDenied,
    RateLimited,
    PayloadTooLarge,
    Timeout,
    Unknown,
}

impl ErrorTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::TargetNotFound => "target_not_found",
            Self::PermissionDenied => "permission_denied",
            Self::RateLimited => "rate_limited",
            Self::PayloadTooLarge => "payload_too_large",
            Self::Timeout => "timeout",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Match an error against `(needle, tag)` rules, case-insensitively.
///
/// The whole `anyhow` chain is searched; the first rule that matches wins.
pub fn classify_by_rules(error: &anyhow::Error, rules: &[(&str, ErrorTag)]) -> ErrorTag {
    let text = format!("{:#}", error).to_lowercase();
    rules
        .iter()
        .find(|(needle, _)| text.contains(needle))
        .map(|(_, tag)| *tag)
        .unwrap_or(ErrorTag::Unknown)
}
