//! Error types shared by the registry and the bridge.

use std::net::SocketAddr;

use thiserror::Error;

/// Why a skill invocation did not produce a result.
///
/// Every variant maps onto one HTTP status and one `type` string in the
/// response body, so a failure observed on the execution thread is always
/// answered with a structured payload.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SkillError {
    #[error("Skill '{name}' not found")]
    NotFound { name: String, available: Vec<String> },

    #[error("{reason}")]
    ArgumentBinding { parameter: Option<String>, reason: String },

    #[error("{message}")]
    Failed { category: String, message: String },
}

impl SkillError {
    pub fn missing(parameter: &str) -> Self {
        Self::ArgumentBinding {
            parameter: Some(parameter.to_string()),
            reason: format!("Missing required parameter: {parameter}"),
        }
    }

    pub fn untypeable(parameter: &str, expected: &str) -> Self {
        Self::ArgumentBinding {
            parameter: Some(parameter.to_string()),
            reason: format!("Parameter '{parameter}' cannot be converted to {expected}"),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::ArgumentBinding {
            parameter: None,
            reason: reason.into(),
        }
    }

    /// HTTP status used when this error reaches the wire.
    pub fn status_code(&self) -> u16 {
        match self {
            SkillError::NotFound { .. } => 404,
            SkillError::ArgumentBinding { .. } => 400,
            SkillError::Failed { .. } => 500,
        }
    }

    /// Value of the `type` field in the error payload.
    pub fn kind(&self) -> &str {
        match self {
            SkillError::NotFound { .. } => "OperationNotFound",
            SkillError::ArgumentBinding { .. } => "ArgumentBinding",
            SkillError::Failed { category, .. } => category,
        }
    }
}

/// A failure raised by a skill body that wants its own category on the wire.
///
/// Return it through `anyhow` (`Err(SkillFailure::new(..).into())`); the
/// registry downcasts it. Any other error is reported as `OperationFailed`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct SkillFailure {
    pub category: String,
    pub message: String,
}

impl SkillFailure {
    pub fn new(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            message: message.into(),
        }
    }
}

/// Errors raised while starting or configuring the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start bridge runtime: {0}")]
    Runtime(#[from] std::io::Error),
}
