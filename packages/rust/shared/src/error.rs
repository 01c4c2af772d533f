//! Error types for ContentForge.
//!
//! Library crates use [`ContentForgeError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::Partition;

/// Top-level error type for all ContentForge operations.
#[derive(Debug, thiserror::Error)]
pub enum ContentForgeError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// A partition the caller marked as required holds no entries.
    #[error("knowledge unavailable: required {partition} partition is empty")]
    KnowledgeUnavailable { partition: Partition },

    /// Every required partition is empty; nothing to ground content on.
    #[error("insufficient knowledge: all required partitions are empty")]
    InsufficientKnowledge,

    /// No template is registered under the requested id.
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    /// A declared placeholder has no variable and no knowledge binding.
    #[error("missing variable: {0}")]
    MissingVariable(String),

    /// A variable was supplied that the template does not declare.
    #[error("unknown variable: {0}")]
    UnknownVariable(String),

    /// The generation provider failed.
    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// The Brief stage could not produce a parseable brief.
    #[error("brief generation failed: {0}")]
    BriefGenerationFailed(String),

    /// Every attempt failed evaluation.
    #[error("quality threshold not met after {attempts} attempts (best score {best_score:.2})")]
    QualityThresholdNotMet { attempts: u32, best_score: f64 },

    /// The run exceeded its time budget.
    #[error("run timed out after {0:?}")]
    RunTimeout(Duration),

    /// Structured content could not be parsed.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error or violated internal contract.
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ContentForgeError>;

impl ContentForgeError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Assembly errors are configuration defects: retrying cannot fix them.
    pub fn is_assembly_error(&self) -> bool {
        matches!(
            self,
            Self::TemplateNotFound(_) | Self::MissingVariable(_) | Self::UnknownVariable(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Generation errors
// ---------------------------------------------------------------------------

/// Failure categories reported by the generation boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum GenerationErrorKind {
    /// Provider asked us to slow down. Retryable with backoff.
    RateLimited {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_after: Option<Duration>,
    },
    /// Request did not complete in time. Retryable.
    Timeout,
    /// Malformed or empty output. Retryable once.
    InvalidResponse,
    /// Credentials rejected. Fatal to the run.
    AuthFailure,
}

impl GenerationErrorKind {
    /// Short stable name for logs and status output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::Timeout => "timeout",
            Self::InvalidResponse => "invalid_response",
            Self::AuthFailure => "auth_failure",
        }
    }

    /// Whether exponential backoff applies.
    pub fn is_backoff_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Timeout)
    }
}

/// Error returned by a generation provider or the gateway.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("generation error ({}): {message}", kind.as_str())]
pub struct GenerationError {
    pub kind: GenerationErrorKind,
    pub message: String,
}

impl GenerationError {
    pub fn new(kind: GenerationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn rate_limited(retry_after: Option<Duration>, message: impl Into<String>) -> Self {
        Self::new(GenerationErrorKind::RateLimited { retry_after }, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(GenerationErrorKind::Timeout, message)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(GenerationErrorKind::InvalidResponse, message)
    }

    pub fn auth_failure(message: impl Into<String>) -> Self {
        Self::new(GenerationErrorKind::AuthFailure, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = ContentForgeError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = ContentForgeError::MissingVariable("topic".into());
        assert_eq!(err.to_string(), "missing variable: topic");

        let err = ContentForgeError::KnowledgeUnavailable {
            partition: Partition::Secondary,
        };
        assert!(err.to_string().contains("secondary"));
    }

    #[test]
    fn generation_error_wraps_transparently() {
        let err: ContentForgeError = GenerationError::auth_failure("bad key").into();
        assert_eq!(err.to_string(), "generation error (auth_failure): bad key");
    }

    #[test]
    fn assembly_errors_are_classified() {
        assert!(ContentForgeError::TemplateNotFound("x".into()).is_assembly_error());
        assert!(ContentForgeError::MissingVariable("x".into()).is_assembly_error());
        assert!(!ContentForgeError::InsufficientKnowledge.is_assembly_error());
    }

    #[test]
    fn only_rate_limit_and_timeout_back_off() {
        assert!(GenerationErrorKind::Timeout.is_backoff_retryable());
        assert!(GenerationErrorKind::RateLimited { retry_after: None }.is_backoff_retryable());
        assert!(!GenerationErrorKind::InvalidResponse.is_backoff_retryable());
        assert!(!GenerationErrorKind::AuthFailure.is_backoff_retryable());
    }
}
