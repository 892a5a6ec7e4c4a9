//! Error types for the outreach pipeline.
//!
//! Library crates use [`OutreachError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! The pipeline-facing variants form a small taxonomy:
//! - [`OutreachError::Validation`]: a step precondition failed before any
//!   I/O; never retried, always fatal to the job.
//! - [`OutreachError::ExternalApi`]: a transient external-call failure.
//!   Nothing above the individual provider client retries these.
//! - [`OutreachError::StepExecution`]: any other failure inside a required
//!   step, carrying the step name and the original message.
//! - [`OutreachError::Cancelled`]: the job was cancelled between steps.
//! - [`OutreachError::Internal`]: a contract violation inside the runner
//!   itself (e.g., the final step finished without producing an artifact).

use std::path::PathBuf;

/// Top-level error type for all outreach operations.
#[derive(Debug, thiserror::Error)]
pub enum OutreachError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while fetching a source page.
    #[error("network error: {0}")]
    Network(String),

    /// Template or response parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Synthesis provider error (request build, API, or response decode).
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A step's input validation failed. Halts the run before the step does
    /// any work; no timing is recorded for the step.
    #[error("validation failed in step '{step}': {reason}")]
    Validation { step: String, reason: String },

    /// An external provider call failed (search, citation lookup, synthesis).
    #[error("external API error: {0}")]
    ExternalApi(String),

    /// A required step failed during execution.
    #[error("step '{step}' failed: {message}")]
    StepExecution { step: String, message: String },

    /// The job was cancelled before completing.
    #[error("job cancelled")]
    Cancelled,

    /// Internal contract violation (runner finished in an impossible state).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, OutreachError>;

impl OutreachError {
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

    /// Create a validation error for a named step.
    pub fn validation(step: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            step: step.into(),
            reason: reason.into(),
        }
    }

    /// Create a step-execution error for a named step.
    pub fn step(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StepExecution {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Stable machine-readable class name, exposed in polled status payloads.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config_error",
            Self::Network(_) => "network_error",
            Self::Parse { .. } => "parse_error",
            Self::Storage(_) => "storage_error",
            Self::Synthesis(_) => "synthesis_error",
            Self::Io { .. } => "io_error",
            Self::Validation { .. } => "validation_error",
            Self::ExternalApi(_) => "external_api_error",
            Self::StepExecution { .. } => "step_execution_error",
            Self::Cancelled => "cancelled",
            Self::Internal(_) => "internal_error",
        }
    }

    /// The step a pipeline failure is attributed to, when known.
    pub fn failed_step(&self) -> Option<&str> {
        match self {
            Self::Validation { step, .. } | Self::StepExecution { step, .. } => Some(step),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = OutreachError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = OutreachError::validation("template_parser", "template_text is empty");
        assert!(err.to_string().contains("template_parser"));
        assert!(err.to_string().contains("template_text is empty"));
    }

    #[test]
    fn error_type_is_stable() {
        assert_eq!(
            OutreachError::validation("s", "r").error_type(),
            "validation_error"
        );
        assert_eq!(
            OutreachError::ExternalApi("timeout".into()).error_type(),
            "external_api_error"
        );
        assert_eq!(OutreachError::Cancelled.error_type(), "cancelled");
    }

    #[test]
    fn failed_step_attribution() {
        assert_eq!(
            OutreachError::step("fact_gatherer", "boom").failed_step(),
            Some("fact_gatherer")
        );
        assert_eq!(OutreachError::Network("x".into()).failed_step(), None);
    }
}
