//! The per-step contract the runner enforces.

use async_trait::async_trait;
use serde_json::Value;

use outreach_shared::Result;

use crate::context::StepContext;

/// One named unit of the fixed pipeline.
///
/// `validate` is a pure precondition check over the context — it must not
/// mutate anything and must not perform I/O. `execute` may perform I/O and
/// writes exactly the context fields this step owns.
///
/// A step marked `required() == false` soft-degrades: an internal failure is
/// converted (inside the step or by the runner) into a successful-but-empty
/// result with a warning, never halting the pipeline.
#[async_trait]
pub trait PipelineStep: Send + Sync {
    /// Stable step name, used in timings, status payloads, and errors.
    fn name(&self) -> &'static str;

    /// Whether a failure in this step halts the run.
    fn required(&self) -> bool {
        true
    }

    /// Precondition check; returns a human-readable reason on failure.
    fn validate(&self, ctx: &StepContext) -> Option<String>;

    /// Do the step's work, writing its owned context fields.
    async fn execute(&self, ctx: &mut StepContext) -> Result<StepResult>;
}

/// Transient outcome of one step invocation, consumed by the runner.
#[derive(Debug, Default)]
pub struct StepResult {
    pub success: bool,
    /// Failure reason; present whenever `success` is false.
    pub error: Option<String>,
    /// Non-fatal issues the runner copies into the context.
    pub warnings: Vec<String>,
    /// Step-specific observability data (counts, flags).
    pub metadata: serde_json::Map<String, Value>,
}

impl StepResult {
    /// A successful result with no warnings.
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    /// A failed result with a reason.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_builders() {
        let ok = StepResult::ok()
            .with_warning("degraded")
            .with_metadata("skipped", true);
        assert!(ok.success);
        assert_eq!(ok.warnings, vec!["degraded"]);
        assert_eq!(ok.metadata["skipped"], true);

        let failed = StepResult::failed("no sources");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("no sources"));
    }
}
