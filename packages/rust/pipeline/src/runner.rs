//! Sequences steps over a [`StepContext`], enforcing the validate→execute
//! contract, timing each step, and reporting progress to an observer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use outreach_shared::{ArtifactId, OutreachError, Result, StepTiming};

use crate::context::StepContext;
use crate::step::PipelineStep;

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Observer of forward progress, typically a status-store bridge.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    /// A step is about to execute.
    async fn step_started(&self, step: &str);

    /// A step's execute returned; `timings` is the cumulative list so far.
    async fn step_completed(&self, step: &str, timings: &[StepTiming]);
}

/// No-op reporter for tests and fire-and-forget runs.
pub struct SilentProgress;

#[async_trait]
impl ProgressReporter for SilentProgress {
    async fn step_started(&self, _step: &str) {}
    async fn step_completed(&self, _step: &str, _timings: &[StepTiming]) {}
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Best-effort cancellation signal, checked between steps. An in-flight step
/// completes before the signal is observed.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Runs a fixed sequence of steps to terminal success or failure.
pub struct PipelineRunner {
    steps: Vec<Box<dyn PipelineStep>>,
}

impl PipelineRunner {
    pub fn new(steps: Vec<Box<dyn PipelineStep>>) -> Self {
        Self { steps }
    }

    /// Execute all steps in order.
    ///
    /// Per step: `validate` halts the run without recording a timing; a
    /// timing is appended only when `execute` returns a result. A required
    /// step failing halts the run; an optional step failing is downgraded to
    /// a warning. After the last step the context must hold a non-empty
    /// `final_output` and an `artifact_id`, or the run is an internal error.
    #[instrument(skip_all, fields(job_id = %ctx.job_id))]
    pub async fn run(
        &self,
        ctx: &mut StepContext,
        progress: &dyn ProgressReporter,
        cancel: &CancelFlag,
    ) -> Result<ArtifactId> {
        for step in &self.steps {
            if cancel.is_cancelled() {
                info!(step = step.name(), "cancellation observed between steps");
                return Err(OutreachError::Cancelled);
            }

            if let Some(reason) = step.validate(ctx) {
                return Err(OutreachError::validation(step.name(), reason));
            }

            progress.step_started(step.name()).await;
            info!(step = step.name(), "step started");

            let start = Instant::now();
            let outcome = step.execute(ctx).await;
            match outcome {
                Ok(result) => {
                    ctx.add_timing(step.name(), start.elapsed().as_millis() as u64);
                    for warning in &result.warnings {
                        ctx.add_warning(step.name(), warning);
                    }

                    if !result.success {
                        let message = result
                            .error
                            .unwrap_or_else(|| "step reported failure without a reason".into());
                        if step.required() {
                            return Err(OutreachError::step(step.name(), message));
                        }
                        warn!(step = step.name(), %message, "optional step failed, continuing");
                        ctx.add_warning(step.name(), &message);
                    }
                }
                Err(e) => {
                    if !step.required() {
                        warn!(step = step.name(), error = %e, "optional step errored, continuing");
                        ctx.add_warning(step.name(), e.to_string());
                        progress.step_completed(step.name(), &ctx.step_timings).await;
                        continue;
                    }
                    // Typed pipeline errors pass through; anything else is
                    // wrapped with the step it happened in.
                    return Err(match e {
                        OutreachError::Validation { .. }
                        | OutreachError::StepExecution { .. }
                        | OutreachError::ExternalApi(_)
                        | OutreachError::Cancelled => e,
                        other => OutreachError::step(step.name(), other.to_string()),
                    });
                }
            }

            progress.step_completed(step.name(), &ctx.step_timings).await;
            info!(step = step.name(), "step completed");
        }

        // Terminal contract: the last step must have produced the output
        // and stored the artifact.
        if ctx.final_output.is_empty() {
            return Err(OutreachError::Internal(
                "pipeline finished without a final output".into(),
            ));
        }
        match &ctx.artifact_id {
            Some(artifact_id) => {
                info!(artifact_id = %artifact_id, total_ms = ctx.elapsed_ms(), "pipeline completed");
                Ok(artifact_id.clone())
            }
            None => Err(OutreachError::Internal(
                "pipeline finished without storing an artifact".into(),
            )),
        }
    }
}
