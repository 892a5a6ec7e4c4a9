//! Per-job accumulator threaded through the step sequence.

use std::time::Instant;

use outreach_shared::{ArtifactId, Citation, JobId, JobInputs, StepTiming};

/// Mutable record carrying all accumulated data for one job.
///
/// Each intermediate field is written by exactly one step and read only by
/// later steps; the context is owned by the single worker executing the job,
/// so no locking is involved.
#[derive(Debug)]
pub struct StepContext {
    /// Job identity, immutable after creation.
    pub job_id: JobId,
    /// Requester identity, immutable after creation.
    pub owner_id: String,
    /// Caller-supplied inputs. Read-only, except `template_kind` may be
    /// inferred by the parse step when unset.
    pub inputs: JobInputs,

    /// Search queries derived from the inputs. Written by `template_parser`.
    pub search_terms: Vec<String>,
    /// Condensed fact digest. Written by `fact_gatherer`.
    pub gathered_facts: String,
    /// URLs of the source pages that contributed to `gathered_facts`.
    pub fact_sources: Vec<String>,
    /// Citable works for the recipient. Written by `citation_enricher`;
    /// stays empty when that step is skipped.
    pub citations: Vec<Citation>,

    /// The composed message. Written only by `message_composer`.
    pub final_output: String,
    /// Whether the composer's draft passed local validation.
    pub is_confident: bool,

    /// Per-step durations, appended in execution order.
    pub step_timings: Vec<StepTiming>,
    /// Non-fatal issues collected across steps, prefixed with the step name.
    pub errors: Vec<String>,
    /// Durable handle to the result; set only on terminal success.
    pub artifact_id: Option<ArtifactId>,

    /// When the run started, for total-duration reporting.
    pub started_at: Instant,
}

impl StepContext {
    pub fn new(job_id: JobId, owner_id: impl Into<String>, inputs: JobInputs) -> Self {
        Self {
            job_id,
            owner_id: owner_id.into(),
            inputs,
            search_terms: Vec::new(),
            gathered_facts: String::new(),
            fact_sources: Vec::new(),
            citations: Vec::new(),
            final_output: String::new(),
            is_confident: false,
            step_timings: Vec::new(),
            errors: Vec::new(),
            artifact_id: None,
            started_at: Instant::now(),
        }
    }

    /// Append a step timing in execution order.
    pub fn add_timing(&mut self, step: &str, duration_ms: u64) {
        self.step_timings.push(StepTiming {
            step: step.to_string(),
            duration_ms,
        });
    }

    /// Record a non-fatal issue attributed to a step.
    pub fn add_warning(&mut self, step: &str, message: impl AsRef<str>) {
        self.errors.push(format!("{step}: {}", message.as_ref()));
    }

    /// Total wall-clock time since the run started, in milliseconds.
    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }
}
