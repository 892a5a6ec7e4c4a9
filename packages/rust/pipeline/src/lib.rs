//! Pipeline execution engine: the ordered-step runner, its per-step
//! contract, and the four concrete outreach steps.
//!
//! A job submission creates a [`StepContext`]; a worker builds a
//! [`PipelineRunner`] over the fixed step sequence and calls
//! [`PipelineRunner::run`] with a progress reporter and a cancellation flag.
//! On success the runner returns the durable [`ArtifactId`]; on failure it
//! propagates a typed error carrying the failing step and error class.
//!
//! [`ArtifactId`]: outreach_shared::ArtifactId

pub mod context;
pub mod runner;
pub mod step;
pub mod steps;

pub use context::StepContext;
pub use runner::{CancelFlag, PipelineRunner, ProgressReporter, SilentProgress};
pub use step::{PipelineStep, StepResult};
pub use steps::{CitationEnrichStep, FactGatherStep, MessageComposeStep, TemplateParseStep};
