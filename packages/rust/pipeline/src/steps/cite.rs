//! Step 3 (optional): look up citable works for research templates.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use tracing::{debug, info, warn};

use outreach_providers::{CitationProvider, merge_citations, rank_citations};
use outreach_shared::{Citation, CitationsConfig, Result, TemplateKind};

use crate::context::StepContext;
use crate::step::{PipelineStep, StepResult};

pub const STEP_NAME: &str = "citation_enricher";

/// Enriches research outreach with citable works. Owns `ctx.citations`.
///
/// Only runs for `research` templates; other kinds are skipped with a
/// metadata flag. Two sub-queries run concurrently — one scoped to the
/// recipient's name, one to their stated interest — and their results are
/// merged by URL with the interest query winning collisions. Any provider
/// failure soft-degrades: the step still succeeds with whatever was found.
pub struct CitationEnrichStep {
    provider: Arc<dyn CitationProvider>,
    config: CitationsConfig,
}

impl CitationEnrichStep {
    pub fn new(provider: Arc<dyn CitationProvider>, config: CitationsConfig) -> Self {
        Self { provider, config }
    }
}

#[async_trait]
impl PipelineStep for CitationEnrichStep {
    fn name(&self) -> &'static str {
        STEP_NAME
    }

    fn required(&self) -> bool {
        false
    }

    fn validate(&self, ctx: &StepContext) -> Option<String> {
        if ctx.inputs.template_kind.is_none() {
            return Some("template_kind has not been determined yet".into());
        }
        None
    }

    async fn execute(&self, ctx: &mut StepContext) -> Result<StepResult> {
        if ctx.inputs.template_kind != Some(TemplateKind::Research) {
            debug!(kind = ?ctx.inputs.template_kind, "non-research template, skipping");
            return Ok(StepResult::ok().with_metadata("skipped", true));
        }

        let name = ctx.inputs.recipient_name.trim();
        let interest = ctx.inputs.recipient_interest.trim();
        let author_query = format!("{name} publications");
        let interest_query = format!("{name} {interest}");

        let (author_result, interest_result) = tokio::join!(
            self.provider.lookup(&author_query, self.config.max_fetch),
            self.provider.lookup(&interest_query, self.config.max_fetch),
        );

        let mut result = StepResult::ok().with_metadata("skipped", false);

        let author_list = unwrap_lookup(author_result, "author query", &mut result);
        let interest_list = unwrap_lookup(interest_result, "interest query", &mut result);

        if author_list.is_empty() && interest_list.is_empty() && !result.warnings.is_empty() {
            // Both lookups failed; soft-degrade with empty citations.
            warn!("citation lookup fully degraded");
            ctx.citations = Vec::new();
            return Ok(result.with_metadata("citation_count", 0));
        }

        let merged = merge_citations(author_list, interest_list);
        let current_year = Utc::now().year();
        ctx.citations = rank_citations(
            merged,
            interest,
            current_year,
            self.config.top_n as usize,
        );

        info!(citations = ctx.citations.len(), "citation enrichment finished");
        let count = ctx.citations.len();
        Ok(result.with_metadata("citation_count", count))
    }
}

/// Turn one sub-query outcome into a list, downgrading failure to a warning.
fn unwrap_lookup(
    outcome: Result<Vec<Citation>>,
    label: &str,
    result: &mut StepResult,
) -> Vec<Citation> {
    match outcome {
        Ok(citations) => citations,
        Err(e) => {
            warn!(query = label, error = %e, "citation sub-query failed");
            result.warnings.push(format!("{label} failed: {e}"));
            Vec::new()
        }
    }
}
