//! Step 1: parse the template, infer its kind, derive search terms.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use outreach_shared::{Result, TemplateKind};

use crate::context::StepContext;
use crate::step::{PipelineStep, StepResult};

pub const STEP_NAME: &str = "template_parser";

/// Acceptable template length bounds, in characters.
const MIN_TEMPLATE_LEN: usize = 20;
const MAX_TEMPLATE_LEN: usize = 5_000;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([a-zA-Z_][a-zA-Z0-9_]*)\s*\}\}").unwrap());

/// Parses the template and derives the search terms the gather step runs.
/// Owns `ctx.search_terms` and may infer `ctx.inputs.template_kind`.
pub struct TemplateParseStep;

#[async_trait]
impl PipelineStep for TemplateParseStep {
    fn name(&self) -> &'static str {
        STEP_NAME
    }

    fn validate(&self, ctx: &StepContext) -> Option<String> {
        let template = ctx.inputs.template_text.trim();
        if template.is_empty() {
            return Some("template_text is empty".into());
        }
        if template.len() < MIN_TEMPLATE_LEN {
            return Some(format!(
                "template_text is too short ({} chars, minimum {MIN_TEMPLATE_LEN})",
                template.len()
            ));
        }
        if template.len() > MAX_TEMPLATE_LEN {
            return Some(format!(
                "template_text is too long ({} chars, maximum {MAX_TEMPLATE_LEN})",
                template.len()
            ));
        }
        if ctx.inputs.recipient_name.trim().is_empty() {
            return Some("recipient_name is empty".into());
        }
        if ctx.inputs.recipient_interest.trim().is_empty() {
            return Some("recipient_interest is empty".into());
        }
        None
    }

    async fn execute(&self, ctx: &mut StepContext) -> Result<StepResult> {
        let placeholders = extract_placeholders(&ctx.inputs.template_text);

        let kind = match ctx.inputs.template_kind {
            Some(kind) => kind,
            None => {
                let inferred = infer_kind(&ctx.inputs.template_text, &placeholders);
                ctx.inputs.template_kind = Some(inferred);
                inferred
            }
        };

        ctx.search_terms = derive_search_terms(
            &ctx.inputs.recipient_name,
            &ctx.inputs.recipient_interest,
            kind,
        );

        debug!(
            kind = %kind,
            placeholders = placeholders.len(),
            terms = ctx.search_terms.len(),
            "template parsed"
        );

        Ok(StepResult::ok()
            .with_metadata("placeholder_count", placeholders.len())
            .with_metadata("template_kind", kind.as_str()))
    }
}

/// Placeholder names in appearance order, de-duplicated.
fn extract_placeholders(template: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    PLACEHOLDER
        .captures_iter(template)
        .map(|c| c[1].to_string())
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

/// Heuristic template-kind inference from wording and placeholders.
fn infer_kind(template: &str, placeholders: &[String]) -> TemplateKind {
    let lowered = template.to_lowercase();
    let has = |needle: &str| {
        lowered.contains(needle) || placeholders.iter().any(|p| p.to_lowercase().contains(needle))
    };

    if has("research") || has("paper") || has("publication") || has("citation") {
        TemplateKind::Research
    } else if has("book") || has("author") || has("chapter") {
        TemplateKind::Book
    } else {
        TemplateKind::General
    }
}

/// Deterministic search terms for the gather step, ordered general→specific.
fn derive_search_terms(name: &str, interest: &str, kind: TemplateKind) -> Vec<String> {
    let name = name.trim();
    let interest = interest.trim();
    let kind_term = match kind {
        TemplateKind::Research => format!("{name} recent publications"),
        TemplateKind::Book => format!("{name} books"),
        TemplateKind::General => format!("{name} background"),
    };
    vec![name.to_string(), format!("{name} {interest}"), kind_term]
}
