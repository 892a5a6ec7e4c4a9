//! Step 4: compose the final message and persist the artifact.

use std::sync::Arc;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info, warn};

use outreach_providers::{SynthesisRequest, Synthesizer};
use outreach_shared::{OutreachError, Result};
use outreach_storage::Storage;

use crate::context::StepContext;
use crate::step::{PipelineStep, StepResult};

pub const STEP_NAME: &str = "message_composer";

/// Retries after a draft fails local validation.
const MAX_RETRIES: usize = 2;

/// Output budget for the composed message, in characters.
const MESSAGE_MAX_CHARS: usize = 2_000;

/// Minimum plausible message length.
const MIN_DRAFT_LEN: usize = 50;

static LEFTOVER_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*\w+\s*\}\}").unwrap());
static EXCESS_BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

const COMPOSER_SYSTEM: &str = "Write a personalized outreach message by filling in the \
    given template with the provided facts and citations. Resolve every {{placeholder}}, \
    keep the recipient's name, and invent nothing not present in the facts. Return only \
    the message text.";

/// Composes the final message. Owns `ctx.final_output`, `ctx.is_confident`,
/// and `ctx.artifact_id`.
///
/// The draft is validated locally (no unresolved placeholders, recipient
/// name present, non-trivial length) with up to two retries; on exhaustion
/// the last draft is kept with `is_confident = false`.
pub struct MessageComposeStep {
    synthesizer: Arc<dyn Synthesizer>,
    storage: Arc<Storage>,
}

impl MessageComposeStep {
    pub fn new(synthesizer: Arc<dyn Synthesizer>, storage: Arc<Storage>) -> Self {
        Self {
            synthesizer,
            storage,
        }
    }

    fn build_input(&self, ctx: &StepContext) -> String {
        let mut input = format!(
            "Template:\n{}\n\nRecipient: {}\nInterest: {}\n\nFacts:\n{}",
            ctx.inputs.template_text,
            ctx.inputs.recipient_name,
            ctx.inputs.recipient_interest,
            ctx.gathered_facts,
        );

        if !ctx.citations.is_empty() {
            input.push_str("\n\nCitable works:");
            for citation in &ctx.citations {
                let year = citation
                    .year
                    .map(|y| format!(" ({y})"))
                    .unwrap_or_default();
                input.push_str(&format!("\n- {}{year} — {}", citation.title, citation.url));
            }
        }

        input
    }
}

#[async_trait]
impl PipelineStep for MessageComposeStep {
    fn name(&self) -> &'static str {
        STEP_NAME
    }

    fn validate(&self, ctx: &StepContext) -> Option<String> {
        if ctx.gathered_facts.is_empty() {
            return Some("gathered_facts have not been produced yet".into());
        }
        None
    }

    async fn execute(&self, ctx: &mut StepContext) -> Result<StepResult> {
        let base_input = self.build_input(ctx);

        let mut draft = String::new();
        let mut confident = false;
        let mut attempts = 0usize;
        let mut tokens_used = 0u64;
        let mut last_reason = String::new();
        let mut result = StepResult::ok();

        for attempt in 0..=MAX_RETRIES {
            attempts += 1;
            let input = if attempt == 0 {
                base_input.clone()
            } else {
                format!(
                    "{base_input}\n\nThe previous draft was rejected: {last_reason}. \
                     Rewrite the message and fix that."
                )
            };

            let output = match self
                .synthesizer
                .synthesize(SynthesisRequest {
                    system: COMPOSER_SYSTEM.to_string(),
                    input,
                    max_chars: MESSAGE_MAX_CHARS,
                })
                .await
            {
                Ok(output) => output,
                Err(e) if attempt < MAX_RETRIES => {
                    warn!(attempt, error = %e, "composer call failed, retrying");
                    last_reason = "the synthesis call failed".into();
                    continue;
                }
                Err(e) => return Err(e),
            };

            tokens_used += output.tokens_in + output.tokens_out;
            draft = clean_message(&output.text);

            match validate_draft(&draft, &ctx.inputs.recipient_name) {
                None => {
                    confident = true;
                    break;
                }
                Some(reason) => {
                    debug!(attempt, reason = %reason, "draft rejected");
                    last_reason = reason;
                }
            }
        }

        if draft.is_empty() {
            return Err(OutreachError::Synthesis(
                "composer produced an empty draft".into(),
            ));
        }
        if !confident {
            result = result.with_warning(format!(
                "draft failed local validation after {attempts} attempts: {last_reason}"
            ));
        }

        ctx.final_output = draft;
        ctx.is_confident = confident;

        let metadata = serde_json::json!({
            "template_kind": ctx.inputs.template_kind.map(|k| k.as_str()),
            "step_timings": ctx.step_timings,
            "warnings": ctx.errors,
            "fact_sources": ctx.fact_sources,
            "citation_count": ctx.citations.len(),
            "attempts": attempts,
            "tokens_used": tokens_used,
            "is_confident": confident,
        });

        let artifact_id = self
            .storage
            .insert_artifact(
                &ctx.job_id,
                &ctx.owner_id,
                &ctx.final_output,
                &ctx.inputs,
                &metadata,
            )
            .await?;
        ctx.artifact_id = Some(artifact_id.clone());

        info!(
            artifact_id = %artifact_id,
            attempts,
            confident,
            "message composed and stored"
        );

        Ok(result
            .with_metadata("attempts", attempts)
            .with_metadata("tokens_used", tokens_used)
            .with_metadata("is_confident", confident))
    }
}

/// Local draft validation; returns the rejection reason.
fn validate_draft(draft: &str, recipient_name: &str) -> Option<String> {
    if draft.trim().len() < MIN_DRAFT_LEN {
        return Some(format!(
            "draft is too short ({} chars)",
            draft.trim().len()
        ));
    }
    if LEFTOVER_PLACEHOLDER.is_match(draft) {
        return Some("draft contains unresolved placeholders".into());
    }

    let first_name = recipient_name.split_whitespace().next().unwrap_or("");
    if !first_name.is_empty() && !draft.to_lowercase().contains(&first_name.to_lowercase()) {
        return Some("draft does not mention the recipient".into());
    }
    None
}

/// Trim and collapse runs of blank lines.
fn clean_message(raw: &str) -> String {
    EXCESS_BLANK_LINES
        .replace_all(raw.trim(), "\n\n")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use outreach_providers::SynthesisOutput;
    use outreach_shared::{JobId, JobInputs, TemplateKind};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Returns drafts from a script, in order.
    struct ScriptedSynthesizer {
        drafts: Mutex<VecDeque<String>>,
    }

    impl ScriptedSynthesizer {
        fn new(drafts: Vec<&str>) -> Self {
            Self {
                drafts: Mutex::new(drafts.into_iter().map(String::from).collect()),
            }
        }
    }

    #[async_trait]
    impl Synthesizer for ScriptedSynthesizer {
        async fn synthesize(&self, _request: SynthesisRequest) -> Result<SynthesisOutput> {
            let draft = self
                .drafts
                .lock()
                .unwrap()
                .pop_front()
                .expect("script exhausted");
            Ok(SynthesisOutput {
                text: draft,
                tokens_in: 100,
                tokens_out: 40,
                model: "fake".into(),
            })
        }
    }

    async fn test_storage() -> Arc<Storage> {
        let tmp = std::env::temp_dir().join(format!("outreach_compose_{}.db", Uuid::now_v7()));
        Arc::new(Storage::open(&tmp).await.expect("open test db"))
    }

    async fn ctx(storage: &Storage) -> StepContext {
        let job_id = JobId::new();
        storage.insert_job(&job_id, "owner-1").await.unwrap();

        let mut ctx = StepContext::new(
            job_id,
            "owner-1",
            JobInputs {
                template_text: "Dear {{name}}, I admire your work on {{research}}.".into(),
                recipient_name: "Jane Smith".into(),
                recipient_interest: "protein folding".into(),
                template_kind: Some(TemplateKind::Research),
            },
        );
        ctx.gathered_facts = "Jane Smith leads a protein folding lab.".into();
        ctx
    }

    const GOOD_DRAFT: &str = "Dear Jane, I admire your work on protein folding — \
        your lab's recent results are remarkable, and I would love to talk.";

    #[tokio::test]
    async fn valid_first_draft_is_stored_confidently() {
        let storage = test_storage().await;
        let step = MessageComposeStep::new(
            Arc::new(ScriptedSynthesizer::new(vec![GOOD_DRAFT])),
            storage.clone(),
        );

        let mut ctx = ctx(&storage).await;
        let result = step.execute(&mut ctx).await.unwrap();

        assert!(result.success);
        assert!(ctx.is_confident);
        assert_eq!(result.metadata["attempts"], 1);

        let artifact_id = ctx.artifact_id.clone().expect("artifact stored");
        let record = storage
            .get_artifact(&artifact_id)
            .await
            .unwrap()
            .expect("artifact row");
        assert_eq!(record.body, ctx.final_output);
        assert_eq!(record.metadata["is_confident"], true);
    }

    #[tokio::test]
    async fn rejected_draft_is_retried() {
        let storage = test_storage().await;
        let step = MessageComposeStep::new(
            Arc::new(ScriptedSynthesizer::new(vec![
                "Dear {{name}}, I admire your work on protein folding and your lab.",
                GOOD_DRAFT,
            ])),
            storage.clone(),
        );

        let mut ctx = ctx(&storage).await;
        let result = step.execute(&mut ctx).await.unwrap();

        assert!(ctx.is_confident);
        assert_eq!(result.metadata["attempts"], 2);
        assert!(!LEFTOVER_PLACEHOLDER.is_match(&ctx.final_output));
    }

    #[tokio::test]
    async fn exhausted_retries_keep_last_draft_unconfident() {
        let bad = "Dear {{name}}, I admire your work on protein folding and your lab.";
        let storage = test_storage().await;
        let step = MessageComposeStep::new(
            Arc::new(ScriptedSynthesizer::new(vec![bad, bad, bad])),
            storage.clone(),
        );

        let mut ctx = ctx(&storage).await;
        let result = step.execute(&mut ctx).await.unwrap();

        // Still a success: the job completes with a flagged draft.
        assert!(result.success);
        assert!(!ctx.is_confident);
        assert_eq!(result.metadata["attempts"], 3);
        assert!(!result.warnings.is_empty());
        assert!(ctx.artifact_id.is_some());
    }

    #[tokio::test]
    async fn missing_facts_fail_validation() {
        let storage = test_storage().await;
        let step = MessageComposeStep::new(
            Arc::new(ScriptedSynthesizer::new(vec![GOOD_DRAFT])),
            storage.clone(),
        );

        let mut ctx = ctx(&storage).await;
        ctx.gathered_facts.clear();
        assert!(step.validate(&ctx).is_some());
    }

    #[test]
    fn draft_validation_rules() {
        assert!(validate_draft("too short", "Jane Smith").is_some());
        assert!(
            validate_draft(
                "A long enough message that nevertheless never names the person it addresses at all.",
                "Jane Smith"
            )
            .is_some()
        );
        assert!(
            validate_draft(
                "Dear Jane, {{research}} placeholder survived in this otherwise long enough draft.",
                "Jane Smith"
            )
            .is_some()
        );
        assert!(validate_draft(GOOD_DRAFT, "Jane Smith").is_none());
    }

    #[test]
    fn clean_message_collapses_blank_lines() {
        let cleaned = clean_message("  Dear Jane,\n\n\n\nBest,\nMe  ");
        assert_eq!(cleaned, "Dear Jane,\n\nBest,\nMe");
    }
}
