//! Step 2: search for candidate sources, fetch them under a bounded fan-out,
//! and condense the fetched text into a fact digest.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use url::Url;

use outreach_fetch::{FanOut, PageFetcher, is_fetchable};
use outreach_providers::{
    ContentUnit, SearchProvider, TieredSynthesizer, search_all_terms,
};
use outreach_shared::{GatherConfig, Result, SearchConfig};

use crate::context::StepContext;
use crate::step::{PipelineStep, StepResult};

pub const STEP_NAME: &str = "fact_gatherer";

/// Gathers supporting facts about the recipient. Owns `ctx.gathered_facts`
/// and `ctx.fact_sources`.
///
/// Individual source failures degrade the result, never the job: a source
/// that cannot be fetched is dropped, and an empty fetch set still succeeds
/// with the no-content sentinel as the digest.
pub struct FactGatherStep {
    search: Arc<dyn SearchProvider>,
    fetcher: PageFetcher,
    tiered: TieredSynthesizer,
    search_config: SearchConfig,
    gather_config: GatherConfig,
}

impl FactGatherStep {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        fetcher: PageFetcher,
        tiered: TieredSynthesizer,
        search_config: SearchConfig,
        gather_config: GatherConfig,
    ) -> Self {
        Self {
            search,
            fetcher,
            tiered,
            search_config,
            gather_config,
        }
    }
}

#[async_trait]
impl PipelineStep for FactGatherStep {
    fn name(&self) -> &'static str {
        STEP_NAME
    }

    fn validate(&self, ctx: &StepContext) -> Option<String> {
        if ctx.search_terms.is_empty() {
            return Some("search_terms have not been derived yet".into());
        }
        None
    }

    async fn execute(&self, ctx: &mut StepContext) -> Result<StepResult> {
        let hits = search_all_terms(
            self.search.as_ref(),
            &ctx.search_terms,
            self.search_config.results_per_query,
            self.search_config.max_sources as usize,
        )
        .await?;

        let candidates: Vec<Url> = hits
            .iter()
            .filter_map(|hit| Url::parse(&hit.url).ok())
            .filter(is_fetchable)
            .collect();
        let blocked = hits.len() - candidates.len();
        debug!(
            found = hits.len(),
            blocked, "search finished, fetching candidates"
        );

        let fanout = FanOut::new(
            self.gather_config.max_concurrency as usize,
            self.gather_config.per_item_timeout(),
        );
        let fetcher = self.fetcher.clone();
        let outcome = fanout
            .run(candidates, move |url: Url| {
                let fetcher = fetcher.clone();
                async move { fetcher.fetch(&url).await.ok() }
            })
            .await;

        let mut result = StepResult::ok()
            .with_metadata("sources_found", hits.len())
            .with_metadata("sources_blocked", blocked)
            .with_metadata("sources_fetched", outcome.results.len())
            .with_metadata("sources_dropped", outcome.failed.len());

        for (url, reason) in &outcome.failed {
            debug!(url = %url, reason = %reason, "source dropped");
        }
        if outcome.is_empty() {
            warn!("no sources could be fetched");
            result = result.with_warning("no sources could be fetched; proceeding without facts");
        }

        ctx.fact_sources = outcome.results.iter().map(|s| s.url.clone()).collect();

        let units: Vec<ContentUnit> = outcome
            .results
            .into_iter()
            .map(|source| ContentUnit {
                label: source.url,
                text: source.text,
            })
            .collect();

        let condensed = self.tiered.condense(units).await?;
        ctx.gathered_facts = condensed.text;
        for warning in condensed.warnings {
            result = result.with_warning(warning);
        }

        info!(
            sources = ctx.fact_sources.len(),
            digest_len = ctx.gathered_facts.len(),
            tokens = condensed.tokens_used,
            "fact gathering finished"
        );

        Ok(result
            .with_metadata("tier1_calls", condensed.tier1_calls)
            .with_metadata("tokens_used", condensed.tokens_used))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outreach_providers::{
        NO_CONTENT_SENTINEL, SearchHit, SynthesisOutput, SynthesisRequest, Synthesizer,
    };
    use outreach_shared::{JobId, JobInputs, OutreachError, SynthesisConfig};

    struct FakeSearch {
        hits: Vec<SearchHit>,
    }

    #[async_trait]
    impl SearchProvider for FakeSearch {
        async fn search(&self, _query: &str, _limit: u32) -> Result<Vec<SearchHit>> {
            Ok(self.hits.clone())
        }
    }

    struct FailingSearch;

    #[async_trait]
    impl SearchProvider for FailingSearch {
        async fn search(&self, _query: &str, _limit: u32) -> Result<Vec<SearchHit>> {
            Err(OutreachError::ExternalApi("search quota exhausted".into()))
        }
    }

    struct EchoSynthesizer;

    #[async_trait]
    impl Synthesizer for EchoSynthesizer {
        async fn synthesize(&self, request: SynthesisRequest) -> Result<SynthesisOutput> {
            Ok(SynthesisOutput {
                text: format!("digest of {} chars", request.input.len()),
                tokens_in: 10,
                tokens_out: 5,
                model: "fake".into(),
            })
        }
    }

    fn ctx() -> StepContext {
        let mut ctx = StepContext::new(
            JobId::new(),
            "owner-1",
            JobInputs {
                template_text: "Dear {{name}}, I admire your work.".into(),
                recipient_name: "Jane Smith".into(),
                recipient_interest: "protein folding".into(),
                template_kind: None,
            },
        );
        ctx.search_terms = vec!["Jane Smith".into()];
        ctx
    }

    fn step_with(search: Arc<dyn SearchProvider>) -> FactGatherStep {
        let tiered = TieredSynthesizer::new(
            Arc::new(EchoSynthesizer),
            SynthesisConfig {
                inter_call_delay_ms: 0,
                ..Default::default()
            },
        );
        FactGatherStep::new(
            search,
            PageFetcher::new().unwrap(),
            tiered,
            SearchConfig::default(),
            GatherConfig {
                max_concurrency: 2,
                per_item_timeout_secs: 5,
            },
        )
    }

    #[test]
    fn missing_search_terms_fail_validation() {
        let step = step_with(Arc::new(FakeSearch { hits: vec![] }));
        let mut ctx = ctx();
        ctx.search_terms.clear();
        assert!(step.validate(&ctx).is_some());
    }

    #[tokio::test]
    async fn gathers_and_condenses_fetched_sources() {
        let server = wiremock::MockServer::start().await;
        let page = format!(
            "<html><head><title>Jane</title></head><body><p>{}</p></body></html>",
            "Jane Smith studies protein folding. ".repeat(10)
        );
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(page))
            .mount(&server)
            .await;

        let hits = vec![
            SearchHit {
                url: format!("{}/profile", server.uri()),
                title: "Profile".into(),
                snippet: None,
            },
            SearchHit {
                url: format!("{}/lab", server.uri()),
                title: "Lab".into(),
                snippet: None,
            },
        ];
        let step = step_with(Arc::new(FakeSearch { hits }));

        let mut ctx = ctx();
        let result = step.execute(&mut ctx).await.unwrap();

        assert!(result.success);
        assert_eq!(ctx.fact_sources.len(), 2);
        assert!(ctx.gathered_facts.starts_with("digest of"));
        assert_eq!(result.metadata["sources_fetched"], 2);
    }

    #[tokio::test]
    async fn blocked_sources_are_filtered_before_fetch() {
        let hits = vec![
            SearchHit {
                url: "https://www.youtube.com/watch?v=abc".into(),
                title: "Video".into(),
                snippet: None,
            },
            SearchHit {
                url: "https://example.com/cv.pdf".into(),
                title: "CV".into(),
                snippet: None,
            },
        ];
        let step = step_with(Arc::new(FakeSearch { hits }));

        let mut ctx = ctx();
        let result = step.execute(&mut ctx).await.unwrap();

        assert!(result.success);
        assert_eq!(result.metadata["sources_blocked"], 2);
        assert_eq!(ctx.gathered_facts, NO_CONTENT_SENTINEL);
    }

    #[tokio::test]
    async fn empty_fetch_set_degrades_with_sentinel() {
        let step = step_with(Arc::new(FakeSearch { hits: vec![] }));

        let mut ctx = ctx();
        let result = step.execute(&mut ctx).await.unwrap();

        assert!(result.success);
        assert!(ctx.fact_sources.is_empty());
        assert_eq!(ctx.gathered_facts, NO_CONTENT_SENTINEL);
        assert!(!result.warnings.is_empty());
    }

    #[tokio::test]
    async fn total_search_failure_is_an_error() {
        let step = step_with(Arc::new(FailingSearch));

        let mut ctx = ctx();
        let err = step.execute(&mut ctx).await.unwrap_err();
        assert_eq!(err.error_type(), "external_api_error");
    }
}
