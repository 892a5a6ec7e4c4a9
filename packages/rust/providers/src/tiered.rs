//! Two-tier reduction of gathered source text into a condensed fact digest.
//!
//! Tier 1 (map): each content unit is condensed to at most `unit_budget`
//! characters in its own synthesis call, run **serially** with a fixed
//! inter-call delay to respect provider rate limits. Tier 2 (reduce): the
//! condensations are concatenated with source markers and reduced in one
//! final call bounded to `final_budget` characters.
//!
//! Edge cases: zero units returns a fixed sentinel with no synthesis calls;
//! a single unit already under the single-call threshold skips tier 1; a
//! unit list over the cap is truncated in stable order with a warning; a
//! failed unit is replaced by a fallback marker naming its source so tier 2
//! always receives a fully populated input.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use outreach_shared::{Result, SynthesisConfig};

use crate::synthesis::{SynthesisRequest, Synthesizer};

/// Returned in place of a digest when no source material survived gathering.
pub const NO_CONTENT_SENTINEL: &str = "No source material was available.";

const TIER1_SYSTEM: &str = "Condense the following source material into the key facts, \
    keeping names, dates, and concrete claims. Plain prose, no preamble.";

const TIER2_SYSTEM: &str = "Combine the following condensed source notes into a single \
    coherent fact digest about the subject. Remove duplicates, keep concrete claims, \
    and attribute nothing that is not in the notes.";

/// One unit of gathered text, tagged with where it came from.
#[derive(Debug, Clone)]
pub struct ContentUnit {
    /// Source label (usually the page URL or title).
    pub label: String,
    /// Cleaned text content.
    pub text: String,
}

/// Outcome of a tiered condensation.
#[derive(Debug)]
pub struct TieredOutcome {
    /// The final digest text.
    pub text: String,
    /// Non-fatal degradations encountered (truncation, per-unit failures).
    pub warnings: Vec<String>,
    /// Synthesis calls made in tier 1.
    pub tier1_calls: usize,
    /// Synthesis calls made in tier 2 (0 or 1).
    pub tier2_calls: usize,
    /// Total tokens consumed across both tiers.
    pub tokens_used: u64,
}

/// Two-tier synthesis reducer over gathered content units.
pub struct TieredSynthesizer {
    inner: Arc<dyn Synthesizer>,
    config: SynthesisConfig,
}

impl TieredSynthesizer {
    pub fn new(inner: Arc<dyn Synthesizer>, config: SynthesisConfig) -> Self {
        Self { inner, config }
    }

    /// Condense `units` into one digest of at most `final_budget` characters.
    #[instrument(skip_all, fields(units = units.len()))]
    pub async fn condense(&self, mut units: Vec<ContentUnit>) -> Result<TieredOutcome> {
        if units.is_empty() {
            return Ok(TieredOutcome {
                text: NO_CONTENT_SENTINEL.to_string(),
                warnings: Vec::new(),
                tier1_calls: 0,
                tier2_calls: 0,
                tokens_used: 0,
            });
        }

        let mut warnings = Vec::new();
        let mut tokens_used = 0u64;

        // Single small unit: no map phase needed, one direct call.
        if units.len() == 1 && units[0].text.len() < self.config.single_call_threshold {
            let unit = units.remove(0);
            let output = self
                .inner
                .synthesize(SynthesisRequest {
                    system: TIER2_SYSTEM.to_string(),
                    input: format!("[source: {}]\n{}", unit.label, unit.text),
                    max_chars: self.config.final_budget,
                })
                .await?;
            tokens_used += output.tokens_in + output.tokens_out;

            return Ok(TieredOutcome {
                text: bound_text(output.text, self.config.final_budget),
                warnings,
                tier1_calls: 0,
                tier2_calls: 1,
                tokens_used,
            });
        }

        if units.len() > self.config.max_units {
            let dropped = units.len() - self.config.max_units;
            units.truncate(self.config.max_units);
            warnings.push(format!(
                "source list truncated to {} units ({dropped} dropped)",
                self.config.max_units
            ));
            warn!(dropped, cap = self.config.max_units, "unit list over cap, truncated");
        }

        // Tier 1: serial map with a fixed delay between calls.
        let delay = Duration::from_millis(self.config.inter_call_delay_ms);
        let mut condensed: Vec<(String, String)> = Vec::with_capacity(units.len());
        let mut tier1_calls = 0usize;

        for (i, unit) in units.iter().enumerate() {
            if i > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            tier1_calls += 1;
            match self
                .inner
                .synthesize(SynthesisRequest {
                    system: TIER1_SYSTEM.to_string(),
                    input: unit.text.clone(),
                    max_chars: self.config.unit_budget,
                })
                .await
            {
                Ok(output) => {
                    tokens_used += output.tokens_in + output.tokens_out;
                    condensed.push((
                        unit.label.clone(),
                        bound_text(output.text, self.config.unit_budget),
                    ));
                }
                Err(e) => {
                    warn!(label = %unit.label, error = %e, "unit condensation failed");
                    warnings.push(format!("condensation failed for {}", unit.label));
                    condensed.push((
                        unit.label.clone(),
                        format!("[no condensation available for {}]", unit.label),
                    ));
                }
            }
        }

        // Tier 2: single reduce over all condensations.
        let combined = condensed
            .iter()
            .map(|(label, text)| format!("[source: {label}]\n{text}"))
            .collect::<Vec<_>>()
            .join("\n\n");

        let output = self
            .inner
            .synthesize(SynthesisRequest {
                system: TIER2_SYSTEM.to_string(),
                input: combined,
                max_chars: self.config.final_budget,
            })
            .await?;
        tokens_used += output.tokens_in + output.tokens_out;

        info!(tier1_calls, tokens_used, "tiered condensation finished");

        Ok(TieredOutcome {
            text: bound_text(output.text, self.config.final_budget),
            warnings,
            tier1_calls,
            tier2_calls: 1,
            tokens_used,
        })
    }
}

/// Enforce a character budget on provider output at a char boundary.
fn bound_text(text: String, budget: usize) -> String {
    if text.len() <= budget {
        return text;
    }
    let mut end = budget;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    let mut bounded = text;
    bounded.truncate(end);
    bounded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthesis::SynthesisOutput;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSynthesizer {
        calls: AtomicUsize,
        fail_on_inputs_containing: Option<String>,
    }

    impl CountingSynthesizer {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_on_inputs_containing: None,
            }
        }

        fn failing_on(marker: &str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_on_inputs_containing: Some(marker.to_string()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Synthesizer for CountingSynthesizer {
        async fn synthesize(&self, request: SynthesisRequest) -> Result<SynthesisOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(marker) = &self.fail_on_inputs_containing {
                if request.input.contains(marker) {
                    return Err(outreach_shared::OutreachError::ExternalApi(
                        "simulated provider failure".into(),
                    ));
                }
            }
            Ok(SynthesisOutput {
                text: format!("condensed({} chars)", request.input.len()),
                tokens_in: 10,
                tokens_out: 5,
                model: "fake".into(),
            })
        }
    }

    fn config() -> SynthesisConfig {
        SynthesisConfig {
            inter_call_delay_ms: 0,
            ..Default::default()
        }
    }

    fn unit(label: &str, text: &str) -> ContentUnit {
        ContentUnit {
            label: label.to_string(),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn empty_units_return_sentinel_with_zero_calls() {
        let fake = Arc::new(CountingSynthesizer::new());
        let tiered = TieredSynthesizer::new(fake.clone(), config());

        let outcome = tiered.condense(vec![]).await.unwrap();

        assert_eq!(outcome.text, NO_CONTENT_SENTINEL);
        assert_eq!(outcome.tier1_calls, 0);
        assert_eq!(outcome.tier2_calls, 0);
        assert_eq!(fake.call_count(), 0);
    }

    #[tokio::test]
    async fn single_small_unit_skips_tier_one() {
        let fake = Arc::new(CountingSynthesizer::new());
        let tiered = TieredSynthesizer::new(fake.clone(), config());

        let outcome = tiered
            .condense(vec![unit("https://a.example", "short source text")])
            .await
            .unwrap();

        assert_eq!(outcome.tier1_calls, 0);
        assert_eq!(outcome.tier2_calls, 1);
        assert_eq!(fake.call_count(), 1);
    }

    #[tokio::test]
    async fn single_large_unit_goes_through_both_tiers() {
        let fake = Arc::new(CountingSynthesizer::new());
        let mut cfg = config();
        cfg.single_call_threshold = 50;
        let tiered = TieredSynthesizer::new(fake.clone(), cfg);

        let big = "x".repeat(200);
        let outcome = tiered.condense(vec![unit("a", &big)]).await.unwrap();

        assert_eq!(outcome.tier1_calls, 1);
        assert_eq!(outcome.tier2_calls, 1);
        assert_eq!(fake.call_count(), 2);
    }

    #[tokio::test]
    async fn n_units_make_n_plus_one_calls() {
        let fake = Arc::new(CountingSynthesizer::new());
        let tiered = TieredSynthesizer::new(fake.clone(), config());

        let units = vec![unit("a", "one"), unit("b", "two"), unit("c", "three")];
        let outcome = tiered.condense(units).await.unwrap();

        assert_eq!(outcome.tier1_calls, 3);
        assert_eq!(outcome.tier2_calls, 1);
        assert_eq!(fake.call_count(), 4);
        assert!(outcome.warnings.is_empty());
        assert_eq!(outcome.tokens_used, 4 * 15);
    }

    #[tokio::test]
    async fn unit_cap_truncates_deterministically_with_warning() {
        let fake = Arc::new(CountingSynthesizer::new());
        let mut cfg = config();
        cfg.max_units = 2;
        let tiered = TieredSynthesizer::new(fake.clone(), cfg);

        let units = vec![
            unit("first", "1"),
            unit("second", "2"),
            unit("third", "3"),
            unit("fourth", "4"),
        ];
        let outcome = tiered.condense(units).await.unwrap();

        // Two tier-1 calls plus one reduce; later units dropped in order.
        assert_eq!(outcome.tier1_calls, 2);
        assert_eq!(fake.call_count(), 3);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("truncated"));
    }

    #[tokio::test]
    async fn failed_unit_is_replaced_by_fallback_marker() {
        let fake = Arc::new(CountingSynthesizer::failing_on("POISON"));
        let tiered = TieredSynthesizer::new(fake.clone(), config());

        let units = vec![unit("good", "fine text"), unit("bad-source", "POISON text")];
        let outcome = tiered.condense(units).await.unwrap();

        // Batch still completed with a full reduce.
        assert_eq!(outcome.tier2_calls, 1);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("bad-source"));
    }

    #[tokio::test]
    async fn inter_call_delay_spaces_tier_one() {
        let fake = Arc::new(CountingSynthesizer::new());
        let mut cfg = config();
        cfg.inter_call_delay_ms = 20;
        let tiered = TieredSynthesizer::new(fake.clone(), cfg);

        let units = vec![unit("a", "1"), unit("b", "2"), unit("c", "3")];
        let start = std::time::Instant::now();
        tiered.condense(units).await.unwrap();

        // Two inter-call gaps between three serial calls.
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn bound_text_respects_char_boundaries() {
        let text = "héllo wörld".to_string();
        let bounded = bound_text(text, 3);
        assert!(bounded.len() <= 3);
        assert!(bounded.is_char_boundary(bounded.len()));
    }
}
