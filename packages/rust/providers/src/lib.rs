//! External provider clients for the outreach pipeline.
//!
//! Each provider is a trait (for test fakes) with one HTTP implementation:
//! - [`SearchProvider`] — web search for candidate source pages
//! - [`CitationProvider`] — published-work lookup
//! - [`Synthesizer`] — LLM text synthesis
//!
//! [`TieredSynthesizer`] layers the two-tier condensation strategy on top of
//! any [`Synthesizer`].

pub mod citations;
pub mod search;
pub mod synthesis;
pub mod tiered;

pub use citations::{
    CitationProvider, HttpCitationProvider, merge_citations, rank_citations, relevance_score,
};
pub use search::{HttpSearchProvider, SearchHit, SearchProvider, search_all_terms};
pub use synthesis::{HttpSynthesizer, SynthesisOutput, SynthesisRequest, Synthesizer};
pub use tiered::{ContentUnit, NO_CONTENT_SENTINEL, TieredOutcome, TieredSynthesizer};
