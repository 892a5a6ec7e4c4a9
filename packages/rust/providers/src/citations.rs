//! Citation lookup for published works attributed to a recipient.
//!
//! Provides the [`CitationProvider`] trait, a Crossref-backed HTTP client,
//! the URL-keyed merge used when two sub-queries overlap, and relevance
//! ranking against the recipient's stated interest.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use outreach_shared::{Citation, CitationsConfig, OutreachError, Result};

/// Abstraction over the citation lookup API.
#[async_trait]
pub trait CitationProvider: Send + Sync {
    /// Look up works matching a free-text query, returning up to `limit`.
    async fn lookup(&self, query: &str, limit: u32) -> Result<Vec<Citation>>;
}

// ---------------------------------------------------------------------------
// HTTP implementation (Crossref works API)
// ---------------------------------------------------------------------------

/// Citation client backed by the Crossref works endpoint. No API key needed.
pub struct HttpCitationProvider {
    client: Client,
    endpoint: String,
}

impl HttpCitationProvider {
    pub fn from_config(config: &CitationsConfig) -> Self {
        Self::new(config.endpoint.clone())
    }

    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WorksResponse {
    message: WorksMessage,
}

#[derive(Debug, Deserialize)]
struct WorksMessage {
    #[serde(default)]
    items: Vec<Work>,
}

#[derive(Debug, Deserialize)]
struct Work {
    #[serde(default)]
    title: Vec<String>,
    #[serde(rename = "URL")]
    url: Option<String>,
    #[serde(rename = "abstract")]
    summary: Option<String>,
    #[serde(default)]
    author: Vec<WorkAuthor>,
    issued: Option<WorkDate>,
}

#[derive(Debug, Deserialize)]
struct WorkAuthor {
    given: Option<String>,
    family: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WorkDate {
    #[serde(rename = "date-parts", default)]
    date_parts: Vec<Vec<Option<i32>>>,
}

impl Work {
    /// Convert to a [`Citation`]; works without a URL or title are dropped.
    fn into_citation(self) -> Option<Citation> {
        let url = self.url?;
        let title = self.title.into_iter().next()?;

        let year = self
            .issued
            .and_then(|d| d.date_parts.into_iter().next())
            .and_then(|parts| parts.into_iter().next())
            .flatten()
            .and_then(|y| u16::try_from(y).ok());

        let authors = self
            .author
            .into_iter()
            .filter_map(|a| match (a.given, a.family) {
                (Some(given), Some(family)) => Some(format!("{given} {family}")),
                (None, Some(family)) => Some(family),
                (Some(given), None) => Some(given),
                (None, None) => None,
            })
            .collect();

        Some(Citation {
            url,
            title,
            summary: self.summary,
            year,
            authors,
        })
    }
}

#[async_trait]
impl CitationProvider for HttpCitationProvider {
    #[instrument(skip(self), fields(query = %query))]
    async fn lookup(&self, query: &str, limit: u32) -> Result<Vec<Citation>> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("query", query), ("rows", &limit.to_string())])
            .send()
            .await
            .map_err(|e| OutreachError::ExternalApi(format!("citation lookup failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OutreachError::ExternalApi(format!(
                "citation API returned HTTP {status}"
            )));
        }

        let body: WorksResponse = response
            .json()
            .await
            .map_err(|e| OutreachError::ExternalApi(format!("citation response decode: {e}")))?;

        let citations: Vec<Citation> = body
            .message
            .items
            .into_iter()
            .filter_map(Work::into_citation)
            .collect();

        debug!(count = citations.len(), "citation lookup returned");
        Ok(citations)
    }
}

// ---------------------------------------------------------------------------
// Merge and ranking
// ---------------------------------------------------------------------------

/// Merge two citation lists keyed by URL.
///
/// Author-query results come first in the output. When the same URL appears
/// in both lists, the interest-query entry wins in place, since its metadata
/// was matched against the recipient's stated interest.
pub fn merge_citations(author_list: Vec<Citation>, interest_list: Vec<Citation>) -> Vec<Citation> {
    let mut merged = author_list;
    let mut index: std::collections::HashMap<String, usize> = merged
        .iter()
        .enumerate()
        .map(|(i, c)| (c.url.clone(), i))
        .collect();

    for citation in interest_list {
        match index.get(&citation.url) {
            Some(&i) => merged[i] = citation,
            None => {
                index.insert(citation.url.clone(), merged.len());
                merged.push(citation);
            }
        }
    }

    merged
}

/// Recency bonus window, in years.
const RECENT_YEARS: i32 = 3;

/// Score a citation against the recipient's interest.
///
/// Term overlap between the interest and the title/abstract, plus a bonus
/// for works published within the last few years.
pub fn relevance_score(citation: &Citation, interest: &str, current_year: i32) -> f64 {
    let interest_terms: Vec<String> = interest
        .split_whitespace()
        .map(|t| t.to_lowercase())
        .filter(|t| t.len() > 2)
        .collect();

    if interest_terms.is_empty() {
        return 0.0;
    }

    let mut haystack = citation.title.to_lowercase();
    if let Some(summary) = &citation.summary {
        haystack.push(' ');
        haystack.push_str(&summary.to_lowercase());
    }

    let matches = interest_terms
        .iter()
        .filter(|term| haystack.contains(term.as_str()))
        .count();
    let overlap = matches as f64 / interest_terms.len() as f64;

    let recency = match citation.year {
        Some(year) if i32::from(year) >= current_year - RECENT_YEARS => 0.5,
        Some(year) if i32::from(year) >= current_year - 2 * RECENT_YEARS => 0.25,
        _ => 0.0,
    };

    overlap + recency
}

/// Keep the `top_n` most relevant citations, in descending score order.
/// Ties keep their merge order.
pub fn rank_citations(
    mut citations: Vec<Citation>,
    interest: &str,
    current_year: i32,
    top_n: usize,
) -> Vec<Citation> {
    citations.sort_by(|a, b| {
        let sa = relevance_score(a, interest, current_year);
        let sb = relevance_score(b, interest, current_year);
        sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal)
    });
    citations.truncate(top_n);
    citations
}
