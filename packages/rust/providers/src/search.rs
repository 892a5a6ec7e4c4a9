//! Web search provider for discovering candidate source pages.
//!
//! The pipeline talks to the [`SearchProvider`] trait; [`HttpSearchProvider`]
//! is the production implementation backed by a Custom Search style JSON API.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use outreach_shared::{OutreachError, Result, SearchConfig};

/// Env var holding the search engine identifier sent as `cx`.
const ENGINE_ID_ENV: &str = "OUTREACH_SEARCH_ENGINE_ID";

/// One search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub snippet: Option<String>,
}

/// Abstraction over the web search API, so steps can be tested with fakes.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Run one query, returning up to `limit` hits.
    async fn search(&self, query: &str, limit: u32) -> Result<Vec<SearchHit>>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// Search client backed by a Custom Search JSON endpoint.
pub struct HttpSearchProvider {
    client: Client,
    endpoint: String,
    api_key: String,
    engine_id: String,
}

impl HttpSearchProvider {
    /// Build a provider from config, reading credentials from the environment.
    pub fn from_config(config: &SearchConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            OutreachError::config(format!(
                "search API key not found. Set the {} environment variable.",
                config.api_key_env
            ))
        })?;
        let engine_id = std::env::var(ENGINE_ID_ENV).map_err(|_| {
            OutreachError::config(format!(
                "search engine id not found. Set the {ENGINE_ID_ENV} environment variable."
            ))
        })?;

        Ok(Self {
            client: Client::new(),
            endpoint: config.endpoint.clone(),
            api_key,
            engine_id,
        })
    }

    /// Build a provider against an explicit endpoint (used in tests).
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, engine_id: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            engine_id: engine_id.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    link: String,
    title: String,
    snippet: Option<String>,
}

#[async_trait]
impl SearchProvider for HttpSearchProvider {
    #[instrument(skip(self), fields(query = %query))]
    async fn search(&self, query: &str, limit: u32) -> Result<Vec<SearchHit>> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("key", self.api_key.as_str()),
                ("cx", self.engine_id.as_str()),
                ("q", query),
                ("num", &limit.to_string()),
            ])
            .send()
            .await
            .map_err(|e| OutreachError::ExternalApi(format!("search request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OutreachError::ExternalApi(format!(
                "search API returned HTTP {status}"
            )));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| OutreachError::ExternalApi(format!("search response decode: {e}")))?;

        let hits: Vec<SearchHit> = body
            .items
            .into_iter()
            .map(|item| SearchHit {
                url: item.link,
                title: item.title,
                snippet: item.snippet,
            })
            .collect();

        debug!(count = hits.len(), "search query returned");
        Ok(hits)
    }
}

// ---------------------------------------------------------------------------
// Multi-term search
// ---------------------------------------------------------------------------

/// Run every term against the provider and merge hits, de-duplicating by URL
/// in first-seen order and capping the total at `max_sources`.
///
/// A failing term is logged and skipped; only when every term fails is the
/// whole operation an error.
pub async fn search_all_terms(
    provider: &dyn SearchProvider,
    terms: &[String],
    per_query: u32,
    max_sources: usize,
) -> Result<Vec<SearchHit>> {
    let mut seen = std::collections::HashSet::new();
    let mut merged: Vec<SearchHit> = Vec::new();
    let mut failures = 0usize;

    for term in terms {
        match provider.search(term, per_query).await {
            Ok(hits) => {
                for hit in hits {
                    if merged.len() >= max_sources {
                        break;
                    }
                    if seen.insert(hit.url.clone()) {
                        merged.push(hit);
                    }
                }
            }
            Err(e) => {
                warn!(term = %term, error = %e, "search term failed, skipping");
                failures += 1;
            }
        }
        if merged.len() >= max_sources {
            break;
        }
    }

    if !terms.is_empty() && failures == terms.len() {
        return Err(OutreachError::ExternalApi(
            "all search terms failed".to_string(),
        ));
    }

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FakeSearch {
        responses: std::collections::HashMap<String, Vec<SearchHit>>,
    }

    #[async_trait]
    impl SearchProvider for FakeSearch {
        async fn search(&self, query: &str, _limit: u32) -> Result<Vec<SearchHit>> {
            self.responses
                .get(query)
                .cloned()
                .ok_or_else(|| OutreachError::ExternalApi(format!("no fixture for {query}")))
        }
    }

    fn hit(url: &str) -> SearchHit {
        SearchHit {
            url: url.to_string(),
            title: url.to_string(),
            snippet: None,
        }
    }

    #[tokio::test]
    async fn merges_terms_and_dedups_urls() {
        let mut responses = std::collections::HashMap::new();
        responses.insert(
            "jane smith".to_string(),
            vec![hit("https://a.example/1"), hit("https://a.example/2")],
        );
        responses.insert(
            "jane smith biology".to_string(),
            vec![hit("https://a.example/2"), hit("https://a.example/3")],
        );
        let provider = FakeSearch { responses };

        let terms = vec!["jane smith".to_string(), "jane smith biology".to_string()];
        let hits = search_all_terms(&provider, &terms, 6, 10).await.unwrap();

        let urls: Vec<&str> = hits.iter().map(|h| h.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://a.example/1", "https://a.example/2", "https://a.example/3"]
        );
    }

    #[tokio::test]
    async fn caps_at_max_sources() {
        let mut responses = std::collections::HashMap::new();
        responses.insert(
            "q".to_string(),
            (0..8).map(|i| hit(&format!("https://a.example/{i}"))).collect(),
        );
        let provider = FakeSearch { responses };

        let hits = search_all_terms(&provider, &["q".to_string()], 8, 3)
            .await
            .unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[tokio::test]
    async fn tolerates_partial_term_failure() {
        let mut responses = std::collections::HashMap::new();
        responses.insert("good".to_string(), vec![hit("https://a.example/1")]);
        let provider = FakeSearch { responses };

        let terms = vec!["bad".to_string(), "good".to_string()];
        let hits = search_all_terms(&provider, &terms, 6, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn errors_when_all_terms_fail() {
        let provider = FakeSearch {
            responses: std::collections::HashMap::new(),
        };
        let terms = vec!["a".to_string(), "b".to_string()];
        let result = search_all_terms(&provider, &terms, 6, 10).await;
        assert!(matches!(result, Err(OutreachError::ExternalApi(_))));
    }

    #[tokio::test]
    async fn http_provider_decodes_items() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::query_param("q", "jane smith"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    {"link": "https://lab.example.edu/jane", "title": "Jane Smith — Lab", "snippet": "Protein folding."},
                    {"link": "https://scholar.example/jane", "title": "Jane Smith"}
                ]
            })))
            .mount(&server)
            .await;

        let provider = HttpSearchProvider::new(server.uri(), "test-key", "test-cx");
        let hits = provider.search("jane smith", 6).await.unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].url, "https://lab.example.edu/jane");
        assert_eq!(hits[0].snippet.as_deref(), Some("Protein folding."));
        assert!(hits[1].snippet.is_none());
    }

    #[tokio::test]
    async fn http_provider_maps_errors() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let provider = HttpSearchProvider::new(server.uri(), "test-key", "test-cx");
        let result = provider.search("anything", 6).await;

        assert!(matches!(result, Err(OutreachError::ExternalApi(_))));
    }
}
