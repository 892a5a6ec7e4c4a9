//! HTTP source-page fetcher with HTML-to-text cleanup.
//!
//! Fetches one candidate source page, strips non-content markup, and
//! normalizes the remaining text for downstream synthesis. Pages that are
//! unlikely to yield usable text (binary documents, video platforms) are
//! rejected up front, and pages whose cleaned text is too short to be useful
//! are treated as fetch failures.

use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::Client;
use scraper::{ElementRef, Html, Node, Selector};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};
use url::Url;

use outreach_shared::{OutreachError, Result};

/// User-Agent string for fetch requests.
const USER_AGENT: &str = concat!("Outreach/", env!("CARGO_PKG_VERSION"));

/// Minimum cleaned-text length for a page to count as fetched.
const MIN_CONTENT_LEN: usize = 100;

/// Maximum cleaned-text length retained per page.
const MAX_CONTENT_LEN: usize = 500_000;

/// File extensions that never yield scrapeable text.
const BLOCKED_EXTENSIONS: &[&str] = &[".pdf", ".doc", ".docx", ".ppt", ".pptx", ".zip"];

/// Video/media hosts that never yield useful text.
const BLOCKED_DOMAINS: &[&str] = &["youtube.com", "youtu.be", "vimeo.com"];

// ---------------------------------------------------------------------------
// FetchedSource
// ---------------------------------------------------------------------------

/// A fetched source page with its cleaned text content.
#[derive(Debug, Clone)]
pub struct FetchedSource {
    /// Original page URL.
    pub url: String,
    /// Page title, when present.
    pub title: Option<String>,
    /// Cleaned plain-text content.
    pub text: String,
    /// SHA-256 hash of the cleaned text.
    pub content_hash: String,
    /// When the page was fetched.
    pub fetched_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// PageFetcher
// ---------------------------------------------------------------------------

/// HTTP fetcher for candidate source pages.
#[derive(Debug, Clone)]
pub struct PageFetcher {
    client: Client,
}

impl PageFetcher {
    /// Create a fetcher with a shared HTTP client.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| OutreachError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// Fetch a page and clean it to plain text.
    ///
    /// Fails on blocked URLs, non-success HTTP statuses, and pages whose
    /// cleaned text is shorter than the usefulness threshold.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn fetch(&self, url: &Url) -> Result<FetchedSource> {
        if !is_fetchable(url) {
            return Err(OutreachError::Network(format!(
                "{url}: blocked source (binary or media host)"
            )));
        }

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| OutreachError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OutreachError::Network(format!("{url}: HTTP {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| OutreachError::Network(format!("{url}: body read failed: {e}")))?;

        let (title, mut text) = extract_text(&body);

        if text.len() > MAX_CONTENT_LEN {
            debug!(url = %url, original_len = text.len(), "truncating oversized page text");
            text.truncate(MAX_CONTENT_LEN);
        }

        if text.len() < MIN_CONTENT_LEN {
            return Err(OutreachError::parse(format!(
                "{url}: insufficient content after cleaning ({} chars)",
                text.len()
            )));
        }

        let content_hash = compute_hash(&text);

        Ok(FetchedSource {
            url: url.to_string(),
            title,
            text,
            content_hash,
            fetched_at: Utc::now(),
        })
    }
}

/// Whether a URL is worth fetching at all.
pub fn is_fetchable(url: &Url) -> bool {
    if url.scheme() != "http" && url.scheme() != "https" {
        return false;
    }

    let path = url.path().to_ascii_lowercase();
    if BLOCKED_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return false;
    }

    if let Some(host) = url.host_str() {
        let host = host.to_ascii_lowercase();
        if BLOCKED_DOMAINS
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{d}")))
        {
            return false;
        }
    }

    true
}

// ---------------------------------------------------------------------------
// HTML cleanup
// ---------------------------------------------------------------------------

/// Elements whose text is never content.
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "template", "svg"];

/// Extract `(title, cleaned_text)` from an HTML document.
fn extract_text(html: &str) -> (Option<String>, String) {
    let doc = Html::parse_document(html);

    let title = {
        let title_sel = Selector::parse("title").unwrap();
        doc.select(&title_sel)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty())
    };

    let body_sel = Selector::parse("body").unwrap();
    let mut raw = String::new();
    match doc.select(&body_sel).next() {
        Some(body) => collect_text(body, &mut raw),
        None => collect_text(doc.root_element(), &mut raw),
    }

    (title, normalize_text(&raw))
}

/// Recursively collect text nodes, skipping non-content elements.
fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) => {
                if SKIPPED_ELEMENTS.contains(&el.name()) {
                    continue;
                }
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect_text(child_el, out);
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
}

static NON_ASCII: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\x00-\x7F]+").unwrap());
static SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").unwrap());
static BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Normalize extracted text: trim lines, drop empties, collapse whitespace.
fn normalize_text(raw: &str) -> String {
    let lines: Vec<&str> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    let joined = lines.join("\n");

    let ascii = NON_ASCII.replace_all(&joined, "");
    let spaced = SPACES.replace_all(&ascii, " ");
    BLANK_LINES.replace_all(&spaced, "\n\n").trim().to_string()
}

/// Compute SHA-256 hash of content.
fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
