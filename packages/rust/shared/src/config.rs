//! Application configuration for the outreach pipeline.
//!
//! User config lives at `~/.outreach/outreach.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{OutreachError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "outreach.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".outreach";

// ---------------------------------------------------------------------------
// Config structs (matching outreach.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Web search provider settings.
    #[serde(default)]
    pub search: SearchConfig,

    /// Citation lookup provider settings.
    #[serde(default)]
    pub citations: CitationsConfig,

    /// Synthesis provider settings.
    #[serde(default)]
    pub synthesis: SynthesisConfig,

    /// Fact-gathering fan-out limits.
    #[serde(default)]
    pub gather: GatherConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Path to the local job/artifact database.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Number of concurrent worker slots processing jobs.
    #[serde(default = "default_worker_slots")]
    pub worker_slots: u32,

    /// Client poll interval in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            worker_slots: default_worker_slots(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_db_path() -> String {
    "~/.outreach/outreach.db".into()
}
fn default_worker_slots() -> u32 {
    1
}
fn default_poll_interval_ms() -> u64 {
    500
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,

    /// Search API endpoint.
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,

    /// Results requested per search term.
    #[serde(default = "default_results_per_query")]
    pub results_per_query: u32,

    /// Cap on candidate source pages across all terms.
    #[serde(default = "default_max_sources")]
    pub max_sources: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_search_key_env(),
            endpoint: default_search_endpoint(),
            results_per_query: default_results_per_query(),
            max_sources: default_max_sources(),
        }
    }
}

fn default_search_key_env() -> String {
    "OUTREACH_SEARCH_API_KEY".into()
}
fn default_search_endpoint() -> String {
    "https://www.googleapis.com/customsearch/v1".into()
}
fn default_results_per_query() -> u32 {
    6
}
fn default_max_sources() -> u32 {
    10
}

/// `[citations]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitationsConfig {
    /// Citation lookup API endpoint.
    #[serde(default = "default_citations_endpoint")]
    pub endpoint: String,

    /// Maximum works fetched per lookup before relevance filtering.
    #[serde(default = "default_max_fetch")]
    pub max_fetch: u32,

    /// Number of works kept after relevance filtering.
    #[serde(default = "default_top_n")]
    pub top_n: u32,
}

impl Default for CitationsConfig {
    fn default() -> Self {
        Self {
            endpoint: default_citations_endpoint(),
            max_fetch: default_max_fetch(),
            top_n: default_top_n(),
        }
    }
}

fn default_citations_endpoint() -> String {
    "https://api.crossref.org/works".into()
}
fn default_max_fetch() -> u32 {
    20
}
fn default_top_n() -> u32 {
    5
}

/// `[synthesis]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Name of the env var holding the API key.
    #[serde(default = "default_synthesis_key_env")]
    pub api_key_env: String,

    /// Synthesis gateway endpoint.
    #[serde(default = "default_synthesis_endpoint")]
    pub endpoint: String,

    /// Model identifier sent with each request.
    #[serde(default = "default_model")]
    pub model: String,

    /// Per-unit condensation budget, in characters (tier 1).
    #[serde(default = "default_unit_budget")]
    pub unit_budget: usize,

    /// Final synthesis budget, in characters (tier 2).
    #[serde(default = "default_final_budget")]
    pub final_budget: usize,

    /// Raw size under which a single unit skips tier 1 entirely.
    #[serde(default = "default_single_call_threshold")]
    pub single_call_threshold: usize,

    /// Cap on units entering tier 1; excess units are dropped in order.
    #[serde(default = "default_max_units")]
    pub max_units: usize,

    /// Fixed delay between serial tier-1 calls, in milliseconds.
    #[serde(default = "default_inter_call_delay_ms")]
    pub inter_call_delay_ms: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_synthesis_key_env(),
            endpoint: default_synthesis_endpoint(),
            model: default_model(),
            unit_budget: default_unit_budget(),
            final_budget: default_final_budget(),
            single_call_threshold: default_single_call_threshold(),
            max_units: default_max_units(),
            inter_call_delay_ms: default_inter_call_delay_ms(),
        }
    }
}

fn default_synthesis_key_env() -> String {
    "OUTREACH_SYNTHESIS_API_KEY".into()
}
fn default_synthesis_endpoint() -> String {
    "https://openrouter.ai/api/v1/synthesize".into()
}
fn default_model() -> String {
    "moonshotai/kimi-k2.5".into()
}
fn default_unit_budget() -> usize {
    4_000
}
fn default_final_budget() -> usize {
    5_000
}
fn default_single_call_threshold() -> usize {
    15_000
}
fn default_max_units() -> usize {
    10
}
fn default_inter_call_delay_ms() -> u64 {
    250
}

/// `[gather]` section — fan-out limits for the fact-gathering step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatherConfig {
    /// Concurrency ceiling for source fetches.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,

    /// Per-source fetch timeout in seconds.
    #[serde(default = "default_per_item_timeout_secs")]
    pub per_item_timeout_secs: u64,
}

impl Default for GatherConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            per_item_timeout_secs: default_per_item_timeout_secs(),
        }
    }
}

impl GatherConfig {
    /// Per-item timeout as a [`Duration`].
    pub fn per_item_timeout(&self) -> Duration {
        Duration::from_secs(self.per_item_timeout_secs)
    }
}

fn default_max_concurrency() -> u32 {
    5
}
fn default_per_item_timeout_secs() -> u64 {
    10
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.outreach/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| OutreachError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.outreach/outreach.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| OutreachError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| OutreachError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| OutreachError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| OutreachError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| OutreachError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that a provider API key env var is set and non-empty.
pub fn validate_api_key(var_name: &str) -> Result<()> {
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(()),
        _ => Err(OutreachError::config(format!(
            "API key not found. Set the {var_name} environment variable."
        ))),
    }
}
