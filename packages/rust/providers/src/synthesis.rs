//! Text synthesis provider (LLM gateway client).
//!
//! The pipeline and the tiered condenser talk to the [`Synthesizer`] trait;
//! [`HttpSynthesizer`] is the production implementation speaking the
//! chat-completions wire format.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use outreach_shared::{OutreachError, Result, SynthesisConfig};

/// Rough characters-per-token estimate for sizing max_tokens from a
/// character budget.
const CHARS_PER_TOKEN: usize = 4;

/// One synthesis request.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    /// System instruction framing the task.
    pub system: String,
    /// The material to synthesize from.
    pub input: String,
    /// Output budget in characters; the provider is asked to stay under it.
    pub max_chars: usize,
}

/// Result of a synthesis call.
#[derive(Debug, Clone)]
pub struct SynthesisOutput {
    pub text: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub model: String,
}

/// Abstraction over the synthesis API, so steps and the tiered condenser can
/// be tested with counting fakes.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, request: SynthesisRequest) -> Result<SynthesisOutput>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// Synthesis client speaking the chat-completions JSON format with bearer
/// auth. Transient failures surface as [`OutreachError::ExternalApi`]; no
/// retries happen at this layer.
pub struct HttpSynthesizer {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl HttpSynthesizer {
    /// Build a synthesizer from config, reading the key from the environment.
    pub fn from_config(config: &SynthesisConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            OutreachError::config(format!(
                "synthesis API key not found. Set the {} environment variable.",
                config.api_key_env
            ))
        })?;

        Ok(Self::new(config.endpoint.clone(), api_key, config.model.clone()))
    }

    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: usize,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    #[instrument(skip_all, fields(model = %self.model, input_len = request.input.len()))]
    async fn synthesize(&self, request: SynthesisRequest) -> Result<SynthesisOutput> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.input,
                },
            ],
            max_tokens: (request.max_chars / CHARS_PER_TOKEN).max(1),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| OutreachError::ExternalApi(format!("synthesis request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OutreachError::ExternalApi(format!(
                "synthesis API returned HTTP {status}"
            )));
        }

        let decoded: ChatResponse = response
            .json()
            .await
            .map_err(|e| OutreachError::ExternalApi(format!("synthesis response decode: {e}")))?;

        let text = decoded
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| {
                OutreachError::ExternalApi("synthesis response had no choices".to_string())
            })?;

        let usage = decoded.usage.unwrap_or_default();
        debug!(
            tokens_in = usage.prompt_tokens,
            tokens_out = usage.completion_tokens,
            "synthesis call completed"
        );

        Ok(SynthesisOutput {
            text,
            tokens_in: usage.prompt_tokens,
            tokens_out: usage.completion_tokens,
            model: decoded.model.unwrap_or_else(|| self.model.clone()),
        })
    }
}
