//! OpenRouter chat-completions client.
//!
//! Speaks the OpenAI-compatible `/chat/completions` endpoint over raw HTTP and
//! maps transport and status failures onto [`GenerationErrorKind`].

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

use contentforge_shared::{
    AppConfig, ContentForgeError, GenerationError, GenerationOptions, GenerationUsage, Result,
    resolve_api_key,
};

use crate::{GenerationProvider, ProviderReply};

/// User-Agent string for provider requests.
const USER_AGENT: &str = concat!("ContentForge/", env!("CARGO_PKG_VERSION"));

/// Longest slice of an error body quoted in messages.
const ERROR_BODY_PREVIEW: usize = 200;

/// Prepended to every prompt as the system message.
pub const SYSTEM_PROMPT: &str = "\
You are an expert content creator producing unique, brand-aligned content.

CORE DIRECTIVES:
1. Never produce generic filler. Every piece must read as if it could only come from the brand described in the prompt.
2. Treat the supplied company knowledge (brand voice, product facts) and market research as ground truth. Reference it explicitly.
3. Take clear positions grounded in the brand identity and the market data provided.
4. Write for humans: the voice of a sharp, experienced writer who knows the brand well.
5. When given a structure, follow it precisely while keeping each section natural.
6. Avoid cliche openings, unexplained buzzwords, vague claims and empty both-sides hedging.

OUTPUT RULES:
- Follow the requested format exactly.
- Respect length constraints.
- When asked for structured output (JSON), return valid JSON only.";

/// [`GenerationProvider`] backed by the OpenRouter API.
pub struct OpenRouterProvider {
    client: Client,
    api_key: String,
    endpoint: Url,
    model: String,
    system_prompt: String,
}

impl std::fmt::Debug for OpenRouterProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterProvider")
            .field("endpoint", &self.endpoint.as_str())
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl OpenRouterProvider {
    /// `base_url` must end with `/` so `chat/completions` is appended to it.
    pub fn new(
        api_key: impl Into<String>,
        base_url: &Url,
        model: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let endpoint = base_url.join("chat/completions").map_err(|e| {
            ContentForgeError::config(format!("invalid provider base_url '{base_url}': {e}"))
        })?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| ContentForgeError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            endpoint,
            model: model.into(),
            system_prompt: SYSTEM_PROMPT.to_string(),
        })
    }

    /// Build from the `[provider]` config section; the key comes from the
    /// environment variable it names.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let api_key = resolve_api_key(config)?;
        Self::new(
            api_key,
            &config.provider.base_url()?,
            config.provider.model.clone(),
            Duration::from_secs(config.provider.request_timeout_secs),
        )
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

// ---------------------------------------------------------------------------
// Provider impl
// ---------------------------------------------------------------------------

#[async_trait]
impl GenerationProvider for OpenRouterProvider {
    fn name(&self) -> &str {
        "openrouter"
    }

    #[instrument(skip_all, fields(model = %self.model, prompt_chars = prompt.len()))]
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> std::result::Result<ProviderReply, GenerationError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &self.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens: options.max_tokens,
            temperature: options.temperature,
        };

        let started = Instant::now();
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let text = response.text().await.map_err(map_transport_error)?;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        if !status.is_success() {
            return Err(map_status(status, retry_after, &text));
        }

        let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
            GenerationError::invalid_response(format!(
                "malformed response body: {e}: {}",
                preview(&text)
            ))
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| GenerationError::invalid_response("response contained no content"))?;

        let usage = GenerationUsage {
            model: parsed.model.unwrap_or_else(|| self.model.clone()),
            tokens_in: parsed.usage.as_ref().map_or(0, |u| u.prompt_tokens),
            tokens_out: parsed.usage.as_ref().map_or(0, |u| u.completion_tokens),
            latency_ms,
        };

        debug!(
            tokens_in = usage.tokens_in,
            tokens_out = usage.tokens_out,
            latency_ms,
            "openrouter call complete"
        );

        Ok(ProviderReply {
            text: content,
            usage: Some(usage),
        })
    }
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn map_transport_error(e: reqwest::Error) -> GenerationError {
    if e.is_timeout() {
        GenerationError::timeout(format!("request timed out: {e}"))
    } else if e.is_connect() {
        GenerationError::timeout(format!("connection failed: {e}"))
    } else {
        GenerationError::invalid_response(format!("request failed: {e}"))
    }
}

fn map_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> GenerationError {
    let message = format!("HTTP {status}: {}", preview(body));
    match status.as_u16() {
        401 | 403 => GenerationError::auth_failure(message),
        // 529 is the upstream "overloaded" status.
        429 | 503 | 529 => GenerationError::rate_limited(retry_after, message),
        408 | 504 => GenerationError::timeout(message),
        _ => GenerationError::invalid_response(message),
    }
}

/// `Retry-After` in delta-seconds. HTTP-date values are ignored.
fn parse_retry_after(headers: &header::HeaderMap) -> Option<Duration> {
    headers
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn preview(text: &str) -> String {
    text.chars().take(ERROR_BODY_PREVIEW).collect()
}
