//! Application configuration for ContentForge.
//!
//! User config lives at `~/.contentforge/contentforge.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ContentForgeError, Result};
use crate::types::{GenerationOptions, Partition};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "contentforge.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".contentforge";

// ---------------------------------------------------------------------------
// Config structs (matching contentforge.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Generation provider settings.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Stage sequencing, retry and timeout policy.
    #[serde(default)]
    pub pipeline: PipelineSection,

    /// Feedback heuristics.
    #[serde(default)]
    pub feedback: FeedbackConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Knowledge corpus root holding `primary/` and `secondary/`.
    #[serde(default = "default_knowledge_dir")]
    pub knowledge_dir: String,

    /// Optional TOML file overriding the built-in templates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub templates_file: Option<String>,

    /// Where run logs are written.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Content format requested when the CLI does not specify one.
    #[serde(default = "default_target_format")]
    pub target_format: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            knowledge_dir: default_knowledge_dir(),
            templates_file: None,
            output_dir: default_output_dir(),
            target_format: default_target_format(),
        }
    }
}

fn default_knowledge_dir() -> String {
    "knowledge_base".into()
}
fn default_output_dir() -> String {
    "var/runs".into()
}
fn default_target_format() -> String {
    "blog_post".into()
}

/// `[provider]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model to request.
    #[serde(default = "default_model")]
    pub model: String,

    /// OpenAI-compatible API root.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Token budget per call.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature for drafting.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            model: default_model(),
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

impl ProviderConfig {
    /// Parse `base_url`, normalised to end with `/` so relative joins append.
    pub fn base_url(&self) -> Result<Url> {
        let raw = if self.base_url.ends_with('/') {
            self.base_url.clone()
        } else {
            format!("{}/", self.base_url)
        };
        Url::parse(&raw).map_err(|e| {
            ContentForgeError::config(format!("invalid provider base_url '{}': {e}", self.base_url))
        })
    }

    /// Default drafting options.
    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "anthropic/claude-sonnet-4.5".into()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_request_timeout() -> u64 {
    120
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_temperature() -> f32 {
    0.4
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    /// Publish/evaluate cycles before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff retries per generation call for rate limits and timeouts.
    #[serde(default = "default_retry_ceiling")]
    pub retry_ceiling: u32,

    /// First backoff delay; doubles per retry.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Upper bound on any single backoff delay.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Whole-run time budget.
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,

    /// Entries pulled into the base knowledge pool.
    #[serde(default = "default_pool_limit")]
    pub knowledge_pool_limit: usize,

    /// Pool slots kept for secondary entries when primary alone would fill it.
    #[serde(default = "default_secondary_reserve")]
    pub secondary_reserve: usize,

    /// Partitions that must be non-empty for a run to start.
    #[serde(default = "default_required_partitions")]
    pub required_partitions: Vec<Partition>,

    /// Secondary categories that count as trend signals.
    #[serde(default = "default_trend_categories")]
    pub trend_categories: Vec<String>,

    /// Topic used when neither a hint nor a trend opportunity exists.
    #[serde(default = "default_fallback_topic")]
    pub fallback_topic: String,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_ceiling: default_retry_ceiling(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            run_timeout_secs: default_run_timeout(),
            knowledge_pool_limit: default_pool_limit(),
            secondary_reserve: default_secondary_reserve(),
            required_partitions: default_required_partitions(),
            trend_categories: default_trend_categories(),
            fallback_topic: default_fallback_topic(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_retry_ceiling() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_backoff_max_ms() -> u64 {
    8_000
}
fn default_run_timeout() -> u64 {
    600
}
fn default_pool_limit() -> usize {
    24
}
fn default_secondary_reserve() -> usize {
    6
}
fn default_required_partitions() -> Vec<Partition> {
    vec![Partition::Primary]
}
fn default_trend_categories() -> Vec<String> {
    vec!["market_trend".into(), "industry_insight".into()]
}
fn default_fallback_topic() -> String {
    "What our customers should know this month".into()
}

/// `[feedback]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackConfig {
    /// Phrases that fail the banned-phrase check (case-insensitive).
    #[serde(default = "default_banned_phrases")]
    pub banned_phrases: Vec<String>,

    /// CTA substrings required on top of whatever the brief asks for.
    #[serde(default)]
    pub required_cta: Vec<String>,

    /// Word ceiling applied when the brief sets none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            banned_phrases: default_banned_phrases(),
            required_cta: Vec::new(),
            max_length: None,
        }
    }
}

fn default_banned_phrases() -> Vec<String> {
    [
        "in today's fast-paced world",
        "at the end of the day",
        "it goes without saying",
        "it's worth noting that",
        "game-changing",
        "revolutionary",
        "cutting-edge",
        "picture this:",
        "let me tell you about",
        "here's the thing",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

// ---------------------------------------------------------------------------
// Pipeline config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime pipeline configuration, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_attempts: u32,
    pub retry_ceiling: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub run_timeout: Duration,
    pub knowledge_pool_limit: usize,
    pub secondary_reserve: usize,
    pub required_partitions: Vec<Partition>,
    pub trend_categories: Vec<String>,
    pub fallback_topic: String,
    pub default_target_format: String,
    /// CTAs every brief must carry, from `[feedback]`.
    pub required_cta: Vec<String>,
    /// Word ceiling for briefs that set none, from `[feedback]`.
    pub default_max_length: Option<usize>,
    /// Drafting options; the Brief and Iterate stages derive theirs from these.
    pub generation: GenerationOptions,
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        let p = &config.pipeline;
        Self {
            max_attempts: p.max_attempts.max(1),
            retry_ceiling: p.retry_ceiling,
            backoff_base: Duration::from_millis(p.backoff_base_ms),
            backoff_max: Duration::from_millis(p.backoff_max_ms),
            run_timeout: Duration::from_secs(p.run_timeout_secs),
            knowledge_pool_limit: p.knowledge_pool_limit,
            secondary_reserve: p.secondary_reserve,
            required_partitions: p.required_partitions.clone(),
            trend_categories: p.trend_categories.clone(),
            fallback_topic: p.fallback_topic.clone(),
            default_target_format: config.defaults.target_format.clone(),
            required_cta: config.feedback.required_cta.clone(),
            default_max_length: config.feedback.max_length,
            generation: config.provider.generation_options(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.contentforge/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ContentForgeError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.contentforge/contentforge.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| ContentForgeError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        ContentForgeError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ContentForgeError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ContentForgeError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ContentForgeError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the provider API key from the env var named in config.
pub fn resolve_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.provider.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(ContentForgeError::config(format!(
            "provider API key not found. Set the {var_name} environment variable."
        ))),
    }
}

/// Check that the provider API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    resolve_api_key(config).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("knowledge_dir"));
        assert!(toml_str.contains("OPENROUTER_API_KEY"));
        assert!(toml_str.contains("max_attempts"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.pipeline.max_attempts, 3);
        assert_eq!(parsed.pipeline.required_partitions, vec![Partition::Primary]);
        assert_eq!(parsed.provider.api_key_env, "OPENROUTER_API_KEY");
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[pipeline]
max_attempts = 5
required_partitions = ["primary", "secondary"]

[feedback]
required_cta = ["Join the network"]
max_length = 1500
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.pipeline.max_attempts, 5);
        assert_eq!(config.pipeline.retry_ceiling, 3);
        assert_eq!(config.pipeline.required_partitions.len(), 2);
        assert_eq!(config.feedback.max_length, Some(1500));
        assert!(!config.feedback.banned_phrases.is_empty());

        let pipeline = PipelineConfig::from(&config);
        assert_eq!(pipeline.required_cta, ["Join the network"]);
        assert_eq!(pipeline.default_max_length, Some(1500));
        assert_eq!(pipeline.secondary_reserve, 6);
    }

    #[test]
    fn pipeline_config_from_app_config() {
        let app = AppConfig::default();
        let pipeline = PipelineConfig::from(&app);
        assert_eq!(pipeline.max_attempts, 3);
        assert_eq!(pipeline.backoff_base, Duration::from_millis(500));
        assert_eq!(pipeline.run_timeout, Duration::from_secs(600));
        assert_eq!(pipeline.default_target_format, "blog_post");
    }

    #[test]
    fn zero_max_attempts_is_clamped() {
        let mut app = AppConfig::default();
        app.pipeline.max_attempts = 0;
        assert_eq!(PipelineConfig::from(&app).max_attempts, 1);
    }

    #[test]
    fn base_url_gets_trailing_slash() {
        let provider = ProviderConfig::default();
        let url = provider.base_url().expect("parse");
        assert_eq!(
            url.join("chat/completions").unwrap().as_str(),
            "https://openrouter.ai/api/v1/chat/completions"
        );
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.provider.api_key_env = "CF_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}
