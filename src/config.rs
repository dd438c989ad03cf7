//! TOML configuration.
//!
//! Every field has a default, so an empty file is a valid configuration.
//! [`load_config`] reads and parses the file, then [`Config::validate`]
//! rejects values the pipeline cannot run with.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub analyzer: ModelConfig,
    #[serde(default = "default_generator_config")]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub validator: ValidatorConfig,
    #[serde(default)]
    pub session: SessionConfig,
    /// Cheatsheet override; the embedded cheatsheet is used when unset.
    #[serde(default)]
    pub cheatsheet_path: Option<PathBuf>,
}

// ═══════════════════════════════════════════════════════════════════════
// Models
// ═══════════════════════════════════════════════════════════════════════

/// Provider, model and sampling settings for one model stage.
#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_model_provider")]
    pub provider: String,
    #[serde(default = "default_analyzer_model")]
    pub model: String,
    #[serde(default = "default_analyzer_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_analyzer_temperature")]
    pub temperature: f32,
    /// Base URL override (OpenAI-compatible gateways, proxies).
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_model_provider(),
            model: default_analyzer_model(),
            max_tokens: default_analyzer_max_tokens(),
            temperature: default_analyzer_temperature(),
            url: None,
        }
    }
}

fn default_model_provider() -> String {
    "anthropic".to_string()
}
fn default_analyzer_model() -> String {
    "claude-3-5-haiku-latest".to_string()
}
fn default_analyzer_max_tokens() -> u32 {
    200
}
fn default_analyzer_temperature() -> f32 {
    0.3
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneratorConfig {
    #[serde(default = "default_model_provider")]
    pub provider: String,
    #[serde(default = "default_generator_model")]
    pub model: String,
    #[serde(default = "default_generator_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_generator_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub url: Option<String>,
    /// Wall-clock limit for a single generator call.
    #[serde(default = "default_generator_timeout_secs")]
    pub timeout_secs: u64,
    /// Custom (caller-supplied) generators skip structured analysis.
    #[serde(default = "default_true")]
    pub skip_analysis_for_custom: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        default_generator_config()
    }
}

impl GeneratorConfig {
    /// The provider/model/sampling subset shared with the analyzer stage.
    pub fn model_config(&self) -> ModelConfig {
        ModelConfig {
            provider: self.provider.clone(),
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            url: self.url.clone(),
        }
    }
}

fn default_generator_config() -> GeneratorConfig {
    GeneratorConfig {
        provider: default_model_provider(),
        model: default_generator_model(),
        max_tokens: default_generator_max_tokens(),
        temperature: default_generator_temperature(),
        url: None,
        timeout_secs: default_generator_timeout_secs(),
        skip_analysis_for_custom: true,
    }
}

fn default_generator_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}
fn default_generator_max_tokens() -> u32 {
    4096
}
fn default_generator_temperature() -> f32 {
    0.7
}
fn default_generator_timeout_secs() -> u64 {
    60
}
fn default_true() -> bool {
    true
}

// ═══════════════════════════════════════════════════════════════════════
// Embedding
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Ollama base URL (default `http://localhost:11434`).
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dims: default_dims(),
            max_retries: default_max_retries(),
            url: None,
        }
    }
}

fn default_embedding_provider() -> String {
    "openai".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_dims() -> usize {
    1536
}
fn default_max_retries() -> u32 {
    5
}

// ═══════════════════════════════════════════════════════════════════════
// Retrieval
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Generic top-k used when a caller does not pick a corpus-specific k.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_docs_k")]
    pub docs_k: usize,
    #[serde(default = "default_examples_k")]
    pub examples_k: usize,
    /// Fuse full-text results into dense results when the store supports it.
    #[serde(default)]
    pub lexical: bool,
    #[serde(default = "default_dense_weight")]
    pub dense_weight: f64,
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f64,
    #[serde(default = "default_page_examples_max_len")]
    pub page_examples_max_len: usize,
    /// Return clarifying questions without generating for vague requests.
    #[serde(default = "default_true")]
    pub clarify_before_generating: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            docs_k: default_docs_k(),
            examples_k: default_examples_k(),
            lexical: false,
            dense_weight: default_dense_weight(),
            lexical_weight: default_lexical_weight(),
            page_examples_max_len: default_page_examples_max_len(),
            clarify_before_generating: true,
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_docs_k() -> usize {
    3
}
fn default_examples_k() -> usize {
    2
}
fn default_dense_weight() -> f64 {
    strudel_rag_core::retrieval::DEFAULT_DENSE_WEIGHT
}
fn default_lexical_weight() -> f64 {
    strudel_rag_core::retrieval::DEFAULT_LEXICAL_WEIGHT
}
fn default_page_examples_max_len() -> usize {
    strudel_rag_core::retrieval::DEFAULT_PAGE_EXAMPLES_MAX_LEN
}

// ═══════════════════════════════════════════════════════════════════════
// Transport and storage
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_rps")]
    pub requests_per_second: f64,
    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rps(),
            burst: default_burst(),
        }
    }
}

fn default_rps() -> f64 {
    50.0
}
fn default_burst() -> u32 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_pool_idle_timeout_secs")]
    pub pool_idle_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            pool_idle_timeout_secs: default_pool_idle_timeout_secs(),
        }
    }
}

fn default_http_timeout_secs() -> u64 {
    120
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_pool_idle_timeout_secs() -> u64 {
    90
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    #[serde(default = "default_corpus_path")]
    pub path: PathBuf,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            path: default_corpus_path(),
        }
    }
}

fn default_corpus_path() -> PathBuf {
    PathBuf::from("./data/corpus.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ValidatorConfig {
    /// `"syntax"`, `"http"`, or `"none"`.
    #[serde(default = "default_validator_kind")]
    pub kind: String,
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            kind: default_validator_kind(),
            url: None,
        }
    }
}

fn default_validator_kind() -> String {
    "syntax".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_hours: default_ttl_hours(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_ttl_hours() -> u64 {
    24
}
fn default_sweep_interval_secs() -> u64 {
    3600
}

// ═══════════════════════════════════════════════════════════════════════
// Loading
// ═══════════════════════════════════════════════════════════════════════

const MODEL_PROVIDERS: &[&str] = &["anthropic", "openai"];
const EMBEDDING_PROVIDERS: &[&str] = &["openai", "ollama", "hash", "disabled"];
const VALIDATOR_KINDS: &[&str] = &["syntax", "http", "none"];
const MAX_CORPUS_K: usize = 50;

impl Config {
    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_model("analyzer", &self.analyzer)?;
        check_model("generator", &self.generator.model_config())?;
        if self.generator.timeout_secs == 0 {
            return Err(ConfigError::invalid("generator.timeout_secs must be > 0"));
        }

        if !EMBEDDING_PROVIDERS.contains(&self.embedding.provider.as_str()) {
            return Err(ConfigError::invalid(format!(
                "Unknown embedding provider: '{}'. Must be openai, ollama, hash, or disabled.",
                self.embedding.provider
            )));
        }
        if self.embedding.provider != "disabled" {
            if self.embedding.dims == 0 {
                return Err(ConfigError::invalid(format!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    self.embedding.provider
                )));
            }
            if self.embedding.model.trim().is_empty() {
                return Err(ConfigError::invalid(format!(
                    "embedding.model must be specified when provider is '{}'",
                    self.embedding.provider
                )));
            }
        }

        let r = &self.retrieval;
        if r.docs_k > MAX_CORPUS_K || r.examples_k > MAX_CORPUS_K || r.top_k > MAX_CORPUS_K {
            return Err(ConfigError::invalid(format!(
                "retrieval top_k, docs_k and examples_k must be <= {}",
                MAX_CORPUS_K
            )));
        }
        if !(0.0..=1.0).contains(&r.dense_weight) || !(0.0..=1.0).contains(&r.lexical_weight) {
            return Err(ConfigError::invalid(
                "retrieval.dense_weight and retrieval.lexical_weight must be in [0.0, 1.0]",
            ));
        }

        if self.rate_limit.requests_per_second <= 0.0 || self.rate_limit.burst == 0 {
            return Err(ConfigError::invalid(
                "rate_limit.requests_per_second and rate_limit.burst must be > 0",
            ));
        }

        if !VALIDATOR_KINDS.contains(&self.validator.kind.as_str()) {
            return Err(ConfigError::invalid(format!(
                "Unknown validator kind: '{}'. Must be syntax, http, or none.",
                self.validator.kind
            )));
        }
        if self.validator.kind == "http" && self.validator.url.is_none() {
            return Err(ConfigError::invalid(
                "validator.url is required when validator.kind is 'http'",
            ));
        }

        if self.session.ttl_hours == 0 || self.session.sweep_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "session.ttl_hours and session.sweep_interval_secs must be > 0",
            ));
        }
        Ok(())
    }
}

fn check_model(stage: &str, model: &ModelConfig) -> Result<(), ConfigError> {
    if !MODEL_PROVIDERS.contains(&model.provider.as_str()) {
        return Err(ConfigError::invalid(format!(
            "Unknown {} provider: '{}'. Must be anthropic or openai.",
            stage, model.provider
        )));
    }
    if model.model.trim().is_empty() {
        return Err(ConfigError::invalid(format!("{}.model must be set", stage)));
    }
    if model.max_tokens == 0 {
        return Err(ConfigError::invalid(format!("{}.max_tokens must be > 0", stage)));
    }
    Ok(())
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}
