//! Text-generation providers.
//!
//! [`AnthropicGenerator`] (Messages API) and [`OpenAIGenerator`] (Chat
//! Completions) implement [`TextGenerator`], including server-sent-event
//! streaming. Both take a token from their provider's rate limiter before
//! every request and share the process-wide HTTP client.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use strudel_rag_core::generator::{GenerationOutput, GenerationRequest, TextGenerator};
use strudel_rag_core::models::Usage;

use crate::config::{HttpConfig, ModelConfig, RateLimitConfig};
use crate::error::ConfigError;
use crate::http;
use crate::rate_limit::{limiter_for, TokenBucket};

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Instantiate the generator named by `config.provider`.
pub fn create_generator(
    config: &ModelConfig,
    http_config: &HttpConfig,
    rate_limit: &RateLimitConfig,
) -> Result<Arc<dyn TextGenerator>> {
    match config.provider.as_str() {
        "anthropic" => Ok(Arc::new(AnthropicGenerator::new(config, http_config, rate_limit)?)),
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config, http_config, rate_limit)?)),
        other => bail!("Unknown model provider: {}", other),
    }
}

fn api_key(var: &'static str) -> Result<String, ConfigError> {
    std::env::var(var)
        .ok()
        .filter(|k| !k.trim().is_empty())
        .ok_or(ConfigError::MissingApiKey { var })
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

// ═══════════════════════════════════════════════════════════════════════
// Server-sent events
// ═══════════════════════════════════════════════════════════════════════

/// Splits a byte stream into SSE `data:` payloads.
///
/// Bytes are buffered until a newline so multi-byte characters split across
/// network chunks decode correctly.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes; returns every complete `data:` payload.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim_start().to_string());
            }
        }
        payloads
    }
}

async fn stream_events(
    response: reqwest::Response,
    mut on_data: impl FnMut(&str) -> Result<()> + Send,
) -> Result<()> {
    let mut decoder = SseDecoder::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("stream interrupted")?;
        for payload in decoder.push(&chunk) {
            on_data(&payload)?;
        }
    }
    // Trailing event without a final newline.
    for payload in decoder.push(b"\n") {
        on_data(&payload)?;
    }
    Ok(())
}

async fn check_status(response: reqwest::Response, provider: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    bail!("{} API error {}: {}", provider, status, body)
}

// ═══════════════════════════════════════════════════════════════════════
// Anthropic
// ═══════════════════════════════════════════════════════════════════════

/// Generator backed by the Anthropic Messages API.
///
/// Requires `ANTHROPIC_API_KEY` in the environment.
pub struct AnthropicGenerator {
    model: String,
    base_url: String,
    api_key: String,
    client: Client,
    limiter: Arc<TokenBucket>,
}

impl AnthropicGenerator {
    pub fn new(
        config: &ModelConfig,
        http_config: &HttpConfig,
        rate_limit: &RateLimitConfig,
    ) -> Result<Self> {
        Ok(Self {
            model: config.model.clone(),
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| ANTHROPIC_BASE_URL.to_string()),
            api_key: api_key("ANTHROPIC_API_KEY")?,
            client: http::shared_client(http_config)?,
            limiter: limiter_for("anthropic", rate_limit)?,
        })
    }

    fn body(&self, request: &GenerationRequest, stream: bool) -> Value {
        let messages: Vec<WireMessage<'_>> = request
            .messages
            .iter()
            .map(|m| WireMessage {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect();
        serde_json::json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "system": request.system_prompt,
            "messages": messages,
            "stream": stream,
        })
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response> {
        self.limiter.acquire().await;
        debug!(model = %self.model, "calling Anthropic API");
        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .context("Failed to send Anthropic request")?;
        check_status(response, "Anthropic").await
    }
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Deserialize)]
struct AnthropicContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Default)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// Apply one Anthropic stream event; returns any text delta it carries.
fn apply_anthropic_event(event: &Value, usage: &mut Usage) -> Result<Option<String>> {
    match event.get("type").and_then(Value::as_str) {
        Some("message_start") => {
            if let Some(u) = event.pointer("/message/usage") {
                usage.input_tokens = u.get("input_tokens").and_then(Value::as_u64).unwrap_or(0);
                usage.output_tokens = u.get("output_tokens").and_then(Value::as_u64).unwrap_or(0);
            }
            Ok(None)
        }
        Some("content_block_delta") => Ok(event
            .pointer("/delta/text")
            .and_then(Value::as_str)
            .map(str::to_string)),
        Some("message_delta") => {
            if let Some(out) = event.pointer("/usage/output_tokens").and_then(Value::as_u64) {
                usage.output_tokens = out;
            }
            Ok(None)
        }
        Some("error") => {
            let message = event
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("unknown stream error");
            Err(anyhow!("Anthropic stream error: {}", message))
        }
        _ => Ok(None),
    }
}

#[async_trait]
impl TextGenerator for AnthropicGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput> {
        let response = self.send(&self.body(request, false)).await?;
        let result: AnthropicResponse = response
            .json()
            .await
            .context("Failed to parse Anthropic response")?;
        let text = result
            .content
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .concat();
        Ok(GenerationOutput {
            text,
            usage: Usage {
                input_tokens: result.usage.input_tokens,
                output_tokens: result.usage.output_tokens,
            },
        })
    }

    async fn generate_stream(
        &self,
        request: &GenerationRequest,
        on_chunk: &mut (dyn for<'c> FnMut(&'c str) + Send),
    ) -> Result<GenerationOutput> {
        let response = self.send(&self.body(request, true)).await?;
        let mut output = GenerationOutput::default();
        stream_events(response, |data| {
            let event: Value = serde_json::from_str(data)
                .with_context(|| format!("Invalid Anthropic stream event: {}", data))?;
            if let Some(delta) = apply_anthropic_event(&event, &mut output.usage)? {
                on_chunk(&delta);
                output.text.push_str(&delta);
            }
            Ok(())
        })
        .await?;
        Ok(output)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// OpenAI
// ═══════════════════════════════════════════════════════════════════════

/// Generator backed by the OpenAI Chat Completions API.
///
/// Requires `OPENAI_API_KEY` in the environment. `url` may point at any
/// compatible endpoint.
pub struct OpenAIGenerator {
    model: String,
    base_url: String,
    api_key: String,
    client: Client,
    limiter: Arc<TokenBucket>,
}

impl OpenAIGenerator {
    pub fn new(
        config: &ModelConfig,
        http_config: &HttpConfig,
        rate_limit: &RateLimitConfig,
    ) -> Result<Self> {
        Ok(Self {
            model: config.model.clone(),
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            api_key: api_key("OPENAI_API_KEY")?,
            client: http::shared_client(http_config)?,
            limiter: limiter_for("openai", rate_limit)?,
        })
    }

    fn body(&self, request: &GenerationRequest, stream: bool) -> Value {
        let mut messages = vec![WireMessage {
            role: "system",
            content: &request.system_prompt,
        }];
        messages.extend(request.messages.iter().map(|m| WireMessage {
            role: m.role.as_str(),
            content: &m.content,
        }));
        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": messages,
        });
        if stream {
            body["stream"] = Value::Bool(true);
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response> {
        self.limiter.acquire().await;
        debug!(model = %self.model, "calling OpenAI API");
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .context("Failed to send OpenAI request")?;
        check_status(response, "OpenAI").await
    }
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Apply one OpenAI stream payload; returns any text delta it carries.
fn apply_openai_event(data: &str, usage: &mut Usage) -> Result<Option<String>> {
    if data == "[DONE]" {
        return Ok(None);
    }
    let event: Value =
        serde_json::from_str(data).with_context(|| format!("Invalid OpenAI stream event: {}", data))?;
    if let Some(message) = event.pointer("/error/message").and_then(Value::as_str) {
        bail!("OpenAI stream error: {}", message);
    }
    if let Some(u) = event.get("usage").filter(|u| !u.is_null()) {
        usage.input_tokens = u.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0);
        usage.output_tokens = u.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0);
    }
    Ok(event
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string))
}

#[async_trait]
impl TextGenerator for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput> {
        let response = self.send(&self.body(request, false)).await?;
        let result: OpenAiResponse = response
            .json()
            .await
            .context("Failed to parse OpenAI response")?;
        let text = result
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();
        let usage = result
            .usage
            .map(|u| Usage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();
        Ok(GenerationOutput { text, usage })
    }

    async fn generate_stream(
        &self,
        request: &GenerationRequest,
        on_chunk: &mut (dyn for<'c> FnMut(&'c str) + Send),
    ) -> Result<GenerationOutput> {
        let response = self.send(&self.body(request, true)).await?;
        let mut output = GenerationOutput::default();
        stream_events(response, |data| {
            if let Some(delta) = apply_openai_event(data, &mut output.usage)? {
                on_chunk(&delta);
                output.text.push_str(&delta);
            }
            Ok(())
        })
        .await?;
        Ok(output)
    }
}
