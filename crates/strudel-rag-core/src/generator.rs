//! Text-generation capability.
//!
//! A [`TextGenerator`] turns a system prompt plus a conversation into text.
//! Concrete providers (Anthropic, OpenAI) live in the app crate; callers may
//! also pass their own implementation per request (bring-your-own-key).

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{ChatMessage, Usage};

/// Inputs for one generator call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system_prompt: String,
    /// Conversation so far, ending with the current user turn.
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Text and token usage returned by a generator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationOutput {
    pub text: String,
    pub usage: Usage,
}

/// A pluggable language-model backend.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Identifier reported in responses (e.g. `"claude-sonnet-4-20250514"`).
    fn model_name(&self) -> &str;

    /// Generate a complete response.
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput>;

    /// Generate while delivering text deltas to `on_chunk` in order.
    ///
    /// The concatenation of all deltas equals the returned `text`. The
    /// default implementation delivers the whole response as one delta.
    async fn generate_stream(
        &self,
        request: &GenerationRequest,
        on_chunk: &mut (dyn for<'c> FnMut(&'c str) + Send),
    ) -> Result<GenerationOutput> {
        let output = self.generate(request).await?;
        if !output.text.is_empty() {
            on_chunk(&output.text);
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl TextGenerator for Echo {
        fn model_name(&self) -> &str {
            "echo"
        }

        async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput> {
            let text = request
                .messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            Ok(GenerationOutput {
                text,
                usage: Usage {
                    input_tokens: 1,
                    output_tokens: 1,
                },
            })
        }
    }

    #[tokio::test]
    async fn test_default_stream_emits_single_chunk() {
        let request = GenerationRequest {
            system_prompt: String::new(),
            messages: vec![ChatMessage::user("s(\"bd\")")],
            max_tokens: 10,
            temperature: 0.0,
        };
        let mut chunks = Vec::new();
        let output = Echo
            .generate_stream(&request, &mut |c: &str| chunks.push(c.to_string()))
            .await
            .unwrap();
        assert_eq!(chunks, vec!["s(\"bd\")".to_string()]);
        assert_eq!(output.text, chunks.concat());
    }
}
