//! Query analyzer: asks a small, fast model to classify a request.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, warn};

use strudel_rag_core::analysis::{
    analyzer_user_prompt, compose_transformed_query, parse_analysis, QueryAnalysis,
    ANALYZER_SYSTEM_PROMPT,
};
use strudel_rag_core::generator::{GenerationRequest, TextGenerator};
use strudel_rag_core::models::{ChatMessage, Usage};

use crate::config::ModelConfig;

/// Structured classification plus the tokens it cost.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalyzedQuery {
    pub analysis: QueryAnalysis,
    pub usage: Usage,
}

/// Classifies user queries with a dedicated analyzer model.
pub struct QueryAnalyzer {
    generator: Arc<dyn TextGenerator>,
    max_tokens: u32,
    temperature: f32,
}

impl QueryAnalyzer {
    pub fn new(generator: Arc<dyn TextGenerator>, config: &ModelConfig) -> Self {
        Self {
            generator,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    /// Classify `query`. Fails when the model call fails or its answer is
    /// not the expected JSON.
    pub async fn analyze(&self, query: &str) -> Result<AnalyzedQuery> {
        let request = GenerationRequest {
            system_prompt: ANALYZER_SYSTEM_PROMPT.to_string(),
            messages: vec![ChatMessage::user(analyzer_user_prompt(query))],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };
        let output = self.generator.generate(&request).await?;
        let analysis = parse_analysis(&output.text)?;
        debug!(
            transformed_query = %analysis.transformed_query,
            is_actionable = analysis.is_actionable,
            is_code_request = analysis.is_code_request,
            "query analyzed"
        );
        Ok(AnalyzedQuery {
            analysis,
            usage: output.usage,
        })
    }

    /// Keyword-expanded search query, falling back to `query` itself when
    /// analysis fails.
    pub async fn transform_query(&self, query: &str) -> String {
        match self.analyze(query).await {
            Ok(analyzed) => compose_transformed_query(query, &analyzed.analysis),
            Err(e) => {
                warn!(error = %e, "query transformation failed, using raw query");
                query.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use strudel_rag_core::generator::GenerationOutput;

    struct Fixed(&'static str);

    #[async_trait]
    impl TextGenerator for Fixed {
        fn model_name(&self) -> &str {
            "fixed"
        }
        async fn generate(&self, _request: &GenerationRequest) -> Result<GenerationOutput> {
            Ok(GenerationOutput {
                text: self.0.to_string(),
                usage: Usage {
                    input_tokens: 10,
                    output_tokens: 5,
                },
            })
        }
    }

    fn analyzer(answer: &'static str) -> QueryAnalyzer {
        QueryAnalyzer::new(Arc::new(Fixed(answer)), &ModelConfig::default())
    }

    #[tokio::test]
    async fn test_analyze_parses_model_json() {
        let a = analyzer(r#"{"transformed_query": "bd, kick", "is_actionable": true, "is_code_request": true}"#);
        let result = a.analyze("add a kick").await.unwrap();
        assert!(result.analysis.is_code_request);
        assert_eq!(result.usage.output_tokens, 5);
    }

    #[tokio::test]
    async fn test_transform_query_composes() {
        let a = analyzer(r#"{"transformed_query": "lpf, filter", "is_actionable": true}"#);
        assert_eq!(a.transform_query("use lpf").await, "use lpf lpf, filter");
    }

    #[tokio::test]
    async fn test_transform_query_falls_back_on_bad_json() {
        let a = analyzer("no idea");
        assert_eq!(a.transform_query("use lpf").await, "use lpf");
        assert!(a.analyze("use lpf").await.is_err());
    }
}
