//! Generation orchestrator: one natural-language request in, one response out.
//!
//! # Turn
//!
//! ```text
//! analyze ─▶ check cache ─▶ retrieve ─▶ prompt ─▶ generate ─▶ [NEED_DOCS?]
//!                 │ hit                                 │ yes: clear cache,
//!                 └──────────────▶ prompt (cache note)  │ re-retrieve topic,
//!                                                       │ regenerate once
//!                                                       ▼
//!                                       classify ─▶ validate ─▶ [retry once]
//! ```
//!
//! - Conversational queries ("thanks", "hi") skip analysis and retrieval.
//! - Custom (caller-supplied) generators skip analysis when
//!   `generator.skip_analysis_for_custom` is set.
//! - With `retrieval.clarify_before_generating`, a query the analyzer calls
//!   vague returns its clarifying questions without generating.
//! - The streamed variant skips validation and holds back output while it
//!   could still be a `[NEED_DOCS: …]` marker.
//!
//! The orchestrator keeps no per-turn state outside locals. The RAG cache is
//! the only shared state it writes.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use strudel_rag_core::analysis::{compose_transformed_query, QueryAnalysis};
use strudel_rag_core::cache::RagCache;
use strudel_rag_core::generator::{GenerationOutput, GenerationRequest, TextGenerator};
use strudel_rag_core::models::{
    CachedRagResult, ChatMessage, DocChunk, ExampleProgram, GenerateResponse, StreamEvent, Usage,
};
use strudel_rag_core::prompt::{build_system_prompt, retry_system_prompt, PromptContext};
use strudel_rag_core::response::{
    classify_output, is_conversational, parse_need_docs, scan_need_docs_prefix, NeedDocsScan,
    OutputShape,
};
use strudel_rag_core::retrieval::{doc_references, program_references};
use strudel_rag_core::store::CorpusStore;
use strudel_rag_core::validate::CodeValidator;

use crate::analyzer::QueryAnalyzer;
use crate::cache::InMemoryRagCache;
use crate::cheatsheet::cheatsheet;
use crate::config::{Config, GeneratorConfig, RetrievalConfig};
use crate::embedding::create_embedder;
use crate::error::GenerateError;
use crate::llm::create_generator;
use crate::retriever::{cancellable, HybridRetriever};
use crate::validator::create_validator;

/// Input for one turn.
#[derive(Clone, Default)]
pub struct GenerateRequest {
    pub user_query: String,
    /// Current editor contents; may be empty.
    pub editor_state: String,
    /// Prior turns, oldest first.
    pub conversation_history: Vec<ChatMessage>,
    /// Enables the RAG cache for this turn.
    pub session_id: Option<String>,
    /// Bring-your-own-key generator replacing the configured one.
    pub custom_generator: Option<Arc<dyn TextGenerator>>,
}

impl GenerateRequest {
    pub fn new(user_query: impl Into<String>) -> Self {
        Self {
            user_query: user_query.into(),
            ..Self::default()
        }
    }

    pub fn with_editor_state(mut self, editor_state: impl Into<String>) -> Self {
        self.editor_state = editor_state.into();
        self
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.conversation_history = history;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.custom_generator = Some(generator);
        self
    }

    fn session_label(&self) -> &str {
        self.session_id.as_deref().unwrap_or("-")
    }
}

/// Context assembled before the first generator call.
struct Turn {
    generator: Arc<dyn TextGenerator>,
    analysis: Option<QueryAnalysis>,
    docs: Vec<DocChunk>,
    examples: Vec<ExampleProgram>,
    used_rag_cache: bool,
    messages: Vec<ChatMessage>,
}

impl Turn {
    fn is_actionable(&self) -> bool {
        self.analysis.as_ref().map_or(true, |a| a.is_actionable)
    }

    fn clarifying_questions(&self) -> Vec<String> {
        self.analysis
            .as_ref()
            .map(|a| a.clarifying_questions.clone())
            .unwrap_or_default()
    }

    fn response(&self, shape: OutputShape, usage: Usage) -> GenerateResponse {
        GenerateResponse {
            is_code_response: shape.is_code(),
            content: shape.into_content(),
            is_actionable: self.is_actionable(),
            clarifying_questions: self.clarifying_questions(),
            docs_retrieved: self.docs.len(),
            examples_retrieved: self.examples.len(),
            doc_references: doc_references(&self.docs),
            program_references: program_references(&self.examples),
            model: self.generator.model_name().to_string(),
            usage,
            did_retry: false,
            validation_error: String::new(),
        }
    }

    fn refs_event(&self) -> StreamEvent {
        StreamEvent::Refs {
            doc_references: doc_references(&self.docs),
            program_references: program_references(&self.examples),
        }
    }
}

enum Prepared {
    /// The analyzer found the request too vague to act on.
    Clarify(GenerateResponse),
    Ready(Turn),
}

pub struct Orchestrator {
    generator: Arc<dyn TextGenerator>,
    analyzer: Arc<QueryAnalyzer>,
    retriever: Arc<HybridRetriever>,
    cache: Option<Arc<dyn RagCache>>,
    validator: Option<Arc<dyn CodeValidator>>,
    cheatsheet: String,
    generator_config: GeneratorConfig,
    retrieval: RetrievalConfig,
}

impl Orchestrator {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        analyzer: Arc<QueryAnalyzer>,
        retriever: Arc<HybridRetriever>,
        config: &Config,
    ) -> Self {
        Self {
            generator,
            analyzer,
            retriever,
            cache: None,
            validator: None,
            cheatsheet: cheatsheet(config.cheatsheet_path.as_deref()).to_string(),
            generator_config: config.generator.clone(),
            retrieval: config.retrieval.clone(),
        }
    }

    /// Wire every provider named in `config` around `store`.
    pub fn from_config(config: &Config, store: Arc<dyn CorpusStore>) -> Result<Self> {
        let generator = create_generator(
            &config.generator.model_config(),
            &config.http,
            &config.rate_limit,
        )?;
        let analyzer_generator = create_generator(&config.analyzer, &config.http, &config.rate_limit)?;
        let analyzer = Arc::new(QueryAnalyzer::new(analyzer_generator, &config.analyzer));
        let embedder = create_embedder(&config.embedding, &config.http, &config.rate_limit)?;
        let retriever = Arc::new(HybridRetriever::new(store, embedder, config.retrieval.clone()));
        let validator = create_validator(&config.validator, &config.http)?;

        let mut orchestrator = Self::new(generator, analyzer, retriever, config)
            .with_cache(Arc::new(InMemoryRagCache::new()));
        orchestrator.validator = validator;
        Ok(orchestrator)
    }

    pub fn with_cache(mut self, cache: Arc<dyn RagCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn CodeValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_cheatsheet(mut self, cheatsheet: impl Into<String>) -> Self {
        self.cheatsheet = cheatsheet.into();
        self
    }

    pub fn retriever(&self) -> &HybridRetriever {
        &self.retriever
    }

    // ═══════════════════════════════════════════════════════════════════
    // Public operations
    // ═══════════════════════════════════════════════════════════════════

    /// Run one turn and return the complete response.
    pub async fn generate(
        &self,
        req: &GenerateRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerateResponse, GenerateError> {
        info!(session_id = %req.session_label(), "generate");
        let mut turn = match self.prepare(req, cancel).await? {
            Prepared::Clarify(response) => return Ok(response),
            Prepared::Ready(turn) => turn,
        };

        let mut system_prompt = self.system_prompt(req, &turn);
        let first = self
            .run_generator(cancel, turn.generator.generate(&self.request(&turn, &system_prompt)))
            .await?;
        let mut usage = first.usage;
        let mut text = first.text;

        if turn.used_rag_cache {
            if let Some(topic) = parse_need_docs(&text) {
                self.refresh_for_topic(req, &mut turn, &topic, cancel).await?;
                system_prompt = self.system_prompt(req, &turn);
                let second = self
                    .run_generator(cancel, turn.generator.generate(&self.request(&turn, &system_prompt)))
                    .await?;
                usage += second.usage;
                text = second.text;
            }
        }

        let shape = classify_output(&text);
        let rejected = self.validation_error(&shape, cancel).await?;
        let Some(first_error) = rejected else {
            return Ok(turn.response(shape, usage));
        };

        info!(
            session_id = %req.session_label(),
            error = %first_error,
            "generated code failed validation, retrying"
        );
        let retry_prompt = retry_system_prompt(&system_prompt, shape.content(), &first_error);
        let retry = self
            .run_generator(cancel, turn.generator.generate(&self.request(&turn, &retry_prompt)))
            .await?;
        usage += retry.usage;

        let mut response = turn.response(classify_output(&retry.text), usage);
        response.did_retry = true;
        response.validation_error = first_error;
        Ok(response)
    }

    /// Run one turn, delivering [`StreamEvent`]s as output arrives.
    ///
    /// Exactly one `Refs` event precedes the first `Chunk` (a second `Refs`
    /// follows a cache refresh), and exactly one `Done` or `Error` ends the
    /// stream. The returned value mirrors the final event.
    pub async fn generate_stream<F>(
        &self,
        req: &GenerateRequest,
        cancel: &CancellationToken,
        mut on_event: F,
    ) -> Result<GenerateResponse, GenerateError>
    where
        F: FnMut(StreamEvent) + Send,
    {
        info!(session_id = %req.session_label(), "generate_stream");
        match self.stream_turn(req, cancel, &mut on_event).await {
            Ok(response) => {
                on_event(StreamEvent::Done {
                    content: response.content.clone(),
                    is_code_response: response.is_code_response,
                    is_actionable: response.is_actionable,
                    clarifying_questions: response.clarifying_questions.clone(),
                    model: response.model.clone(),
                    usage: response.usage,
                    doc_references: response.doc_references.clone(),
                    program_references: response.program_references.clone(),
                });
                Ok(response)
            }
            Err(e) => {
                on_event(StreamEvent::Error {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn stream_turn<F>(
        &self,
        req: &GenerateRequest,
        cancel: &CancellationToken,
        on_event: &mut F,
    ) -> Result<GenerateResponse, GenerateError>
    where
        F: FnMut(StreamEvent) + Send,
    {
        let mut turn = match self.prepare(req, cancel).await? {
            Prepared::Clarify(response) => {
                on_event(StreamEvent::Refs {
                    doc_references: Vec::new(),
                    program_references: Vec::new(),
                });
                return Ok(response);
            }
            Prepared::Ready(turn) => turn,
        };
        on_event(turn.refs_event());

        let mut gate = if turn.used_rag_cache {
            NeedDocsGate::guarded()
        } else {
            NeedDocsGate::open()
        };
        let system_prompt = self.system_prompt(req, &turn);
        let first = self
            .stream_generator(&turn, &system_prompt, &mut gate, on_event, cancel)
            .await?;
        let mut usage = first.usage;
        let mut text = first.text;

        match gate.finish() {
            GateEnd::Flush(pending) => on_event(StreamEvent::Chunk { content: pending }),
            GateEnd::Marker(topic) => {
                self.refresh_for_topic(req, &mut turn, &topic, cancel).await?;
                on_event(turn.refs_event());
                let system_prompt = self.system_prompt(req, &turn);
                let mut gate = NeedDocsGate::open();
                let second = self
                    .stream_generator(&turn, &system_prompt, &mut gate, on_event, cancel)
                    .await?;
                usage += second.usage;
                text = second.text;
            }
            GateEnd::Clean => {}
        }

        Ok(turn.response(classify_output(&text), usage))
    }

    async fn stream_generator<F>(
        &self,
        turn: &Turn,
        system_prompt: &str,
        gate: &mut NeedDocsGate,
        on_event: &mut F,
        cancel: &CancellationToken,
    ) -> Result<GenerationOutput, GenerateError>
    where
        F: FnMut(StreamEvent) + Send,
    {
        let request = self.request(turn, system_prompt);
        let mut relay = |delta: &str| {
            if let Some(content) = gate.push(delta) {
                on_event(StreamEvent::Chunk { content });
            }
        };
        self.run_generator(cancel, turn.generator.generate_stream(&request, &mut relay))
            .await
    }

    // ═══════════════════════════════════════════════════════════════════
    // Turn preparation
    // ═══════════════════════════════════════════════════════════════════

    async fn prepare(
        &self,
        req: &GenerateRequest,
        cancel: &CancellationToken,
    ) -> Result<Prepared, GenerateError> {
        if req.user_query.trim().is_empty() {
            return Err(GenerateError::InvalidRequest("user_query is empty".into()));
        }

        let generator = req
            .custom_generator
            .clone()
            .unwrap_or_else(|| self.generator.clone());
        let conversational = is_conversational(&req.user_query);
        let skip_analysis = conversational
            || (req.custom_generator.is_some() && self.generator_config.skip_analysis_for_custom);

        let analysis = if skip_analysis {
            debug!(conversational, "skipping query analysis");
            None
        } else {
            let analyzed = cancellable(cancel, async {
                self.analyzer
                    .analyze(&req.user_query)
                    .await
                    .map_err(GenerateError::Analyzer)
            })
            .await?;
            debug!(
                input_tokens = analyzed.usage.input_tokens,
                output_tokens = analyzed.usage.output_tokens,
                "analyzer usage"
            );
            Some(analyzed.analysis)
        };

        if let Some(a) = &analysis {
            if !a.is_actionable && self.retrieval.clarify_before_generating {
                info!(session_id = %req.session_label(), "request needs clarification");
                return Ok(Prepared::Clarify(GenerateResponse {
                    is_actionable: false,
                    clarifying_questions: a.clarifying_questions.clone(),
                    model: generator.model_name().to_string(),
                    ..GenerateResponse::default()
                }));
            }
        }

        let mut messages = req.conversation_history.clone();
        messages.push(ChatMessage::user(req.user_query.as_str()));

        let mut turn = Turn {
            generator,
            analysis,
            docs: Vec::new(),
            examples: Vec::new(),
            used_rag_cache: false,
            messages,
        };
        if conversational {
            return Ok(Prepared::Ready(turn));
        }

        if let Some(cached) = self.cached(req, cancel).await? {
            let (docs, examples) = cached.into_parts();
            debug!(
                session_id = %req.session_label(),
                docs = docs.len(),
                examples = examples.len(),
                "RAG cache hit"
            );
            turn.docs = docs;
            turn.examples = examples;
            turn.used_rag_cache = true;
            return Ok(Prepared::Ready(turn));
        }

        let search_query = match &turn.analysis {
            Some(a) => compose_transformed_query(&req.user_query, a),
            None => req.user_query.clone(),
        };
        let retrieved = self
            .retriever
            .retrieve(
                &search_query,
                &req.editor_state,
                self.retrieval.docs_k,
                self.retrieval.examples_k,
                cancel,
            )
            .await?;
        self.store_cache(req, &search_query, &retrieved.docs, &retrieved.examples)
            .await;
        turn.docs = retrieved.docs;
        turn.examples = retrieved.examples;
        Ok(Prepared::Ready(turn))
    }

    async fn cached(
        &self,
        req: &GenerateRequest,
        cancel: &CancellationToken,
    ) -> Result<Option<CachedRagResult>, GenerateError> {
        let (Some(cache), Some(session_id)) = (&self.cache, &req.session_id) else {
            return Ok(None);
        };
        let lookup = cancellable(cancel, async { Ok(cache.get(session_id).await) }).await?;
        match lookup {
            Ok(hit) => Ok(hit),
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "RAG cache read failed");
                Ok(None)
            }
        }
    }

    async fn store_cache(
        &self,
        req: &GenerateRequest,
        query: &str,
        docs: &[DocChunk],
        examples: &[ExampleProgram],
    ) {
        let (Some(cache), Some(session_id)) = (&self.cache, &req.session_id) else {
            return;
        };
        let entry = CachedRagResult::new(query, docs, examples);
        if let Err(e) = cache.set(session_id, &entry).await {
            warn!(session_id = %session_id, error = %e, "RAG cache write failed");
        }
    }

    /// Replace cached context with a fresh retrieval for `topic`.
    async fn refresh_for_topic(
        &self,
        req: &GenerateRequest,
        turn: &mut Turn,
        topic: &str,
        cancel: &CancellationToken,
    ) -> Result<(), GenerateError> {
        info!(session_id = %req.session_label(), topic = %topic, "generator requested fresh docs");
        if let (Some(cache), Some(session_id)) = (&self.cache, &req.session_id) {
            if let Err(e) = cache.clear(session_id).await {
                warn!(session_id = %session_id, topic = %topic, error = %e, "RAG cache clear failed");
            }
        }
        let retrieved = self
            .retriever
            .retrieve(
                topic,
                &req.editor_state,
                self.retrieval.docs_k,
                self.retrieval.examples_k,
                cancel,
            )
            .await?;
        self.store_cache(req, topic, &retrieved.docs, &retrieved.examples)
            .await;
        turn.docs = retrieved.docs;
        turn.examples = retrieved.examples;
        turn.used_rag_cache = false;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    // Generation helpers
    // ═══════════════════════════════════════════════════════════════════

    fn system_prompt(&self, req: &GenerateRequest, turn: &Turn) -> String {
        build_system_prompt(&PromptContext {
            cheatsheet: &self.cheatsheet,
            editor_state: &req.editor_state,
            docs: &turn.docs,
            examples: &turn.examples,
            analysis: turn.analysis.as_ref(),
            used_rag_cache: turn.used_rag_cache,
        })
    }

    fn request(&self, turn: &Turn, system_prompt: &str) -> GenerationRequest {
        GenerationRequest {
            system_prompt: system_prompt.to_string(),
            messages: turn.messages.clone(),
            max_tokens: self.generator_config.max_tokens,
            temperature: self.generator_config.temperature,
        }
    }

    /// Race a generator call against cancellation and the configured timeout.
    async fn run_generator(
        &self,
        cancel: &CancellationToken,
        call: impl Future<Output = Result<GenerationOutput>>,
    ) -> Result<GenerationOutput, GenerateError> {
        let secs = self.generator_config.timeout_secs;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GenerateError::Cancelled),
            result = tokio::time::timeout(Duration::from_secs(secs), call) => match result {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(e)) => Err(GenerateError::Generator(e)),
                Err(_) => Err(GenerateError::Timeout(secs)),
            },
        }
    }

    /// The validator's diagnostic when `shape` is code it rejects.
    async fn validation_error(
        &self,
        shape: &OutputShape,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, GenerateError> {
        let Some(validator) = &self.validator else {
            return Ok(None);
        };
        if !shape.is_code() {
            return Ok(None);
        }
        let outcome =
            cancellable(cancel, async { Ok(validator.validate(shape.content()).await) }).await?;
        match outcome {
            Ok(outcome) if outcome.valid => Ok(None),
            Ok(outcome) => Ok(Some(outcome.error)),
            Err(e) => {
                warn!(error = %e, "validator unavailable, returning unvalidated code");
                Ok(None)
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Streaming marker gate
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, PartialEq)]
enum GateState {
    Open,
    Buffering,
    Held(String),
}

/// Holds streamed output back while it could be a `[NEED_DOCS: …]` marker.
#[derive(Debug)]
struct NeedDocsGate {
    state: GateState,
    buffer: String,
}

#[derive(Debug, PartialEq)]
enum GateEnd {
    Clean,
    /// Stream ended while still undecided; relay what was held.
    Flush(String),
    Marker(String),
}

impl NeedDocsGate {
    fn open() -> Self {
        Self {
            state: GateState::Open,
            buffer: String::new(),
        }
    }

    fn guarded() -> Self {
        Self {
            state: GateState::Buffering,
            buffer: String::new(),
        }
    }

    /// Text to relay now, if any.
    fn push(&mut self, delta: &str) -> Option<String> {
        match &self.state {
            GateState::Open => Some(delta.to_string()),
            GateState::Held(_) => None,
            GateState::Buffering => {
                self.buffer.push_str(delta);
                match scan_need_docs_prefix(&self.buffer) {
                    NeedDocsScan::Pending => None,
                    NeedDocsScan::Marker(topic) => {
                        self.state = GateState::Held(topic);
                        None
                    }
                    NeedDocsScan::NotMarker => {
                        self.state = GateState::Open;
                        Some(std::mem::take(&mut self.buffer))
                    }
                }
            }
        }
    }

    fn finish(&mut self) -> GateEnd {
        match std::mem::replace(&mut self.state, GateState::Open) {
            GateState::Held(topic) => GateEnd::Marker(topic),
            GateState::Buffering if !self.buffer.is_empty() => {
                GateEnd::Flush(std::mem::take(&mut self.buffer))
            }
            _ => GateEnd::Clean,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_gate_relays_everything() {
        let mut gate = NeedDocsGate::open();
        assert_eq!(gate.push("[NEED"), Some("[NEED".to_string()));
        assert_eq!(gate.finish(), GateEnd::Clean);
    }

    #[test]
    fn test_guarded_gate_flushes_on_code() {
        let mut gate = NeedDocsGate::guarded();
        assert_eq!(gate.push("  "), None);
        assert_eq!(gate.push("s(\"bd"), Some("  s(\"bd".to_string()));
        assert_eq!(gate.push("\")"), Some("\")".to_string()));
        assert_eq!(gate.finish(), GateEnd::Clean);
    }

    #[test]
    fn test_guarded_gate_holds_marker() {
        let mut gate = NeedDocsGate::guarded();
        assert_eq!(gate.push("[NEED_"), None);
        assert_eq!(gate.push("DOCS: reverb"), None);
        assert_eq!(gate.push("]"), None);
        assert_eq!(gate.push(" trailing"), None);
        assert_eq!(gate.finish(), GateEnd::Marker("reverb".to_string()));
    }

    #[test]
    fn test_guarded_gate_flushes_undecided_tail() {
        let mut gate = NeedDocsGate::guarded();
        assert_eq!(gate.push("[NEED"), None);
        assert_eq!(gate.finish(), GateEnd::Flush("[NEED".to_string()));
    }
}
