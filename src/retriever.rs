//! Hybrid retriever over the doc and example corpora.
//!
//! # Algorithm
//!
//! 1. Embed the search query and, when the editor yields keywords, the
//!    contextual query `search_query + " " + editor_keywords`. Both
//!    embeddings are computed once per turn and shared by the doc and
//!    example searches.
//! 2. Primary search with `k + 2`; contextual search with `k`. Both run
//!    concurrently. With `retrieval.lexical`, each pass also runs a
//!    full-text search and fuses it (dense 0.7, lexical 0.3).
//! 3. Merge (primary first, dedupe by id, stable sort, truncate to `k`).
//! 4. Docs only: fetch `PAGE_SUMMARY` and short `PAGE_EXAMPLES` for every
//!    page in the merge, concurrently, then group by page.
//!
//! Primary failures abort the call. Contextual searches, full-text
//! searches and special-chunk fetches are auxiliary: failures are logged
//! and the call continues without them.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use strudel_rag_core::code_analysis::extract_keywords;
use strudel_rag_core::embedding::Embedder;
use strudel_rag_core::models::{DocChunk, ExampleProgram, PAGE_EXAMPLES, PAGE_SUMMARY};
use strudel_rag_core::retrieval::{
    contextual_query, fuse_weighted, merge_results, organize_by_page, page_examples_fit,
    pages_in_order, PageSpecials, PRIMARY_SLACK,
};
use strudel_rag_core::store::CorpusStore;

use crate::analyzer::QueryAnalyzer;
use crate::config::RetrievalConfig;
use crate::error::GenerateError;

/// Retrieved context for one turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Retrieved {
    pub docs: Vec<DocChunk>,
    pub examples: Vec<ExampleProgram>,
}

/// Query texts and their embeddings for one turn.
struct QueryVectors {
    primary_text: String,
    primary: Vec<f32>,
    contextual: Option<(String, Vec<f32>)>,
}

/// Race `fut` against `cancel`.
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, GenerateError>>,
) -> Result<T, GenerateError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(GenerateError::Cancelled),
        result = fut => result,
    }
}

pub struct HybridRetriever {
    store: Arc<dyn CorpusStore>,
    embedder: Arc<dyn Embedder>,
    analyzer: Option<Arc<QueryAnalyzer>>,
    config: RetrievalConfig,
}

impl HybridRetriever {
    pub fn new(
        store: Arc<dyn CorpusStore>,
        embedder: Arc<dyn Embedder>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            analyzer: None,
            config,
        }
    }

    /// Expand raw user queries with analyzer keywords before searching.
    pub fn with_analyzer(mut self, analyzer: Arc<QueryAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// The query actually searched: the analyzer expansion of `user_query`
    /// when an analyzer is wired, otherwise `user_query` unchanged.
    pub async fn search_query_for(&self, user_query: &str) -> String {
        match &self.analyzer {
            Some(analyzer) => analyzer.transform_query(user_query).await,
            None => user_query.to_string(),
        }
    }

    /// Top-k docs for a raw user query, biased toward the editor contents.
    ///
    /// `k` bounds the ranked merge. Each page in that merge is then led by
    /// its `PAGE_SUMMARY` and `PAGE_EXAMPLES` chunks when they exist, so the
    /// result holds at most `k` ranked chunks plus two specials per page.
    pub async fn hybrid_search_docs(
        &self,
        user_query: &str,
        editor_state: &str,
        k: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<DocChunk>, GenerateError> {
        cancellable(cancel, async {
            let search_query = self.search_query_for(user_query).await;
            if k == 0 {
                return Ok(Vec::new());
            }
            let vectors = self.embed_queries(&search_query, editor_state).await?;
            self.docs_for(&vectors, k).await
        })
        .await
    }

    /// Top-k examples for a raw user query, biased toward the editor contents.
    pub async fn hybrid_search_examples(
        &self,
        user_query: &str,
        editor_state: &str,
        k: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<ExampleProgram>, GenerateError> {
        cancellable(cancel, async {
            let search_query = self.search_query_for(user_query).await;
            if k == 0 {
                return Ok(Vec::new());
            }
            let vectors = self.embed_queries(&search_query, editor_state).await?;
            self.examples_for(&vectors, k).await
        })
        .await
    }

    /// Docs and examples for an already-expanded search query, fetched
    /// concurrently with shared query embeddings.
    pub async fn retrieve(
        &self,
        search_query: &str,
        editor_state: &str,
        docs_k: usize,
        examples_k: usize,
        cancel: &CancellationToken,
    ) -> Result<Retrieved, GenerateError> {
        cancellable(cancel, async {
            if docs_k == 0 && examples_k == 0 {
                return Ok(Retrieved::default());
            }
            let vectors = self.embed_queries(search_query, editor_state).await?;
            let (docs, examples) =
                tokio::try_join!(self.docs_for(&vectors, docs_k), self.examples_for(&vectors, examples_k))?;
            debug!(
                query = %search_query,
                docs = docs.len(),
                examples = examples.len(),
                "retrieval complete"
            );
            Ok(Retrieved { docs, examples })
        })
        .await
    }

    async fn embed_queries(
        &self,
        search_query: &str,
        editor_state: &str,
    ) -> Result<QueryVectors, GenerateError> {
        let contextual_text = contextual_query(search_query, &extract_keywords(editor_state));

        let primary_fut = self.embedder.embed(search_query);
        let contextual_fut = async {
            match &contextual_text {
                Some(text) => Some(self.embedder.embed(text).await),
                None => None,
            }
        };
        let (primary, contextual) = tokio::join!(primary_fut, contextual_fut);

        let primary = primary.map_err(GenerateError::Retrieval)?;
        let contextual = match (contextual_text, contextual) {
            (Some(text), Some(Ok(vec))) => Some((text, vec)),
            (_, Some(Err(e))) => {
                warn!(error = %e, "contextual query embedding failed");
                None
            }
            _ => None,
        };

        Ok(QueryVectors {
            primary_text: search_query.to_string(),
            primary,
            contextual,
        })
    }

    fn lexical_enabled(&self) -> bool {
        self.config.lexical && self.store.supports_keyword_search()
    }

    async fn dense_docs(&self, text: &str, vector: &[f32], k: usize) -> Result<Vec<DocChunk>> {
        let dense = self.store.search_docs(vector, k).await?;
        if !self.lexical_enabled() {
            return Ok(dense);
        }
        let lexical = match self.store.keyword_search_docs(text, k).await {
            Ok(lexical) => lexical,
            Err(e) => {
                warn!(error = %e, "full-text doc search failed");
                Vec::new()
            }
        };
        let mut fused =
            fuse_weighted(dense, lexical, self.config.dense_weight, self.config.lexical_weight);
        fused.truncate(k);
        Ok(fused)
    }

    async fn dense_examples(
        &self,
        text: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<ExampleProgram>> {
        let dense = self.store.search_examples(vector, k).await?;
        if !self.lexical_enabled() {
            return Ok(dense);
        }
        let lexical = match self.store.keyword_search_examples(text, k).await {
            Ok(lexical) => lexical,
            Err(e) => {
                warn!(error = %e, "full-text example search failed");
                Vec::new()
            }
        };
        let mut fused =
            fuse_weighted(dense, lexical, self.config.dense_weight, self.config.lexical_weight);
        fused.truncate(k);
        Ok(fused)
    }

    async fn docs_for(&self, vectors: &QueryVectors, k: usize) -> Result<Vec<DocChunk>, GenerateError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let primary_fut = self.dense_docs(&vectors.primary_text, &vectors.primary, k + PRIMARY_SLACK);
        let contextual_fut = async {
            match &vectors.contextual {
                Some((text, vec)) => match self.dense_docs(text, vec, k).await {
                    Ok(results) => results,
                    Err(e) => {
                        warn!(error = %e, "contextual doc search failed");
                        Vec::new()
                    }
                },
                None => Vec::new(),
            }
        };
        let (primary, contextual) = tokio::join!(primary_fut, contextual_fut);
        let primary = primary.map_err(GenerateError::Retrieval)?;

        let merged = merge_results(primary, contextual, k);
        let specials = self.fetch_specials(&pages_in_order(&merged)).await;
        Ok(organize_by_page(merged, &specials))
    }

    async fn examples_for(
        &self,
        vectors: &QueryVectors,
        k: usize,
    ) -> Result<Vec<ExampleProgram>, GenerateError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let primary_fut =
            self.dense_examples(&vectors.primary_text, &vectors.primary, k + PRIMARY_SLACK);
        let contextual_fut = async {
            match &vectors.contextual {
                Some((text, vec)) => match self.dense_examples(text, vec, k).await {
                    Ok(results) => results,
                    Err(e) => {
                        warn!(error = %e, "contextual example search failed");
                        Vec::new()
                    }
                },
                None => Vec::new(),
            }
        };
        let (primary, contextual) = tokio::join!(primary_fut, contextual_fut);
        let primary = primary.map_err(GenerateError::Retrieval)?;
        Ok(merge_results(primary, contextual, k))
    }

    async fn fetch_specials(&self, pages: &[String]) -> HashMap<String, PageSpecials> {
        let fetches = pages.iter().map(|page| async move {
            let (summary, examples) = tokio::join!(
                self.store.fetch_chunk(page, PAGE_SUMMARY),
                self.store.fetch_chunk(page, PAGE_EXAMPLES)
            );
            let summary = summary.unwrap_or_else(|e| {
                warn!(page_name = %page, error = %e, "PAGE_SUMMARY fetch failed");
                None
            });
            let examples = examples
                .unwrap_or_else(|e| {
                    warn!(page_name = %page, error = %e, "PAGE_EXAMPLES fetch failed");
                    None
                })
                .filter(|chunk| page_examples_fit(chunk, self.config.page_examples_max_len));
            (page.clone(), PageSpecials { summary, examples })
        });
        join_all(fetches).await.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use strudel_rag_core::generator::{GenerationOutput, GenerationRequest, TextGenerator};
    use strudel_rag_core::store::memory::InMemoryCorpus;

    use crate::config::ModelConfig;
    use crate::embedding::HashEmbedder;

    fn chunk(id: &str, page: &str, section: &str, content: &str) -> DocChunk {
        DocChunk {
            id: id.into(),
            page_name: page.into(),
            page_url: format!("https://strudel.cc/learn/{}", page),
            section_title: section.into(),
            content: content.into(),
            similarity: 0.0,
        }
    }

    fn corpus(embedder: &HashEmbedder) -> InMemoryCorpus {
        let store = InMemoryCorpus::new();
        for doc in [
            chunk("f1", "effects", "Filters", "lpf low pass filter cutoff"),
            chunk("f2", "effects", "Reverb", "room reverb size"),
            chunk("fs", "effects", PAGE_SUMMARY, "effects summary lpf room delay"),
            chunk("fx", "effects", PAGE_EXAMPLES, "s(\"bd\").lpf(800)"),
            chunk("d1", "samples", "Drums", "bd kick drum sd snare hh hihat"),
        ] {
            let vec = embedder.embed_text(&doc.content);
            store.insert_doc(doc, vec).unwrap();
        }
        store
    }

    /// Counts store calls and fails on request.
    struct Counting {
        inner: InMemoryCorpus,
        searches: AtomicUsize,
        fail_primary: bool,
    }

    #[async_trait]
    impl CorpusStore for Counting {
        async fn search_docs(&self, v: &[f32], k: usize) -> Result<Vec<DocChunk>> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            if self.fail_primary {
                anyhow::bail!("store down");
            }
            self.inner.search_docs(v, k).await
        }
        async fn search_examples(&self, v: &[f32], k: usize) -> Result<Vec<ExampleProgram>> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            self.inner.search_examples(v, k).await
        }
        async fn fetch_chunk(&self, p: &str, s: &str) -> Result<Option<DocChunk>> {
            self.inner.fetch_chunk(p, s).await
        }
    }

    fn retriever(store: Arc<dyn CorpusStore>) -> HybridRetriever {
        HybridRetriever::new(store, Arc::new(HashEmbedder::new(256)), RetrievalConfig::default())
    }

    struct CountingAnalyzer(AtomicUsize);

    #[async_trait]
    impl TextGenerator for CountingAnalyzer {
        fn model_name(&self) -> &str {
            "counting"
        }
        async fn generate(&self, _request: &GenerationRequest) -> Result<GenerationOutput> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(GenerationOutput {
                text: r#"{"transformed_query": "lpf, filter", "is_actionable": true}"#.into(),
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn test_expand_once_then_retrieve_both_corpora() {
        let embedder = HashEmbedder::new(256);
        let calls = Arc::new(CountingAnalyzer(AtomicUsize::new(0)));
        let analyzer = QueryAnalyzer::new(calls.clone(), &ModelConfig::default());
        let r = retriever(Arc::new(corpus(&embedder))).with_analyzer(Arc::new(analyzer));
        let cancel = CancellationToken::new();

        let search_query = r.search_query_for("use lpf").await;
        assert_eq!(search_query, "use lpf lpf, filter");
        let result = r.retrieve(&search_query, "", 1, 1, &cancel).await.unwrap();
        assert_eq!(calls.0.load(Ordering::SeqCst), 1);

        let docs = r.hybrid_search_docs("use lpf", "", 1, &cancel).await.unwrap();
        assert_eq!(calls.0.load(Ordering::SeqCst), 2);
        assert_eq!(result.docs, docs);
    }

    #[tokio::test]
    async fn test_docs_grouped_with_specials() {
        let embedder = HashEmbedder::new(256);
        let r = retriever(Arc::new(corpus(&embedder)));
        let docs = r
            .hybrid_search_docs("lpf filter", "", 1, &CancellationToken::new())
            .await
            .unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        // Special chunks lead their page; the ranked chunk follows.
        assert_eq!(ids[..2], ["fs", "fx"]);
        assert!(ids.contains(&"f1"));
        // `k` bounds the ranked chunks only.
        let ranked = docs
            .iter()
            .filter(|d| d.section_title != PAGE_SUMMARY && d.section_title != PAGE_EXAMPLES)
            .count();
        assert_eq!(ranked, 1);
        assert_eq!(docs.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_editor_issues_only_primary_search() {
        let embedder = HashEmbedder::new(256);
        let store = Arc::new(Counting {
            inner: corpus(&embedder),
            searches: AtomicUsize::new(0),
            fail_primary: false,
        });
        let r = retriever(store.clone());
        r.hybrid_search_docs("kick", "", 3, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(store.searches.load(Ordering::SeqCst), 1);

        r.hybrid_search_docs("kick", "s(\"bd*4\")", 3, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(store.searches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_k_zero_returns_empty_without_searching() {
        let embedder = HashEmbedder::new(256);
        let store = Arc::new(Counting {
            inner: corpus(&embedder),
            searches: AtomicUsize::new(0),
            fail_primary: false,
        });
        let r = retriever(store.clone());
        let result = r
            .retrieve("kick", "s(\"bd\")", 0, 0, &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.docs.is_empty() && result.examples.is_empty());
        assert_eq!(store.searches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_primary_failure_surfaces() {
        let embedder = HashEmbedder::new(256);
        let store = Arc::new(Counting {
            inner: corpus(&embedder),
            searches: AtomicUsize::new(0),
            fail_primary: true,
        });
        let r = retriever(store);
        let err = r
            .hybrid_search_docs("kick", "", 3, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerateError::Retrieval(_)));
    }

    #[tokio::test]
    async fn test_cancelled_token_aborts() {
        let embedder = HashEmbedder::new(256);
        let r = retriever(Arc::new(corpus(&embedder)));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = r.retrieve("kick", "", 3, 2, &cancel).await.unwrap_err();
        assert!(matches!(err, GenerateError::Cancelled));
    }

    #[tokio::test]
    async fn test_long_page_examples_skipped() {
        let embedder = HashEmbedder::new(256);
        let store = InMemoryCorpus::new();
        let long = chunk("lx", "tonal", PAGE_EXAMPLES, &"note(\"c e g\") ".repeat(60));
        store.insert_doc(long, vec![0.0; 256]).unwrap();
        let scales = chunk("t1", "tonal", "Scales", "scale minor major");
        let vec = embedder.embed_text(&scales.content);
        store.insert_doc(scales, vec).unwrap();

        let r = retriever(Arc::new(store));
        let docs = r
            .hybrid_search_docs("scale", "", 1, &CancellationToken::new())
            .await
            .unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["t1"]);
    }

    #[tokio::test]
    async fn test_lexical_fusion_used_when_enabled() {
        let embedder = HashEmbedder::new(256);
        let store = InMemoryCorpus::new().with_keyword_search();
        let a = chunk("a", "p", "A", "delay feedback");
        let b = chunk("b", "q", "B", "unrelated words");
        store.insert_doc(a, vec![0.0; 256]).unwrap();
        let vb = embedder.embed_text("delay");
        store.insert_doc(b, vb).unwrap();

        let config = RetrievalConfig {
            lexical: true,
            ..RetrievalConfig::default()
        };
        let r = HybridRetriever::new(Arc::new(store), Arc::new(embedder), config);
        let docs = r
            .hybrid_search_docs("delay", "", 2, &CancellationToken::new())
            .await
            .unwrap();
        // "b" wins on dense similarity (0.7), "a" only on text (0.3).
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }
}
