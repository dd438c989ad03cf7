//! Corpus storage abstraction.
//!
//! The [`CorpusStore`] trait is the retriever's only view of the two corpora
//! (documentation chunks and example programs). The core never builds its
//! own vector index: a store answers "top-k most similar to this embedding"
//! and, optionally, full-text ranking.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`search_docs`](CorpusStore::search_docs) | Dense top-k over doc chunks |
//! | [`search_examples`](CorpusStore::search_examples) | Dense top-k over example programs |
//! | [`fetch_chunk`](CorpusStore::fetch_chunk) | Point lookup by page + section title |
//! | [`keyword_search_docs`](CorpusStore::keyword_search_docs) | Optional full-text doc search |
//! | [`keyword_search_examples`](CorpusStore::keyword_search_examples) | Optional full-text example search |

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use std::cmp::Ordering;

use crate::models::{DocChunk, ExampleProgram, Ranked};

/// Abstract read interface over the doc and example corpora.
///
/// Search results are ordered by similarity descending with ties broken by
/// ascending `id`. Use [`sort_by_similarity`] to get that ordering.
#[async_trait]
pub trait CorpusStore: Send + Sync {
    /// Dense similarity search over documentation chunks.
    async fn search_docs(&self, query_vec: &[f32], k: usize) -> Result<Vec<DocChunk>>;

    /// Dense similarity search over example programs.
    async fn search_examples(&self, query_vec: &[f32], k: usize) -> Result<Vec<ExampleProgram>>;

    /// Fetch a single chunk by page and section title (used for the
    /// `PAGE_SUMMARY` / `PAGE_EXAMPLES` special chunks).
    async fn fetch_chunk(&self, page_name: &str, section_title: &str)
        -> Result<Option<DocChunk>>;

    /// Whether the store ranks full-text queries. When `false`, the keyword
    /// methods return empty results.
    fn supports_keyword_search(&self) -> bool {
        false
    }

    /// Full-text search over documentation chunks; the rank score is
    /// substituted for similarity.
    async fn keyword_search_docs(&self, _query: &str, _k: usize) -> Result<Vec<DocChunk>> {
        Ok(Vec::new())
    }

    /// Full-text search over example programs.
    async fn keyword_search_examples(
        &self,
        _query: &str,
        _k: usize,
    ) -> Result<Vec<ExampleProgram>> {
        Ok(Vec::new())
    }
}

/// Sort by similarity descending, then `id` ascending.
pub fn sort_by_similarity<T: Ranked>(items: &mut [T]) {
    items.sort_by(|a, b| {
        b.similarity()
            .partial_cmp(&a.similarity())
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id().cmp(b.id()))
    });
}
