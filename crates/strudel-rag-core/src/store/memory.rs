//! In-memory [`CorpusStore`] implementation for tests and small corpora.
//!
//! Uses `Vec`s behind `std::sync::RwLock`. Vector search is brute-force
//! cosine similarity over every stored vector; keyword search scores a
//! record by how many distinct query terms its text contains.

use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{DocChunk, ExampleProgram};

use super::{sort_by_similarity, CorpusStore};

struct StoredDoc {
    chunk: DocChunk,
    vector: Vec<f32>,
}

struct StoredExample {
    example: ExampleProgram,
    vector: Vec<f32>,
}

/// In-memory corpus store.
#[derive(Default)]
pub struct InMemoryCorpus {
    docs: RwLock<Vec<StoredDoc>>,
    examples: RwLock<Vec<StoredExample>>,
    keyword_search: bool,
}

impl InMemoryCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable term-matching keyword search so hybrid fusion can be exercised.
    pub fn with_keyword_search(mut self) -> Self {
        self.keyword_search = true;
        self
    }

    /// Insert or replace a doc chunk (by `id`) together with its embedding.
    pub fn insert_doc(&self, chunk: DocChunk, vector: Vec<f32>) -> Result<()> {
        let mut docs = self.docs.write().map_err(|_| anyhow!("doc store poisoned"))?;
        docs.retain(|d| d.chunk.id != chunk.id);
        docs.push(StoredDoc { chunk, vector });
        Ok(())
    }

    /// Insert or replace an example program (by `id`) with its embedding.
    pub fn insert_example(&self, example: ExampleProgram, vector: Vec<f32>) -> Result<()> {
        let mut examples = self
            .examples
            .write()
            .map_err(|_| anyhow!("example store poisoned"))?;
        examples.retain(|e| e.example.id != example.id);
        examples.push(StoredExample { example, vector });
        Ok(())
    }

    pub fn doc_count(&self) -> usize {
        self.docs.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn example_count(&self) -> usize {
        self.examples.read().map(|e| e.len()).unwrap_or(0)
    }
}

fn term_matches(query: &str, text: &str) -> usize {
    let text = text.to_lowercase();
    let mut terms: Vec<String> = query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    terms.sort();
    terms.dedup();
    terms.iter().filter(|t| text.contains(t.as_str())).count()
}

#[async_trait]
impl CorpusStore for InMemoryCorpus {
    async fn search_docs(&self, query_vec: &[f32], k: usize) -> Result<Vec<DocChunk>> {
        let docs = self.docs.read().map_err(|_| anyhow!("doc store poisoned"))?;
        let mut results: Vec<DocChunk> = docs
            .iter()
            .map(|d| {
                let mut chunk = d.chunk.clone();
                chunk.similarity = cosine_similarity(query_vec, &d.vector) as f64;
                chunk
            })
            .collect();
        sort_by_similarity(&mut results);
        results.truncate(k);
        Ok(results)
    }

    async fn search_examples(&self, query_vec: &[f32], k: usize) -> Result<Vec<ExampleProgram>> {
        let examples = self
            .examples
            .read()
            .map_err(|_| anyhow!("example store poisoned"))?;
        let mut results: Vec<ExampleProgram> = examples
            .iter()
            .map(|e| {
                let mut example = e.example.clone();
                example.similarity = cosine_similarity(query_vec, &e.vector) as f64;
                example
            })
            .collect();
        sort_by_similarity(&mut results);
        results.truncate(k);
        Ok(results)
    }

    async fn fetch_chunk(&self, page_name: &str, section_title: &str) -> Result<Option<DocChunk>> {
        let docs = self.docs.read().map_err(|_| anyhow!("doc store poisoned"))?;
        Ok(docs
            .iter()
            .find(|d| d.chunk.page_name == page_name && d.chunk.section_title == section_title)
            .map(|d| d.chunk.clone()))
    }

    fn supports_keyword_search(&self) -> bool {
        self.keyword_search
    }

    async fn keyword_search_docs(&self, query: &str, k: usize) -> Result<Vec<DocChunk>> {
        if !self.keyword_search {
            return Ok(Vec::new());
        }
        let docs = self.docs.read().map_err(|_| anyhow!("doc store poisoned"))?;
        let mut results: Vec<DocChunk> = docs
            .iter()
            .filter_map(|d| {
                let haystack = format!("{} {} {}", d.chunk.page_name, d.chunk.section_title, d.chunk.content);
                let matches = term_matches(query, &haystack);
                (matches > 0).then(|| {
                    let mut chunk = d.chunk.clone();
                    chunk.similarity = matches as f64;
                    chunk
                })
            })
            .collect();
        sort_by_similarity(&mut results);
        results.truncate(k);
        Ok(results)
    }

    async fn keyword_search_examples(&self, query: &str, k: usize) -> Result<Vec<ExampleProgram>> {
        if !self.keyword_search {
            return Ok(Vec::new());
        }
        let examples = self
            .examples
            .read()
            .map_err(|_| anyhow!("example store poisoned"))?;
        let mut results: Vec<ExampleProgram> = examples
            .iter()
            .filter_map(|e| {
                let haystack = format!(
                    "{} {} {} {}",
                    e.example.title,
                    e.example.description,
                    e.example.tags.join(" "),
                    e.example.code
                );
                let matches = term_matches(query, &haystack);
                (matches > 0).then(|| {
                    let mut example = e.example.clone();
                    example.similarity = matches as f64;
                    example
                })
            })
            .collect();
        sort_by_similarity(&mut results);
        results.truncate(k);
        Ok(results)
    }
}
