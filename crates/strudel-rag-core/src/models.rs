//! Core data models shared by the retriever, prompt builder, and orchestrator.
//!
//! These types describe the two corpora (documentation chunks and curated
//! example programs), the per-session RAG cache payload, conversation turns,
//! and the request/response shapes of a single generation turn.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};

/// Section title of the synthetic whole-page summary chunk.
pub const PAGE_SUMMARY: &str = "PAGE_SUMMARY";

/// Section title of the synthetic whole-page examples chunk.
pub const PAGE_EXAMPLES: &str = "PAGE_EXAMPLES";

/// A passage of documentation.
///
/// Every page has at most one [`PAGE_SUMMARY`] chunk and at most one
/// [`PAGE_EXAMPLES`] chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocChunk {
    /// Stable chunk key.
    pub id: String,
    pub page_name: String,
    pub page_url: String,
    /// Section heading, or one of the reserved special titles.
    pub section_title: String,
    pub content: String,
    /// Similarity in `[-1, 1]`, populated by search only.
    #[serde(default)]
    pub similarity: f64,
}

impl DocChunk {
    /// Returns `true` for [`PAGE_SUMMARY`] and [`PAGE_EXAMPLES`] chunks.
    pub fn is_special(&self) -> bool {
        self.section_title == PAGE_SUMMARY || self.section_title == PAGE_EXAMPLES
    }
}

/// A curated program written in the pattern language.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExampleProgram {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub code: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub author_name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub similarity: f64,
}

/// Anything with a stable id and a similarity score, so merging and
/// fusion work over both corpora.
pub trait Ranked {
    fn id(&self) -> &str;
    fn similarity(&self) -> f64;
    fn set_similarity(&mut self, similarity: f64);
}

impl Ranked for DocChunk {
    fn id(&self) -> &str {
        &self.id
    }
    fn similarity(&self) -> f64 {
        self.similarity
    }
    fn set_similarity(&mut self, similarity: f64) {
        self.similarity = similarity;
    }
}

impl Ranked for ExampleProgram {
    fn id(&self) -> &str {
        &self.id
    }
    fn similarity(&self) -> f64 {
        self.similarity
    }
    fn set_similarity(&mut self, similarity: f64) {
        self.similarity = similarity;
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Conversation
// ═══════════════════════════════════════════════════════════════════════

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One turn of conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Token accounting reported by a text generator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Add for Usage {
    type Output = Usage;

    fn add(self, rhs: Usage) -> Usage {
        Usage {
            input_tokens: self.input_tokens + rhs.input_tokens,
            output_tokens: self.output_tokens + rhs.output_tokens,
        }
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Usage) {
        *self = *self + rhs;
    }
}

// ═══════════════════════════════════════════════════════════════════════
// References
// ═══════════════════════════════════════════════════════════════════════

/// A documentation page used to ground a response, for UI attribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocReference {
    pub page_name: String,
    pub page_url: String,
}

/// An example program used to ground a response, for UI attribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramReference {
    pub id: String,
    pub title: String,
    pub author_name: String,
    pub url: String,
}

// ═══════════════════════════════════════════════════════════════════════
// RAG cache payload
// ═══════════════════════════════════════════════════════════════════════

/// The subset of [`DocChunk`] kept in the RAG cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedDoc {
    pub id: String,
    pub page_name: String,
    pub page_url: String,
    pub section_title: String,
    pub content: String,
}

/// The subset of [`ExampleProgram`] kept in the RAG cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedExample {
    pub id: String,
    pub title: String,
    pub description: String,
    pub code: String,
    pub tags: Vec<String>,
    pub url: String,
}

/// Retrieval results stored per session and reused on follow-up turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRagResult {
    /// The query keywords that produced this entry.
    pub query: String,
    pub docs: Vec<CachedDoc>,
    pub examples: Vec<CachedExample>,
}

impl CachedRagResult {
    pub fn new(query: impl Into<String>, docs: &[DocChunk], examples: &[ExampleProgram]) -> Self {
        Self {
            query: query.into(),
            docs: docs.iter().map(CachedDoc::from).collect(),
            examples: examples.iter().map(CachedExample::from).collect(),
        }
    }

    /// Rehydrate the cached records. Similarity and author are not cached
    /// and come back zeroed/empty.
    pub fn into_parts(self) -> (Vec<DocChunk>, Vec<ExampleProgram>) {
        let docs = self.docs.into_iter().map(DocChunk::from).collect();
        let examples = self.examples.into_iter().map(ExampleProgram::from).collect();
        (docs, examples)
    }
}

impl From<&DocChunk> for CachedDoc {
    fn from(d: &DocChunk) -> Self {
        Self {
            id: d.id.clone(),
            page_name: d.page_name.clone(),
            page_url: d.page_url.clone(),
            section_title: d.section_title.clone(),
            content: d.content.clone(),
        }
    }
}

impl From<CachedDoc> for DocChunk {
    fn from(d: CachedDoc) -> Self {
        Self {
            id: d.id,
            page_name: d.page_name,
            page_url: d.page_url,
            section_title: d.section_title,
            content: d.content,
            similarity: 0.0,
        }
    }
}

impl From<&ExampleProgram> for CachedExample {
    fn from(e: &ExampleProgram) -> Self {
        Self {
            id: e.id.clone(),
            title: e.title.clone(),
            description: e.description.clone(),
            code: e.code.clone(),
            tags: e.tags.clone(),
            url: e.url.clone(),
        }
    }
}

impl From<CachedExample> for ExampleProgram {
    fn from(e: CachedExample) -> Self {
        Self {
            id: e.id,
            title: e.title,
            description: e.description,
            code: e.code,
            tags: e.tags,
            author_name: String::new(),
            url: e.url,
            similarity: 0.0,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Turn output
// ═══════════════════════════════════════════════════════════════════════

/// Result of one generation turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateResponse {
    /// Pattern code when `is_code_response`, otherwise prose.
    pub content: String,
    pub is_code_response: bool,
    pub is_actionable: bool,
    pub clarifying_questions: Vec<String>,
    pub docs_retrieved: usize,
    pub examples_retrieved: usize,
    pub doc_references: Vec<DocReference>,
    pub program_references: Vec<ProgramReference>,
    pub model: String,
    pub usage: Usage,
    pub did_retry: bool,
    /// First attempt's diagnostic; empty unless `did_retry`.
    pub validation_error: String,
}

/// Events emitted by a streamed turn.
///
/// `Refs` always precedes the first `Chunk`; exactly one `Done` or `Error`
/// terminates the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Refs {
        doc_references: Vec<DocReference>,
        program_references: Vec<ProgramReference>,
    },
    Chunk {
        content: String,
    },
    Done {
        content: String,
        is_code_response: bool,
        is_actionable: bool,
        clarifying_questions: Vec<String>,
        model: String,
        usage: Usage,
        doc_references: Vec<DocReference>,
        program_references: Vec<ProgramReference>,
    },
    Error {
        message: String,
    },
}
