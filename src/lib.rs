//! # strudel-rag
//!
//! Retrieval-augmented code generation for the Strudel live-coding
//! pattern language.
//!
//! A natural-language request plus the current editor contents goes in;
//! a complete, state-preserving program (or a prose answer, or clarifying
//! questions) comes out. Documentation chunks and curated example programs
//! are retrieved from a vector corpus and assembled into the prompt of a
//! hosted language model.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌──────────────┐   ┌───────────┐
//! │ Analyzer │──▶│ RAG cache  │──▶│   Hybrid     │──▶│  Prompt   │
//! │ (small   │   │ (session)  │   │  retriever   │   │  builder  │
//! │  model)  │   └────────────┘   └──────┬───────┘   └─────┬─────┘
//! └──────────┘                           │                 ▼
//!                                  ┌─────┴─────┐     ┌───────────┐
//!                                  │  SQLite   │     │ Generator │──▶ validate
//!                                  │ corpus    │     │ (LLM)     │    / retry
//!                                  └───────────┘     └───────────┘
//! ```
//!
//! Pure logic (code analysis, merging, prompt assembly, output
//! classification) lives in the `strudel-rag-core` crate; this crate holds
//! the providers, storage and async orchestration.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Turn, configuration and session error types |
//! | [`http`] | Shared pooled HTTP client and retry backoff |
//! | [`rate_limit`] | Per-provider token buckets |
//! | [`embedding`] | OpenAI, Ollama and hash embedders |
//! | [`llm`] | Anthropic and OpenAI text generators with streaming |
//! | [`db`] / [`migrate`] | SQLite connection and schema |
//! | [`sqlite_corpus`] | SQLite corpus store with FTS5 |
//! | [`analyzer`] | Query analyzer |
//! | [`retriever`] | Hybrid doc and example retrieval |
//! | [`cache`] | In-memory RAG cache |
//! | [`validator`] | Syntax and HTTP code validators |
//! | [`cheatsheet`] | Memoized cheatsheet loading |
//! | [`orchestrator`] | One generation turn, plain or streamed |
//! | [`session`] | Anonymous session registry and sweeper |

pub mod analyzer;
pub mod cache;
pub mod cheatsheet;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod http;
pub mod llm;
pub mod migrate;
pub mod orchestrator;
pub mod rate_limit;
pub mod retriever;
pub mod session;
pub mod sqlite_corpus;
pub mod validator;
