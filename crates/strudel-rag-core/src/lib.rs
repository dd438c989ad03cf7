//! # Strudel RAG Core
//!
//! Runtime-free logic for retrieval-augmented generation of Strudel
//! live-coding patterns: data model, DSL code analysis, retrieval merging,
//! query-analysis parsing, prompt assembly, output classification, and the
//! capability traits the application crate implements.
//!
//! This crate contains no tokio, sqlx, reqwest, or filesystem I/O.
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`models`] | Doc chunks, example programs, references, cache records, turn output |
//! | [`code_analysis`] | Regex-driven parse of pattern code, tags, complexity, editor keywords |
//! | [`retrieval`] | Merge, weighted fusion, page organization, references |
//! | [`analysis`] | Analyzer prompt, `QueryAnalysis` parsing and normalization |
//! | [`prompt`] | System-prompt builder and embedded cheatsheet |
//! | [`response`] | Code/prose classification, `[NEED_DOCS]` parsing, conversational check |
//! | [`store`] | `CorpusStore` trait and in-memory implementation |
//! | [`embedding`] | `Embedder` trait and vector helpers |
//! | [`generator`] | `TextGenerator` trait |
//! | [`validate`] | `CodeValidator` trait |
//! | [`cache`] | `RagCache` trait |

pub mod analysis;
pub mod cache;
pub mod code_analysis;
pub mod embedding;
pub mod generator;
pub mod models;
pub mod prompt;
pub mod response;
pub mod retrieval;
pub mod store;
pub mod validate;
