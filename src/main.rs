//! # strudel-rag CLI
//!
//! ## Usage
//!
//! ```bash
//! strudel-rag --config ./config/strudel-rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `strudel-rag init` | Create the SQLite corpus schema |
//! | `strudel-rag code <file>` | Analyze a pattern file (`-` for stdin) |
//! | `strudel-rag analyze "<query>"` | Classify a request with the analyzer model |
//! | `strudel-rag search "<query>"` | Run doc and example retrieval |
//! | `strudel-rag generate "<query>"` | Run one generation turn |
//!
//! Logs go to stderr (`RUST_LOG`, default `info`); results go to stdout as
//! JSON so they can be piped.

use std::io::Read as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use strudel_rag::analyzer::QueryAnalyzer;
use strudel_rag::config::{self, Config};
use strudel_rag::embedding::create_embedder;
use strudel_rag::llm::create_generator;
use strudel_rag::orchestrator::{GenerateRequest, Orchestrator};
use strudel_rag::retriever::HybridRetriever;
use strudel_rag::sqlite_corpus::SqliteCorpus;
use strudel_rag_core::code_analysis;

/// Retrieval-augmented code generation for Strudel patterns.
#[derive(Parser)]
#[command(name = "strudel-rag", version)]
struct Cli {
    /// Path to configuration file (TOML). Missing files fall back to defaults.
    #[arg(long, global = true, default_value = "./config/strudel-rag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the corpus schema. Idempotent.
    Init,

    /// Print the parse and tag analysis of a pattern file.
    Code {
        /// Pattern file, or `-` for stdin.
        file: PathBuf,
    },

    /// Classify a request with the analyzer model.
    Analyze { query: String },

    /// Retrieve docs and examples for a request.
    Search {
        query: String,

        /// File holding the current editor contents.
        #[arg(long)]
        editor: Option<PathBuf>,

        /// Docs to return (default: `retrieval.docs_k`).
        #[arg(long)]
        docs_k: Option<usize>,

        /// Examples to return (default: `retrieval.examples_k`).
        #[arg(long)]
        examples_k: Option<usize>,
    },

    /// Generate code or an answer for a request.
    Generate {
        query: String,

        /// File holding the current editor contents.
        #[arg(long)]
        editor: Option<PathBuf>,

        /// Print stream events as JSON lines.
        #[arg(long)]
        stream: bool,
    },
}

fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        Ok(Config::default())
    }
}

fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn read_editor(path: Option<&Path>) -> Result<String> {
    path.map(read_input).transpose().map(Option::unwrap_or_default)
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let cfg = load_or_default(&cli.config)?;
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    match cli.command {
        Commands::Init => {
            let corpus = SqliteCorpus::open(&cfg.corpus).await?;
            let (docs, examples) = corpus.counts().await?;
            println!(
                "Corpus initialized at {} ({} doc chunks, {} examples).",
                cfg.corpus.path.display(),
                docs,
                examples
            );
        }
        Commands::Code { file } => {
            let code = read_input(&file)?;
            let out = json!({
                "parsed": code_analysis::parse(&code),
                "analysis": code_analysis::analyze(&code),
                "keywords": code_analysis::extract_keywords(&code),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Commands::Analyze { query } => {
            let generator = create_generator(&cfg.analyzer, &cfg.http, &cfg.rate_limit)?;
            let analyzer = QueryAnalyzer::new(generator, &cfg.analyzer);
            let analyzed = analyzer.analyze(&query).await?;
            println!("{}", serde_json::to_string_pretty(&analyzed.analysis)?);
        }
        Commands::Search {
            query,
            editor,
            docs_k,
            examples_k,
        } => {
            let editor_state = read_editor(editor.as_deref())?;
            let corpus = Arc::new(SqliteCorpus::open(&cfg.corpus).await?);
            let embedder = create_embedder(&cfg.embedding, &cfg.http, &cfg.rate_limit)?;
            let analyzer_gen = create_generator(&cfg.analyzer, &cfg.http, &cfg.rate_limit)?;
            let retriever = HybridRetriever::new(corpus, embedder, cfg.retrieval.clone())
                .with_analyzer(Arc::new(QueryAnalyzer::new(analyzer_gen, &cfg.analyzer)));

            let docs_k = docs_k.unwrap_or(cfg.retrieval.docs_k);
            let examples_k = examples_k.unwrap_or(cfg.retrieval.examples_k);
            let search_query = retriever.search_query_for(&query).await;
            let result = retriever
                .retrieve(&search_query, &editor_state, docs_k, examples_k, &cancel)
                .await?;
            let out = json!({
                "search_query": search_query,
                "docs": result.docs,
                "examples": result.examples,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Commands::Generate {
            query,
            editor,
            stream,
        } => {
            let editor_state = read_editor(editor.as_deref())?;
            let corpus = Arc::new(SqliteCorpus::open(&cfg.corpus).await?);
            let orchestrator = Orchestrator::from_config(&cfg, corpus)?;
            let request = GenerateRequest::new(query).with_editor_state(editor_state);

            if stream {
                orchestrator
                    .generate_stream(&request, &cancel, |event| {
                        match serde_json::to_string(&event) {
                            Ok(line) => println!("{}", line),
                            Err(e) => tracing::warn!(error = %e, "failed to encode stream event"),
                        }
                    })
                    .await?;
            } else {
                let response = orchestrator.generate(&request, &cancel).await?;
                println!("{}", serde_json::to_string_pretty(&response)?);
            }
        }
    }

    Ok(())
}
