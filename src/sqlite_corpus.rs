//! SQLite-backed [`CorpusStore`] implementation.
//!
//! Two tables, `doc_chunks` and `example_programs`, each with an
//! `embedding` BLOB of little-endian f32s and an FTS5 shadow table for
//! lexical ranking. Dense search is brute-force cosine similarity in Rust,
//! which is adequate for corpora of a few thousand records.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use strudel_rag_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use strudel_rag_core::models::{DocChunk, ExampleProgram};
use strudel_rag_core::store::{sort_by_similarity, CorpusStore};

use crate::config::CorpusConfig;
use crate::{db, migrate};

/// SQLite implementation of [`CorpusStore`].
pub struct SqliteCorpus {
    pool: SqlitePool,
}

impl SqliteCorpus {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect and make sure the schema exists.
    pub async fn open(config: &CorpusConfig) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert or replace a doc chunk and its FTS row.
    pub async fn upsert_doc(&self, chunk: &DocChunk, embedding: Option<&[f32]>) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO doc_chunks (id, page_name, page_url, section_title, content, embedding)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                page_name = excluded.page_name,
                page_url = excluded.page_url,
                section_title = excluded.section_title,
                content = excluded.content,
                embedding = excluded.embedding
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.page_name)
        .bind(&chunk.page_url)
        .bind(&chunk.section_title)
        .bind(&chunk.content)
        .bind(embedding.map(vec_to_blob))
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to upsert doc chunk {}", chunk.id))?;

        sqlx::query("DELETE FROM doc_chunks_fts WHERE chunk_id = ?")
            .bind(&chunk.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO doc_chunks_fts (chunk_id, page_name, section_title, content) VALUES (?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.page_name)
        .bind(&chunk.section_title)
        .bind(&chunk.content)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Insert or replace an example program and its FTS row.
    pub async fn upsert_example(
        &self,
        example: &ExampleProgram,
        embedding: Option<&[f32]>,
    ) -> Result<()> {
        let tags_json = serde_json::to_string(&example.tags)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO example_programs (id, title, description, code, tags_json, author_name, url, embedding)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                code = excluded.code,
                tags_json = excluded.tags_json,
                author_name = excluded.author_name,
                url = excluded.url,
                embedding = excluded.embedding
            "#,
        )
        .bind(&example.id)
        .bind(&example.title)
        .bind(&example.description)
        .bind(&example.code)
        .bind(&tags_json)
        .bind(&example.author_name)
        .bind(&example.url)
        .bind(embedding.map(vec_to_blob))
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to upsert example {}", example.id))?;

        sqlx::query("DELETE FROM example_programs_fts WHERE example_id = ?")
            .bind(&example.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO example_programs_fts (example_id, title, description, tags, code) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&example.id)
        .bind(&example.title)
        .bind(&example.description)
        .bind(example.tags.join(" "))
        .bind(&example.code)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Row counts for `(doc_chunks, example_programs)`.
    pub async fn counts(&self) -> Result<(i64, i64)> {
        let docs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM doc_chunks")
            .fetch_one(&self.pool)
            .await?;
        let examples: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM example_programs")
            .fetch_one(&self.pool)
            .await?;
        Ok((docs, examples))
    }
}

fn doc_from_row(row: &SqliteRow, similarity: f64) -> DocChunk {
    DocChunk {
        id: row.get("id"),
        page_name: row.get("page_name"),
        page_url: row.get("page_url"),
        section_title: row.get("section_title"),
        content: row.get("content"),
        similarity,
    }
}

fn example_from_row(row: &SqliteRow, similarity: f64) -> ExampleProgram {
    let tags_json: String = row.get("tags_json");
    ExampleProgram {
        id: row.get("id"),
        title: row.get("title"),
        description: row.get("description"),
        code: row.get("code"),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        author_name: row.get("author_name"),
        url: row.get("url"),
        similarity,
    }
}

/// Turn free text into an FTS5 query: each alphanumeric term quoted and
/// OR-ed, so user punctuation never reaches the FTS parser.
pub fn fts_query(text: &str) -> Option<String> {
    let mut terms: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t.to_lowercase()))
        .collect();
    terms.dedup();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

#[async_trait]
impl CorpusStore for SqliteCorpus {
    async fn search_docs(&self, query_vec: &[f32], k: usize) -> Result<Vec<DocChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "SELECT id, page_name, page_url, section_title, content, embedding FROM doc_chunks WHERE embedding IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut results: Vec<DocChunk> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let similarity = cosine_similarity(query_vec, &blob_to_vec(&blob)) as f64;
                doc_from_row(row, similarity)
            })
            .collect();
        sort_by_similarity(&mut results);
        results.truncate(k);
        Ok(results)
    }

    async fn search_examples(&self, query_vec: &[f32], k: usize) -> Result<Vec<ExampleProgram>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "SELECT id, title, description, code, tags_json, author_name, url, embedding FROM example_programs WHERE embedding IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut results: Vec<ExampleProgram> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let similarity = cosine_similarity(query_vec, &blob_to_vec(&blob)) as f64;
                example_from_row(row, similarity)
            })
            .collect();
        sort_by_similarity(&mut results);
        results.truncate(k);
        Ok(results)
    }

    async fn fetch_chunk(&self, page_name: &str, section_title: &str) -> Result<Option<DocChunk>> {
        let row = sqlx::query(
            "SELECT id, page_name, page_url, section_title, content FROM doc_chunks WHERE page_name = ? AND section_title = ? ORDER BY id LIMIT 1",
        )
        .bind(page_name)
        .bind(section_title)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| doc_from_row(&r, 0.0)))
    }

    fn supports_keyword_search(&self) -> bool {
        true
    }

    async fn keyword_search_docs(&self, query: &str, k: usize) -> Result<Vec<DocChunk>> {
        let Some(fts) = fts_query(query) else {
            return Ok(Vec::new());
        };
        let rows = sqlx::query(
            r#"
            SELECT d.id, d.page_name, d.page_url, d.section_title, d.content, f.rank
            FROM doc_chunks_fts f
            JOIN doc_chunks d ON d.id = f.chunk_id
            WHERE doc_chunks_fts MATCH ?
            ORDER BY f.rank
            LIMIT ?
            "#,
        )
        .bind(&fts)
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut results: Vec<DocChunk> = rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                doc_from_row(row, -rank) // negate so higher = better
            })
            .collect();
        sort_by_similarity(&mut results);
        Ok(results)
    }

    async fn keyword_search_examples(&self, query: &str, k: usize) -> Result<Vec<ExampleProgram>> {
        let Some(fts) = fts_query(query) else {
            return Ok(Vec::new());
        };
        let rows = sqlx::query(
            r#"
            SELECT e.id, e.title, e.description, e.code, e.tags_json, e.author_name, e.url, f.rank
            FROM example_programs_fts f
            JOIN example_programs e ON e.id = f.example_id
            WHERE example_programs_fts MATCH ?
            ORDER BY f.rank
            LIMIT ?
            "#,
        )
        .bind(&fts)
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut results: Vec<ExampleProgram> = rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                example_from_row(row, -rank)
            })
            .collect();
        sort_by_similarity(&mut results);
        Ok(results)
    }
}
