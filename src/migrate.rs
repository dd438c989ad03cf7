use anyhow::Result;
use sqlx::SqlitePool;

/// Create the corpus schema. Safe to run repeatedly.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS doc_chunks (
            id TEXT PRIMARY KEY,
            page_name TEXT NOT NULL,
            page_url TEXT NOT NULL,
            section_title TEXT NOT NULL,
            content TEXT NOT NULL,
            embedding BLOB
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS example_programs (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            code TEXT NOT NULL,
            tags_json TEXT NOT NULL DEFAULT '[]',
            author_name TEXT NOT NULL DEFAULT '',
            url TEXT NOT NULL DEFAULT '',
            embedding BLOB
        )
        "#,
    )
    .execute(pool)
    .await?;

    // At most one PAGE_SUMMARY / PAGE_EXAMPLES chunk per page
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_doc_chunks_page_special
        ON doc_chunks(page_name, section_title)
        WHERE section_title IN ('PAGE_SUMMARY', 'PAGE_EXAMPLES')
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_doc_chunks_page ON doc_chunks(page_name)")
        .execute(pool)
        .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    for (table, ddl) in [
        (
            "doc_chunks_fts",
            "CREATE VIRTUAL TABLE doc_chunks_fts USING fts5(chunk_id UNINDEXED, page_name, section_title, content)",
        ),
        (
            "example_programs_fts",
            "CREATE VIRTUAL TABLE example_programs_fts USING fts5(example_id UNINDEXED, title, description, tags, code)",
        ),
    ] {
        let exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name=?",
        )
        .bind(table)
        .fetch_one(pool)
        .await?;

        if !exists {
            sqlx::query(ddl).execute(pool).await?;
        }
    }

    Ok(())
}
