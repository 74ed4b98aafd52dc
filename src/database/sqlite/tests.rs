use super::*;
use crate::embeddings::chunking::Position;
use anyhow::Result;
use std::collections::HashSet;
use tempfile::TempDir;

const MODEL: &str = "test-embed:latest";

async fn create_test_database() -> Result<(TempDir, Database)> {
    let temp_dir = TempDir::new()?;
    let database = Database::new(temp_dir.path().join("index.db")).await?;
    Ok((temp_dir, database))
}

fn new_file(filename: &str, hash: &str, version: i64) -> NewFile {
    NewFile {
        filename: filename.to_string(),
        mtime: 1_700_000_000_000,
        content_hash: hash.to_string(),
        embedding_model: MODEL.to_string(),
        embedding_version: version,
    }
}

fn new_chunk(index: i64, text: &str, embedding: Vec<f32>) -> NewChunk {
    NewChunk {
        chunk_index: index,
        text: text.to_string(),
        contextualized_text: text.to_string(),
        heading_context: None,
        content_hash: format!("hash-{text}"),
        start: Position::new(0, 0),
        end: Position::new(0, text.chars().count()),
        embedding,
    }
}

#[tokio::test]
async fn schema_has_base_tables() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    database.ensure_schema(MODEL, 1, 3).await?;

    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name NOT LIKE '_sqlx_%'",
    )
    .fetch_all(database.pool())
    .await?;

    let expected_tables: HashSet<&'static str> = [
        "files",
        "chunks",
        "vector_tables",
        "vec_test_embed_latest_v1",
    ]
    .into_iter()
    .collect();

    let actual_tables: HashSet<&str> = tables.iter().map(|t| t.as_str()).collect();
    assert_eq!(actual_tables, expected_tables);

    Ok(())
}

#[tokio::test]
async fn ensure_schema_is_idempotent() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;

    let first = database.ensure_schema(MODEL, 1, 3).await?;
    let second = database.ensure_schema(MODEL, 1, 3).await?;

    assert_eq!(first, second);
    assert_eq!(database.list_vector_tables().await?.len(), 1);

    let mismatch = database.ensure_schema(MODEL, 1, 4).await;
    assert!(mismatch.is_err());

    Ok(())
}

#[tokio::test]
async fn versions_get_separate_tables_and_rows() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    let v1 = database.ensure_schema(MODEL, 1, 2).await?;
    let v2 = database.ensure_schema(MODEL, 2, 3).await?;
    assert_ne!(v1.table_name, v2.table_name);

    database
        .commit_file_index(
            &v1,
            &new_file("a.md", "h1", 1),
            &[new_chunk(0, "one", vec![1.0, 0.0])],
        )
        .await?;
    database
        .commit_file_index(
            &v2,
            &new_file("a.md", "h1", 2),
            &[new_chunk(0, "one", vec![1.0, 0.0, 0.0])],
        )
        .await?;

    assert_eq!(database.counts(MODEL, 1).await?.files, 1);
    assert_eq!(database.counts(MODEL, 2).await?.files, 1);

    let stale = database.stale_vector_tables(&v2).await?;
    assert_eq!(stale, vec![v1.clone()]);

    let removed = database.drop_vector_table(&v1).await?;
    assert_eq!(removed, 1);
    assert_eq!(database.counts(MODEL, 1).await?, IndexCounts::default());
    assert_eq!(database.counts(MODEL, 2).await?.chunks, 1);
    assert_eq!(database.list_vector_tables().await?, vec![v2]);

    Ok(())
}

#[tokio::test]
async fn upsert_updates_in_place() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    database.ensure_schema(MODEL, 1, 2).await?;

    let first = database.upsert_file(&new_file("a.md", "old", 1)).await?;
    let second = database.upsert_file(&new_file("a.md", "new", 1)).await?;
    assert_eq!(first, second);

    let file = database
        .get_file("a.md", MODEL, 1)
        .await?
        .expect("file should exist");
    assert_eq!(file.content_hash, "new");
    assert_eq!(database.list_files(MODEL, 1).await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn failed_commit_keeps_previous_generation() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    let table = database.ensure_schema(MODEL, 1, 2).await?;

    let file_id = database
        .commit_file_index(
            &table,
            &new_file("a.md", "v1", 1),
            &[
                new_chunk(0, "first", vec![1.0, 0.0]),
                new_chunk(1, "second", vec![0.0, 1.0]),
            ],
        )
        .await?;

    let result = database
        .commit_file_index(
            &table,
            &new_file("a.md", "v2", 1),
            &[
                new_chunk(0, "replacement", vec![1.0, 1.0]),
                new_chunk(1, "too wide", vec![1.0, 1.0, 1.0]),
            ],
        )
        .await;
    assert!(result.is_err());

    let file = database
        .get_file("a.md", MODEL, 1)
        .await?
        .expect("file should still exist");
    assert_eq!(file.content_hash, "v1");

    let texts = database
        .get_chunks_for_file(file_id)
        .await?
        .into_iter()
        .map(|chunk| chunk.text)
        .collect::<Vec<_>>();
    assert_eq!(texts, vec!["first".to_string(), "second".to_string()]);
    assert_eq!(VectorQueries::count(database.pool(), &table).await?, 2);

    Ok(())
}

#[tokio::test]
async fn delete_file_cascades() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    let table = database.ensure_schema(MODEL, 1, 2).await?;

    let file_id = database
        .commit_file_index(
            &table,
            &new_file("a.md", "v1", 1),
            &[
                new_chunk(0, "first", vec![1.0, 0.0]),
                new_chunk(1, "second", vec![0.0, 1.0]),
            ],
        )
        .await?;
    database
        .commit_file_index(
            &table,
            &new_file("b.md", "v1", 1),
            &[new_chunk(0, "other", vec![1.0, 1.0])],
        )
        .await?;

    assert!(database.delete_file(file_id).await?);
    assert!(!database.delete_file(file_id).await?);

    assert_eq!(
        database.counts(MODEL, 1).await?,
        IndexCounts {
            files: 1,
            chunks: 1
        }
    );
    assert_eq!(VectorQueries::count(database.pool(), &table).await?, 1);
    assert!(database.get_chunks_for_file(file_id).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn replace_chunks_swaps_generation() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    let table = database.ensure_schema(MODEL, 1, 2).await?;

    let file_id = database.upsert_file(&new_file("a.md", "v1", 1)).await?;
    let first_ids = database
        .replace_chunks(
            &table,
            file_id,
            &[
                new_chunk(0, "first", vec![1.0, 0.0]),
                new_chunk(1, "second", vec![0.0, 1.0]),
            ],
        )
        .await?;
    assert_eq!(first_ids.len(), 2);

    let second_ids = database
        .replace_chunks(&table, file_id, &[new_chunk(0, "only", vec![1.0, 1.0])])
        .await?;
    assert_eq!(second_ids.len(), 1);

    let chunks = database.get_chunks_for_file(file_id).await?;
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].text, "only");
    assert_eq!(VectorQueries::count(database.pool(), &table).await?, 1);
    for id in first_ids {
        assert!(VectorQueries::get(database.pool(), &table, id).await?.is_none());
    }

    Ok(())
}

#[tokio::test]
async fn knn_search_orders_by_distance() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    let table = database.ensure_schema(MODEL, 1, 2).await?;

    database
        .commit_file_index(
            &table,
            &new_file("a.md", "v1", 1),
            &[
                new_chunk(0, "east", vec![1.0, 0.0]),
                new_chunk(1, "north", vec![0.0, 1.0]),
            ],
        )
        .await?;
    database
        .commit_file_index(
            &table,
            &new_file("b.md", "v1", 1),
            &[new_chunk(0, "north-east", vec![1.0, 1.0])],
        )
        .await?;

    let rows = database.knn_search(&table, &[1.0, 0.1], 2).await?;

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].chunk.text, "east");
    assert_eq!(rows[0].filename, "a.md");
    assert_eq!(rows[1].chunk.text, "north-east");
    assert_eq!(rows[1].filename, "b.md");
    assert!(rows[0].distance <= rows[1].distance);

    assert!(database.knn_search(&table, &[1.0, 0.0], 0).await?.is_empty());
    assert!(database.knn_search(&table, &[1.0], 3).await.is_err());

    Ok(())
}

#[tokio::test]
async fn knn_search_on_empty_table() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    let table = database.ensure_schema(MODEL, 1, 2).await?;

    assert!(database.knn_search(&table, &[1.0, 0.0], 5).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn database_optimization() -> Result<()> {
    let (_temp_dir, database) = create_test_database().await?;
    database.ensure_schema(MODEL, 1, 2).await?;

    database.optimize().await?;

    Ok(())
}
