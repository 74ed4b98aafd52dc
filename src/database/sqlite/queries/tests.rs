use super::*;
use crate::database::sqlite::Database;
use crate::embeddings::chunking::Position;
use tempfile::TempDir;

const MODEL: &str = "nomic-embed-text:latest";

async fn create_test_pool() -> (TempDir, SqlitePool, VectorTable) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let database = Database::new(temp_dir.path().join("test.db"))
        .await
        .expect("Failed to create test database");
    let table = database
        .ensure_schema(MODEL, 1, 3)
        .await
        .expect("Failed to create vector table");

    (temp_dir, database.pool().clone(), table)
}

fn file(filename: &str, mtime: i64) -> NewFile {
    NewFile {
        filename: filename.to_string(),
        mtime,
        content_hash: format!("hash-of-{filename}"),
        embedding_model: MODEL.to_string(),
        embedding_version: 1,
    }
}

fn chunk(index: i64, text: &str, line: usize) -> NewChunk {
    NewChunk {
        chunk_index: index,
        text: text.to_string(),
        contextualized_text: format!("Context.\n\n{text}"),
        heading_context: Some("# Heading".to_string()),
        content_hash: format!("{index}-{text}"),
        start: Position::new(line, 0),
        end: Position::new(line, text.chars().count()),
        embedding: vec![0.1, 0.2, 0.3],
    }
}

#[tokio::test]
async fn file_crud_operations() {
    let (_temp_dir, pool, _table) = create_test_pool().await;

    let id = FileQueries::upsert(&pool, &file("notes.md", 10))
        .await
        .expect("Failed to insert file");

    let stored = FileQueries::get(&pool, "notes.md", MODEL, 1)
        .await
        .expect("Failed to get file")
        .expect("File should exist");
    assert_eq!(stored.id, id);
    assert_eq!(stored.mtime, 10);
    assert_eq!(stored.content_hash, "hash-of-notes.md");

    FileQueries::update_mtime(&pool, id, 20)
        .await
        .expect("Failed to update mtime");
    let updated = FileQueries::get(&pool, "notes.md", MODEL, 1)
        .await
        .expect("Failed to get file")
        .expect("File should exist");
    assert_eq!(updated.id, id);
    assert_eq!(updated.mtime, 20);
    assert_eq!(updated.content_hash, stored.content_hash);

    assert!(
        FileQueries::get(&pool, "notes.md", MODEL, 2)
            .await
            .expect("Failed to query other version")
            .is_none()
    );

    assert!(
        FileQueries::delete(&pool, id)
            .await
            .expect("Failed to delete file")
    );
    assert!(
        FileQueries::get(&pool, "notes.md", MODEL, 1)
            .await
            .expect("Failed to get file")
            .is_none()
    );
}

#[tokio::test]
async fn files_listed_by_name_per_pair() {
    let (_temp_dir, pool, _table) = create_test_pool().await;

    for name in ["c.md", "a.md", "b.md"] {
        FileQueries::upsert(&pool, &file(name, 1))
            .await
            .expect("Failed to insert file");
    }
    FileQueries::upsert(
        &pool,
        &NewFile {
            embedding_model: "other-model".to_string(),
            ..file("z.md", 1)
        },
    )
    .await
    .expect("Failed to insert file for other model");

    let names = FileQueries::list_for(&pool, MODEL, 1)
        .await
        .expect("Failed to list files")
        .into_iter()
        .map(|f| f.filename)
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["a.md", "b.md", "c.md"]);

    assert_eq!(
        FileQueries::count_for(&pool, MODEL, 1)
            .await
            .expect("Failed to count files"),
        3
    );
    assert_eq!(
        FileQueries::count_for(&pool, "other-model", 1)
            .await
            .expect("Failed to count files"),
        1
    );
}

#[tokio::test]
async fn chunk_replacement_round_trip() {
    let (_temp_dir, pool, table) = create_test_pool().await;

    let file_id = FileQueries::upsert(&pool, &file("notes.md", 1))
        .await
        .expect("Failed to insert file");

    let ids = ChunkQueries::replace(
        &pool,
        &table,
        file_id,
        &[chunk(0, "alpha", 2), chunk(1, "beta", 6)],
    )
    .await
    .expect("Failed to replace chunks");
    assert_eq!(ids.len(), 2);

    let stored = ChunkQueries::list_for_file(&pool, file_id)
        .await
        .expect("Failed to list chunks");
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].text, "alpha");
    assert_eq!(stored[0].contextualized_text, "Context.\n\nalpha");
    assert_eq!(stored[0].heading_context.as_deref(), Some("# Heading"));
    assert_eq!(stored[1].start(), Position::new(6, 0));
    assert_eq!(stored[1].end(), Position::new(6, 4));

    let vectors = VectorQueries::get_for_file(&pool, &table, file_id)
        .await
        .expect("Failed to load vectors");
    assert_eq!(vectors.len(), 2);
    assert_eq!(vectors.get(&ids[0]), Some(&vec![0.1, 0.2, 0.3]));

    assert_eq!(
        ChunkQueries::count_for(&pool, MODEL, 1)
            .await
            .expect("Failed to count chunks"),
        2
    );
}

#[tokio::test]
async fn commit_file_index_is_all_or_nothing() {
    let (_temp_dir, pool, table) = create_test_pool().await;

    let mut bad = chunk(1, "bad", 3);
    bad.embedding = vec![1.0];

    let result =
        IndexQueries::commit_file_index(&pool, &table, &file("new.md", 5), &[chunk(0, "ok", 1), bad])
            .await;
    assert!(result.is_err());

    assert!(
        FileQueries::get(&pool, "new.md", MODEL, 1)
            .await
            .expect("Failed to get file")
            .is_none()
    );
    assert_eq!(
        IndexQueries::counts(&pool, MODEL, 1)
            .await
            .expect("Failed to count"),
        IndexCounts::default()
    );

    let file_id =
        IndexQueries::commit_file_index(&pool, &table, &file("new.md", 5), &[chunk(0, "ok", 1)])
            .await
            .expect("Failed to commit file index");
    assert_eq!(
        IndexQueries::counts(&pool, MODEL, 1)
            .await
            .expect("Failed to count"),
        IndexCounts {
            files: 1,
            chunks: 1
        }
    );
    assert_eq!(
        ChunkQueries::list_for_file(&pool, file_id)
            .await
            .expect("Failed to list chunks")
            .len(),
        1
    );
}
