use super::*;
use crate::database::sqlite::Database;
use crate::database::sqlite::models::{NewChunk, NewFile};
use crate::database::sqlite::queries::IndexQueries;
use crate::embeddings::chunking::Position;
use tempfile::TempDir;

async fn create_test_database() -> (TempDir, Database, VectorTable) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let database = Database::new(temp_dir.path().join("vectors.db"))
        .await
        .expect("Failed to create test database");
    let table = database
        .ensure_schema("mini", 1, 2)
        .await
        .expect("Failed to create vector table");
    (temp_dir, database, table)
}

async fn index_one(database: &Database, table: &VectorTable, embedding: Vec<f32>) -> i64 {
    let new_file = NewFile {
        filename: "a.md".to_string(),
        mtime: 0,
        content_hash: "h".to_string(),
        embedding_model: "mini".to_string(),
        embedding_version: 1,
    };
    let chunk = NewChunk {
        chunk_index: 0,
        text: "text".to_string(),
        contextualized_text: "text".to_string(),
        heading_context: None,
        content_hash: "c".to_string(),
        start: Position::new(0, 0),
        end: Position::new(0, 4),
        embedding,
    };
    IndexQueries::commit_file_index(database.pool(), table, &new_file, &[chunk])
        .await
        .expect("Failed to index file")
}

#[test]
fn table_names_are_sanitized() {
    assert_eq!(
        vector_table_name("nomic-embed-text:latest", 1),
        "vec_nomic_embed_text_latest_v1"
    );
    assert_eq!(
        vector_table_name("BAAI/bge-M3", 12),
        "vec_baai_bge_m3_v12"
    );
    assert_eq!(vector_table_name("a\"; DROP", 2), "vec_a___drop_v2");
}

#[tokio::test]
async fn colliding_model_names_get_distinct_tables() {
    let (_temp_dir, database, _table) = create_test_database().await;

    let dashed = database
        .ensure_schema("nomic-embed", 1, 2)
        .await
        .expect("Failed to create first table");
    let underscored = database
        .ensure_schema("nomic_embed", 1, 3)
        .await
        .expect("Failed to create second table");

    assert_eq!(dashed.table_name, "vec_nomic_embed_v1");
    assert_eq!(
        underscored.table_name,
        disambiguated_table_name("nomic_embed", 1)
    );
    assert_ne!(dashed.table_name, underscored.table_name);
    assert_eq!(underscored.embedding_model, "nomic_embed");
    assert_eq!(underscored.dimensions, 3);

    let again = database
        .ensure_schema("nomic_embed", 1, 3)
        .await
        .expect("Failed to reopen second table");
    assert_eq!(again, underscored);
}

#[test]
fn disambiguated_names_stay_sanitized() {
    let name = disambiguated_table_name("nomic_embed", 1);

    assert!(name.starts_with("vec_nomic_embed_"));
    assert!(name.ends_with("_v1"));
    assert_ne!(name, disambiguated_table_name("nomic-embed", 1));
    assert!(name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
}

#[test]
fn embedding_blob_layout() {
    let vector = vec![1.0_f32, -0.5, 0.25];
    let blob = encode_embedding(&vector);

    assert_eq!(blob.len(), 12);
    assert_eq!(blob.get(0..4), Some(1.0_f32.to_le_bytes().as_slice()));
    assert_eq!(
        decode_embedding(&blob, 3).expect("blob should decode"),
        vector
    );
    assert!(decode_embedding(&blob, 4).is_err());
}

#[test]
fn cosine_distance_values() {
    assert!(cosine_distance(&[1.0, 0.0], &[2.0, 0.0]).abs() < 1e-6);
    assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
    assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
    assert!((cosine_distance(&[0.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
    assert!((cosine_distance(&[1.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn insert_rejects_wrong_width() {
    let (_temp_dir, database, table) = create_test_database().await;
    let mut conn = database
        .pool()
        .acquire()
        .await
        .expect("Failed to acquire connection");

    let result = VectorQueries::insert(&mut conn, &table, 1, &[1.0, 2.0, 3.0]).await;

    assert!(result.is_err());
}

#[tokio::test]
async fn orphans_and_missing_vectors_are_detected() {
    let (_temp_dir, database, table) = create_test_database().await;
    let chunk_id = index_one(&database, &table, vec![1.0, 0.0]).await;

    assert!(
        VectorQueries::orphaned_vectors(database.pool(), &table)
            .await
            .expect("Failed to query orphans")
            .is_empty()
    );

    let mut conn = database
        .pool()
        .acquire()
        .await
        .expect("Failed to acquire connection");
    sqlx::query("PRAGMA foreign_keys = OFF")
        .execute(&mut *conn)
        .await
        .expect("Failed to disable foreign keys");
    sqlx::query(&format!(
        "INSERT INTO {} (chunk_id, embedding) VALUES (?, ?)",
        quote_ident(&table.table_name)
    ))
    .bind(9999_i64)
    .bind(encode_embedding(&[0.0, 1.0]))
    .execute(&mut *conn)
    .await
    .expect("Failed to insert orphan");
    sqlx::query(&format!(
        "DELETE FROM {} WHERE chunk_id = ?",
        quote_ident(&table.table_name)
    ))
    .bind(chunk_id)
    .execute(&mut *conn)
    .await
    .expect("Failed to remove vector");
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&mut *conn)
        .await
        .expect("Failed to enable foreign keys");
    drop(conn);

    assert_eq!(
        VectorQueries::orphaned_vectors(database.pool(), &table)
            .await
            .expect("Failed to query orphans"),
        vec![9999]
    );
    let missing = VectorQueries::chunks_without_vectors(database.pool(), &table)
        .await
        .expect("Failed to query missing vectors");
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].0, chunk_id);

    assert_eq!(
        VectorQueries::delete_orphaned_vectors(database.pool(), &table)
            .await
            .expect("Failed to delete orphans"),
        1
    );
    assert_eq!(
        VectorQueries::count(database.pool(), &table)
            .await
            .expect("Failed to count"),
        0
    );
}

#[tokio::test]
async fn knn_returns_nearest_first() {
    let (_temp_dir, database, table) = create_test_database().await;
    let chunk_id = index_one(&database, &table, vec![0.6, 0.8]).await;

    let rows = VectorQueries::knn(database.pool(), &table, &[0.6, 0.8], 10)
        .await
        .expect("Failed to search");

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].chunk.id, chunk_id);
    assert!(rows[0].distance.abs() < 1e-6);

    let vector = VectorQueries::get(database.pool(), &table, chunk_id)
        .await
        .expect("Failed to get vector");
    assert_eq!(vector, Some(vec![0.6, 0.8]));
}
