#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use std::collections::HashMap;
use tracing::{debug, info};

use super::models::{ChunkWithFile, KnnRow, VectorTable, from_db, to_db};

const VECTOR_TABLE_PREFIX: &str = "vec_";

/// Deterministic table name for a (model, version) pair, e.g. `vec_nomic_embed_text_latest_v1`
#[inline]
pub fn vector_table_name(model: &str, version: i64) -> String {
    format!("{VECTOR_TABLE_PREFIX}{}_v{version}", sanitize_ident(model))
}

/// Name for a pair whose plain name is already registered to another model that sanitizes
/// the same way, e.g. `nomic-embed` and `nomic_embed`
#[inline]
pub fn disambiguated_table_name(model: &str, version: i64) -> String {
    let digest = format!("{:x}", Sha256::digest(model.as_bytes()));
    let suffix: String = digest.chars().take(8).collect();
    format!(
        "{VECTOR_TABLE_PREFIX}{}_{suffix}_v{version}",
        sanitize_ident(model)
    )
}

fn sanitize_ident(input: &str) -> String {
    input
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

pub(crate) fn quote_ident(input: &str) -> String {
    format!("\"{}\"", input.replace('"', "\"\""))
}

/// Little-endian `f32` blob
#[inline]
pub fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(std::mem::size_of_val(vector));
    for &value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

#[inline]
pub fn decode_embedding(blob: &[u8], dimensions: usize) -> Result<Vec<f32>> {
    let expected_len = dimensions * std::mem::size_of::<f32>();
    if blob.len() != expected_len {
        return Err(anyhow::anyhow!(
            "Invalid embedding byte length: expected {expected_len}, got {}",
            blob.len()
        ));
    }

    Ok(blob
        .chunks_exact(4)
        .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        .collect())
}

/// `1 - cosine similarity`. Zero vectors are treated as orthogonal to everything.
#[inline]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let x64 = f64::from(x);
        let y64 = f64::from(y);
        dot += x64 * y64;
        norm_a += x64 * x64;
        norm_b += y64 * y64;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if a.len() != b.len() || denom <= f64::EPSILON {
        return 1.0;
    }
    (1.0 - dot / denom) as f32
}

pub struct VectorQueries;

impl VectorQueries {
    /// Create the vector table for a (model, version) pair if needed and register it.
    ///
    /// A pair is bound to the dimensions it was first registered with.
    #[inline]
    pub async fn ensure_table(
        pool: &SqlitePool,
        model: &str,
        version: i64,
        dimensions: usize,
    ) -> Result<VectorTable> {
        if let Some(existing) = Self::get_table(pool, model, version).await? {
            if from_db(existing.dimensions) != dimensions {
                return Err(anyhow::anyhow!(
                    "Vector table {} holds {}-dimensional vectors, but model {} produces {}",
                    existing.table_name,
                    existing.dimensions,
                    model,
                    dimensions
                ));
            }
            return Ok(existing);
        }

        let mut table_name = vector_table_name(model, version);
        if let Some(owner) = Self::get_table_by_name(pool, &table_name).await? {
            debug!(
                "{} already belongs to {} v{}, disambiguating",
                table_name, owner.embedding_model, owner.embedding_version
            );
            table_name = disambiguated_table_name(model, version);
        }

        let mut tx = pool
            .begin()
            .await
            .context("Failed to begin vector table transaction")?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                chunk_id INTEGER PRIMARY KEY REFERENCES chunks(id) ON DELETE CASCADE,
                embedding BLOB NOT NULL
            )",
            quote_ident(&table_name)
        ))
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to create vector table {table_name}"))?;

        sqlx::query(
            "INSERT OR IGNORE INTO vector_tables
                (table_name, embedding_model, embedding_version, dimensions, created_date)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&table_name)
        .bind(model)
        .bind(version)
        .bind(to_db(dimensions))
        .bind(Utc::now().naive_utc())
        .execute(&mut *tx)
        .await
        .context("Failed to register vector table")?;

        tx.commit()
            .await
            .context("Failed to commit vector table creation")?;

        info!(
            "Created vector table {} for {} v{} ({} dimensions)",
            table_name, model, version, dimensions
        );

        Self::get_table(pool, model, version)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve registered vector table"))
    }

    #[inline]
    pub async fn get_table(
        pool: &SqlitePool,
        model: &str,
        version: i64,
    ) -> Result<Option<VectorTable>> {
        sqlx::query_as::<_, VectorTable>(
            "SELECT table_name, embedding_model, embedding_version, dimensions, created_date
             FROM vector_tables WHERE embedding_model = ? AND embedding_version = ?",
        )
        .bind(model)
        .bind(version)
        .fetch_optional(pool)
        .await
        .context("Failed to get vector table")
    }

    #[inline]
    pub async fn get_table_by_name(
        pool: &SqlitePool,
        table_name: &str,
    ) -> Result<Option<VectorTable>> {
        sqlx::query_as::<_, VectorTable>(
            "SELECT table_name, embedding_model, embedding_version, dimensions, created_date
             FROM vector_tables WHERE table_name = ?",
        )
        .bind(table_name)
        .fetch_optional(pool)
        .await
        .context("Failed to look up vector table by name")
    }

    #[inline]
    pub async fn list_tables(pool: &SqlitePool) -> Result<Vec<VectorTable>> {
        sqlx::query_as::<_, VectorTable>(
            "SELECT table_name, embedding_model, embedding_version, dimensions, created_date
             FROM vector_tables ORDER BY created_date, table_name",
        )
        .fetch_all(pool)
        .await
        .context("Failed to list vector tables")
    }

    /// Insert one vector, rejecting it if its width differs from the table's
    #[inline]
    pub async fn insert(
        conn: &mut SqliteConnection,
        table: &VectorTable,
        chunk_id: i64,
        embedding: &[f32],
    ) -> Result<()> {
        if embedding.len() != from_db(table.dimensions) {
            return Err(anyhow::anyhow!(
                "Embedding for chunk {} has {} dimensions, table {} expects {}",
                chunk_id,
                embedding.len(),
                table.table_name,
                table.dimensions
            ));
        }

        sqlx::query(&format!(
            "INSERT INTO {} (chunk_id, embedding) VALUES (?, ?)",
            quote_ident(&table.table_name)
        ))
        .bind(chunk_id)
        .bind(encode_embedding(embedding))
        .execute(conn)
        .await
        .with_context(|| format!("Failed to insert vector for chunk {chunk_id}"))?;

        Ok(())
    }

    /// Delete the vectors of every chunk owned by `file_id`
    #[inline]
    pub async fn delete_for_file(
        conn: &mut SqliteConnection,
        table: &VectorTable,
        file_id: i64,
    ) -> Result<u64> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE chunk_id IN (SELECT id FROM chunks WHERE file_id = ?)",
            quote_ident(&table.table_name)
        ))
        .bind(file_id)
        .execute(conn)
        .await
        .context("Failed to delete vectors for file")?;

        Ok(result.rows_affected())
    }

    #[inline]
    pub async fn get(
        pool: &SqlitePool,
        table: &VectorTable,
        chunk_id: i64,
    ) -> Result<Option<Vec<f32>>> {
        let blob: Option<Vec<u8>> = sqlx::query_scalar(&format!(
            "SELECT embedding FROM {} WHERE chunk_id = ?",
            quote_ident(&table.table_name)
        ))
        .bind(chunk_id)
        .fetch_optional(pool)
        .await
        .context("Failed to get vector")?;

        blob.map(|blob| decode_embedding(&blob, from_db(table.dimensions)))
            .transpose()
    }

    /// Vectors of a file's chunks keyed by chunk id
    #[inline]
    pub async fn get_for_file(
        pool: &SqlitePool,
        table: &VectorTable,
        file_id: i64,
    ) -> Result<HashMap<i64, Vec<f32>>> {
        let rows: Vec<(i64, Vec<u8>)> = sqlx::query_as(&format!(
            "SELECT v.chunk_id, v.embedding FROM {} v
             JOIN chunks c ON c.id = v.chunk_id
             WHERE c.file_id = ?",
            quote_ident(&table.table_name)
        ))
        .bind(file_id)
        .fetch_all(pool)
        .await
        .context("Failed to get vectors for file")?;

        rows.into_iter()
            .map(|(chunk_id, blob)| {
                decode_embedding(&blob, from_db(table.dimensions)).map(|vector| (chunk_id, vector))
            })
            .collect()
    }

    #[inline]
    pub async fn count(pool: &SqlitePool, table: &VectorTable) -> Result<i64> {
        sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {}",
            quote_ident(&table.table_name)
        ))
        .fetch_one(pool)
        .await
        .context("Failed to count vectors")
    }

    /// Exact nearest-neighbour search by cosine distance.
    ///
    /// Both reads run in one transaction so the result reflects a single committed state.
    #[inline]
    pub async fn knn(
        pool: &SqlitePool,
        table: &VectorTable,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<KnnRow>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        if query.len() != from_db(table.dimensions) {
            return Err(anyhow::anyhow!(
                "Query vector has {} dimensions, table {} expects {}",
                query.len(),
                table.table_name,
                table.dimensions
            ));
        }

        let mut tx = pool
            .begin()
            .await
            .context("Failed to begin search transaction")?;

        let rows: Vec<(i64, Vec<u8>)> = sqlx::query_as(&format!(
            "SELECT chunk_id, embedding FROM {}",
            quote_ident(&table.table_name)
        ))
        .fetch_all(&mut *tx)
        .await
        .context("Failed to scan vectors")?;

        let mut scored = Vec::with_capacity(rows.len());
        for (chunk_id, blob) in rows {
            let vector = decode_embedding(&blob, from_db(table.dimensions))?;
            scored.push((chunk_id, cosine_distance(query, &vector)));
        }
        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);

        if scored.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT f.filename, c.id, c.file_id, c.chunk_index, c.text, c.contextualized_text,
                    c.heading_context, c.content_hash, c.start_line, c.start_column,
                    c.end_line, c.end_column
             FROM chunks c JOIN files f ON f.id = c.file_id
             WHERE c.id IN (",
        );
        let mut ids = builder.separated(", ");
        for (chunk_id, _) in &scored {
            ids.push_bind(*chunk_id);
        }
        builder.push(")");

        let mut chunks = builder
            .build_query_as::<ChunkWithFile>()
            .fetch_all(&mut *tx)
            .await
            .context("Failed to load chunks for search results")?
            .into_iter()
            .map(|row| (row.chunk.id, row))
            .collect::<HashMap<_, _>>();

        tx.commit()
            .await
            .context("Failed to finish search transaction")?;

        let results = scored
            .into_iter()
            .filter_map(|(chunk_id, distance)| {
                chunks.remove(&chunk_id).map(|row| KnnRow {
                    filename: row.filename,
                    chunk: row.chunk,
                    distance,
                })
            })
            .collect::<Vec<_>>();

        debug!(
            "KNN search over {} returned {} rows",
            table.table_name,
            results.len()
        );
        Ok(results)
    }

    /// Ids of chunks of this pair's files that have no vector row
    #[inline]
    pub async fn chunks_without_vectors(
        pool: &SqlitePool,
        table: &VectorTable,
    ) -> Result<Vec<(i64, i64)>> {
        sqlx::query_as(&format!(
            "SELECT c.id, c.file_id FROM chunks c
             JOIN files f ON f.id = c.file_id
             LEFT JOIN {} v ON v.chunk_id = c.id
             WHERE f.embedding_model = ? AND f.embedding_version = ? AND v.chunk_id IS NULL
             ORDER BY c.id",
            quote_ident(&table.table_name)
        ))
        .bind(&table.embedding_model)
        .bind(table.embedding_version)
        .fetch_all(pool)
        .await
        .context("Failed to find chunks without vectors")
    }

    /// Vector rows whose chunk no longer exists
    #[inline]
    pub async fn orphaned_vectors(pool: &SqlitePool, table: &VectorTable) -> Result<Vec<i64>> {
        sqlx::query_scalar(&format!(
            "SELECT v.chunk_id FROM {} v
             LEFT JOIN chunks c ON c.id = v.chunk_id
             WHERE c.id IS NULL
             ORDER BY v.chunk_id",
            quote_ident(&table.table_name)
        ))
        .fetch_all(pool)
        .await
        .context("Failed to find orphaned vectors")
    }

    #[inline]
    pub async fn delete_orphaned_vectors(pool: &SqlitePool, table: &VectorTable) -> Result<u64> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE chunk_id NOT IN (SELECT id FROM chunks)",
            quote_ident(&table.table_name)
        ))
        .execute(pool)
        .await
        .context("Failed to delete orphaned vectors")?;

        Ok(result.rows_affected())
    }

    /// Drop a pair's vector table together with the file and chunk rows indexed for it
    #[inline]
    pub async fn drop_table(pool: &SqlitePool, table: &VectorTable) -> Result<u64> {
        let mut tx = pool
            .begin()
            .await
            .context("Failed to begin drop transaction")?;

        let removed_files =
            sqlx::query("DELETE FROM files WHERE embedding_model = ? AND embedding_version = ?")
                .bind(&table.embedding_model)
                .bind(table.embedding_version)
                .execute(&mut *tx)
                .await
                .context("Failed to delete files for vector table")?
                .rows_affected();

        sqlx::query(&format!(
            "DROP TABLE IF EXISTS {}",
            quote_ident(&table.table_name)
        ))
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to drop vector table {}", table.table_name))?;

        sqlx::query("DELETE FROM vector_tables WHERE table_name = ?")
            .bind(&table.table_name)
            .execute(&mut *tx)
            .await
            .context("Failed to unregister vector table")?;

        tx.commit()
            .await
            .context("Failed to commit vector table drop")?;

        info!(
            "Dropped vector table {} and {} file records",
            table.table_name, removed_files
        );
        Ok(removed_files)
    }
}
