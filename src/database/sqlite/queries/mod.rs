#[cfg(test)]
mod tests;

use super::models::*;
use super::vectors::VectorQueries;
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

const FILE_COLUMNS: &str =
    "id, filename, mtime, content_hash, embedding_model, embedding_version, indexed_date";

const CHUNK_COLUMNS: &str = "id, file_id, chunk_index, text, contextualized_text, heading_context, \
     content_hash, start_line, start_column, end_line, end_column";

pub struct FileQueries;

impl FileQueries {
    /// Insert a file row, or update it in place when its (filename, model, version) key exists
    #[inline]
    pub async fn upsert(pool: &SqlitePool, new_file: &NewFile) -> Result<i64> {
        let mut conn = pool
            .acquire()
            .await
            .context("Failed to acquire connection")?;
        Self::upsert_with(&mut conn, new_file).await
    }

    #[inline]
    pub async fn upsert_with(conn: &mut SqliteConnection, new_file: &NewFile) -> Result<i64> {
        let id = sqlx::query_scalar(
            "INSERT INTO files
                (filename, mtime, content_hash, embedding_model, embedding_version, indexed_date)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (filename, embedding_model, embedding_version) DO UPDATE SET
                mtime = excluded.mtime,
                content_hash = excluded.content_hash,
                indexed_date = excluded.indexed_date
             RETURNING id",
        )
        .bind(&new_file.filename)
        .bind(new_file.mtime)
        .bind(&new_file.content_hash)
        .bind(&new_file.embedding_model)
        .bind(new_file.embedding_version)
        .bind(Utc::now().naive_utc())
        .fetch_one(conn)
        .await
        .with_context(|| format!("Failed to upsert file {}", new_file.filename))?;

        Ok(id)
    }

    #[inline]
    pub async fn get(
        pool: &SqlitePool,
        filename: &str,
        model: &str,
        version: i64,
    ) -> Result<Option<FileRecord>> {
        sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE filename = ? AND embedding_model = ? AND embedding_version = ?"
        ))
        .bind(filename)
        .bind(model)
        .bind(version)
        .fetch_optional(pool)
        .await
        .context("Failed to get file")
    }

    /// Every file indexed under a (model, version) pair, ordered by filename
    #[inline]
    pub async fn list_for(pool: &SqlitePool, model: &str, version: i64) -> Result<Vec<FileRecord>> {
        sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE embedding_model = ? AND embedding_version = ?
             ORDER BY filename"
        ))
        .bind(model)
        .bind(version)
        .fetch_all(pool)
        .await
        .context("Failed to list files")
    }

    #[inline]
    pub async fn update_mtime(pool: &SqlitePool, id: i64, mtime: i64) -> Result<()> {
        sqlx::query("UPDATE files SET mtime = ? WHERE id = ?")
            .bind(mtime)
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to update file mtime")?;
        Ok(())
    }

    /// Delete a file; its chunks and their vectors go with it
    #[inline]
    pub async fn delete(pool: &SqlitePool, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to delete file")?;

        Ok(result.rows_affected() > 0)
    }

    #[inline]
    pub async fn count_for(pool: &SqlitePool, model: &str, version: i64) -> Result<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM files WHERE embedding_model = ? AND embedding_version = ?",
        )
        .bind(model)
        .bind(version)
        .fetch_one(pool)
        .await
        .context("Failed to count files")
    }
}

pub struct ChunkQueries;

impl ChunkQueries {
    /// Atomically replace every chunk and vector of `file_id` with `chunks`
    #[inline]
    pub async fn replace(
        pool: &SqlitePool,
        table: &VectorTable,
        file_id: i64,
        chunks: &[NewChunk],
    ) -> Result<Vec<i64>> {
        let mut tx = pool
            .begin()
            .await
            .context("Failed to begin chunk transaction")?;

        let ids = Self::replace_with(&mut tx, table, file_id, chunks).await?;

        tx.commit()
            .await
            .context("Failed to commit chunk replacement")?;
        Ok(ids)
    }

    /// The body of [`ChunkQueries::replace`], for callers that own the transaction
    #[inline]
    pub async fn replace_with(
        conn: &mut SqliteConnection,
        table: &VectorTable,
        file_id: i64,
        chunks: &[NewChunk],
    ) -> Result<Vec<i64>> {
        let removed_vectors = VectorQueries::delete_for_file(conn, table, file_id).await?;

        let removed_chunks = sqlx::query("DELETE FROM chunks WHERE file_id = ?")
            .bind(file_id)
            .execute(&mut *conn)
            .await
            .context("Failed to delete existing chunks")?
            .rows_affected();

        let mut ids = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let id: i64 = sqlx::query_scalar(
                "INSERT INTO chunks
                    (file_id, chunk_index, text, contextualized_text, heading_context,
                     content_hash, start_line, start_column, end_line, end_column)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 RETURNING id",
            )
            .bind(file_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(&chunk.contextualized_text)
            .bind(&chunk.heading_context)
            .bind(&chunk.content_hash)
            .bind(to_db(chunk.start.line))
            .bind(to_db(chunk.start.column))
            .bind(to_db(chunk.end.line))
            .bind(to_db(chunk.end.column))
            .fetch_one(&mut *conn)
            .await
            .with_context(|| format!("Failed to insert chunk {}", chunk.chunk_index))?;

            VectorQueries::insert(conn, table, id, &chunk.embedding).await?;
            ids.push(id);
        }

        debug!(
            "Replaced {} chunks ({} vectors) of file {} with {} chunks",
            removed_chunks,
            removed_vectors,
            file_id,
            ids.len()
        );
        Ok(ids)
    }

    #[inline]
    pub async fn list_for_file(pool: &SqlitePool, file_id: i64) -> Result<Vec<ChunkRecord>> {
        sqlx::query_as::<_, ChunkRecord>(&format!(
            "SELECT {CHUNK_COLUMNS} FROM chunks WHERE file_id = ? ORDER BY chunk_index"
        ))
        .bind(file_id)
        .fetch_all(pool)
        .await
        .context("Failed to list chunks for file")
    }

    #[inline]
    pub async fn count_for(pool: &SqlitePool, model: &str, version: i64) -> Result<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM chunks c JOIN files f ON f.id = c.file_id
             WHERE f.embedding_model = ? AND f.embedding_version = ?",
        )
        .bind(model)
        .bind(version)
        .fetch_one(pool)
        .await
        .context("Failed to count chunks")
    }
}

pub struct IndexQueries;

impl IndexQueries {
    /// Upsert a file row and replace its chunk/vector generation in one transaction.
    ///
    /// Either the new hash, chunks and vectors all become visible, or none of them do.
    #[inline]
    pub async fn commit_file_index(
        pool: &SqlitePool,
        table: &VectorTable,
        new_file: &NewFile,
        chunks: &[NewChunk],
    ) -> Result<i64> {
        let mut tx = pool
            .begin()
            .await
            .context("Failed to begin index transaction")?;

        let file_id = FileQueries::upsert_with(&mut tx, new_file).await?;
        ChunkQueries::replace_with(&mut tx, table, file_id, chunks).await?;

        tx.commit()
            .await
            .with_context(|| format!("Failed to commit index of {}", new_file.filename))?;

        Ok(file_id)
    }

    #[inline]
    pub async fn counts(pool: &SqlitePool, model: &str, version: i64) -> Result<IndexCounts> {
        Ok(IndexCounts {
            files: FileQueries::count_for(pool, model, version).await?,
            chunks: ChunkQueries::count_for(pool, model, version).await?,
        })
    }
}
