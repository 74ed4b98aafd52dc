use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::database::sqlite::models::{
    ChunkRecord, FileRecord, IndexCounts, KnnRow, NewChunk, NewFile, VectorTable,
};
use crate::database::sqlite::queries::{ChunkQueries, FileQueries, IndexQueries};
use crate::database::sqlite::vectors::VectorQueries;

#[cfg(test)]
mod tests;

pub mod models;
pub mod queries;
pub mod vectors;

pub type DbPool = Pool<Sqlite>;

const BUSY_TIMEOUT_SECONDS: u64 = 10;

/// The index store: file and chunk records plus one vector table per (model, version)
#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    #[inline]
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(BUSY_TIMEOUT_SECONDS));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")?;

        let database = Self { pool };
        database.run_migrations().await?;

        Ok(database)
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[inline]
    pub async fn run_migrations(&self) -> Result<()> {
        debug!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run schema migration")?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    /// Idempotently create the base tables and the vector table for a (model, version) pair
    #[inline]
    pub async fn ensure_schema(
        &self,
        model: &str,
        version: i64,
        dimensions: usize,
    ) -> Result<VectorTable> {
        self.run_migrations().await?;
        VectorQueries::ensure_table(&self.pool, model, version, dimensions).await
    }

    // File operations
    #[inline]
    pub async fn upsert_file(&self, new_file: &NewFile) -> Result<i64> {
        FileQueries::upsert(&self.pool, new_file).await
    }

    #[inline]
    pub async fn get_file(
        &self,
        filename: &str,
        model: &str,
        version: i64,
    ) -> Result<Option<FileRecord>> {
        FileQueries::get(&self.pool, filename, model, version).await
    }

    #[inline]
    pub async fn list_files(&self, model: &str, version: i64) -> Result<Vec<FileRecord>> {
        FileQueries::list_for(&self.pool, model, version).await
    }

    #[inline]
    pub async fn update_file_mtime(&self, file_id: i64, mtime: i64) -> Result<()> {
        FileQueries::update_mtime(&self.pool, file_id, mtime).await
    }

    #[inline]
    pub async fn delete_file(&self, file_id: i64) -> Result<bool> {
        FileQueries::delete(&self.pool, file_id).await
    }

    // Chunk operations
    #[inline]
    pub async fn replace_chunks(
        &self,
        table: &VectorTable,
        file_id: i64,
        chunks: &[NewChunk],
    ) -> Result<Vec<i64>> {
        ChunkQueries::replace(&self.pool, table, file_id, chunks).await
    }

    #[inline]
    pub async fn get_chunks_for_file(&self, file_id: i64) -> Result<Vec<ChunkRecord>> {
        ChunkQueries::list_for_file(&self.pool, file_id).await
    }

    #[inline]
    pub async fn commit_file_index(
        &self,
        table: &VectorTable,
        new_file: &NewFile,
        chunks: &[NewChunk],
    ) -> Result<i64> {
        IndexQueries::commit_file_index(&self.pool, table, new_file, chunks).await
    }

    #[inline]
    pub async fn counts(&self, model: &str, version: i64) -> Result<IndexCounts> {
        IndexQueries::counts(&self.pool, model, version).await
    }

    // Vector operations
    #[inline]
    pub async fn knn_search(
        &self,
        table: &VectorTable,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<KnnRow>> {
        VectorQueries::knn(&self.pool, table, query, k).await
    }

    #[inline]
    pub async fn list_vector_tables(&self) -> Result<Vec<VectorTable>> {
        VectorQueries::list_tables(&self.pool).await
    }

    /// Vector tables registered for any pair other than the active one
    #[inline]
    pub async fn stale_vector_tables(&self, active: &VectorTable) -> Result<Vec<VectorTable>> {
        Ok(self
            .list_vector_tables()
            .await?
            .into_iter()
            .filter(|table| table.table_name != active.table_name)
            .collect())
    }

    #[inline]
    pub async fn drop_vector_table(&self, table: &VectorTable) -> Result<u64> {
        VectorQueries::drop_table(&self.pool, table).await
    }

    /// Optimize database performance by running VACUUM and ANALYZE
    #[inline]
    pub async fn optimize(&self) -> Result<()> {
        info!("Optimizing database performance");

        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .context("Failed to vacuum database")?;

        sqlx::query("ANALYZE")
            .execute(&self.pool)
            .await
            .context("Failed to analyze database")?;

        debug!("Database optimization completed");
        Ok(())
    }
}
