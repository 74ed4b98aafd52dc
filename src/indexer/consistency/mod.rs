// Consistency validation between chunk rows and the active vector table


use anyhow::Result;
use std::collections::BTreeSet;
use tracing::{debug, error, info, warn};

use crate::database::sqlite::Database;
use crate::database::sqlite::models::VectorTable;
use crate::database::sqlite::queries::ChunkQueries;
use crate::database::sqlite::vectors::VectorQueries;

/// Consistency check results for one (model, version) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyReport {
    /// Number of chunks indexed under the pair
    pub total_chunks: usize,
    /// Number of rows in the pair's vector table
    pub total_vectors: usize,
    /// Chunks that have no vector
    pub chunks_without_vectors: Vec<i64>,
    /// Files owning at least one chunk without a vector
    pub files_with_missing_vectors: Vec<i64>,
    /// Vectors whose chunk no longer exists
    pub orphaned_vectors: Vec<i64>,
    /// Vector tables of other pairs, eligible for pruning
    pub stale_tables: Vec<VectorTable>,
    /// Overall consistency status
    pub is_consistent: bool,
}

impl ConsistencyReport {
    /// Get a human-readable summary of the consistency report
    #[inline]
    pub fn summary(&self) -> String {
        let summary = if self.is_consistent {
            format!(
                "Index is consistent: {} chunks, {} vectors",
                self.total_chunks, self.total_vectors
            )
        } else {
            format!(
                "Index inconsistencies found: {} chunks without vectors in {} files, {} orphaned vectors",
                self.chunks_without_vectors.len(),
                self.files_with_missing_vectors.len(),
                self.orphaned_vectors.len()
            )
        };

        if self.stale_tables.is_empty() {
            summary
        } else {
            format!(
                "{summary} ({} stale vector tables)",
                self.stale_tables.len()
            )
        }
    }

    /// Get the total number of consistency issues
    #[inline]
    pub fn total_issues(&self) -> usize {
        self.chunks_without_vectors
            .len()
            .saturating_add(self.orphaned_vectors.len())
    }
}

/// Performs consistency validation of the active vector table
pub struct ConsistencyValidator<'a> {
    database: &'a Database,
    table: &'a VectorTable,
}

impl<'a> ConsistencyValidator<'a> {
    #[inline]
    pub const fn new(database: &'a Database, table: &'a VectorTable) -> Self {
        Self { database, table }
    }

    /// Compare chunk rows with vector rows and list vector tables of other pairs
    #[inline]
    pub async fn validate_consistency(&self) -> Result<ConsistencyReport> {
        info!(
            "Validating consistency of vector table {}",
            self.table.table_name
        );
        let pool = self.database.pool();

        let total_chunks = ChunkQueries::count_for(
            pool,
            &self.table.embedding_model,
            self.table.embedding_version,
        )
        .await?;
        let total_vectors = VectorQueries::count(pool, self.table).await?;
        debug!("Found {} chunks and {} vectors", total_chunks, total_vectors);

        let missing = VectorQueries::chunks_without_vectors(pool, self.table).await?;
        let files_with_missing_vectors: Vec<i64> = missing
            .iter()
            .map(|&(_, file_id)| file_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let chunks_without_vectors: Vec<i64> =
            missing.into_iter().map(|(chunk_id, _)| chunk_id).collect();

        let orphaned_vectors = VectorQueries::orphaned_vectors(pool, self.table).await?;
        let stale_tables = self.database.stale_vector_tables(self.table).await?;

        let is_consistent = chunks_without_vectors.is_empty() && orphaned_vectors.is_empty();

        let report = ConsistencyReport {
            total_chunks: usize::try_from(total_chunks).unwrap_or_default(),
            total_vectors: usize::try_from(total_vectors).unwrap_or_default(),
            chunks_without_vectors,
            files_with_missing_vectors,
            orphaned_vectors,
            stale_tables,
            is_consistent,
        };

        if report.is_consistent {
            info!("Consistency validation passed");
        } else {
            warn!("Consistency validation found issues");
            Self::log_consistency_issues(&report);
        }

        Ok(report)
    }

    /// Delete vectors whose chunk no longer exists
    #[inline]
    pub async fn cleanup_orphaned_vectors(&self) -> Result<u64> {
        let cleaned =
            VectorQueries::delete_orphaned_vectors(self.database.pool(), self.table).await?;
        if cleaned > 0 {
            info!("Cleaned up {} orphaned vectors", cleaned);
        }
        Ok(cleaned)
    }

    /// Forget files with missing vectors so the next scan indexes them from scratch
    #[inline]
    pub async fn invalidate_files(&self, file_ids: &[i64]) -> Result<usize> {
        let mut invalidated = 0_usize;

        for &file_id in file_ids {
            match self.database.delete_file(file_id).await {
                Ok(true) => {
                    invalidated = invalidated.saturating_add(1);
                    debug!("Invalidated file {}", file_id);
                }
                Ok(false) => {
                    warn!("File {} not found for invalidation", file_id);
                }
                Err(e) => {
                    error!("Failed to invalidate file {}: {}", file_id, e);
                }
            }
        }

        Ok(invalidated)
    }

    /// Drop the given vector tables together with the file rows of their pairs
    #[inline]
    pub async fn drop_stale_tables(&self, tables: &[VectorTable]) -> Result<usize> {
        let mut dropped = 0_usize;

        for table in tables {
            if table.table_name == self.table.table_name {
                warn!("Refusing to drop the active vector table {}", table.table_name);
                continue;
            }

            let files = self.database.drop_vector_table(table).await?;
            info!(
                "Dropped vector table {} and {} files of {} v{}",
                table.table_name, files, table.embedding_model, table.embedding_version
            );
            dropped = dropped.saturating_add(1);
        }

        Ok(dropped)
    }

    fn log_consistency_issues(report: &ConsistencyReport) {
        if !report.chunks_without_vectors.is_empty() {
            warn!(
                "{} chunks in {} files have no vector",
                report.chunks_without_vectors.len(),
                report.files_with_missing_vectors.len()
            );
        }

        if !report.orphaned_vectors.is_empty() {
            warn!(
                "{} vectors have no chunk: {:?}",
                report.orphaned_vectors.len(),
                report.orphaned_vectors
            );
        }
    }
}
