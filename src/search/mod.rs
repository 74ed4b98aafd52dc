// Semantic search over the active vector table


use std::sync::Arc;

use tracing::debug;

use crate::database::sqlite::Database;
use crate::database::sqlite::models::{KnnRow, VectorTable};
use crate::database::sqlite::vectors::VectorQueries;
use crate::embeddings::chunking::Position;
use crate::embeddings::model::EmbeddingModel;
use crate::{NotesError, Result};

/// One chunk matching a query
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub filename: String,
    pub text: String,
    pub contextualized_text: String,
    pub heading_context: Option<String>,
    pub start: Position,
    pub end: Position,
    /// Cosine similarity, `1 - distance`
    pub score: f32,
}

impl From<KnnRow> for SearchResult {
    #[inline]
    fn from(row: KnnRow) -> Self {
        let start = row.chunk.start();
        let end = row.chunk.end();
        Self {
            filename: row.filename,
            text: row.chunk.text,
            contextualized_text: row.chunk.contextualized_text,
            heading_context: row.chunk.heading_context,
            start,
            end,
            score: 1.0 - row.distance,
        }
    }
}

/// Embeds queries and ranks stored chunks by cosine similarity
#[derive(Clone)]
pub struct Searcher {
    database: Database,
    table: VectorTable,
    embedder: Arc<dyn EmbeddingModel>,
}

impl Searcher {
    #[inline]
    pub fn new(database: Database, table: VectorTable, embedder: Arc<dyn EmbeddingModel>) -> Self {
        Self {
            database,
            table,
            embedder,
        }
    }

    /// The `top_k` chunks closest to `query`, best first.
    ///
    /// Returns an empty list without embedding the query when `top_k` is zero or nothing has
    /// been indexed yet.
    #[inline]
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let indexed = VectorQueries::count(self.database.pool(), &self.table)
            .await
            .map_err(|e| NotesError::Store(format!("{e:#}")))?;
        if indexed == 0 {
            debug!("Search on empty index for {:?}", query);
            return Ok(Vec::new());
        }

        let embedding = self
            .embedder
            .embed_query(query)
            .await
            .map_err(|e| NotesError::Embedding(format!("{e:#}")))?;

        let rows = self
            .database
            .knn_search(&self.table, &embedding, top_k)
            .await
            .map_err(|e| NotesError::Store(format!("{e:#}")))?;

        debug!("Search for {:?} returned {} results", query, rows.len());
        Ok(rows.into_iter().map(SearchResult::from).collect())
    }
}
