
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::embeddings::chunking::Position;

/// One indexed note for a given (model, version) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct FileRecord {
    pub id: i64,
    pub filename: String,
    /// Modification time in milliseconds since the Unix epoch
    pub mtime: i64,
    pub content_hash: String,
    pub embedding_model: String,
    pub embedding_version: i64,
    pub indexed_date: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFile {
    pub filename: String,
    pub mtime: i64,
    pub content_hash: String,
    pub embedding_model: String,
    pub embedding_version: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ChunkRecord {
    pub id: i64,
    pub file_id: i64,
    pub chunk_index: i64,
    pub text: String,
    pub contextualized_text: String,
    pub heading_context: Option<String>,
    /// SHA-256 of heading context and raw text, used to recognise unchanged chunks
    pub content_hash: String,
    pub start_line: i64,
    pub start_column: i64,
    pub end_line: i64,
    pub end_column: i64,
}

impl ChunkRecord {
    #[inline]
    pub fn start(&self) -> Position {
        Position::new(from_db(self.start_line), from_db(self.start_column))
    }

    #[inline]
    pub fn end(&self) -> Position {
        Position::new(from_db(self.end_line), from_db(self.end_column))
    }
}

/// A chunk ready to be written, together with its vector.
///
/// Carrying the embedding on the chunk keeps the chunk/vector pairing one-to-one all the way
/// into the store transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewChunk {
    pub chunk_index: i64,
    pub text: String,
    pub contextualized_text: String,
    pub heading_context: Option<String>,
    pub content_hash: String,
    pub start: Position,
    pub end: Position,
    pub embedding: Vec<f32>,
}

/// A chunk joined with the name of the file that owns it
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ChunkWithFile {
    pub filename: String,
    #[sqlx(flatten)]
    pub chunk: ChunkRecord,
}

/// A nearest-neighbour hit, ordered by ascending `distance`
#[derive(Debug, Clone, PartialEq)]
pub struct KnnRow {
    pub filename: String,
    pub chunk: ChunkRecord,
    /// Cosine distance, `1 - cosine similarity`
    pub distance: f32,
}

/// Registry entry for one per-(model, version) vector table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct VectorTable {
    pub table_name: String,
    pub embedding_model: String,
    pub embedding_version: i64,
    pub dimensions: i64,
    pub created_date: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexCounts {
    pub files: i64,
    pub chunks: i64,
}

#[inline]
pub(crate) fn to_db(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[inline]
pub(crate) fn from_db(value: i64) -> usize {
    usize::try_from(value).unwrap_or_default()
}
