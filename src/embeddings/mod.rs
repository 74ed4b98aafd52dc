pub mod chunking;
pub mod model;
pub mod ollama;

pub use chunking::{ChunkingConfig, ContentChunk, Position, chunk_markdown, slice_by_position};
pub use model::EmbeddingModel;
pub use ollama::{ModelInfo, OllamaClient};
