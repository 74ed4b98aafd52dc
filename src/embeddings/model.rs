use anyhow::Result;
use async_trait::async_trait;

/// A backend that turns text into fixed-width vectors.
///
/// `model_name` and `dimensions` must be stable for the lifetime of a backend: together with the
/// embedding format version they decide which vector table a chunk is stored in.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    fn model_name(&self) -> &str;

    fn dimensions(&self) -> usize;

    /// Embed one chunk of a document
    async fn embed_chunk(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a search query. Some models are trained with different prefixes for queries
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several chunks, returning vectors in input order
    async fn embed_chunks(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed_chunk(text).await?);
        }
        Ok(vectors)
    }
}
