
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::config::Config;
use crate::embeddings::chunking::ContentChunk;
use crate::embeddings::ollama::OllamaClient;

const GENERATION_TIMEOUT_SECONDS: u64 = 120;

/// Writes a short description that situates a chunk within its document
#[async_trait]
pub trait ContextGenerator: Send + Sync {
    async fn generate_context(&self, document: &str, chunk: &str) -> Result<String>;
}

/// Context generation through an Ollama completion model
#[derive(Debug, Clone)]
pub struct OllamaContextGenerator {
    client: OllamaClient,
    model: String,
}

impl OllamaContextGenerator {
    #[inline]
    pub fn new(client: OllamaClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    /// Build a generator from the `[ollama]` and `[enrichment]` sections, or `None` when
    /// enrichment is disabled
    #[inline]
    pub fn from_config(config: &Config) -> Result<Option<Self>> {
        if !config.enrichment.enabled {
            return Ok(None);
        }

        let client = OllamaClient::new(&config.ollama)
            .context("Failed to create Ollama client for enrichment")?
            .with_timeout(Duration::from_secs(GENERATION_TIMEOUT_SECONDS));

        Ok(Some(Self::new(client, config.enrichment.model.clone())))
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ContextGenerator for OllamaContextGenerator {
    #[inline]
    async fn generate_context(&self, document: &str, chunk: &str) -> Result<String> {
        let client = self.client.clone();
        let model = self.model.clone();
        let prompt = build_prompt(document, chunk);

        tokio::task::spawn_blocking(move || client.generate(&model, &prompt))
            .await
            .context("Context generation task failed to complete")?
    }
}

fn build_prompt(document: &str, chunk: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str("<document>\n");
    prompt.push_str(document);
    prompt.push_str("\n</document>\n\n");
    prompt.push_str("Here is a chunk of the document above:\n<chunk>\n");
    prompt.push_str(chunk);
    prompt.push_str("\n</chunk>\n\n");
    prompt.push_str(
        "Write one or two sentences that situate this chunk within the overall document so it \
         can be found by search. Answer only with that context and nothing else.",
    );
    prompt
}

/// Prefix `text` with a generated context, leaving it unchanged when the context is blank
#[inline]
pub fn contextualize(context: &str, separator: &str, text: &str) -> String {
    let context = context.trim();
    if context.is_empty() {
        text.to_string()
    } else {
        format!("{context}{separator}{text}")
    }
}

/// Produce the contextualized text for each chunk, in order.
///
/// Any generator failure aborts the whole batch; callers must not commit a partially enriched
/// document.
#[inline]
pub async fn enrich_chunks(
    generator: &dyn ContextGenerator,
    document: &str,
    chunks: &[&ContentChunk],
    separator: &str,
) -> Result<Vec<String>> {
    let mut enriched = Vec::with_capacity(chunks.len());

    for chunk in chunks {
        let context = generator
            .generate_context(document, &chunk.text)
            .await
            .with_context(|| format!("Failed to generate context for chunk at {}", chunk.start))?;
        enriched.push(contextualize(&context, separator, &chunk.text));
    }

    debug!("Enriched {} chunks", enriched.len());
    Ok(enriched)
}
