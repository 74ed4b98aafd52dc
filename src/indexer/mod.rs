// Indexer module
// Keeps the index of one notes directory in step with the files on disk

pub mod consistency;
pub mod queue;
pub mod scanner;


use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::{Config, ReembedStrategy};
use crate::database::sqlite::Database;
use crate::database::sqlite::models::{ChunkRecord, NewChunk, NewFile, VectorTable};
use crate::database::sqlite::vectors::VectorQueries;
use crate::embeddings::chunking::{ChunkingConfig, ContentChunk, chunk_markdown};
use crate::embeddings::model::EmbeddingModel;
use crate::embeddings::ollama::OllamaClient;
use crate::enrichment::{ContextGenerator, OllamaContextGenerator, enrich_chunks};
use crate::search::{SearchResult, Searcher};
use crate::{NotesError, Result};

pub use consistency::{ConsistencyReport, ConsistencyValidator};
pub use queue::{ActivityEntry, IndexOperation, IndexState, OperationKind};
pub use scanner::{
    ChangeKind, DirectoryListing, ScanReport, Scanner, chunk_content_hash, hash_content,
};

use scanner::scan_error;

fn store_error(error: &anyhow::Error) -> NotesError {
    NotesError::Store(format!("{error:#}"))
}

/// Settings the indexer needs besides its backends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexerOptions {
    pub notes_dir: PathBuf,
    pub extension: String,
    pub embedding_version: i64,
    pub chunking: ChunkingConfig,
    pub separator: String,
    pub reembed_strategy: ReembedStrategy,
    pub activity_log_capacity: usize,
}

impl IndexerOptions {
    #[inline]
    pub fn from_config(config: &Config) -> Self {
        Self {
            notes_dir: config.notes_dir.clone(),
            extension: config.indexer.normalized_extension().to_string(),
            embedding_version: i64::from(config.indexer.embedding_version),
            chunking: config.chunking.clone(),
            separator: config.enrichment.separator.clone(),
            reembed_strategy: config.indexer.reembed_strategy,
            activity_log_capacity: config.indexer.activity_log_capacity,
        }
    }
}

/// Index statistics
#[derive(Debug, Clone, PartialEq)]
pub struct IndexStats {
    pub total_files: usize,
    pub total_chunks: usize,
    pub queue_depth: usize,
    pub recent_activity: Vec<ActivityEntry>,
}

/// Outcome of draining the queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub processed: usize,
    pub failed: usize,
}

/// Outcome of a full scan followed by a drain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReindexReport {
    pub scan: ScanReport,
    pub drain: DrainReport,
}

/// Index of a notes directory for one (model, version) pair.
///
/// Cloning is cheap and clones share the queue, the activity log and the processing lock, so a
/// scanner task and a processor task can each hold their own handle.
#[derive(Clone)]
pub struct Indexer {
    database: Database,
    table: VectorTable,
    embedder: Arc<dyn EmbeddingModel>,
    enricher: Option<Arc<dyn ContextGenerator>>,
    scanner: Scanner,
    options: IndexerOptions,
    state: Arc<IndexState>,
    worker: Arc<Mutex<()>>,
}

impl Indexer {
    /// Create an indexer, creating the vector table for the embedder's (model, version) pair
    /// when it does not exist yet
    #[inline]
    pub async fn new(
        database: Database,
        embedder: Arc<dyn EmbeddingModel>,
        options: IndexerOptions,
    ) -> Result<Self> {
        let table = database
            .ensure_schema(
                embedder.model_name(),
                options.embedding_version,
                embedder.dimensions(),
            )
            .await
            .map_err(|e| store_error(&e))?;

        let scanner = Scanner::new(
            &options.notes_dir,
            &options.extension,
            embedder.model_name(),
            options.embedding_version,
        );

        info!(
            "Indexing {} into {} ({} dimensions)",
            options.notes_dir.display(),
            table.table_name,
            table.dimensions
        );

        Ok(Self {
            database,
            table,
            embedder,
            enricher: None,
            scanner,
            state: Arc::new(IndexState::new(options.activity_log_capacity)),
            options,
            worker: Arc::new(Mutex::new(())),
        })
    }

    /// Build the indexer described by a configuration: SQLite store, Ollama embeddings and
    /// optional Ollama enrichment
    #[inline]
    pub async fn from_config(config: &Config) -> Result<Self> {
        let database = Database::new(config.database_path())
            .await
            .map_err(|e| store_error(&e))?;
        let client = OllamaClient::new(&config.ollama)
            .map_err(|e| NotesError::Config(format!("{e:#}")))?;
        let enricher = OllamaContextGenerator::from_config(config)
            .map_err(|e| NotesError::Config(format!("{e:#}")))?;

        let mut indexer = Self::new(
            database,
            Arc::new(client),
            IndexerOptions::from_config(config),
        )
        .await?;
        indexer.enricher = enricher.map(|enricher| Arc::new(enricher) as Arc<dyn ContextGenerator>);

        Ok(indexer)
    }

    /// Generate a context for every chunk before embedding it
    #[inline]
    #[must_use]
    pub fn with_enricher(mut self, enricher: Arc<dyn ContextGenerator>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    #[inline]
    pub const fn database(&self) -> &Database {
        &self.database
    }

    #[inline]
    pub const fn vector_table(&self) -> &VectorTable {
        &self.table
    }

    #[inline]
    pub fn notes_dir(&self) -> &Path {
        &self.options.notes_dir
    }

    fn model(&self) -> &str {
        &self.table.embedding_model
    }

    fn version(&self) -> i64 {
        self.table.embedding_version
    }

    /// Compare the notes directory with the index and queue the resulting operations
    #[inline]
    pub async fn scan_for_changes(&self) -> Result<ScanReport> {
        let report = self.scanner.scan(&self.database).await?;
        self.state.enqueue_all(report.operations.clone()).await;
        Ok(report)
    }

    /// Queue a single file for indexing, or for deletion when it no longer exists on disk
    #[inline]
    pub async fn enqueue_file(&self, filename: &str) {
        let operation = if self.options.notes_dir.join(filename).is_file() {
            IndexOperation::index(filename)
        } else {
            IndexOperation::delete(filename)
        };
        self.state.enqueue(operation).await;
    }

    /// Take the oldest queued operation and apply it.
    ///
    /// Returns `Ok(None)` when the queue is empty. A failed operation is dropped from the queue
    /// and leaves the file's previous index untouched; the next scan picks the file up again.
    #[inline]
    pub async fn process_next(&self) -> Result<Option<ActivityEntry>> {
        let _worker = self.worker.lock().await;

        let Some(operation) = self.state.next_operation().await else {
            return Ok(None);
        };

        let chunk_count = match operation.kind {
            OperationKind::Index => self.index_file(&operation.filename).await,
            OperationKind::Delete => self.delete_file(&operation.filename).await,
        }
        .inspect_err(|e| warn!("Failed to {} {}: {}", operation.kind, operation.filename, e))?;

        let entry = ActivityEntry {
            filename: operation.filename,
            kind: operation.kind,
            chunk_count,
            timestamp: Utc::now(),
        };
        self.state.record_activity(entry.clone()).await;
        Ok(Some(entry))
    }

    /// Process queued operations until the queue is empty
    #[inline]
    pub async fn drain(&self) -> DrainReport {
        let mut report = DrainReport::default();

        loop {
            match self.process_next().await {
                Ok(Some(_)) => report.processed = report.processed.saturating_add(1),
                Ok(None) => break,
                Err(_) => report.failed = report.failed.saturating_add(1),
            }
        }

        if report.processed > 0 || report.failed > 0 {
            info!(
                "Processed {} operations ({} failed)",
                report.processed, report.failed
            );
        }
        report
    }

    /// Scan once and process everything the scan found
    #[inline]
    pub async fn reindex(&self) -> Result<ReindexReport> {
        let scan = self.scan_for_changes().await?;
        let drain = self.drain().await;
        Ok(ReindexReport { scan, drain })
    }

    #[inline]
    pub fn searcher(&self) -> Searcher {
        Searcher::new(
            self.database.clone(),
            self.table.clone(),
            Arc::clone(&self.embedder),
        )
    }

    #[inline]
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        self.searcher().search(query, top_k).await
    }

    #[inline]
    pub async fn get_stats(&self) -> Result<IndexStats> {
        let counts = self
            .database
            .counts(self.model(), self.version())
            .await
            .map_err(|e| store_error(&e))?;

        Ok(IndexStats {
            total_files: usize::try_from(counts.files).unwrap_or_default(),
            total_chunks: usize::try_from(counts.chunks).unwrap_or_default(),
            queue_depth: self.state.queue_size().await,
            recent_activity: self.state.recent_activity().await,
        })
    }

    #[inline]
    pub async fn queue_size(&self) -> usize {
        self.state.queue_size().await
    }

    #[inline]
    pub async fn queued_files(&self) -> Vec<String> {
        self.state.queued_files().await
    }

    #[inline]
    pub async fn recent_activity(&self) -> Vec<ActivityEntry> {
        self.state.recent_activity().await
    }

    /// Validate consistency between chunk rows and the active vector table
    #[inline]
    pub async fn validate_consistency(&self) -> Result<ConsistencyReport> {
        info!("Running index consistency validation");

        ConsistencyValidator::new(&self.database, &self.table)
            .validate_consistency()
            .await
            .map_err(|e| store_error(&e))
    }

    /// Repair what a consistency report found: orphaned vectors are deleted and files with
    /// missing vectors are forgotten so the next scan indexes them again
    #[inline]
    pub async fn cleanup_inconsistencies(&self, report: &ConsistencyReport) -> Result<()> {
        if report.is_consistent {
            info!("Index is consistent, no cleanup needed");
            return Ok(());
        }

        info!("Cleaning up index inconsistencies");
        let validator = ConsistencyValidator::new(&self.database, &self.table);

        if !report.orphaned_vectors.is_empty() {
            let cleaned = validator
                .cleanup_orphaned_vectors()
                .await
                .map_err(|e| store_error(&e))?;
            info!("Cleaned up {} orphaned vectors", cleaned);
        }

        if !report.files_with_missing_vectors.is_empty() {
            let invalidated = validator
                .invalidate_files(&report.files_with_missing_vectors)
                .await
                .map_err(|e| store_error(&e))?;
            info!("Invalidated {} files for re-indexing", invalidated);
        }

        info!("Index consistency cleanup completed");
        Ok(())
    }

    /// Drop vector tables and file rows of every (model, version) pair but the active one
    #[inline]
    pub async fn prune_stale_tables(&self) -> Result<usize> {
        let stale = self
            .database
            .stale_vector_tables(&self.table)
            .await
            .map_err(|e| store_error(&e))?;

        ConsistencyValidator::new(&self.database, &self.table)
            .drop_stale_tables(&stale)
            .await
            .map_err(|e| store_error(&e))
    }

    /// Scan the notes directory every `interval` until the handle is aborted
    #[inline]
    pub fn spawn_scanner(&self, interval: Duration) -> JoinHandle<()> {
        let indexer = self.clone();

        tokio::spawn(async move {
            #[expect(
                clippy::infinite_loop,
                reason = "intended to run until handle is aborted"
            )]
            loop {
                if let Err(e) = indexer.scan_for_changes().await {
                    error!("Failed to scan {}: {}", indexer.notes_dir().display(), e);
                }
                sleep(interval).await;
            }
        })
    }

    /// Apply queued operations as they arrive until the handle is aborted.
    ///
    /// The processor waits for an enqueue notification, but also wakes every `poll_interval`
    /// so work queued by another handle is never missed.
    #[inline]
    pub fn spawn_processor(&self, poll_interval: Duration) -> JoinHandle<()> {
        let indexer = self.clone();

        tokio::spawn(async move {
            #[expect(
                clippy::infinite_loop,
                reason = "intended to run until handle is aborted"
            )]
            loop {
                indexer.drain().await;
                if indexer.state.has_pending().await {
                    continue;
                }
                let _ = tokio::time::timeout(poll_interval, indexer.state.wait_for_work()).await;
            }
        })
    }

    async fn delete_file(&self, filename: &str) -> Result<usize> {
        let Some(file) = self
            .database
            .get_file(filename, self.model(), self.version())
            .await
            .map_err(|e| store_error(&e))?
        else {
            debug!("{} is not indexed, nothing to delete", filename);
            return Ok(0);
        };

        let chunks = self
            .database
            .get_chunks_for_file(file.id)
            .await
            .map_err(|e| store_error(&e))?
            .len();
        self.database
            .delete_file(file.id)
            .await
            .map_err(|e| store_error(&e))?;

        info!("Removed {} ({} chunks)", filename, chunks);
        Ok(chunks)
    }

    async fn index_file(&self, filename: &str) -> Result<usize> {
        let path = self.options.notes_dir.join(filename);

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{} disappeared before indexing, removing it", filename);
                return self.delete_file(filename).await;
            }
            Err(e) => return Err(scan_error(&path, e)),
        };
        let mtime = scanner::mtime_millis(&metadata).map_err(|e| scan_error(&path, e))?;
        let bytes = tokio::fs::read(&path).await.map_err(|e| scan_error(&path, e))?;
        let content_hash = hash_content(&bytes);
        let document = String::from_utf8(bytes).map_err(|e| scan_error(&path, e))?;

        let chunks = chunk_markdown(&document, &self.options.chunking);
        let hashes: Vec<String> = chunks
            .iter()
            .map(|chunk| chunk_content_hash(chunk.heading_context.as_deref(), &chunk.text))
            .collect();

        let mut reusable = match self.options.reembed_strategy {
            ReembedStrategy::Full => HashMap::new(),
            ReembedStrategy::ReuseUnchanged => self.reusable_chunks(filename).await?,
        };

        let mut prepared: Vec<Option<(String, Vec<f32>)>> = hashes
            .iter()
            .map(|hash| reusable.remove(hash))
            .collect();
        let pending: Vec<&ContentChunk> = chunks
            .iter()
            .zip(&prepared)
            .filter(|(_, reused)| reused.is_none())
            .map(|(chunk, _)| chunk)
            .collect();
        debug!(
            "{}: {} chunks, {} to embed",
            filename,
            chunks.len(),
            pending.len()
        );

        let texts = self.contextualize(filename, &document, &pending).await?;
        let vectors = self.embed(filename, &texts).await?;

        let mut fresh = texts.into_iter().zip(vectors);
        for slot in prepared.iter_mut().filter(|slot| slot.is_none()) {
            *slot = fresh.next();
        }

        let new_chunks = chunks
            .into_iter()
            .zip(hashes)
            .zip(prepared)
            .enumerate()
            .map(|(index, ((chunk, hash), prepared))| {
                let (contextualized_text, embedding) = prepared.ok_or_else(|| {
                    NotesError::Embedding(format!("{filename}: missing vector for chunk {index}"))
                })?;
                Ok(NewChunk {
                    chunk_index: i64::try_from(index).unwrap_or(i64::MAX),
                    text: chunk.text,
                    contextualized_text,
                    heading_context: chunk.heading_context,
                    content_hash: hash,
                    start: chunk.start,
                    end: chunk.end,
                    embedding,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let new_file = NewFile {
            filename: filename.to_string(),
            mtime,
            content_hash,
            embedding_model: self.model().to_string(),
            embedding_version: self.version(),
        };

        self.database
            .commit_file_index(&self.table, &new_file, &new_chunks)
            .await
            .map_err(|e| store_error(&e))?;

        info!("Indexed {} ({} chunks)", filename, new_chunks.len());
        Ok(new_chunks.len())
    }

    /// Stored contextualized text and vector of the file's current chunks, keyed by chunk hash
    async fn reusable_chunks(&self, filename: &str) -> Result<HashMap<String, (String, Vec<f32>)>> {
        let Some(file) = self
            .database
            .get_file(filename, self.model(), self.version())
            .await
            .map_err(|e| store_error(&e))?
        else {
            return Ok(HashMap::new());
        };

        let records: Vec<ChunkRecord> = self
            .database
            .get_chunks_for_file(file.id)
            .await
            .map_err(|e| store_error(&e))?;
        let mut vectors = VectorQueries::get_for_file(self.database.pool(), &self.table, file.id)
            .await
            .map_err(|e| store_error(&e))?;

        Ok(records
            .into_iter()
            .filter_map(|record| {
                vectors
                    .remove(&record.id)
                    .map(|vector| (record.content_hash, (record.contextualized_text, vector)))
            })
            .collect())
    }

    async fn contextualize(
        &self,
        filename: &str,
        document: &str,
        chunks: &[&ContentChunk],
    ) -> Result<Vec<String>> {
        let Some(enricher) = &self.enricher else {
            return Ok(chunks.iter().map(|chunk| chunk.text.clone()).collect());
        };

        enrich_chunks(
            enricher.as_ref(),
            document,
            chunks,
            &self.options.separator,
        )
        .await
        .map_err(|e| NotesError::Enrichment(format!("{filename}: {e:#}")))
    }

    async fn embed(&self, filename: &str, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let vectors = self
            .embedder
            .embed_chunks(texts)
            .await
            .map_err(|e| NotesError::Embedding(format!("{filename}: {e:#}")))?;

        if vectors.len() != texts.len() {
            return Err(NotesError::Embedding(format!(
                "{filename}: expected {} vectors, got {}",
                texts.len(),
                vectors.len()
            )));
        }

        let expected = self.embedder.dimensions();
        if let Some(vector) = vectors.iter().find(|vector| vector.len() != expected) {
            return Err(NotesError::Embedding(format!(
                "{filename}: expected {expected} dimensions, got {}",
                vector.len()
            )));
        }

        Ok(vectors)
    }
}
