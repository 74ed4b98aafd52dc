
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::embeddings::chunking::ChunkingConfig;
use crate::embeddings::ollama::DEFAULT_EMBEDDING_DIMENSION;

const CONFIG_FILE_NAME: &str = "config.toml";
const DATABASE_FILE_NAME: &str = ".notes-index.db";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// The flat directory of markdown notes being indexed
    #[serde(default = "default_notes_dir")]
    pub notes_dir: PathBuf,
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub indexer: IndexerConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OllamaConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    pub batch_size: u32,
    pub embedding_dimension: u32,
    /// Prepended to every chunk before embedding
    pub document_prefix: String,
    /// Prepended to search queries before embedding
    pub query_prefix: String,
}

impl Default for OllamaConfig {
    #[inline]
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "nomic-embed-text:latest".to_string(),
            batch_size: 16,
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
            document_prefix: "search_document: ".to_string(),
            query_prefix: "search_query: ".to_string(),
        }
    }
}

/// Settings for generating per-chunk disambiguation context
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub enabled: bool,
    /// Generation model used to write the context
    pub model: String,
    /// Placed between the generated context and the chunk text
    pub separator: String,
}

impl Default for EnrichmentConfig {
    #[inline]
    fn default() -> Self {
        Self {
            enabled: false,
            model: "llama3.2:latest".to_string(),
            separator: "\n\n".to_string(),
        }
    }
}

/// How a changed file's chunks are re-embedded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReembedStrategy {
    /// Enrich and embed every chunk of a changed file again
    #[default]
    Full,
    /// Reuse the stored context and vector of chunks whose content did not change
    ReuseUnchanged,
}

impl std::fmt::Display for ReembedStrategy {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::ReuseUnchanged => write!(f, "reuse_unchanged"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IndexerConfig {
    /// Document extension without the leading dot
    pub extension: String,
    /// Bumped whenever the stored embedding representation changes incompatibly
    pub embedding_version: u32,
    pub scan_interval_secs: u64,
    pub poll_interval_ms: u64,
    pub activity_log_capacity: usize,
    pub reembed_strategy: ReembedStrategy,
}

impl Default for IndexerConfig {
    #[inline]
    fn default() -> Self {
        Self {
            extension: "md".to_string(),
            embedding_version: 1,
            scan_interval_secs: 30,
            poll_interval_ms: 1000,
            activity_log_capacity: 50,
            reembed_strategy: ReembedStrategy::Full,
        }
    }
}

impl IndexerConfig {
    #[inline]
    pub const fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    #[inline]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid embedding dimension: {0} (must be between 1 and 8192)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid max chunk size: {0} (must be between 32 and 32768)")]
    InvalidMaxChunkSize(usize),
    #[error("Overlap size ({0}) must be less than half the max chunk size ({1})")]
    InvalidOverlapSize(usize, usize),
    #[error("Invalid enrichment model: {0} (cannot be empty when enrichment is enabled)")]
    InvalidEnrichmentModel(String),
    #[error("Invalid document extension: {0:?}")]
    InvalidExtension(String),
    #[error("Invalid scan interval: {0} (must be greater than 0)")]
    InvalidScanInterval(u64),
    #[error("Invalid poll interval: {0} (must be greater than 0)")]
    InvalidPollInterval(u64),
    #[error("Invalid activity log capacity: {0} (must be greater than 0)")]
    InvalidActivityLogCapacity(usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self {
            notes_dir: default_notes_dir(),
            ollama: OllamaConfig::default(),
            chunking: ChunkingConfig::default(),
            enrichment: EnrichmentConfig::default(),
            indexer: IndexerConfig::default(),
            base_dir: Self::config_dir().unwrap_or_default(),
        }
    }
}

fn default_notes_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join("notes"))
        .unwrap_or_else(|| PathBuf::from("notes"))
}

impl Config {
    /// Default configuration directory, `~/.notes-index`
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::home_dir()
            .map(|home| home.join(".notes-index"))
            .or_else(|| dirs::config_dir().map(|config| config.join("notes-index")))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Load `config.toml` from `config_dir`, falling back to defaults when it does not exist
    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ollama.validate()?;
        self.validate_chunking_config()?;
        self.enrichment.validate()?;
        self.indexer.validate()?;
        Ok(())
    }

    fn validate_chunking_config(&self) -> Result<(), ConfigError> {
        let config = &self.chunking;

        if !(32..=32768).contains(&config.max_chunk_size) {
            return Err(ConfigError::InvalidMaxChunkSize(config.max_chunk_size));
        }

        if config.overlap_size >= config.max_chunk_size / 2 {
            return Err(ConfigError::InvalidOverlapSize(
                config.overlap_size,
                config.max_chunk_size,
            ));
        }

        Ok(())
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join(CONFIG_FILE_NAME)
    }

    /// The index database lives next to the notes it describes
    #[inline]
    pub fn database_path(&self) -> PathBuf {
        self.notes_dir.join(DATABASE_FILE_NAME)
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        self.ollama.ollama_url()
    }
}

impl OllamaConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        self.ollama_url()?;

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if !(1..=8192).contains(&self.embedding_dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding_dimension,
            ));
        }

        Ok(())
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }

    #[inline]
    pub fn set_protocol(&mut self, protocol: String) -> Result<(), ConfigError> {
        if protocol != "http" && protocol != "https" {
            return Err(ConfigError::InvalidProtocol(protocol));
        }
        self.protocol = protocol;
        Ok(())
    }

    #[inline]
    pub fn set_host(&mut self, host: String) -> Result<(), ConfigError> {
        let candidate = OllamaConfig {
            host: host.clone(),
            ..self.clone()
        };
        candidate.ollama_url()?;
        self.host = host;
        Ok(())
    }

    #[inline]
    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        if port == 0 {
            return Err(ConfigError::InvalidPort(port));
        }
        self.port = port;
        Ok(())
    }

    #[inline]
    pub fn set_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.model = model;
        Ok(())
    }

    #[inline]
    pub fn set_batch_size(&mut self, batch_size: u32) -> Result<(), ConfigError> {
        if batch_size == 0 || batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(batch_size));
        }
        self.batch_size = batch_size;
        Ok(())
    }

    #[inline]
    pub fn set_embedding_dimension(&mut self, dimension: u32) -> Result<(), ConfigError> {
        if !(1..=8192).contains(&dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(dimension));
        }
        self.embedding_dimension = dimension;
        Ok(())
    }
}

impl EnrichmentConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.model.trim().is_empty() {
            return Err(ConfigError::InvalidEnrichmentModel(self.model.clone()));
        }
        Ok(())
    }
}

impl IndexerConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        let extension = self.extension.trim_start_matches('.');
        if extension.is_empty() || extension.contains(['/', '\\']) {
            return Err(ConfigError::InvalidExtension(self.extension.clone()));
        }

        if self.scan_interval_secs == 0 {
            return Err(ConfigError::InvalidScanInterval(self.scan_interval_secs));
        }

        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidPollInterval(self.poll_interval_ms));
        }

        if self.activity_log_capacity == 0 {
            return Err(ConfigError::InvalidActivityLogCapacity(
                self.activity_log_capacity,
            ));
        }

        Ok(())
    }

    /// The extension without any leading dot
    #[inline]
    pub fn normalized_extension(&self) -> &str {
        self.extension.trim_start_matches('.')
    }
}
