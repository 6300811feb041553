//! Searchive configuration module
//!
//! Config loading priority:
//! 1. Built-in defaults
//! 2. `searchive.json` in the data directory
//! 3. Environment variables (`KEYWORD_EXTRACTION_THRESHOLD`, `TAG_SIMILARITY_THRESHOLD`, ...)

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use tracing::warn;

use super::error::{Error, Result};

pub const CONFIG_FILE: &str = "searchive.json";
pub const CONFIG_VERSION: u32 = 1;

pub const ENV_EXTRACTION_THRESHOLD: &str = "KEYWORD_EXTRACTION_THRESHOLD";
pub const ENV_EXTRACTION_COUNT: &str = "KEYWORD_EXTRACTION_COUNT";
pub const ENV_SIMILARITY_THRESHOLD: &str = "TAG_SIMILARITY_THRESHOLD";
pub const ENV_STRICT_DEDUP: &str = "TAG_STRICT_DEDUP";
pub const ENV_SEARCH_TIMEOUT: &str = "TAG_SEARCH_TIMEOUT_MS";
pub const ENV_EMBEDDING_DIM: &str = "EMBEDDING_DIM";
pub const ENV_EMBEDDING_MODEL: &str = "EMBEDDING_MODEL";
pub const ENV_EMBEDDING_TIMEOUT: &str = "EMBEDDING_TIMEOUT_MS";
pub const ENV_BUSY_TIMEOUT: &str = "SQLITE_BUSY_TIMEOUT_MS";

/// Vector size of the built-in hashing embedder
pub const DEFAULT_DIMENSION: usize = 384;

/// Output sizes of the published Model2Vec checkpoints
const KNOWN_MODEL_DIMENSIONS: [(&str, usize); 6] = [
    ("minishlab/potion-multilingual-128M", 256),
    ("minishlab/potion-base-32M", 512),
    ("minishlab/potion-base-8M", 256),
    ("minishlab/potion-base-4M", 128),
    ("minishlab/potion-base-2M", 64),
    ("minishlab/potion-retrieval-32M", 512),
];

/// Output size of a known model, given its HuggingFace id or a local directory named after it
pub fn known_model_dimension(model: &str) -> Option<usize> {
    let model = model.trim().trim_end_matches('/');
    let basename = Path::new(model).file_name()?.to_str()?;
    KNOWN_MODEL_DIMENSIONS
        .iter()
        .find(|(id, _)| *id == model || id.rsplit('/').next() == Some(basename))
        .map(|(_, dimension)| *dimension)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub extraction: ExtractionConfig,

    #[serde(default)]
    pub tags: TagConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

/// Keyword extraction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Corpus size at which extraction switches to corpus-relative scoring
    #[serde(default = "default_extraction_threshold")]
    pub threshold: u64,

    /// Number of keywords kept per document
    #[serde(default = "default_extraction_count")]
    pub count: usize,

    /// Candidate pool considered by the cold-start extractor
    #[serde(default = "default_candidate_pool", rename = "candidatePool")]
    pub candidate_pool: usize,

    /// MMR diversity: 0.0 ranks purely by relevance, 1.0 purely by novelty
    #[serde(default = "default_diversity")]
    pub diversity: f32,
}

fn default_extraction_threshold() -> u64 {
    5
}

fn default_extraction_count() -> usize {
    3
}

fn default_candidate_pool() -> usize {
    30
}

fn default_diversity() -> f32 {
    0.5
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            threshold: default_extraction_threshold(),
            count: default_extraction_count(),
            candidate_pool: default_candidate_pool(),
            diversity: default_diversity(),
        }
    }
}

/// Tag resolution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagConfig {
    /// Minimum cosine similarity for two tags to be considered the same
    #[serde(default = "default_similarity_threshold", rename = "similarityThreshold")]
    pub similarity_threshold: f32,

    /// Also query the primary store for similar tags inside the transaction
    #[serde(default, rename = "strictDedup")]
    pub strict_dedup: bool,

    #[serde(default = "default_search_timeout", rename = "searchTimeoutMs")]
    pub search_timeout_ms: u64,
}

fn default_similarity_threshold() -> f32 {
    0.8
}

fn default_search_timeout() -> u64 {
    2_000
}

impl Default for TagConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            strict_dedup: false,
            search_timeout_ms: default_search_timeout(),
        }
    }
}

/// Embedding model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Vector size. Unset means the model's known size, or 384 for the hashing embedder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension: Option<usize>,

    /// Model2Vec model path or HuggingFace id. `None` selects the built-in hashing embedder.
    #[serde(default)]
    pub model: Option<String>,

    #[serde(default = "default_embedding_timeout", rename = "timeoutMs")]
    pub timeout_ms: u64,
}

fn default_embedding_timeout() -> u64 {
    30_000
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimension: None,
            model: None,
            timeout_ms: default_embedding_timeout(),
        }
    }
}

impl EmbeddingConfig {
    /// Vector size the configured embedder produces
    pub fn dimension(&self) -> Result<usize> {
        match (self.dimension, self.model.as_deref()) {
            (Some(dimension), _) => Ok(dimension),
            (None, None) => Ok(DEFAULT_DIMENSION),
            (None, Some(model)) => known_model_dimension(model).ok_or_else(|| {
                Error::Config(format!(
                    "output size of model {} is unknown; set embedding.dimension or {}",
                    model, ENV_EMBEDDING_DIM
                ))
            }),
        }
    }
}

/// SQLite settings for the primary store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// How long a writer waits for another upload's write lock
    #[serde(default = "default_busy_timeout", rename = "busyTimeoutMs")]
    pub busy_timeout_ms: u64,
}

fn default_busy_timeout() -> u64 {
    30_000
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            extraction: ExtractionConfig::default(),
            tags: TagConfig::default(),
            embedding: EmbeddingConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Load config from the data directory, then apply environment overrides.
    pub fn load(data_root: &Path) -> Self {
        let config_path = data_root.join(CONFIG_FILE);

        let mut config = if config_path.exists() {
            match Self::load_from_file(&config_path) {
                Ok(config) => {
                    if config.version > CONFIG_VERSION {
                        warn!(
                            version = config.version,
                            supported = CONFIG_VERSION,
                            "config version is newer than supported"
                        );
                    }
                    config
                }
                Err(e) => {
                    warn!(path = %config_path.display(), error = %e, "failed to load config, using defaults");
                    Self::default()
                }
            }
        } else {
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn save(&self, data_root: &Path) -> Result<()> {
        fs::create_dir_all(data_root)?;
        let content =
            serde_json::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        fs::write(data_root.join(CONFIG_FILE), content)?;
        Ok(())
    }

    /// Apply overrides from a key lookup. Unparseable values are ignored with a warning.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        override_parsed(&lookup, ENV_EXTRACTION_THRESHOLD, &mut self.extraction.threshold);
        override_parsed(&lookup, ENV_EXTRACTION_COUNT, &mut self.extraction.count);
        override_parsed(&lookup, ENV_SIMILARITY_THRESHOLD, &mut self.tags.similarity_threshold);
        override_parsed(&lookup, ENV_STRICT_DEDUP, &mut self.tags.strict_dedup);
        override_parsed(&lookup, ENV_SEARCH_TIMEOUT, &mut self.tags.search_timeout_ms);
        override_parsed(&lookup, ENV_EMBEDDING_TIMEOUT, &mut self.embedding.timeout_ms);
        override_parsed(&lookup, ENV_BUSY_TIMEOUT, &mut self.storage.busy_timeout_ms);
        if let Some(dimension) = parse_override(&lookup, ENV_EMBEDDING_DIM) {
            self.embedding.dimension = Some(dimension);
        }

        if let Some(model) = lookup(ENV_EMBEDDING_MODEL) {
            let model = model.trim();
            self.embedding.model = if model.is_empty() {
                None
            } else {
                Some(model.to_string())
            };
        }
    }

    pub fn validate(&self) -> Result<()> {
        let threshold = self.tags.similarity_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(Error::Config(format!(
                "similarity threshold must be in (0, 1], got {}",
                threshold
            )));
        }
        if self.extraction.count == 0 {
            return Err(Error::Config("keyword count must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.extraction.diversity) {
            return Err(Error::Config(format!(
                "diversity must be in [0, 1], got {}",
                self.extraction.diversity
            )));
        }
        let dimension = self.embedding.dimension()?;
        if dimension == 0 {
            return Err(Error::Config("embedding dimension must be positive".into()));
        }
        if let Some(model) = &self.embedding.model {
            match known_model_dimension(model) {
                Some(expected) if expected != dimension => {
                    return Err(Error::Config(format!(
                        "model {} produces {}-d vectors but the embedding dimension is set to {}",
                        model, expected, dimension
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Maximum cosine distance for a similarity match: `1 - threshold`.
    pub fn max_tag_distance(&self) -> f32 {
        1.0 - self.tags.similarity_threshold
    }

    /// Generate default config file content
    pub fn default_json() -> String {
        serde_json::to_string_pretty(&Config::default()).unwrap_or_default()
    }
}

fn override_parsed<T, F>(lookup: &F, key: &str, slot: &mut T)
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = parse_override(lookup, key) {
        *slot = value;
    }
}

fn parse_override<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparseable override");
            None
        }
    }
}
