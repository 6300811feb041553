//! Text embedders for tag matching and keyword ranking
//!
//! Provides abstraction over different embedding models:
//! - HashingEmbedder: feature-hashed words and character trigrams (built-in, no model file)
//! - Model2VecEmbedder: static multilingual embeddings (requires model download)
//!
//! [`EmbeddingProvider`] wraps either one for async callers: inference runs on
//! the blocking pool, is bounded by a timeout, and has its dimension checked.

use model2vec::Model2Vec;
use once_cell::sync::OnceCell;
use regex::Regex;
use siphasher::sip::SipHasher13;
use std::hash::Hasher;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::core::config::EmbeddingConfig;
use crate::core::{Error, Result};

/// Default model for multilingual support (HuggingFace ID)
pub const DEFAULT_MODEL_HF: &str = "minishlab/potion-multilingual-128M";

/// Default embedding dimension
pub const EMBEDDING_DIM: usize = 384;

/// Embedding model abstraction
pub trait Embedder: Send + Sync {
    /// Generate embedding for a single text
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }

    /// Get embedding dimension
    fn dimension(&self) -> usize;

    /// Get model name/identifier
    fn name(&self) -> &str;
}

// ============================================================================
// Hashing Embedder
// ============================================================================

lazy_static::lazy_static! {
    static ref WORD_PATTERN: Regex = Regex::new(r"\w+").unwrap();
}

const TRIGRAM_WEIGHT: f32 = 0.5;

/// Deterministic bag-of-features embedder.
///
/// Each lowercased word and each character trigram of `<word>` is hashed
/// into a signed bucket; the result is L2-normalized. Shared spellings land
/// close together, translations do not.
pub struct HashingEmbedder {
    dimension: usize,
    name: String,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            name: format!("hashing-{}", dimension),
        }
    }

    fn add_feature(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let mut hasher = SipHasher13::new_with_keys(0x5eac_41f0, 0x7a65_0b1d);
        hasher.write(feature.as_bytes());
        let hash = hasher.finish();

        let bucket = (hash % self.dimension as u64) as usize;
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(EMBEDDING_DIM)
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];
        let lower = text.to_lowercase();

        for word in WORD_PATTERN.find_iter(&lower) {
            let word = word.as_str();
            self.add_feature(&mut vector, word, 1.0);

            let padded: Vec<char> = format!("<{}>", word).chars().collect();
            for window in padded.windows(3) {
                let trigram: String = window.iter().collect();
                self.add_feature(&mut vector, &trigram, TRIGRAM_WEIGHT);
            }
        }

        normalize(&mut vector);
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// Model2Vec Embedder
// ============================================================================

/// Local cache path for a HuggingFace model
fn get_cached_model_path(model_id: &str) -> Option<std::path::PathBuf> {
    let home = std::env::var("HOME").ok()?;
    let cache_path = std::path::PathBuf::from(home)
        .join(".cache/huggingface/hub")
        .join(format!("models--{}", model_id.replace('/', "--")))
        .join("snapshots");

    std::fs::read_dir(&cache_path)
        .ok()?
        .flatten()
        .find(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|entry| entry.path())
}

/// Model2Vec based embedder, loaded on first use
pub struct Model2VecEmbedder {
    source: String,
    dimension: usize,
    model: OnceCell<Model2Vec>,
}

impl Model2VecEmbedder {
    /// `source` is a local directory or a HuggingFace model id
    pub fn new(source: impl Into<String>, dimension: usize) -> Self {
        Self {
            source: source.into(),
            dimension,
            model: OnceCell::new(),
        }
    }

    /// Load the model exactly once; concurrent first callers wait for the same load.
    fn model(&self) -> Result<&Model2Vec> {
        self.model.get_or_try_init(|| {
            let location = if std::path::Path::new(&self.source).exists() {
                self.source.clone()
            } else {
                get_cached_model_path(&self.source)
                    .map(|p| p.to_string_lossy().to_string())
                    .unwrap_or_else(|| self.source.clone())
            };

            info!(model = %location, "loading Model2Vec model");
            let model = Model2Vec::from_pretrained(location.as_str(), None, None).map_err(|e| {
                Error::Embedding(format!("failed to load model {}: {}", self.source, e))
            })?;

            let sample = ["dimension"];
            let actual = model
                .encode(&sample)
                .map_err(|e| Error::Embedding(format!("failed to encode text: {}", e)))?
                .row(0)
                .len();
            if actual != self.dimension {
                return Err(Error::Config(format!(
                    "model {} produces {}-d vectors but the embedding dimension is set to {}",
                    self.source, actual, self.dimension
                )));
            }
            Ok(model)
        })
    }

    pub fn is_loaded(&self) -> bool {
        self.model.get().is_some()
    }
}

impl Embedder for Model2VecEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let texts = [text];
        let embeddings = self
            .model()?
            .encode(&texts)
            .map_err(|e| Error::Embedding(format!("failed to encode text: {}", e)))?;

        Ok(embeddings.row(0).to_vec())
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let embeddings = self
            .model()?
            .encode(texts)
            .map_err(|e| Error::Embedding(format!("failed to encode texts: {}", e)))?;

        Ok(embeddings.rows().into_iter().map(|r| r.to_vec()).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.source
    }
}

/// Build the embedder selected by configuration
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    let dimension = config.dimension()?;
    Ok(match &config.model {
        Some(model) => Arc::new(Model2VecEmbedder::new(model.clone(), dimension)),
        None => Arc::new(HashingEmbedder::new(dimension)),
    })
}

// ============================================================================
// Async provider
// ============================================================================

/// Async, timeout-bounded access to an [`Embedder`]
#[derive(Clone)]
pub struct EmbeddingProvider {
    embedder: Arc<dyn Embedder>,
    timeout: Duration,
}

impl EmbeddingProvider {
    pub fn new(embedder: Arc<dyn Embedder>, timeout: Duration) -> Self {
        Self { embedder, timeout }
    }

    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self::new(
            create_embedder(config)?,
            Duration::from_millis(config.timeout_ms),
        ))
    }

    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    pub fn name(&self) -> &str {
        self.embedder.name()
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub async fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.encode_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::Embedding("model returned no vector".into()))
    }

    pub async fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let embedder = Arc::clone(&self.embedder);
        let owned = texts.to_vec();
        let task = tokio::task::spawn_blocking(move || {
            let refs: Vec<&str> = owned.iter().map(String::as_str).collect();
            embedder.embed_batch(&refs)
        });

        let vectors = tokio::time::timeout(self.timeout, task)
            .await
            .map_err(|_| Error::EmbeddingTimeout(self.timeout.as_millis() as u64))???;

        if vectors.len() != texts.len() {
            return Err(Error::Embedding(format!(
                "expected {} vectors, got {}",
                texts.len(),
                vectors.len()
            )));
        }

        let expected = self.dimension();
        if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
            return Err(Error::DimensionMismatch {
                expected,
                actual: bad.len(),
            });
        }

        debug!(count = texts.len(), model = self.name(), "encoded texts");
        Ok(vectors)
    }
}

// ============================================================================
// Similarity helpers
// ============================================================================

/// Calculate cosine similarity between two embeddings
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a > 0.0 && norm_b > 0.0 {
        (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Index and score of the best candidate, if it reaches `threshold`
pub fn find_most_similar<V: AsRef<[f32]>>(
    query: &[f32],
    candidates: &[V],
    threshold: f32,
) -> Option<(usize, f32)> {
    candidates
        .iter()
        .enumerate()
        .map(|(i, c)| (i, cosine_similarity(query, c.as_ref())))
        .fold(None, |best: Option<(usize, f32)>, (i, score)| match best {
            Some((_, best_score)) if best_score >= score => best,
            _ => Some((i, score)),
        })
        .filter(|(_, score)| *score >= threshold)
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|x| *x /= norm);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hashing_embedder_is_deterministic() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed("GPU memory optimization").unwrap();
        let b = embedder.embed("GPU memory optimization").unwrap();

        assert_eq!(a.len(), EMBEDDING_DIM);
        assert_eq!(a, b);
        assert!((a.iter().map(|x| x * x).sum::<f32>() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_hashing_embedder_shared_words_are_closer() {
        let embedder = HashingEmbedder::default();
        let query = embedder.embed("machine learning").unwrap();
        let near = embedder.embed("machine learning models").unwrap();
        let far = embedder.embed("cooking recipes").unwrap();

        assert!(cosine_similarity(&query, &near) > cosine_similarity(&query, &far));
    }

    #[test]
    fn test_hashing_embedder_empty_text() {
        let embedder = HashingEmbedder::new(16);
        let v = embedder.embed("   ").unwrap();
        assert_eq!(v, vec![0.0; 16]);
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_find_most_similar() {
        let candidates = vec![vec![0.0, 1.0], vec![0.9, 0.1], vec![1.0, 0.0]];

        let (index, score) = find_most_similar(&[1.0, 0.0], &candidates, 0.8).unwrap();
        assert_eq!(index, 2);
        assert!((score - 1.0).abs() < 1e-6);

        assert!(find_most_similar(&[-1.0, 0.0], &candidates, 0.5).is_none());
        assert!(find_most_similar::<Vec<f32>>(&[1.0, 0.0], &[], 0.0).is_none());
    }

    #[tokio::test]
    async fn test_provider_checks_dimension() {
        struct Short;
        impl Embedder for Short {
            fn embed(&self, _text: &str) -> Result<Vec<f32>> {
                Ok(vec![1.0; 3])
            }
            fn dimension(&self) -> usize {
                4
            }
            fn name(&self) -> &str {
                "short"
            }
        }

        let provider = EmbeddingProvider::new(Arc::new(Short), Duration::from_secs(5));
        let err = provider.encode("anything").await.unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 4,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_create_embedder_uses_model_dimension() {
        let config = EmbeddingConfig {
            model: Some(DEFAULT_MODEL_HF.to_string()),
            ..Default::default()
        };
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.dimension(), 256);
        assert_eq!(embedder.name(), DEFAULT_MODEL_HF);

        let hashing = create_embedder(&EmbeddingConfig::default()).unwrap();
        assert_eq!(hashing.dimension(), EMBEDDING_DIM);

        let unknown = EmbeddingConfig {
            model: Some("acme/custom-embeddings".to_string()),
            ..Default::default()
        };
        assert!(matches!(create_embedder(&unknown), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_provider_batch_order() {
        let provider = EmbeddingProvider::new(
            Arc::new(HashingEmbedder::default()),
            Duration::from_secs(5),
        );
        let texts = vec!["Rust".to_string(), "Python".to_string()];
        let vectors = provider.encode_batch(&texts).await.unwrap();

        let embedder = HashingEmbedder::default();
        assert_eq!(vectors[0], embedder.embed("Rust").unwrap());
        assert_eq!(vectors[1], embedder.embed("Python").unwrap());
    }

    #[test]
    #[ignore] // Requires model download
    fn test_model2vec_lazy_load() {
        let embedder = Model2VecEmbedder::new(DEFAULT_MODEL_HF, 256);
        assert!(!embedder.is_loaded());

        let cloud = embedder.embed("Cloud").unwrap();
        let korean = embedder.embed("클라우드").unwrap();
        assert!(embedder.is_loaded());

        println!("Cloud-클라우드 similarity: {}", cosine_similarity(&cloud, &korean));
    }
}
