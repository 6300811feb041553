//! Keyword extraction for automatic tagging
//!
//! Two strategies produce raw keyword candidates:
//!
//! - **Cold start**: ranks 1–2 word phrases of the document by embedding
//!   similarity to the whole document, then picks a diverse subset with
//!   maximal marginal relevance. Needs nothing but the text.
//! - **Corpus relative**: scores the document's terms by TF-IDF against the
//!   indexed corpus. Only meaningful once the corpus has a few documents.
//!
//! [`HybridExtractor`] picks one by corpus size, then filters stopwords,
//! deduplicates case-insensitively and truncates to the target count.

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use stop_words::LANGUAGE;
use tracing::{debug, info, warn};

use super::database::DocumentId;
use super::embedder::{cosine_similarity, EmbeddingProvider};
use super::stopwords::filter_stopwords;
use crate::core::config::ExtractionConfig;
use crate::core::Result;

/// Shortest and longest term (in characters) the corpus-relative strategy keeps
pub const MIN_TERM_CHARS: usize = 2;
pub const MAX_TERM_CHARS: usize = 30;

/// Raw candidates requested from a strategy so filtering still leaves enough
pub fn candidate_count(target_count: usize) -> usize {
    (target_count * 3).max(10)
}

// ============================================================================
// Strategy selection
// ============================================================================

/// Extraction strategy, chosen per document by corpus size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeywordStrategy {
    ColdStart,
    CorpusRelative,
}

impl KeywordStrategy {
    /// `count >= threshold` selects the corpus-relative strategy
    pub fn for_corpus_size(count: u64, threshold: u64) -> Self {
        if count < threshold {
            Self::ColdStart
        } else {
            Self::CorpusRelative
        }
    }

    pub fn method(&self) -> ExtractionMethod {
        match self {
            Self::ColdStart => ExtractionMethod::ColdStart,
            Self::CorpusRelative => ExtractionMethod::CorpusRelative,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::ColdStart => "Embedding-ranked phrases with diversity selection",
            Self::CorpusRelative => "TF-IDF against the indexed corpus",
        }
    }
}

/// Label recorded for how a document's tags were produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    ColdStart,
    CorpusRelative,
    /// Tagging ran and produced nothing
    None,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ColdStart => "cold_start",
            Self::CorpusRelative => "corpus_relative",
            Self::None => "none",
        }
    }
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtractionMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cold_start" | "cold-start" => Ok(Self::ColdStart),
            "corpus_relative" | "corpus-relative" => Ok(Self::CorpusRelative),
            "none" => Ok(Self::None),
            _ => Err(format!(
                "unknown extraction method '{}', expected one of: cold_start, corpus_relative, none",
                s
            )),
        }
    }
}

/// A keyword with its computed score
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredKeyword {
    pub term: String,
    pub score: f32,
}

impl ScoredKeyword {
    pub fn new(term: impl Into<String>, score: f32) -> Self {
        Self {
            term: term.into(),
            score,
        }
    }
}

fn by_score_then_term(a: &ScoredKeyword, b: &ScoredKeyword) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.term.cmp(&b.term))
}

// ============================================================================
// Corpus statistics
// ============================================================================

/// Per-term statistics for one document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermStats {
    /// Occurrences in the document
    pub term_freq: u32,
    /// Number of corpus documents containing the term
    pub doc_freq: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TermVectors {
    pub terms: BTreeMap<String, TermStats>,
    pub doc_count: u64,
}

/// Source of corpus-wide term statistics
#[async_trait]
pub trait CorpusStats: Send + Sync {
    async fn count_documents(&self) -> Result<u64>;

    /// `None` if the document is not indexed
    async fn term_vectors(&self, id: DocumentId) -> Result<Option<TermVectors>>;
}

// ============================================================================
// Cold-start extractor
// ============================================================================

lazy_static! {
    static ref TOKEN_PATTERN: Regex = Regex::new(r"(?u)\b\w\w+\b").unwrap();
    static ref CANDIDATE_STOPWORDS: HashSet<String> = stop_words::get(LANGUAGE::English)
        .iter()
        .map(|w| w.to_lowercase())
        .collect();
}

/// Unique 1–2 word candidate phrases in first-seen order.
///
/// Tokens are lowercased; English stopwords are dropped before bigrams are formed.
pub fn candidate_phrases(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let tokens: Vec<&str> = TOKEN_PATTERN
        .find_iter(&lower)
        .map(|m| m.as_str())
        .filter(|t| !CANDIDATE_STOPWORDS.contains(*t))
        .collect();

    let mut seen = HashSet::new();
    let mut phrases = Vec::new();

    for (i, token) in tokens.iter().enumerate() {
        if seen.insert(token.to_string()) {
            phrases.push(token.to_string());
        }
        if let Some(next) = tokens.get(i + 1) {
            let bigram = format!("{} {}", token, next);
            if seen.insert(bigram.clone()) {
                phrases.push(bigram);
            }
        }
    }

    phrases
}

/// Content-only keyword extractor
pub struct ColdStartExtractor {
    provider: EmbeddingProvider,
    candidate_pool: usize,
    diversity: f32,
}

impl ColdStartExtractor {
    pub fn new(provider: EmbeddingProvider, config: &ExtractionConfig) -> Self {
        Self {
            provider,
            candidate_pool: config.candidate_pool.max(1),
            diversity: config.diversity,
        }
    }

    /// Best-effort extraction: failures are logged and yield an empty list
    pub async fn extract(&self, text: &str, top_n: usize) -> Vec<ScoredKeyword> {
        if text.trim().is_empty() || top_n == 0 {
            return Vec::new();
        }

        let candidates = candidate_phrases(text);
        if candidates.is_empty() {
            debug!("no keyword candidates in text");
            return Vec::new();
        }

        let mut inputs = Vec::with_capacity(candidates.len() + 1);
        inputs.push(text.to_string());
        inputs.extend(candidates.iter().cloned());

        let mut vectors = match self.provider.encode_batch(&inputs).await {
            Ok(vectors) => vectors,
            Err(e) => {
                warn!(error = %e, "cold-start extraction failed");
                return Vec::new();
            }
        };
        let candidate_vectors = vectors.split_off(1);
        let doc_vector = &vectors[0];

        // Relevance to the whole document, best first, ties by first appearance
        let mut ranked: Vec<(usize, f32)> = candidate_vectors
            .iter()
            .map(|v| cosine_similarity(doc_vector, v))
            .enumerate()
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        ranked.truncate(self.candidate_pool);

        let selected = self.select_diverse(&ranked, &candidate_vectors, top_n);
        selected
            .into_iter()
            .map(|(i, score)| ScoredKeyword::new(candidates[i].clone(), score))
            .collect()
    }

    /// Maximal marginal relevance over the ranked pool
    fn select_diverse(
        &self,
        ranked: &[(usize, f32)],
        vectors: &[Vec<f32>],
        top_n: usize,
    ) -> Vec<(usize, f32)> {
        let mut remaining: Vec<(usize, f32)> = ranked.to_vec();
        let mut selected: Vec<(usize, f32)> = Vec::with_capacity(top_n);

        while selected.len() < top_n && !remaining.is_empty() {
            let mut best_pos = 0;
            let mut best_mmr = f32::NEG_INFINITY;

            for (pos, &(i, relevance)) in remaining.iter().enumerate() {
                let redundancy = selected
                    .iter()
                    .map(|&(j, _)| cosine_similarity(&vectors[i], &vectors[j]))
                    .fold(0.0f32, f32::max);
                let mmr = (1.0 - self.diversity) * relevance - self.diversity * redundancy;
                if mmr > best_mmr {
                    best_mmr = mmr;
                    best_pos = pos;
                }
            }

            selected.push(remaining.remove(best_pos));
        }

        selected
    }
}

// ============================================================================
// Corpus-relative extractor
// ============================================================================

/// TF-IDF weight: `tf * (ln((N + 1) / (df + 1)) + 1)`
pub fn tf_idf(term_freq: u32, doc_freq: u64, doc_count: u64) -> f32 {
    let idf = ((doc_count as f32 + 1.0) / (doc_freq as f32 + 1.0)).ln() + 1.0;
    term_freq as f32 * idf
}

/// Corpus-aware keyword extractor over indexed term statistics
pub struct CorpusRelativeExtractor {
    corpus: Arc<dyn CorpusStats>,
}

impl CorpusRelativeExtractor {
    pub fn new(corpus: Arc<dyn CorpusStats>) -> Self {
        Self { corpus }
    }

    /// Best-effort extraction: missing ids, missing documents and failures yield an empty list
    pub async fn extract(&self, document_id: Option<DocumentId>, top_n: usize) -> Vec<ScoredKeyword> {
        let Some(id) = document_id else {
            warn!("corpus-relative extraction needs a document id");
            return Vec::new();
        };

        let vectors = match self.corpus.term_vectors(id).await {
            Ok(Some(vectors)) => vectors,
            Ok(None) => {
                warn!(document_id = %id, "document is not in the corpus index");
                return Vec::new();
            }
            Err(e) => {
                warn!(document_id = %id, error = %e, "failed to read term vectors");
                return Vec::new();
            }
        };

        Self::rank(&vectors, top_n)
    }

    /// Score and rank terms; highest first, ties by term
    pub fn rank(vectors: &TermVectors, top_n: usize) -> Vec<ScoredKeyword> {
        let mut scored: Vec<ScoredKeyword> = vectors
            .terms
            .iter()
            .filter(|(term, _)| {
                let len = term.chars().count();
                (MIN_TERM_CHARS..=MAX_TERM_CHARS).contains(&len)
            })
            .map(|(term, stats)| {
                ScoredKeyword::new(
                    term.clone(),
                    tf_idf(stats.term_freq, stats.doc_freq, vectors.doc_count),
                )
            })
            .collect();

        scored.sort_by(by_score_then_term);
        scored.truncate(top_n);
        scored
    }
}

// ============================================================================
// Hybrid orchestrator
// ============================================================================

/// Output of [`HybridExtractor::extract_keywords`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeywordExtraction {
    pub keywords: Vec<String>,
    pub method: ExtractionMethod,
    /// Corpus size the strategy was chosen by
    pub corpus_size: u64,
}

/// Chooses a strategy by corpus size and post-processes its candidates
pub struct HybridExtractor {
    cold_start: ColdStartExtractor,
    corpus_relative: CorpusRelativeExtractor,
    corpus: Arc<dyn CorpusStats>,
    threshold: u64,
    target_count: usize,
}

impl HybridExtractor {
    pub fn new(
        provider: EmbeddingProvider,
        corpus: Arc<dyn CorpusStats>,
        config: &ExtractionConfig,
    ) -> Self {
        Self {
            cold_start: ColdStartExtractor::new(provider, config),
            corpus_relative: CorpusRelativeExtractor::new(Arc::clone(&corpus)),
            corpus,
            threshold: config.threshold,
            target_count: config.count,
        }
    }

    pub fn target_count(&self) -> usize {
        self.target_count
    }

    /// Strategy for the current corpus. A failing count counts as an empty corpus.
    pub async fn select_strategy(&self) -> (KeywordStrategy, u64) {
        let count = match self.corpus.count_documents().await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "failed to count corpus documents, assuming empty corpus");
                0
            }
        };
        (KeywordStrategy::for_corpus_size(count, self.threshold), count)
    }

    pub async fn extract_keywords(
        &self,
        text: &str,
        document_id: Option<DocumentId>,
    ) -> KeywordExtraction {
        let (strategy, corpus_size) = self.select_strategy().await;
        let requested = candidate_count(self.target_count);

        info!(
            corpus_size,
            threshold = self.threshold,
            strategy = %strategy.method(),
            "extracting keywords"
        );

        let raw: Vec<String> = match strategy {
            KeywordStrategy::ColdStart => self.cold_start.extract(text, requested).await,
            KeywordStrategy::CorpusRelative => {
                self.corpus_relative.extract(document_id, requested).await
            }
        }
        .into_iter()
        .map(|k| k.term)
        .collect();
        debug!(count = raw.len(), candidates = ?raw, "raw keywords");

        let filtered = filter_stopwords(&raw);
        let keywords = dedup_case_insensitive(filtered, self.target_count);

        info!(keywords = ?keywords, method = %strategy.method(), "keywords extracted");
        KeywordExtraction {
            keywords,
            method: strategy.method(),
            corpus_size,
        }
    }
}

/// Keep the first occurrence of each lowercase form, with its original casing
pub fn dedup_case_insensitive(keywords: Vec<String>, limit: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    keywords
        .into_iter()
        .filter(|k| {
            let key = k.trim().to_lowercase();
            !key.is_empty() && seen.insert(key)
        })
        .take(limit)
        .collect()
}
