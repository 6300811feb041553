//! Automatic tagging
//!
//! # Components
//!
//! - `stopwords`: keyword filtering and tag name normalization
//! - `embedder`: text embeddings (hashing or Model2Vec)
//! - `keyword`: cold-start and corpus-relative keyword extraction
//! - `database`: primary store for tags, documents and associations
//! - `index`: vector-searchable mirror of committed tags
//! - `resolver`: exact / similar / create tag resolution
//! - `sync`: mirroring, reconciliation and audit of the tag index

pub mod database;
pub mod embedder;
pub mod index;
pub mod keyword;
pub mod resolver;
pub mod stopwords;
pub mod sync;

pub use database::{Database, Document, DocumentId, Tag, TagId, TagUsage, UnitOfWork};
pub use embedder::{cosine_similarity, find_most_similar, Embedder, EmbeddingProvider};
pub use index::{TagHit, TagIndex, VectorTagIndex};
pub use keyword::{CorpusStats, ExtractionMethod, HybridExtractor, KeywordExtraction, KeywordStrategy};
pub use resolver::{PreparedTags, Resolution, ResolvedTag, TagResolver};
pub use stopwords::{filter_stopwords, is_stopword, normalize_tag_name, remove_particle};
pub use sync::{AuditReport, ReconcileReport, TagIndexSync};
