//! searchive: document auto-tagging with semantic tag deduplication
//!
//! Keywords are extracted from each ingested document (embedding-ranked
//! phrases for a small corpus, TF-IDF once the corpus is large enough),
//! normalized, and resolved to canonical tags by exact name and then by
//! embedding similarity, so near-duplicates such as "Cloud" and "클라우드"
//! end up as one tag.

pub mod core;
pub mod ingest;
pub mod search;
pub mod tags;

pub use crate::core::{Config, DataPaths, Error, Result};
pub use crate::ingest::{DocumentService, NewDocument, UploadOutcome};
