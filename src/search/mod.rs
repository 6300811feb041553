//! Full-text corpus of ingested documents
//!
//! Serves BM25 content search and the term statistics behind
//! corpus-relative keyword extraction.

pub mod corpus;

pub use corpus::CorpusIndex;
