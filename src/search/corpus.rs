//! Document corpus index using Tantivy
//!
//! Stores document content for BM25 content search and serves the corpus
//! statistics (document count, per-document term and document frequencies)
//! that corpus-relative keyword extraction is computed from.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tantivy::collector::TopDocs;
use tantivy::directory::MmapDirectory;
use tantivy::query::{QueryParser, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Schema, Value, INDEXED, STORED, TEXT};
use tantivy::tokenizer::TokenStream;
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tracing::debug;

use crate::core::{run_blocking, Result};
use crate::tags::database::DocumentId;
use crate::tags::keyword::{CorpusStats, TermStats, TermVectors};

/// Only this many leading characters of a document feed term statistics
pub const TERM_VECTOR_CONTENT_LIMIT: usize = 5_000;

const WRITER_HEAP: usize = 50_000_000;

// ============================================================================
// Corpus Index
// ============================================================================

struct Inner {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    id_field: Field,
    content_field: Field,
}

/// Full-text corpus of ingested documents. Clones share one writer.
#[derive(Clone)]
pub struct CorpusIndex {
    inner: Arc<Inner>,
}

impl CorpusIndex {
    /// Open the index in `index_dir`, creating it if needed
    pub fn open(index_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(index_dir)?;

        let directory = MmapDirectory::open(index_dir).map_err(tantivy::TantivyError::from)?;
        let index = Index::open_or_create(directory, Self::build_schema())?;
        Self::from_index(index)
    }

    /// In-memory index, for tests and dry runs
    pub fn in_memory() -> Result<Self> {
        Self::from_index(Index::create_in_ram(Self::build_schema()))
    }

    fn from_index(index: Index) -> Result<Self> {
        let schema = index.schema();
        let id_field = schema.get_field("document_id")?;
        let content_field = schema.get_field("content")?;

        let writer: IndexWriter = index.writer(WRITER_HEAP)?;
        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        Ok(Self {
            inner: Arc::new(Inner {
                index,
                reader,
                writer: Mutex::new(writer),
                id_field,
                content_field,
            }),
        })
    }

    /// Add or replace a document's content
    pub fn index_document(&self, id: DocumentId, content: &str) -> Result<()> {
        let inner = &self.inner;
        let mut writer = inner.writer.lock().unwrap_or_else(|p| p.into_inner());

        writer.delete_term(Self::id_term(inner.id_field, id));
        writer.add_document(doc!(
            inner.id_field => id.0 as u64,
            inner.content_field => content,
        ))?;
        writer.commit()?;
        inner.reader.reload()?;

        debug!(document_id = %id, chars = content.chars().count(), "indexed document");
        Ok(())
    }

    /// Remove a document. Removing an unknown id is a no-op.
    pub fn delete_document(&self, id: DocumentId) -> Result<()> {
        let inner = &self.inner;
        let mut writer = inner.writer.lock().unwrap_or_else(|p| p.into_inner());

        writer.delete_term(Self::id_term(inner.id_field, id));
        writer.commit()?;
        inner.reader.reload()?;
        Ok(())
    }

    /// Get the number of documents in the index
    pub fn num_docs(&self) -> u64 {
        self.inner.reader.searcher().num_docs()
    }

    /// Stored content of a document
    pub fn content(&self, id: DocumentId) -> Result<Option<String>> {
        let inner = &self.inner;
        let searcher = inner.reader.searcher();
        let query = TermQuery::new(
            Self::id_term(inner.id_field, id),
            IndexRecordOption::Basic,
        );

        let top = searcher.search(&query, &TopDocs::with_limit(1))?;
        let Some((_, address)) = top.into_iter().next() else {
            return Ok(None);
        };

        let stored: TantivyDocument = searcher.doc(address)?;
        Ok(stored
            .get_first(inner.content_field)
            .and_then(|v| v.as_str())
            .map(str::to_string))
    }

    /// Term and document frequencies for the leading part of one document
    pub fn term_vectors(&self, id: DocumentId) -> Result<Option<TermVectors>> {
        let Some(content) = self.content(id)? else {
            return Ok(None);
        };
        let prefix: String = content.chars().take(TERM_VECTOR_CONTENT_LIMIT).collect();

        let inner = &self.inner;
        let mut analyzer = inner.index.tokenizer_for_field(inner.content_field)?;
        let mut term_freqs: BTreeMap<String, u32> = BTreeMap::new();
        {
            let mut stream = analyzer.token_stream(&prefix);
            while stream.advance() {
                *term_freqs.entry(stream.token().text.clone()).or_insert(0) += 1;
            }
        }

        let searcher = inner.reader.searcher();
        let mut terms = BTreeMap::new();
        for (term, term_freq) in term_freqs {
            let doc_freq =
                searcher.doc_freq(&Term::from_field_text(inner.content_field, &term))?;
            terms.insert(
                term,
                TermStats {
                    term_freq,
                    doc_freq,
                },
            );
        }

        Ok(Some(TermVectors {
            terms,
            doc_count: searcher.num_docs(),
        }))
    }

    /// BM25 search over content. Returns (document id, score), best first.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<(DocumentId, f32)>> {
        let inner = &self.inner;
        let searcher = inner.reader.searcher();

        let query_parser = QueryParser::for_index(&inner.index, vec![inner.content_field]);
        let parsed_query = query_parser.parse_query(query)?;

        let top_docs = searcher.search(&parsed_query, &TopDocs::with_limit(limit))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let retrieved_doc: TantivyDocument = searcher.doc(doc_address)?;
            if let Some(id) = retrieved_doc
                .get_first(inner.id_field)
                .and_then(|v| v.as_u64())
            {
                results.push((DocumentId(id as i64), score));
            }
        }

        Ok(results)
    }

    // ------------------------------------------------------------------------
    // Private helpers
    // ------------------------------------------------------------------------

    fn build_schema() -> Schema {
        let mut schema_builder = Schema::builder();

        // INDEXED so deletes and lookups can address a document by id
        schema_builder.add_u64_field("document_id", INDEXED | STORED);
        // TEXT | STORED: tokenized for search, stored for term vectors
        schema_builder.add_text_field("content", TEXT | STORED);

        schema_builder.build()
    }

    fn id_term(field: Field, id: DocumentId) -> Term {
        Term::from_field_u64(field, id.0 as u64)
    }
}

#[async_trait]
impl CorpusStats for CorpusIndex {
    async fn count_documents(&self) -> Result<u64> {
        let corpus = self.clone();
        run_blocking(move || Ok(corpus.num_docs())).await
    }

    async fn term_vectors(&self, id: DocumentId) -> Result<Option<TermVectors>> {
        let corpus = self.clone();
        run_blocking(move || corpus.term_vectors(id)).await
    }
}

// ============================================================================
// Tests
// ============================================================================
