//! Document ingestion and retrieval
//!
//! An upload reserves the document row, indexes its content, extracts keywords
//! and embeds the tag names, then resolves and links the tags in one unit of
//! work. Any failure rolls that unit back and removes both the corpus entry and
//! the document row. Tags created by the upload are mirrored into the tag index
//! only after commit.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::core::{run_blocking, Config, DataPaths, Error, Result};
use crate::search::CorpusIndex;
use crate::tags::database::{
    CommittedWork, Database, Document, DocumentId, StoreStats, Tag, UnitOfWork,
};
use crate::tags::embedder::EmbeddingProvider;
use crate::tags::index::{TagIndex, VectorTagIndex};
use crate::tags::keyword::{ExtractionMethod, HybridExtractor, KeywordExtraction};
use crate::tags::resolver::{PreparedTags, ResolvedTag, TagResolver};
use crate::tags::stopwords::normalize_tag_name;
use crate::tags::sync::TagIndexSync;

/// Texts shorter than this (after trimming) are stored untagged
pub const MIN_TAGGABLE_CHARS: usize = 10;

/// A document to ingest; content is already extracted text
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub filename: String,
    pub file_type: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    pub document: Document,
    pub tags: Vec<ResolvedTag>,
    pub method: ExtractionMethod,
    /// Newly created tags that reached the tag index
    pub mirrored: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContentHit {
    pub document: Document,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub store: StoreStats,
    pub corpus_documents: u64,
    pub indexed_tags: usize,
    pub embedder: String,
    pub dimension: usize,
    pub extraction_threshold: u64,
    pub next_strategy: ExtractionMethod,
    pub next_strategy_description: &'static str,
}

/// Ingestion, search and deletion of documents
pub struct DocumentService {
    db: Database,
    corpus: CorpusIndex,
    index: Arc<dyn TagIndex>,
    provider: EmbeddingProvider,
    extractor: HybridExtractor,
    resolver: TagResolver,
    sync: TagIndexSync,
    config: Config,
}

impl DocumentService {
    /// Open every store under the data directory
    pub fn open(paths: &DataPaths) -> Result<Self> {
        let config = paths.config.clone();
        config.validate()?;
        paths.ensure_dirs()?;

        let db = Database::open(&paths.database)?
            .with_busy_timeout(Duration::from_millis(config.storage.busy_timeout_ms));
        let provider = EmbeddingProvider::from_config(&config.embedding)?;
        let index = VectorTagIndex::open(&paths.tag_index, provider.dimension())?;
        let corpus = CorpusIndex::open(&paths.corpus)?;

        info!(
            root = %paths.root.display(),
            embedder = provider.name(),
            dimension = provider.dimension(),
            "opened searchive data directory"
        );
        Ok(Self::new(db, corpus, Arc::new(index), provider, config))
    }

    pub fn new(
        db: Database,
        corpus: CorpusIndex,
        index: Arc<dyn TagIndex>,
        provider: EmbeddingProvider,
        config: Config,
    ) -> Self {
        let extractor = HybridExtractor::new(
            provider.clone(),
            Arc::new(corpus.clone()),
            &config.extraction,
        );
        let resolver = TagResolver::new(provider.clone(), Arc::clone(&index), &config.tags);
        let sync = TagIndexSync::new(db.clone(), Arc::clone(&index));

        Self {
            db,
            corpus,
            index,
            provider,
            extractor,
            resolver,
            sync,
            config,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn resolver(&self) -> &TagResolver {
        &self.resolver
    }

    pub fn sync(&self) -> &TagIndexSync {
        &self.sync
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Ingest a document and tag it.
    ///
    /// The document row is committed first so its id is fixed. Corpus
    /// indexing, keyword extraction and embedding then run without the write
    /// lock; only tag resolution, linking and the extraction label share one
    /// transaction. A failure anywhere removes the document again.
    pub async fn upload(&self, new_doc: NewDocument) -> Result<UploadOutcome> {
        let document_id = self.reserve_document(&new_doc).await?;

        let (tags, method, committed) = match self.tag_document(document_id, &new_doc.content).await
        {
            Ok(tagged) => tagged,
            Err(e) => {
                error!(document_id = %document_id, error = %e, "upload failed, removing document");
                self.discard_document(document_id).await;
                return Err(e);
            }
        };

        let mirrored = self.sync.mirror_all(&committed.created_tags).await;
        let document = self.find_document(document_id).await?;

        info!(
            document_id = %document_id,
            filename = %document.filename,
            method = %method,
            count = tags.len(),
            created = committed.created_tags.len(),
            mirrored,
            "document ingested"
        );

        Ok(UploadOutcome {
            document,
            tags,
            method,
            mirrored,
        })
    }

    async fn reserve_document(&self, new_doc: &NewDocument) -> Result<DocumentId> {
        let uow = self.db.begin_async().await?;
        let document_id = uow
            .insert_document(&new_doc.filename, &new_doc.file_type)
            .await?;
        uow.commit().await?;
        Ok(document_id)
    }

    async fn tag_document(
        &self,
        document_id: DocumentId,
        content: &str,
    ) -> Result<(Vec<ResolvedTag>, ExtractionMethod, CommittedWork)> {
        let extracted = if content.trim().chars().count() < MIN_TAGGABLE_CHARS {
            warn!(document_id = %document_id, "text too short, skipping tagging");
            None
        } else {
            let corpus = self.corpus.clone();
            let text = content.to_string();
            run_blocking(move || corpus.index_document(document_id, &text)).await?;

            let extraction = self
                .extractor
                .extract_keywords(content, Some(document_id))
                .await;
            if extraction.keywords.is_empty() {
                warn!(document_id = %document_id, method = %extraction.method, "no keywords extracted");
            }
            let prepared = self.resolver.prepare_tags(&extraction.keywords).await?;
            Some((extraction.method, prepared))
        };

        let mut uow = self.db.begin_async().await?;
        match self.link_tags(&mut uow, document_id, extracted).await {
            Ok((tags, method)) => {
                let committed = uow.commit().await?;
                Ok((tags, method, committed))
            }
            Err(e) => {
                if let Err(rollback_err) = uow.rollback().await {
                    warn!(error = %rollback_err, "explicit rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn link_tags(
        &self,
        uow: &mut UnitOfWork,
        document_id: DocumentId,
        extracted: Option<(ExtractionMethod, PreparedTags)>,
    ) -> Result<(Vec<ResolvedTag>, ExtractionMethod)> {
        let (tags, method) = match extracted {
            Some((method, prepared)) => {
                let tags = self
                    .resolver
                    .attach_prepared(uow, document_id, &prepared)
                    .await?;
                let method = if tags.is_empty() {
                    ExtractionMethod::None
                } else {
                    method
                };
                (tags, method)
            }
            None => (Vec::new(), ExtractionMethod::None),
        };

        uow.set_extraction_method(document_id, method.as_str())
            .await?;
        Ok((tags, method))
    }

    /// Undo a reserved document: its corpus entry and its row
    async fn discard_document(&self, document_id: DocumentId) {
        self.remove_from_corpus(document_id).await;
        let db = self.db.clone();
        if let Err(e) = run_blocking(move || db.delete_document(document_id)).await {
            error!(document_id = %document_id, error = %e, "failed to remove document row, manual cleanup needed");
        }
    }

    async fn remove_from_corpus(&self, document_id: DocumentId) {
        let corpus = self.corpus.clone();
        if let Err(e) = run_blocking(move || corpus.delete_document(document_id)).await {
            error!(document_id = %document_id, error = %e, "failed to remove document from corpus, manual cleanup needed");
        }
    }

    /// Run extraction without storing anything
    pub async fn extract_keywords(
        &self,
        text: &str,
        document_id: Option<DocumentId>,
    ) -> KeywordExtraction {
        self.extractor.extract_keywords(text, document_id).await
    }

    /// Stored content of an ingested document
    pub async fn document_content(&self, id: DocumentId) -> Result<String> {
        let corpus = self.corpus.clone();
        run_blocking(move || corpus.content(id))
            .await?
            .ok_or_else(|| Error::not_found("document content", id))
    }

    pub async fn find_document(&self, id: DocumentId) -> Result<Document> {
        let db = self.db.clone();
        run_blocking(move || db.find_document(id))
            .await?
            .ok_or_else(|| Error::not_found("document", id))
    }

    /// Delete a document, its associations and its corpus entry
    pub async fn delete_document(&self, id: DocumentId) -> Result<Document> {
        let document = self.find_document(id).await?;

        let db = self.db.clone();
        if !run_blocking(move || db.delete_document(id)).await? {
            return Err(Error::not_found("document", id));
        }
        self.remove_from_corpus(id).await;

        info!(document_id = %id, filename = %document.filename, "document deleted");
        Ok(document)
    }

    pub async fn tags_for_document(&self, id: DocumentId) -> Result<Vec<Tag>> {
        self.find_document(id).await?;
        let db = self.db.clone();
        run_blocking(move || db.tags_for_document(id)).await
    }

    /// Documents carrying any of the given tags, newest first
    pub async fn search_by_tags(&self, names: &[String]) -> Result<Vec<Document>> {
        let mut seen = HashSet::new();
        let normalized: Vec<String> = names
            .iter()
            .map(|n| normalize_tag_name(n))
            .filter(|n| !n.is_empty() && seen.insert(n.clone()))
            .collect();

        let db = self.db.clone();
        let documents = run_blocking(move || db.documents_by_tag_names(&normalized)).await?;
        info!(count = documents.len(), "tag search complete");
        Ok(documents)
    }

    /// BM25 search over document content
    pub async fn search_by_content(&self, query: &str, limit: usize) -> Result<Vec<ContentHit>> {
        let corpus = self.corpus.clone();
        let query = query.to_string();
        let hits = run_blocking(move || corpus.search(&query, limit)).await?;

        let mut results = Vec::with_capacity(hits.len());
        for (id, score) in hits {
            match self.find_document(id).await {
                Ok(document) => results.push(ContentHit { document, score }),
                Err(Error::NotFound { .. }) => {
                    warn!(document_id = %id, "corpus entry without document row, skipping")
                }
                Err(e) => return Err(e),
            }
        }
        Ok(results)
    }

    pub async fn status(&self) -> Result<ServiceStatus> {
        let db = self.db.clone();
        let store = run_blocking(move || db.stats()).await?;
        let corpus = self.corpus.clone();
        let corpus_documents = run_blocking(move || Ok(corpus.num_docs())).await?;
        let indexed_tags = self.index.ids().await.map(|ids| ids.len()).unwrap_or_else(|e| {
            warn!(error = %e, "tag index unavailable");
            0
        });
        let (strategy, _) = self.extractor.select_strategy().await;

        Ok(ServiceStatus {
            store,
            corpus_documents,
            indexed_tags,
            embedder: self.provider.name().to_string(),
            dimension: self.provider.dimension(),
            extraction_threshold: self.config.extraction.threshold,
            next_strategy: strategy.method(),
            next_strategy_description: strategy.description(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::embedder::{Embedder, HashingEmbedder};
    use crate::tags::keyword::KeywordStrategy;
    use tempfile::TempDir;

    fn service(dir: &TempDir) -> DocumentService {
        let db = Database::open(&dir.path().join("searchive.db")).unwrap();
        let index = VectorTagIndex::open(&dir.path().join("tag_index.db"), 384).unwrap();
        let corpus = CorpusIndex::in_memory().unwrap();
        let provider =
            EmbeddingProvider::new(Arc::new(HashingEmbedder::default()), Duration::from_secs(5));
        DocumentService::new(db, corpus, Arc::new(index), provider, Config::default())
    }

    fn doc(name: &str, content: &str) -> NewDocument {
        NewDocument {
            filename: name.to_string(),
            file_type: "text/plain".to_string(),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_short_text_is_untagged() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);

        let outcome = service.upload(doc("tiny.txt", "  hi there ")).await.unwrap();
        assert_eq!(outcome.method, ExtractionMethod::None);
        assert!(outcome.tags.is_empty());
        assert_eq!(outcome.document.extraction_method.as_deref(), Some("none"));
        let status = service.status().await.unwrap();
        assert_eq!(status.corpus_documents, 0);
        assert_eq!(status.next_strategy, ExtractionMethod::ColdStart);
        assert_eq!(
            status.next_strategy_description,
            KeywordStrategy::ColdStart.description()
        );
    }

    #[tokio::test]
    async fn test_upload_tags_and_mirrors() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);

        let outcome = service
            .upload(doc(
                "ml.txt",
                "Machine learning and deep learning are key AI topics.",
            ))
            .await
            .unwrap();

        assert_eq!(outcome.method, ExtractionMethod::ColdStart);
        assert!(!outcome.tags.is_empty() && outcome.tags.len() <= 3);
        assert_eq!(outcome.mirrored, outcome.tags.len());
        assert_eq!(
            outcome.document.extraction_method.as_deref(),
            Some("cold_start")
        );

        let stored = service.tags_for_document(outcome.document.id).await.unwrap();
        assert_eq!(stored.len(), outcome.tags.len());
        assert!(service.sync().audit().await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn test_search_and_delete() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);

        let outcome = service
            .upload(doc("rust.md", "Rust ownership rules prevent data races at compile time."))
            .await
            .unwrap();
        let id = outcome.document.id;
        let tag = outcome.tags[0].tag.name.clone();

        let by_tag = service.search_by_tags(&[tag.to_lowercase()]).await.unwrap();
        assert_eq!(by_tag[0].id, id);

        let by_content = service.search_by_content("ownership", 10).await.unwrap();
        assert_eq!(by_content[0].document.id, id);

        service.delete_document(id).await.unwrap();
        assert!(service.search_by_content("ownership", 10).await.unwrap().is_empty());
        assert!(matches!(
            service.delete_document(id).await,
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            service.tags_for_document(id).await,
            Err(Error::NotFound { .. })
        ));
    }

    /// Hashing embedder that spends `delay` on every batch, like a cold model
    struct SlowEmbedder {
        inner: HashingEmbedder,
        delay: Duration,
    }

    impl Embedder for SlowEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.inner.embed(text)
        }
        fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            std::thread::sleep(self.delay);
            self.inner.embed_batch(texts)
        }
        fn dimension(&self) -> usize {
            self.inner.dimension()
        }
        fn name(&self) -> &str {
            "slow"
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_inference_does_not_hold_write_lock() {
        let dir = TempDir::new().unwrap();
        // Far shorter than the inference time below
        let db = Database::open(&dir.path().join("searchive.db"))
            .unwrap()
            .with_busy_timeout(Duration::from_millis(500));
        let index = VectorTagIndex::open(&dir.path().join("tag_index.db"), 384).unwrap();
        let corpus = CorpusIndex::in_memory().unwrap();
        let embedder = SlowEmbedder {
            inner: HashingEmbedder::default(),
            delay: Duration::from_millis(1500),
        };
        let provider = EmbeddingProvider::new(Arc::new(embedder), Duration::from_secs(30));
        let service = Arc::new(DocumentService::new(
            db,
            corpus,
            Arc::new(index),
            provider,
            Config::default(),
        ));

        let first = {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                service
                    .upload(doc("ml.txt", "Machine learning and deep learning are key AI topics."))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        let second = {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                service
                    .upload(doc("rust.md", "Rust ownership rules prevent data races at compile time."))
                    .await
            })
        };

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert!(!first.tags.is_empty());
        assert!(!second.tags.is_empty());
        assert_eq!(service.database().stats().unwrap().documents, 2);
    }

    #[tokio::test]
    async fn test_failed_upload_rolls_back() {
        struct Broken;
        impl Embedder for Broken {
            fn embed(&self, _text: &str) -> Result<Vec<f32>> {
                Err(Error::Embedding("model unavailable".into()))
            }
            fn dimension(&self) -> usize {
                384
            }
            fn name(&self) -> &str {
                "broken"
            }
        }

        let dir = TempDir::new().unwrap();
        let db = Database::open(&dir.path().join("searchive.db")).unwrap();
        let index = VectorTagIndex::open(&dir.path().join("tag_index.db"), 384).unwrap();
        let corpus = CorpusIndex::in_memory().unwrap();
        let mut config = Config::default();
        config.extraction.threshold = 1;

        // Corpus-relative extraction works without embeddings; resolution then fails
        let provider = EmbeddingProvider::new(Arc::new(Broken), Duration::from_secs(5));
        let service = DocumentService::new(db.clone(), corpus.clone(), Arc::new(index), provider, config);

        let err = service
            .upload(doc("doomed.txt", "Tantivy segments merge in the background."))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));

        assert_eq!(db.stats().unwrap().documents, 0);
        assert_eq!(db.stats().unwrap().tags, 0);
        assert_eq!(corpus.num_docs(), 0);

        // The discarded id is never handed out again
        let uow = db.begin_async().await.unwrap();
        let next = uow.insert_document("next.txt", "text/plain").await.unwrap();
        assert!(next.0 > 1);
    }
}
