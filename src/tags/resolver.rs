//! Tag resolution: map keyword names onto canonical tags
//!
//! Each name goes through exact lookup, then similarity lookup, then creation.
//! Similarity candidates come from tags created earlier in the same unit of
//! work, from the shared tag index and, with `strict_dedup`, from a
//! nearest-neighbour query on the primary store. The best score wins.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::database::{Database, DocumentId, Tag, UnitOfWork};
use super::embedder::{cosine_similarity, EmbeddingProvider};
use super::index::{TagHit, TagIndex};
use super::stopwords::{filter_stopwords, normalize_tag_name};
use crate::core::config::TagConfig;
use crate::core::{Error, Result};

/// How a name was resolved
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resolution {
    Exact,
    Similar { score: f32 },
    Created,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedTag {
    pub tag: Tag,
    #[serde(flatten)]
    pub resolution: Resolution,
}

impl ResolvedTag {
    fn new(tag: Tag, resolution: Resolution) -> Self {
        Self { tag, resolution }
    }
}

/// Where a similarity candidate came from, for logging
#[derive(Debug, Clone, Copy)]
enum Source {
    Pending,
    Index,
    Store,
}

/// Normalized tag names paired with their embeddings
#[derive(Debug, Clone, Default)]
pub struct PreparedTags {
    names: Vec<String>,
    embeddings: Vec<Vec<f32>>,
}

impl PreparedTags {
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Tag resolution engine
pub struct TagResolver {
    provider: EmbeddingProvider,
    index: Arc<dyn TagIndex>,
    threshold: f32,
    strict_dedup: bool,
    search_timeout: Duration,
}

impl TagResolver {
    pub fn new(provider: EmbeddingProvider, index: Arc<dyn TagIndex>, config: &TagConfig) -> Self {
        Self {
            provider,
            index,
            threshold: config.similarity_threshold,
            strict_dedup: config.strict_dedup,
            search_timeout: Duration::from_millis(config.search_timeout_ms),
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Resolve one already-normalized name to a tag, creating it if nothing matches
    pub async fn resolve_or_create(
        &self,
        uow: &mut UnitOfWork,
        name: &str,
        embedding: Option<&[f32]>,
        threshold: f32,
    ) -> Result<ResolvedTag> {
        self.resolve_one(uow, name, embedding, threshold, None).await
    }

    /// Resolve names in order. Embedding failure aborts the whole batch.
    pub async fn resolve_or_create_batch(
        &self,
        uow: &mut UnitOfWork,
        names: &[String],
        threshold: f32,
    ) -> Result<Vec<ResolvedTag>> {
        let prepared = self.embed_names(names.to_vec()).await?;
        self.resolve_prepared(uow, &prepared, threshold).await
    }

    /// Turn raw keywords into tags and link them to a document.
    ///
    /// Keywords are trimmed, stopword-filtered, normalized and deduplicated
    /// before resolution; the resulting tags are linked once each, in order.
    pub async fn attach_tags_to_document(
        &self,
        uow: &mut UnitOfWork,
        document_id: DocumentId,
        keywords: &[String],
    ) -> Result<Vec<ResolvedTag>> {
        let prepared = self.prepare_tags(keywords).await?;
        self.attach_prepared(uow, document_id, &prepared).await
    }

    /// Clean keywords into tag names and embed them, outside any unit of work
    pub async fn prepare_tags(&self, keywords: &[String]) -> Result<PreparedTags> {
        self.embed_names(prepare_names(keywords)).await
    }

    /// Resolve prepared names and link the resulting tags to a document
    pub async fn attach_prepared(
        &self,
        uow: &mut UnitOfWork,
        document_id: DocumentId,
        prepared: &PreparedTags,
    ) -> Result<Vec<ResolvedTag>> {
        if prepared.is_empty() {
            debug!(document_id = %document_id, "no tag names left after filtering");
            return Ok(Vec::new());
        }

        let resolved = self
            .resolve_prepared(uow, prepared, self.threshold)
            .await?;

        let mut seen = HashSet::new();
        let unique: Vec<ResolvedTag> = resolved
            .into_iter()
            .filter(|r| seen.insert(r.tag.id))
            .collect();
        let tag_ids: Vec<_> = unique.iter().map(|r| r.tag.id).collect();

        let linked = uow.attach_tags(document_id, &tag_ids).await?;
        info!(
            document_id = %document_id,
            count = linked,
            tags = ?unique.iter().map(|r| r.tag.name.as_str()).collect::<Vec<_>>(),
            "attached tags"
        );
        Ok(unique)
    }

    /// Existing tags similar to `name`: candidates for a manual merge
    pub async fn similar_tags(
        &self,
        db: &Database,
        name: &str,
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<TagHit>> {
        let normalized = normalize_tag_name(name);
        let tag = db
            .find_tag_by_name(&normalized)?
            .ok_or_else(|| Error::not_found("tag", &normalized))?;

        let embedding = match tag.embedding {
            Some(embedding) => embedding,
            None => self.provider.encode(&tag.name).await?,
        };

        let hits = self.index.search(&embedding, limit + 1, threshold).await?;
        Ok(hits
            .into_iter()
            .filter(|hit| hit.id != tag.id)
            .take(limit)
            .collect())
    }

    // ------------------------------------------------------------------------
    // Resolution steps
    // ------------------------------------------------------------------------

    async fn embed_names(&self, names: Vec<String>) -> Result<PreparedTags> {
        if names.is_empty() {
            return Ok(PreparedTags::default());
        }
        let embeddings = self.provider.encode_batch(&names).await?;
        Ok(PreparedTags { names, embeddings })
    }

    async fn resolve_prepared(
        &self,
        uow: &mut UnitOfWork,
        prepared: &PreparedTags,
        threshold: f32,
    ) -> Result<Vec<ResolvedTag>> {
        if prepared.is_empty() {
            return Ok(Vec::new());
        }

        let prefetched = self.prefetch(&prepared.embeddings, threshold).await;

        let mut resolved = Vec::with_capacity(prepared.names.len());
        for (i, (name, embedding)) in prepared
            .names
            .iter()
            .zip(&prepared.embeddings)
            .enumerate()
        {
            let hits = prefetched.as_ref().map(|all| all[i].as_slice());
            resolved.push(
                self.resolve_one(uow, name, Some(embedding), threshold, hits)
                    .await?,
            );
        }

        Ok(resolved)
    }

    async fn resolve_one(
        &self,
        uow: &mut UnitOfWork,
        name: &str,
        embedding: Option<&[f32]>,
        threshold: f32,
        prefetched: Option<&[TagHit]>,
    ) -> Result<ResolvedTag> {
        if let Some(tag) = uow.find_tag_by_name(name).await? {
            debug!(name, tag_id = %tag.id, "exact tag match");
            return Ok(ResolvedTag::new(tag, Resolution::Exact));
        }

        if let Some(embedding) = embedding {
            if let Some((tag, score, source)) =
                self.find_similar(uow, embedding, threshold, prefetched).await?
            {
                info!(name, matched = %tag.name, tag_id = %tag.id, score, ?source, "similar tag match");
                return Ok(ResolvedTag::new(tag, Resolution::Similar { score }));
            }
        }

        match uow.insert_tag(name, embedding.map(<[f32]>::to_vec)).await {
            Ok(tag) => {
                info!(name, tag_id = %tag.id, "created tag");
                Ok(ResolvedTag::new(tag, Resolution::Created))
            }
            // The unique index caught a writer that inserted the name after the exact lookup
            Err(Error::DuplicateTagName(_)) => {
                warn!(name, "tag name taken concurrently, using existing tag");
                let tag = uow
                    .find_tag_by_name(name)
                    .await?
                    .ok_or_else(|| Error::not_found("tag", name))?;
                Ok(ResolvedTag::new(tag, Resolution::Exact))
            }
            Err(e) => Err(e),
        }
    }

    /// Best similarity match across all sources, strictly within `1 - threshold`
    async fn find_similar(
        &self,
        uow: &UnitOfWork,
        embedding: &[f32],
        threshold: f32,
        prefetched: Option<&[TagHit]>,
    ) -> Result<Option<(Tag, f32, Source)>> {
        let max_distance = 1.0 - threshold;
        let within = |score: f32| 1.0 - score < max_distance;
        let mut best: Option<(Tag, f32, Source)> = None;

        let mut consider = |tag: Tag, score: f32, source: Source| {
            if within(score) && best.as_ref().map_or(true, |(_, s, _)| score > *s) {
                best = Some((tag, score, source));
            }
        };

        // Tags created earlier in this unit of work are not mirrored yet
        if let Some((tag, score)) = uow
            .pending_tags()
            .iter()
            .filter_map(|t| {
                t.embedding
                    .as_deref()
                    .map(|e| (t, cosine_similarity(embedding, e)))
            })
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        {
            consider(tag.clone(), score, Source::Pending);
        }

        let hits = match prefetched {
            Some(hits) => hits.to_vec(),
            None => self.search_index(embedding, threshold).await,
        };
        for hit in hits {
            if !within(hit.score) {
                continue;
            }
            match uow.find_tag_by_id(hit.id).await? {
                Some(tag) => {
                    consider(tag, hit.score, Source::Index);
                    break;
                }
                None => debug!(tag_id = %hit.id, "index entry has no primary tag, skipping"),
            }
        }

        if self.strict_dedup {
            if let Some((tag, distance)) = uow.nearest_tag(embedding, max_distance).await? {
                consider(tag, 1.0 - distance, Source::Store);
            }
        }

        Ok(best)
    }

    /// Index search that degrades to no match on error or timeout
    async fn search_index(&self, embedding: &[f32], threshold: f32) -> Vec<TagHit> {
        match self.bounded(self.index.search(embedding, 3, threshold)).await {
            Ok(hits) => hits,
            Err(e) => {
                log_degradation(&e, "tag index search failed, treating as no match");
                Vec::new()
            }
        }
    }

    /// One batched index query for all names; `None` falls back to per-name searches
    async fn prefetch(&self, embeddings: &[Vec<f32>], threshold: f32) -> Option<Vec<Vec<TagHit>>> {
        match self
            .bounded(self.index.search_batch(embeddings, 3, threshold))
            .await
        {
            Ok(hits) if hits.len() == embeddings.len() => Some(hits),
            Ok(_) => {
                warn!("tag index batch returned wrong number of results");
                None
            }
            Err(e) => {
                log_degradation(&e, "tag index batch search failed");
                None
            }
        }
    }

    async fn bounded<T, F>(&self, search: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.search_timeout, search)
            .await
            .map_err(|_| Error::TagIndexTimeout(self.search_timeout.as_millis() as u64))?
    }
}

fn log_degradation(e: &Error, message: &str) {
    if e.is_index_degradation() {
        warn!(error = %e, "{}", message);
    } else {
        error!(error = %e, "{}", message);
    }
}

/// Trim, drop stopwords, normalize and dedup, keeping first-seen order
pub fn prepare_names(keywords: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    filter_stopwords(keywords)
        .iter()
        .map(|k| normalize_tag_name(k))
        .filter(|name| !name.is_empty() && seen.insert(name.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::database::TagId;
    use crate::tags::embedder::Embedder;
    use crate::tags::index::VectorTagIndex;
    use async_trait::async_trait;
    use rusqlite::Connection;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Embedder with hand-picked vectors so similarity is predictable
    struct ScriptedEmbedder {
        vectors: HashMap<&'static str, Vec<f32>>,
    }

    impl ScriptedEmbedder {
        fn new() -> Self {
            let vectors = HashMap::from([
                ("Cloud", vec![1.0, 0.0, 0.0]),
                ("클라우드", vec![0.95, 0.31, 0.0]),
                ("Dog", vec![0.0, 1.0, 0.0]),
                ("Puppy", vec![0.1, 0.99, 0.0]),
                ("Rust", vec![0.0, 0.0, 1.0]),
                ("Python", vec![0.5, 0.5, 0.7]),
                ("Kubernetes", vec![0.7, 0.7, 0.1]),
            ]);
            Self { vectors }
        }
    }

    impl Embedder for ScriptedEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.vectors
                .get(text)
                .cloned()
                .ok_or_else(|| Error::Embedding(format!("no scripted vector for {}", text)))
        }

        fn dimension(&self) -> usize {
            3
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    struct FailingIndex;

    #[async_trait]
    impl TagIndex for FailingIndex {
        async fn upsert(&self, _tag: &Tag) -> Result<()> {
            Err(Error::TagIndex("unreachable".into()))
        }
        async fn search(&self, _q: &[f32], _k: usize, _min: f32) -> Result<Vec<TagHit>> {
            Err(Error::TagIndex("unreachable".into()))
        }
        async fn remove(&self, _id: TagId) -> Result<bool> {
            Err(Error::TagIndex("unreachable".into()))
        }
        async fn ids(&self) -> Result<Vec<TagId>> {
            Err(Error::TagIndex("unreachable".into()))
        }
        fn dimension(&self) -> usize {
            3
        }
    }

    struct SlowIndex;

    #[async_trait]
    impl TagIndex for SlowIndex {
        async fn upsert(&self, _tag: &Tag) -> Result<()> {
            Ok(())
        }
        async fn search(&self, _q: &[f32], _k: usize, _min: f32) -> Result<Vec<TagHit>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }
        async fn remove(&self, _id: TagId) -> Result<bool> {
            Ok(false)
        }
        async fn ids(&self) -> Result<Vec<TagId>> {
            Ok(Vec::new())
        }
        fn dimension(&self) -> usize {
            3
        }
    }

    struct Fixture {
        _dir: TempDir,
        db: Database,
        index: Arc<VectorTagIndex>,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let db = Database::open(&dir.path().join("searchive.db")).unwrap();
        let index = Arc::new(VectorTagIndex::open(&dir.path().join("tag_index.db"), 3).unwrap());
        Fixture {
            _dir: dir,
            db,
            index,
        }
    }

    fn provider() -> EmbeddingProvider {
        EmbeddingProvider::new(Arc::new(ScriptedEmbedder::new()), Duration::from_secs(5))
    }

    fn resolver_with(index: Arc<dyn TagIndex>, strict_dedup: bool) -> TagResolver {
        let config = TagConfig {
            strict_dedup,
            search_timeout_ms: 100,
            ..TagConfig::default()
        };
        TagResolver::new(provider(), index, &config)
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    /// Resolve in a fresh unit of work, commit and mirror created tags
    async fn resolve_committed(
        f: &Fixture,
        resolver: &TagResolver,
        list: &[&str],
    ) -> Vec<ResolvedTag> {
        let mut uow = f.db.begin_async().await.unwrap();
        let resolved = resolver
            .resolve_or_create_batch(&mut uow, &names(list), 0.8)
            .await
            .unwrap();
        let committed = uow.commit().await.unwrap();
        for tag in &committed.created_tags {
            f.index.upsert(tag).await.unwrap();
        }
        resolved
    }

    #[tokio::test]
    async fn test_exact_match_is_idempotent() {
        let f = fixture();
        let resolver = resolver_with(f.index.clone(), false);

        let first = resolve_committed(&f, &resolver, &["Python"]).await;
        let second = resolve_committed(&f, &resolver, &["Python"]).await;

        assert_eq!(first[0].resolution, Resolution::Created);
        assert_eq!(second[0].resolution, Resolution::Exact);
        assert_eq!(first[0].tag.id, second[0].tag.id);
        assert_eq!(f.db.stats().unwrap().tags, 1);
    }

    #[tokio::test]
    async fn test_similar_tag_from_index() {
        let f = fixture();
        let resolver = resolver_with(f.index.clone(), false);

        let cloud = resolve_committed(&f, &resolver, &["Cloud"]).await;
        let korean = resolve_committed(&f, &resolver, &["클라우드"]).await;

        assert_eq!(korean[0].tag.id, cloud[0].tag.id);
        assert_eq!(korean[0].tag.name, "Cloud");
        assert!(matches!(korean[0].resolution, Resolution::Similar { score } if score > 0.8));
        assert!(f.db.find_tag_by_name("클라우드").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dissimilar_tags_stay_apart() {
        let f = fixture();
        let resolver = resolver_with(f.index.clone(), false);

        resolve_committed(&f, &resolver, &["Cloud"]).await;
        let resolved = resolve_committed(&f, &resolver, &["Dog", "Python"]).await;

        assert!(resolved.iter().all(|r| r.resolution == Resolution::Created));
        assert_eq!(f.db.stats().unwrap().tags, 3);
    }

    #[tokio::test]
    async fn test_pending_tags_dedupe_within_batch() {
        let f = fixture();
        let resolver = resolver_with(f.index.clone(), false);

        let resolved = resolve_committed(&f, &resolver, &["Dog", "Puppy"]).await;

        assert_eq!(resolved[0].resolution, Resolution::Created);
        assert!(matches!(resolved[1].resolution, Resolution::Similar { .. }));
        assert_eq!(resolved[0].tag.id, resolved[1].tag.id);
    }

    #[tokio::test]
    async fn test_batch_preserves_input_order() {
        let f = fixture();
        let resolver = resolver_with(f.index.clone(), false);

        resolve_committed(&f, &resolver, &["Python"]).await;
        let resolved = resolve_committed(&f, &resolver, &["Rust", "Python", "Cloud"]).await;

        let got: Vec<&str> = resolved.iter().map(|r| r.tag.name.as_str()).collect();
        assert_eq!(got, vec!["Rust", "Python", "Cloud"]);
    }

    #[tokio::test]
    async fn test_failing_index_is_not_fatal() {
        let f = fixture();
        let resolver = resolver_with(Arc::new(FailingIndex), false);

        let mut uow = f.db.begin_async().await.unwrap();
        let resolved = resolver
            .resolve_or_create(&mut uow, "Cloud", Some(&[1.0, 0.0, 0.0]), 0.8)
            .await
            .unwrap();
        assert_eq!(resolved.resolution, Resolution::Created);
    }

    #[tokio::test]
    async fn test_slow_index_times_out() {
        let f = fixture();
        let resolver = resolver_with(Arc::new(SlowIndex), false);

        let mut uow = f.db.begin_async().await.unwrap();
        let resolved = resolver
            .resolve_or_create_batch(&mut uow, &names(&["Cloud", "Dog"]), 0.8)
            .await
            .unwrap();
        assert_eq!(resolved.len(), 2);
    }

    #[tokio::test]
    async fn test_strict_dedup_sees_unmirrored_tags() {
        let f = fixture();

        // Committed but never mirrored
        let mut uow = f.db.begin_async().await.unwrap();
        uow.insert_tag("Cloud", Some(vec![1.0, 0.0, 0.0])).await.unwrap();
        uow.commit().await.unwrap();

        let lenient = resolver_with(f.index.clone(), false);
        let mut uow = f.db.begin_async().await.unwrap();
        let resolved = lenient
            .resolve_or_create_batch(&mut uow, &names(&["클라우드"]), 0.8)
            .await
            .unwrap();
        assert_eq!(resolved[0].resolution, Resolution::Created);
        uow.rollback().await.unwrap();

        let strict = resolver_with(f.index.clone(), true);
        let mut uow = f.db.begin_async().await.unwrap();
        let resolved = strict
            .resolve_or_create_batch(&mut uow, &names(&["클라우드"]), 0.8)
            .await
            .unwrap();
        assert_eq!(resolved[0].tag.name, "Cloud");
    }

    #[tokio::test]
    async fn test_embedding_failure_aborts_batch() {
        let f = fixture();
        let resolver = resolver_with(f.index.clone(), false);

        let mut uow = f.db.begin_async().await.unwrap();
        let err = resolver
            .resolve_or_create_batch(&mut uow, &names(&["Cloud", "Unscripted"]), 0.8)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
        assert!(uow.pending_tags().is_empty());
    }

    #[tokio::test]
    async fn test_attach_tags_to_document() {
        let f = fixture();
        let resolver = resolver_with(f.index.clone(), false);

        let mut uow = f.db.begin_async().await.unwrap();
        let doc = uow.insert_document("cloud.md", "text/markdown").await.unwrap();
        let keywords = names(&["cloud", " Cloud ", "and", "클라우드", "dog"]);
        let attached = resolver
            .attach_tags_to_document(&mut uow, doc, &keywords)
            .await
            .unwrap();
        uow.commit().await.unwrap();

        let attached: Vec<&str> = attached.iter().map(|r| r.tag.name.as_str()).collect();
        assert_eq!(attached, vec!["Cloud", "Dog"]);

        let stored: Vec<String> = f
            .db
            .tags_for_document(doc)
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(stored, vec!["Cloud", "Dog"]);
    }

    #[tokio::test]
    async fn test_prepared_tags_attach_later() {
        let f = fixture();
        let resolver = resolver_with(f.index.clone(), false);

        // Embedding happens before the unit of work exists
        let prepared = resolver
            .prepare_tags(&names(&["cloud", "the", "Dog", "CLOUD"]))
            .await
            .unwrap();
        assert_eq!(prepared.names(), names(&["Cloud", "Dog"]).as_slice());

        let mut uow = f.db.begin_async().await.unwrap();
        let doc = uow.insert_document("pets.md", "text/markdown").await.unwrap();
        let attached = resolver
            .attach_prepared(&mut uow, doc, &prepared)
            .await
            .unwrap();
        uow.commit().await.unwrap();

        assert_eq!(attached.len(), 2);
        assert_eq!(f.db.tags_for_document(doc).unwrap().len(), 2);

        let empty = resolver.prepare_tags(&names(&["and", "is"])).await.unwrap();
        assert!(empty.is_empty());
    }

    /// Index whose search lets another writer claim `name` between the
    /// exact lookup and the insert
    struct RacingIndex {
        conn: Arc<Mutex<Connection>>,
        name: &'static str,
    }

    #[async_trait]
    impl TagIndex for RacingIndex {
        async fn upsert(&self, _tag: &Tag) -> Result<()> {
            Ok(())
        }
        async fn search(&self, _q: &[f32], _k: usize, _min: f32) -> Result<Vec<TagHit>> {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO tags (name, embedding, created_at) VALUES (?1, NULL, ?2)",
                rusqlite::params![self.name, chrono::Utc::now()],
            )
            .unwrap();
            Ok(Vec::new())
        }
        async fn remove(&self, _id: TagId) -> Result<bool> {
            Ok(false)
        }
        async fn ids(&self) -> Result<Vec<TagId>> {
            Ok(Vec::new())
        }
        fn dimension(&self) -> usize {
            3
        }
    }

    #[tokio::test]
    async fn test_duplicate_name_refetches_existing_tag() {
        let f = fixture();
        let mut uow = f.db.begin_async().await.unwrap();
        let racing = RacingIndex {
            conn: uow.connection(),
            name: "Cloud",
        };
        let resolver = resolver_with(Arc::new(racing), false);

        let resolved = resolver
            .resolve_or_create(&mut uow, "Cloud", Some(&[1.0, 0.0, 0.0]), 0.8)
            .await
            .unwrap();

        assert_eq!(resolved.resolution, Resolution::Exact);
        assert_eq!(resolved.tag.name, "Cloud");
        // The winner's row, inserted without an embedding
        assert!(resolved.tag.embedding.is_none());
        assert!(uow.pending_tags().is_empty());

        uow.commit().await.unwrap();
        assert_eq!(f.db.stats().unwrap().tags, 1);
    }

    #[tokio::test]
    async fn test_similar_tags_report() {
        let f = fixture();
        let resolver = resolver_with(f.index.clone(), false);

        let mut uow = f.db.begin_async().await.unwrap();
        uow.insert_tag("Cloud", Some(vec![1.0, 0.0, 0.0])).await.unwrap();
        uow.insert_tag("Kubernetes", Some(vec![0.7, 0.7, 0.1])).await.unwrap();
        uow.insert_tag("Rust", Some(vec![0.0, 0.0, 1.0])).await.unwrap();
        for tag in uow.commit().await.unwrap().created_tags {
            f.index.upsert(&tag).await.unwrap();
        }

        let hits = resolver.similar_tags(&f.db, "cloud", 0.5, 5).await.unwrap();
        let got: Vec<&str> = hits.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(got, vec!["Kubernetes"]);

        let missing = resolver.similar_tags(&f.db, "Nothing", 0.5, 5).await;
        assert!(matches!(missing, Err(Error::NotFound { .. })));
    }

    #[test]
    fn test_prepare_names() {
        let got = prepare_names(&names(&["  machine learning ", "Machine Learning", "the", "API", "데이터를"]));
        assert_eq!(got, vec!["Machine Learning", "Api", "데이터"]);
    }
}
