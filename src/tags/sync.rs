//! Keeping the tag index in step with the primary store
//!
//! Tags are mirrored only after their unit of work commits. Mirroring is
//! best effort; `reconcile` repairs whatever it missed.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use super::database::{Database, Tag, TagId};
use super::index::TagIndex;
use crate::core::{run_blocking, Result};

/// Outcome of a reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    /// Tags re-mirrored into the index
    pub mirrored: Vec<TagId>,
    /// Index entries removed because their tag no longer exists
    pub removed: Vec<TagId>,
    /// Tags that could not be mirrored this pass
    pub failed: Vec<TagId>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.mirrored.is_empty() && self.removed.is_empty() && self.failed.is_empty()
    }
}

/// Consistency snapshot between the store and the index
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuditReport {
    pub tags: usize,
    pub with_embedding: usize,
    pub without_embedding: usize,
    pub mirrored: usize,
    /// Tags with an embedding but no index entry
    pub unmirrored: Vec<TagId>,
    /// Index entries whose tag is gone
    pub orphans: Vec<TagId>,
}

impl AuditReport {
    pub fn is_consistent(&self) -> bool {
        self.unmirrored.is_empty() && self.orphans.is_empty()
    }
}

#[derive(Clone)]
pub struct TagIndexSync {
    db: Database,
    index: Arc<dyn TagIndex>,
}

impl TagIndexSync {
    pub fn new(db: Database, index: Arc<dyn TagIndex>) -> Self {
        Self { db, index }
    }

    /// Mirror one committed tag. Failures are logged and returned as `false`.
    pub async fn mirror(&self, tag: &Tag) -> bool {
        if tag.embedding.is_none() {
            return false;
        }
        match self.index.upsert(tag).await {
            Ok(()) => true,
            Err(e) => {
                warn!(tag_id = %tag.id, name = %tag.name, error = %e, "failed to mirror tag; run `tags reconcile`");
                false
            }
        }
    }

    /// Mirror a committed unit of work's new tags; returns how many succeeded
    pub async fn mirror_all(&self, tags: &[Tag]) -> usize {
        let mut mirrored = 0;
        for tag in tags {
            if self.mirror(tag).await {
                mirrored += 1;
            }
        }
        mirrored
    }

    /// Re-mirror missing tags and drop orphaned index entries. Safe to repeat.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let tags = self.load_tags().await?;
        let indexed: HashSet<TagId> = self.index.ids().await?.into_iter().collect();
        let known: HashSet<TagId> = tags.iter().map(|t| t.id).collect();

        let mut report = ReconcileReport::default();

        for tag in tags
            .iter()
            .filter(|t| t.embedding.is_some() && !indexed.contains(&t.id))
        {
            match self.index.upsert(tag).await {
                Ok(()) => report.mirrored.push(tag.id),
                Err(e) => {
                    warn!(tag_id = %tag.id, error = %e, "reconcile could not mirror tag");
                    report.failed.push(tag.id);
                }
            }
        }

        let mut orphans: Vec<TagId> = indexed.difference(&known).copied().collect();
        orphans.sort();
        for id in orphans {
            if self.index.remove(id).await? {
                report.removed.push(id);
            }
        }

        info!(
            mirrored = report.mirrored.len(),
            removed = report.removed.len(),
            failed = report.failed.len(),
            "tag index reconciled"
        );
        Ok(report)
    }

    /// Count mismatches without changing anything
    pub async fn audit(&self) -> Result<AuditReport> {
        let tags = self.load_tags().await?;
        let indexed: HashSet<TagId> = self.index.ids().await?.into_iter().collect();
        let known: HashSet<TagId> = tags.iter().map(|t| t.id).collect();

        let with_embedding = tags.iter().filter(|t| t.embedding.is_some()).count();
        let unmirrored: Vec<TagId> = tags
            .iter()
            .filter(|t| t.embedding.is_some() && !indexed.contains(&t.id))
            .map(|t| t.id)
            .collect();
        let mut orphans: Vec<TagId> = indexed.difference(&known).copied().collect();
        orphans.sort();

        Ok(AuditReport {
            tags: tags.len(),
            with_embedding,
            without_embedding: tags.len() - with_embedding,
            mirrored: indexed.intersection(&known).count(),
            unmirrored,
            orphans,
        })
    }

    /// Delete a tag from the store, then from the index
    pub async fn delete_tag(&self, id: TagId) -> Result<bool> {
        let db = self.db.clone();
        let deleted = run_blocking(move || db.delete_tag(id)).await?;
        if let Err(e) = self.index.remove(id).await {
            warn!(tag_id = %id, error = %e, "failed to remove tag from index; run `tags reconcile`");
        }
        Ok(deleted)
    }

    async fn load_tags(&self) -> Result<Vec<Tag>> {
        let db = self.db.clone();
        run_blocking(move || db.all_tags()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::index::VectorTagIndex;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, Database, Arc<VectorTagIndex>, TagIndexSync) {
        let dir = TempDir::new().unwrap();
        let db = Database::open(&dir.path().join("searchive.db")).unwrap();
        let index = Arc::new(VectorTagIndex::open(&dir.path().join("tag_index.db"), 2).unwrap());
        let sync = TagIndexSync::new(db.clone(), index.clone());
        (dir, db, index, sync)
    }

    async fn commit_tags(db: &Database, tags: &[(&str, Option<Vec<f32>>)]) -> Vec<Tag> {
        let mut uow = db.begin_async().await.unwrap();
        for (name, embedding) in tags {
            uow.insert_tag(name, embedding.clone()).await.unwrap();
        }
        uow.commit().await.unwrap().created_tags
    }

    #[tokio::test]
    async fn test_mirror_after_commit() {
        let (_dir, db, index, sync) = setup().await;
        let tags = commit_tags(
            &db,
            &[("Cloud", Some(vec![1.0, 0.0])), ("Bare", None)],
        )
        .await;

        assert_eq!(sync.mirror_all(&tags).await, 1);
        assert_eq!(index.ids().await.unwrap(), vec![tags[0].id]);
    }

    #[tokio::test]
    async fn test_reconcile_converges() {
        let (_dir, db, index, sync) = setup().await;
        let tags = commit_tags(
            &db,
            &[("Cloud", Some(vec![1.0, 0.0])), ("Dog", Some(vec![0.0, 1.0]))],
        )
        .await;

        // Only the first was mirrored; the second is an orphan after deletion
        sync.mirror(&tags[1]).await;
        db.delete_tag(tags[1].id).unwrap();

        let audit = sync.audit().await.unwrap();
        assert_eq!(audit.unmirrored, vec![tags[0].id]);
        assert_eq!(audit.orphans, vec![tags[1].id]);
        assert!(!audit.is_consistent());

        let report = sync.reconcile().await.unwrap();
        assert_eq!(report.mirrored, vec![tags[0].id]);
        assert_eq!(report.removed, vec![tags[1].id]);

        assert!(sync.reconcile().await.unwrap().is_clean());
        assert!(sync.audit().await.unwrap().is_consistent());
        assert_eq!(index.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_tag_removes_mirror() {
        let (_dir, db, index, sync) = setup().await;
        let tags = commit_tags(&db, &[("Cloud", Some(vec![1.0, 0.0]))]).await;
        sync.mirror_all(&tags).await;

        assert!(sync.delete_tag(tags[0].id).await.unwrap());
        assert!(index.ids().await.unwrap().is_empty());
        assert!(db.find_tag_by_id(tags[0].id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_audit_counts() {
        let (_dir, db, _index, sync) = setup().await;
        let tags = commit_tags(
            &db,
            &[("Cloud", Some(vec![1.0, 0.0])), ("Bare", None)],
        )
        .await;
        sync.mirror_all(&tags).await;

        let audit = sync.audit().await.unwrap();
        assert_eq!(audit.tags, 2);
        assert_eq!(audit.with_embedding, 1);
        assert_eq!(audit.without_embedding, 1);
        assert_eq!(audit.mirrored, 1);
        assert!(audit.is_consistent());
    }
}
