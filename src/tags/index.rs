//! Vector-searchable mirror of committed tags
//!
//! The tag index answers "which existing tag is nearest to this embedding"
//! across uploads. It is a separate store from the primary database and is
//! only ever written after a tag has been committed there.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::database::{embedding_to_bytes, open_connection, Tag, TagId, DEFAULT_BUSY_TIMEOUT};
use crate::core::{run_blocking, Error, Result};

/// One search result from the tag index
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagHit {
    pub id: TagId,
    pub name: String,
    /// Cosine similarity to the query
    pub score: f32,
}

/// Shared nearest-neighbour index over tag embeddings
#[async_trait]
pub trait TagIndex: Send + Sync {
    /// Insert or replace the entry for a committed tag
    async fn upsert(&self, tag: &Tag) -> Result<()>;

    /// Up to `k` entries with similarity `>= min_score`, best first
    async fn search(&self, query: &[f32], k: usize, min_score: f32) -> Result<Vec<TagHit>>;

    /// One result list per query, in query order
    async fn search_batch(
        &self,
        queries: &[Vec<f32>],
        k: usize,
        min_score: f32,
    ) -> Result<Vec<Vec<TagHit>>> {
        let mut results = Vec::with_capacity(queries.len());
        for query in queries {
            results.push(self.search(query, k, min_score).await?);
        }
        Ok(results)
    }

    /// Remove an entry; returns false if it was not present
    async fn remove(&self, id: TagId) -> Result<bool>;

    /// Ids of every mirrored tag
    async fn ids(&self) -> Result<Vec<TagId>>;

    fn dimension(&self) -> usize;
}

fn index_err(e: rusqlite::Error) -> Error {
    Error::TagIndex(e.to_string())
}

/// SQLite-backed [`TagIndex`] using the registered `cosine_distance` function
#[derive(Clone)]
pub struct VectorTagIndex {
    conn: Arc<Mutex<Connection>>,
    dimension: usize,
}

impl VectorTagIndex {
    /// Open or create the index. Fails if it was created with another dimension.
    pub fn open(path: &Path, dimension: usize) -> Result<Self> {
        let conn = open_connection(path, DEFAULT_BUSY_TIMEOUT)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tag_index (
                tag_id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                embedding BLOB NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS index_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;

        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM index_meta WHERE key = 'dimension'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match stored.map(|v| v.parse::<usize>()) {
            Some(Ok(existing)) if existing != dimension => {
                return Err(Error::IndexDimension {
                    stored: existing,
                    configured: dimension,
                });
            }
            Some(Ok(_)) => {}
            Some(Err(_)) | None => {
                conn.execute(
                    "INSERT OR REPLACE INTO index_meta (key, value) VALUES ('dimension', ?1)",
                    [dimension.to_string()],
                )?;
            }
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            dimension,
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        run_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|p| p.into_inner());
            f(&guard).map_err(index_err)
        })
        .await
    }

    fn check_dimension(&self, len: usize) -> Result<()> {
        if len != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: len,
            });
        }
        Ok(())
    }

    pub async fn count(&self) -> Result<usize> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM tag_index", [], |row| {
                row.get::<_, i64>(0)
            })
        })
        .await
        .map(|n| n as usize)
    }
}

#[async_trait]
impl TagIndex for VectorTagIndex {
    async fn upsert(&self, tag: &Tag) -> Result<()> {
        let embedding = tag
            .embedding
            .as_deref()
            .ok_or_else(|| Error::TagIndex(format!("tag {} has no embedding", tag.id)))?;
        self.check_dimension(embedding.len())?;

        let blob = embedding_to_bytes(embedding);
        let id = tag.id.0;
        let name = tag.name.clone();
        let created_at: DateTime<Utc> = tag.created_at;

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO tag_index (tag_id, name, embedding, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![id, name, blob, created_at],
            )
            .map(|_| ())
        })
        .await
    }

    async fn search(&self, query: &[f32], k: usize, min_score: f32) -> Result<Vec<TagHit>> {
        self.check_dimension(query.len())?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let blob = embedding_to_bytes(query);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT tag_id, name, score
                FROM (
                    SELECT tag_id, name, 1.0 - cosine_distance(embedding, ?1) AS score
                    FROM tag_index
                )
                WHERE score IS NOT NULL AND score >= ?2
                ORDER BY score DESC, tag_id ASC
                LIMIT ?3
                "#,
            )?;
            let hits = stmt
                .query_map(params![blob, min_score as f64, k as i64], |row| {
                    let score: f64 = row.get(2)?;
                    Ok(TagHit {
                        id: TagId(row.get(0)?),
                        name: row.get(1)?,
                        score: score as f32,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(hits)
        })
        .await
    }

    async fn remove(&self, id: TagId) -> Result<bool> {
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM tag_index WHERE tag_id = ?1", [id.0])
                .map(|n| n > 0)
        })
        .await
    }

    async fn ids(&self) -> Result<Vec<TagId>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT tag_id FROM tag_index ORDER BY tag_id")?;
            let ids = stmt
                .query_map([], |row| Ok(TagId(row.get(0)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(ids)
        })
        .await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
