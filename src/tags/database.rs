//! Primary store for tags, documents and their associations
//!
//! Uses SQLite in WAL mode. Every unit of work gets its own connection and an
//! `IMMEDIATE` transaction, so concurrent uploads are serialized by SQLite's
//! single writer lock instead of by in-process locking. Writers wait up to the
//! configured busy timeout for that lock.

use chrono::{DateTime, Utc};
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::ValueRef;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::{run_blocking, Error, Result};

/// Name of the SQL function registered on every connection
pub const COSINE_DISTANCE_FN: &str = "cosine_distance";

/// How long a connection waits for another writer's lock unless configured otherwise
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub i64);

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A canonical tag
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tag {
    pub id: TagId,
    pub name: String,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
}

/// An ingested document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub id: DocumentId,
    pub filename: String,
    pub file_type: String,
    /// Label of the extraction strategy used; `None` until tagging has run
    pub extraction_method: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

/// Tag with the number of documents carrying it
#[derive(Debug, Clone, Serialize)]
pub struct TagUsage {
    #[serde(flatten)]
    pub tag: Tag,
    pub document_count: i64,
}

/// Row counts for status reporting
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub documents: i64,
    pub tags: i64,
    pub tags_without_embedding: i64,
    pub associations: i64,
}

/// Handle to the primary store. Cheap to clone; connections are opened per use.
#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
    busy_timeout: Duration,
}

impl Database {
    /// Open or create the store at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Self {
            path: path.to_path_buf(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        };
        let conn = db.connect()?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(path = %path.display(), journal_mode = %mode, "opened primary store");
        init_schema(&conn)?;

        Ok(db)
    }

    /// Wait up to `timeout` for the write lock before failing with "database is locked"
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a configured connection
    pub fn connect(&self) -> Result<Connection> {
        open_connection(&self.path, self.busy_timeout)
    }

    /// Start a unit of work holding the write lock until commit or rollback
    pub fn begin(&self) -> Result<UnitOfWork> {
        let conn = self.connect()?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(UnitOfWork {
            conn: Arc::new(Mutex::new(conn)),
            pending: Vec::new(),
            finished: false,
        })
    }

    /// Async variant of [`Database::begin`]; waiting for the write lock happens off the runtime
    pub async fn begin_async(&self) -> Result<UnitOfWork> {
        let db = self.clone();
        run_blocking(move || db.begin()).await
    }

    pub fn find_tag_by_name(&self, name: &str) -> Result<Option<Tag>> {
        tag_by_name(&self.connect()?, name)
    }

    pub fn find_tag_by_id(&self, id: TagId) -> Result<Option<Tag>> {
        tag_by_id(&self.connect()?, id)
    }

    /// All tags ordered by id
    pub fn all_tags(&self) -> Result<Vec<Tag>> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT id, name, embedding, created_at FROM tags ORDER BY id")?;
        let tags = stmt
            .query_map([], tag_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tags)
    }

    /// Tags with document counts, most used first
    pub fn tag_usage(&self) -> Result<Vec<TagUsage>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT t.id, t.name, t.embedding, t.created_at, COUNT(dt.document_id) AS usage
            FROM tags t
            LEFT JOIN document_tags dt ON t.id = dt.tag_id
            GROUP BY t.id
            ORDER BY usage DESC, t.name
            "#,
        )?;
        let usage = stmt
            .query_map([], |row| {
                Ok(TagUsage {
                    tag: tag_from_row(row)?,
                    document_count: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(usage)
    }

    pub fn find_document(&self, id: DocumentId) -> Result<Option<Document>> {
        let conn = self.connect()?;
        let doc = conn
            .query_row(
                "SELECT id, filename, file_type, extraction_method, uploaded_at FROM documents WHERE id = ?1",
                [id.0],
                document_from_row,
            )
            .optional()?;
        Ok(doc)
    }

    /// Tags attached to a document, in attachment order
    pub fn tags_for_document(&self, id: DocumentId) -> Result<Vec<Tag>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT t.id, t.name, t.embedding, t.created_at
            FROM document_tags dt
            JOIN tags t ON t.id = dt.tag_id
            WHERE dt.document_id = ?1
            ORDER BY dt.rowid
            "#,
        )?;
        let tags = stmt
            .query_map([id.0], tag_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tags)
    }

    /// Documents carrying any of the given tag names, newest first
    pub fn documents_by_tag_names(&self, names: &[String]) -> Result<Vec<Document>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; names.len()].join(", ");
        let sql = format!(
            r#"
            SELECT DISTINCT d.id, d.filename, d.file_type, d.extraction_method, d.uploaded_at
            FROM documents d
            JOIN document_tags dt ON dt.document_id = d.id
            JOIN tags t ON t.id = dt.tag_id
            WHERE t.name IN ({})
            ORDER BY d.uploaded_at DESC, d.id DESC
            "#,
            placeholders
        );

        let conn = self.connect()?;
        let mut stmt = conn.prepare(&sql)?;
        let docs = stmt
            .query_map(params_from_iter(names.iter()), document_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(docs)
    }

    /// Delete a document; associations cascade. Returns false if it did not exist.
    pub fn delete_document(&self, id: DocumentId) -> Result<bool> {
        let conn = self.connect()?;
        let deleted = conn.execute("DELETE FROM documents WHERE id = ?1", [id.0])?;
        Ok(deleted > 0)
    }

    /// Delete a tag; associations cascade. The caller removes the index mirror.
    pub fn delete_tag(&self, id: TagId) -> Result<bool> {
        let conn = self.connect()?;
        let deleted = conn.execute("DELETE FROM tags WHERE id = ?1", [id.0])?;
        Ok(deleted > 0)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.connect()?;
        let stats = conn.query_row(
            r#"
            SELECT
                (SELECT COUNT(*) FROM documents),
                (SELECT COUNT(*) FROM tags),
                (SELECT COUNT(*) FROM tags WHERE embedding IS NULL),
                (SELECT COUNT(*) FROM document_tags)
            "#,
            [],
            |row| {
                Ok(StoreStats {
                    documents: row.get(0)?,
                    tags: row.get(1)?,
                    tags_without_embedding: row.get(2)?,
                    associations: row.get(3)?,
                })
            },
        )?;
        Ok(stats)
    }
}

/// One upload's transaction.
///
/// Holds the SQLite write lock from `begin` until [`commit`](Self::commit) or
/// [`rollback`](Self::rollback). Dropping an unfinished unit of work rolls it back.
/// Tags created inside it are tracked so later similarity lookups in the same
/// upload see them before they reach the tag index.
pub struct UnitOfWork {
    conn: Arc<Mutex<Connection>>,
    pending: Vec<Tag>,
    finished: bool,
}

/// Result of a successful commit
#[derive(Debug, Clone, Default)]
pub struct CommittedWork {
    /// Tags created by the unit of work, now safe to mirror
    pub created_tags: Vec<Tag>,
}

impl UnitOfWork {
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.finished {
            return Err(Error::Finished);
        }
        let conn = Arc::clone(&self.conn);
        run_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|p| p.into_inner());
            f(&guard)
        })
        .await
    }

    pub async fn find_tag_by_name(&self, name: &str) -> Result<Option<Tag>> {
        let name = name.to_string();
        self.with_conn(move |conn| tag_by_name(conn, &name)).await
    }

    pub async fn find_tag_by_id(&self, id: TagId) -> Result<Option<Tag>> {
        self.with_conn(move |conn| tag_by_id(conn, id)).await
    }

    /// Insert a tag. A concurrent insert of the same name surfaces as
    /// [`Error::DuplicateTagName`].
    pub async fn insert_tag(&mut self, name: &str, embedding: Option<Vec<f32>>) -> Result<Tag> {
        let name = name.to_string();
        let tag = self
            .with_conn(move |conn| insert_tag(conn, &name, embedding))
            .await?;
        self.pending.push(tag.clone());
        Ok(tag)
    }

    /// Nearest committed-or-own tag within `max_distance`, computed inside the transaction
    pub async fn nearest_tag(
        &self,
        embedding: &[f32],
        max_distance: f32,
    ) -> Result<Option<(Tag, f32)>> {
        let blob = embedding_to_bytes(embedding);
        self.with_conn(move |conn| nearest_tag(conn, &blob, max_distance))
            .await
    }

    /// Tags created in this unit of work so far
    pub fn pending_tags(&self) -> &[Tag] {
        &self.pending
    }

    /// Handle to the transaction's connection, for simulating interleaved writers
    #[cfg(test)]
    pub(crate) fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    pub async fn insert_document(&self, filename: &str, file_type: &str) -> Result<DocumentId> {
        let filename = filename.to_string();
        let file_type = file_type.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO documents (filename, file_type, uploaded_at) VALUES (?1, ?2, ?3)",
                params![filename, file_type, Utc::now()],
            )?;
            Ok(DocumentId(conn.last_insert_rowid()))
        })
        .await
    }

    /// Bulk-link tags to a document. Duplicate links are ignored.
    pub async fn attach_tags(&self, document_id: DocumentId, tag_ids: &[TagId]) -> Result<usize> {
        let tag_ids = tag_ids.to_vec();
        self.with_conn(move |conn| {
            let now = Utc::now();
            let mut stmt = conn.prepare(
                "INSERT OR IGNORE INTO document_tags (document_id, tag_id, created_at) VALUES (?1, ?2, ?3)",
            )?;
            let mut inserted = 0;
            for tag_id in &tag_ids {
                inserted += stmt.execute(params![document_id.0, tag_id.0, now])?;
            }
            Ok(inserted)
        })
        .await
    }

    pub async fn set_extraction_method(&self, document_id: DocumentId, method: &str) -> Result<()> {
        let method = method.to_string();
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE documents SET extraction_method = ?2 WHERE id = ?1",
                params![document_id.0, method],
            )?;
            if updated == 0 {
                return Err(Error::not_found("document", document_id));
            }
            Ok(())
        })
        .await
    }

    pub async fn commit(mut self) -> Result<CommittedWork> {
        self.with_conn(|conn| {
            conn.execute_batch("COMMIT")?;
            Ok(())
        })
        .await?;
        self.finished = true;

        debug!(created = self.pending.len(), "unit of work committed");
        Ok(CommittedWork {
            created_tags: std::mem::take(&mut self.pending),
        })
    }

    pub async fn rollback(mut self) -> Result<()> {
        let result = self
            .with_conn(|conn| {
                conn.execute_batch("ROLLBACK")?;
                Ok(())
            })
            .await;
        self.finished = true;
        self.pending.clear();
        result
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        if !conn.is_autocommit() {
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                warn!(error = %e, "rollback on drop failed");
            }
        }
    }
}

// ============================================================================
// Connection setup
// ============================================================================

pub(crate) fn open_connection(path: &Path, busy_timeout: Duration) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    register_cosine_distance(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS tags (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT UNIQUE NOT NULL,
            embedding BLOB,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            filename TEXT NOT NULL,
            file_type TEXT NOT NULL,
            extraction_method TEXT,
            uploaded_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS document_tags (
            document_id INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
            tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
            created_at TEXT NOT NULL,
            PRIMARY KEY (document_id, tag_id)
        );

        CREATE INDEX IF NOT EXISTS idx_document_tags_tag ON document_tags(tag_id);
        "#,
    )?;

    Ok(())
}

/// `cosine_distance(a, b)`: `1 - cos(a, b)` over little-endian f32 blobs, NULL if either is missing
pub(crate) fn register_cosine_distance(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        COSINE_DISTANCE_FN,
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx: &Context<'_>| {
            let distance = match (ctx.get_raw(0), ctx.get_raw(1)) {
                (ValueRef::Blob(a), ValueRef::Blob(b)) if a.len() == b.len() && !a.is_empty() => {
                    let a = bytes_to_embedding(a);
                    let b = bytes_to_embedding(b);
                    Some(1.0 - super::embedder::cosine_similarity(&a, &b) as f64)
                }
                _ => None,
            };
            Ok(distance)
        },
    )?;
    Ok(())
}

// ============================================================================
// Row helpers
// ============================================================================

fn tag_from_row(row: &Row<'_>) -> rusqlite::Result<Tag> {
    let blob: Option<Vec<u8>> = row.get(2)?;
    Ok(Tag {
        id: TagId(row.get(0)?),
        name: row.get(1)?,
        embedding: blob.map(|b| bytes_to_embedding(&b)),
        created_at: row.get(3)?,
    })
}

fn document_from_row(row: &Row<'_>) -> rusqlite::Result<Document> {
    Ok(Document {
        id: DocumentId(row.get(0)?),
        filename: row.get(1)?,
        file_type: row.get(2)?,
        extraction_method: row.get(3)?,
        uploaded_at: row.get(4)?,
    })
}

fn tag_by_name(conn: &Connection, name: &str) -> Result<Option<Tag>> {
    let tag = conn
        .query_row(
            "SELECT id, name, embedding, created_at FROM tags WHERE name = ?1",
            [name],
            tag_from_row,
        )
        .optional()?;
    Ok(tag)
}

fn tag_by_id(conn: &Connection, id: TagId) -> Result<Option<Tag>> {
    let tag = conn
        .query_row(
            "SELECT id, name, embedding, created_at FROM tags WHERE id = ?1",
            [id.0],
            tag_from_row,
        )
        .optional()?;
    Ok(tag)
}

fn insert_tag(conn: &Connection, name: &str, embedding: Option<Vec<f32>>) -> Result<Tag> {
    let created_at = Utc::now();
    let blob = embedding.as_deref().map(embedding_to_bytes);

    match conn.execute(
        "INSERT INTO tags (name, embedding, created_at) VALUES (?1, ?2, ?3)",
        params![name, blob, created_at],
    ) {
        Ok(_) => Ok(Tag {
            id: TagId(conn.last_insert_rowid()),
            name: name.to_string(),
            embedding,
            created_at,
        }),
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
            Err(Error::DuplicateTagName(name.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

fn nearest_tag(conn: &Connection, blob: &[u8], max_distance: f32) -> Result<Option<(Tag, f32)>> {
    let row = conn
        .query_row(
            r#"
            SELECT id, name, embedding, created_at, distance
            FROM (
                SELECT id, name, embedding, created_at,
                       cosine_distance(embedding, ?1) AS distance
                FROM tags
                WHERE embedding IS NOT NULL
            )
            WHERE distance IS NOT NULL AND distance < ?2
            ORDER BY distance ASC, id ASC
            LIMIT 1
            "#,
            params![blob, max_distance as f64],
            |row| {
                let distance: f64 = row.get(4)?;
                Ok((tag_from_row(row)?, distance as f32))
            },
        )
        .optional()?;
    Ok(row)
}

/// Convert f32 vector to bytes for storage
pub(crate) fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Convert bytes back to f32 vector
pub(crate) fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
