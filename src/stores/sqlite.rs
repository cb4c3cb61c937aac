//! SQLite implementation of [`Backend`] with vector search via `sqlite-vec`.
//!
//! Layout: a `documents` table, four metadata child tables (`meta_tags`,
//! `headings`, `links`, `images`) and a `chunks` table, all children keyed by
//! `document_id` with `ON DELETE CASCADE`. Chunk vectors live in a `vec0`
//! virtual table (`chunk_embeddings`) keyed by chunk id; virtual tables have
//! no foreign-key support, so their rows are removed in the same transaction
//! as their owning document.
//!
//! All writes funnel through the single background connection thread that
//! `tokio_rusqlite::Connection` owns, and a replace is one transaction, so
//! two concurrent stores of the same URL serialize to last-writer-wins. The
//! `UNIQUE` constraint on `documents.url` backstops the one-document-per-URL
//! invariant.

use std::collections::HashSet;
use std::mem::transmute;
use std::os::raw::c_char;
use std::path::Path;
use std::sync::Once;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_rusqlite::{Connection, OptionalExtension, ffi};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    Backend, ChunkRecord, DocumentRecord, NewDocument, SimilarChunk, StoredDocument,
};
use crate::types::{QualityMetrics, SeoMetadata, SiteError};

/// Columns that older databases may be missing; added by `ALTER TABLE` on
/// open so inserts can always write the full row.
const OPTIONAL_DOCUMENT_COLUMNS: &[(&str, &str)] = &[
    ("description", "TEXT"),
    ("canonical_url", "TEXT"),
    ("og_title", "TEXT"),
    ("og_description", "TEXT"),
    ("word_count", "INTEGER NOT NULL DEFAULT 0"),
    ("sentence_count", "INTEGER NOT NULL DEFAULT 0"),
    ("paragraph_count", "INTEGER NOT NULL DEFAULT 0"),
    ("avg_sentence_length", "REAL NOT NULL DEFAULT 0"),
];

const DOCUMENT_COLUMNS: &str = "id, url, title, content, description, canonical_url, og_title, \
     og_description, word_count, sentence_count, paragraph_count, avg_sentence_length, created_at";

/// Document store backed by SQLite + sqlite-vec.
#[derive(Clone)]
pub struct SqliteDocumentStore {
    conn: Connection,
    dimensions: usize,
}

impl SqliteDocumentStore {
    /// Opens (or creates) the database at `path`.
    ///
    /// `dimensions` fixes the embedding dimensionality for every chunk; a
    /// database must be reopened with the dimensionality it was created with.
    pub async fn open(path: impl AsRef<Path>, dimensions: usize) -> Result<Self, SiteError> {
        Self::register_sqlite_vec()?;
        let conn = Connection::open(path)
            .await
            .map_err(|err| SiteError::Storage(err.to_string()))?;
        Self::initialize(&conn, dimensions).await?;
        Ok(Self { conn, dimensions })
    }

    /// In-memory store for tests and throwaway runs.
    pub async fn open_in_memory(dimensions: usize) -> Result<Self, SiteError> {
        Self::register_sqlite_vec()?;
        let conn = Connection::open_in_memory()
            .await
            .map_err(|err| SiteError::Storage(err.to_string()))?;
        Self::initialize(&conn, dimensions).await?;
        Ok(Self { conn, dimensions })
    }

    /// Embedding dimensionality this store was opened with.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// The underlying connection, for queries the [`Backend`] trait does not
    /// cover.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    async fn initialize(conn: &Connection, dimensions: usize) -> Result<(), SiteError> {
        if dimensions == 0 {
            return Err(SiteError::Storage(
                "embedding dimensionality must be positive".into(),
            ));
        }
        conn.call(move |conn| {
            // Fail loudly if the vec extension did not load.
            conn.query_row("select vec_version()", [], |row| row.get::<_, String>(0))
                ?;

            conn.execute_batch(&schema_sql(dimensions))
                ?;

            // Schema evolution: a database created by an older build may lack
            // the optional SEO/quality columns.
            let present: HashSet<String> = {
                let mut stmt = conn
                    .prepare("PRAGMA table_info(documents)")
                    ?;
                let names = stmt
                    .query_map([], |row| row.get::<_, String>(1))
                    ?;
                let mut set = HashSet::new();
                for name in names {
                    set.insert(name?);
                }
                set
            };
            for (name, decl) in OPTIONAL_DOCUMENT_COLUMNS {
                if !present.contains(*name) {
                    info!(column = *name, "adding missing optional document column");
                    conn.execute(
                        &format!("ALTER TABLE documents ADD COLUMN {name} {decl}"),
                        [],
                    )
                    ?;
                }
            }
            Ok(())
        })
        .await
        .map_err(|err: tokio_rusqlite::Error| SiteError::Storage(err.to_string()))
    }

    fn register_sqlite_vec() -> Result<(), SiteError> {
        use std::sync::Mutex;

        static INIT: Once = Once::new();
        static INIT_RESULT: Mutex<Option<Result<(), String>>> = Mutex::new(None);

        INIT.call_once(|| {
            let result = unsafe {
                type SqliteExtensionInit = unsafe extern "C" fn(
                    *mut ffi::sqlite3,
                    *mut *mut c_char,
                    *const ffi::sqlite3_api_routines,
                ) -> i32;

                let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
                let init_fn: SqliteExtensionInit =
                    transmute::<unsafe extern "C" fn(), SqliteExtensionInit>(init);
                let rc = ffi::sqlite3_auto_extension(Some(init_fn));
                if rc != 0 {
                    Err(format!(
                        "failed to register sqlite-vec extension (code {rc})"
                    ))
                } else {
                    Ok(())
                }
            };
            *INIT_RESULT.lock().expect("init result mutex poisoned") = Some(result);
        });

        INIT_RESULT
            .lock()
            .expect("init result mutex poisoned")
            .clone()
            .expect("init was called but result not set")
            .map_err(SiteError::Storage)
    }
}

fn schema_sql(dimensions: usize) -> String {
    format!(
        "PRAGMA foreign_keys = ON;
         CREATE TABLE IF NOT EXISTS documents (
             id TEXT PRIMARY KEY,
             url TEXT NOT NULL UNIQUE,
             title TEXT NOT NULL,
             content TEXT NOT NULL,
             description TEXT,
             canonical_url TEXT,
             og_title TEXT,
             og_description TEXT,
             word_count INTEGER NOT NULL DEFAULT 0,
             sentence_count INTEGER NOT NULL DEFAULT 0,
             paragraph_count INTEGER NOT NULL DEFAULT 0,
             avg_sentence_length REAL NOT NULL DEFAULT 0,
             created_at TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS chunks (
             id TEXT PRIMARY KEY,
             document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
             chunk_index INTEGER NOT NULL,
             content TEXT NOT NULL,
             created_at TEXT NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);
         CREATE TABLE IF NOT EXISTS meta_tags (
             id TEXT PRIMARY KEY,
             document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
             name TEXT NOT NULL,
             content TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS headings (
             id TEXT PRIMARY KEY,
             document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
             level INTEGER NOT NULL,
             text TEXT NOT NULL,
             position INTEGER NOT NULL
         );
         CREATE TABLE IF NOT EXISTS links (
             id TEXT PRIMARY KEY,
             document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
             href TEXT NOT NULL,
             text TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS images (
             id TEXT PRIMARY KEY,
             document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
             src TEXT NOT NULL,
             alt TEXT NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_meta_tags_document ON meta_tags(document_id);
         CREATE INDEX IF NOT EXISTS idx_headings_document ON headings(document_id);
         CREATE INDEX IF NOT EXISTS idx_links_document ON links(document_id);
         CREATE INDEX IF NOT EXISTS idx_images_document ON images(document_id);
         CREATE VIRTUAL TABLE IF NOT EXISTS chunk_embeddings USING vec0(
             id TEXT PRIMARY KEY,
             embedding FLOAT[{dimensions}]
         );"
    )
}

#[async_trait]
impl Backend for SqliteDocumentStore {
    async fn replace_document(&self, doc: NewDocument) -> Result<StoredDocument, SiteError> {
        if doc.chunks.is_empty() {
            return Err(SiteError::NoChunks { url: doc.url });
        }
        for (idx, chunk) in doc.chunks.iter().enumerate() {
            if chunk.embedding.len() != self.dimensions {
                return Err(SiteError::Storage(format!(
                    "chunk {idx} embedding has {} dimensions, store expects {}",
                    chunk.embedding.len(),
                    self.dimensions
                )));
            }
        }

        // Serialize vectors up front so the connection closure stays
        // infallible outside of SQL itself.
        let mut chunk_rows: Vec<(String, String)> = Vec::with_capacity(doc.chunks.len());
        for chunk in &doc.chunks {
            let embedding_json = serde_json::to_string(&chunk.embedding)
                .map_err(|err| SiteError::Storage(err.to_string()))?;
            chunk_rows.push((chunk.content.clone(), embedding_json));
        }

        let document_id = Uuid::new_v4().to_string();
        let created_at = Utc::now().to_rfc3339();

        let stored = self
            .conn
            .call(move |conn| {
                let tx = conn
                    .transaction()
                    ?;

                // Replace, never merge: any previous document under this URL
                // goes away in the same transaction, children included.
                let old_ids: Vec<String> = {
                    let mut stmt = tx
                        .prepare("SELECT id FROM documents WHERE url = ?1")
                        ?;
                    let rows = stmt
                        .query_map([&doc.url], |row| row.get(0))
                        ?;
                    let mut ids = Vec::new();
                    for id in rows {
                        ids.push(id?);
                    }
                    ids
                };
                for old_id in &old_ids {
                    tx.execute(
                        "DELETE FROM chunk_embeddings WHERE id IN \
                         (SELECT id FROM chunks WHERE document_id = ?1)",
                        [old_id],
                    )
                    ?;
                    tx.execute("DELETE FROM documents WHERE id = ?1", [old_id])
                        ?;
                    debug!(url = %doc.url, old_id = %old_id, "replaced existing document");
                }

                tx.execute(
                    &format!(
                        "INSERT INTO documents ({DOCUMENT_COLUMNS}) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
                    ),
                    (
                        &document_id,
                        &doc.url,
                        &doc.title,
                        &doc.content,
                        &doc.seo.description,
                        &doc.seo.canonical_url,
                        &doc.seo.og_title,
                        &doc.seo.og_description,
                        doc.quality.word_count as i64,
                        doc.quality.sentence_count as i64,
                        doc.quality.paragraph_count as i64,
                        doc.quality.avg_sentence_length as f64,
                        &created_at,
                    ),
                )
                ?;

                // Metadata children are non-critical: a failed row is logged
                // and skipped, never failing the document.
                {
                    let mut stmt = tx
                        .prepare(
                            "INSERT INTO meta_tags (id, document_id, name, content) \
                             VALUES (?1, ?2, ?3, ?4)",
                        )
                        ?;
                    for tag in &doc.meta_tags {
                        if let Err(err) = stmt.execute((
                            Uuid::new_v4().to_string(),
                            &document_id,
                            &tag.name,
                            &tag.content,
                        )) {
                            warn!(url = %doc.url, name = %tag.name, error = %err,
                                "skipping meta tag row");
                        }
                    }
                }
                {
                    let mut stmt = tx
                        .prepare(
                            "INSERT INTO headings (id, document_id, level, text, position) \
                             VALUES (?1, ?2, ?3, ?4, ?5)",
                        )
                        ?;
                    for (position, heading) in doc.headings.iter().enumerate() {
                        if let Err(err) = stmt.execute((
                            Uuid::new_v4().to_string(),
                            &document_id,
                            heading.level as i64,
                            &heading.text,
                            position as i64,
                        )) {
                            warn!(url = %doc.url, level = heading.level, error = %err,
                                "skipping heading row");
                        }
                    }
                }
                {
                    let mut stmt = tx
                        .prepare(
                            "INSERT INTO links (id, document_id, href, text) \
                             VALUES (?1, ?2, ?3, ?4)",
                        )
                        ?;
                    for link in &doc.links {
                        if let Err(err) = stmt.execute((
                            Uuid::new_v4().to_string(),
                            &document_id,
                            &link.href,
                            &link.text,
                        )) {
                            warn!(url = %doc.url, href = %link.href, error = %err,
                                "skipping link row");
                        }
                    }
                }
                {
                    let mut stmt = tx
                        .prepare(
                            "INSERT INTO images (id, document_id, src, alt) \
                             VALUES (?1, ?2, ?3, ?4)",
                        )
                        ?;
                    for image in &doc.images {
                        if let Err(err) = stmt.execute((
                            Uuid::new_v4().to_string(),
                            &document_id,
                            &image.src,
                            &image.alt,
                        )) {
                            warn!(url = %doc.url, src = %image.src, error = %err,
                                "skipping image row");
                        }
                    }
                }

                // Chunk rows are critical: any failure aborts the whole
                // transaction and the previous document state survives.
                {
                    let mut chunk_stmt = tx
                        .prepare(
                            "INSERT INTO chunks (id, document_id, chunk_index, content, created_at) \
                             VALUES (?1, ?2, ?3, ?4, ?5)",
                        )
                        ?;
                    let mut vec_stmt = tx
                        .prepare(
                            "INSERT INTO chunk_embeddings (id, embedding) \
                             VALUES (?1, vec_f32(?2))",
                        )
                        ?;
                    for (chunk_index, (content, embedding_json)) in chunk_rows.iter().enumerate() {
                        let chunk_id = Uuid::new_v4().to_string();
                        chunk_stmt
                            .execute((
                                &chunk_id,
                                &document_id,
                                chunk_index as i64,
                                content,
                                &created_at,
                            ))
                            ?;
                        vec_stmt
                            .execute((&chunk_id, embedding_json))
                            ?;
                    }
                }

                tx.commit()?;

                Ok(StoredDocument {
                    document_id,
                    url: doc.url,
                    title: doc.title,
                    chunks_created: chunk_rows.len(),
                })
            })
            .await?;

        info!(url = %stored.url, document_id = %stored.document_id,
            chunks = stored.chunks_created, "document stored");
        Ok(stored)
    }

    async fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>, SiteError> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1"
                    ))
                    ?;
                stmt.query_row([&id], |row| {
                    Ok(DocumentRecord {
                        id: row.get(0)?,
                        url: row.get(1)?,
                        title: row.get(2)?,
                        content: row.get(3)?,
                        seo: SeoMetadata {
                            description: row.get(4)?,
                            canonical_url: row.get(5)?,
                            og_title: row.get(6)?,
                            og_description: row.get(7)?,
                        },
                        quality: QualityMetrics {
                            word_count: row.get::<_, i64>(8)? as u32,
                            sentence_count: row.get::<_, i64>(9)? as u32,
                            paragraph_count: row.get::<_, i64>(10)? as u32,
                            avg_sentence_length: row.get::<_, f64>(11)? as f32,
                        },
                        created_at: parse_timestamp(&row.get::<_, String>(12)?),
                    })
                })
                .optional()
            })
            .await
            .map_err(SiteError::from)
    }

    async fn get_document_by_url(&self, url: &str) -> Result<Option<DocumentRecord>, SiteError> {
        let url = url.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE url = ?1"
                    ))
                    ?;
                stmt.query_row([&url], |row| {
                    Ok(DocumentRecord {
                        id: row.get(0)?,
                        url: row.get(1)?,
                        title: row.get(2)?,
                        content: row.get(3)?,
                        seo: SeoMetadata {
                            description: row.get(4)?,
                            canonical_url: row.get(5)?,
                            og_title: row.get(6)?,
                            og_description: row.get(7)?,
                        },
                        quality: QualityMetrics {
                            word_count: row.get::<_, i64>(8)? as u32,
                            sentence_count: row.get::<_, i64>(9)? as u32,
                            paragraph_count: row.get::<_, i64>(10)? as u32,
                            avg_sentence_length: row.get::<_, f64>(11)? as f32,
                        },
                        created_at: parse_timestamp(&row.get::<_, String>(12)?),
                    })
                })
                .optional()
            })
            .await
            .map_err(SiteError::from)
    }

    async fn list_documents(&self, limit: usize) -> Result<Vec<DocumentRecord>, SiteError> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {DOCUMENT_COLUMNS} FROM documents \
                         ORDER BY created_at DESC, rowid DESC LIMIT ?1"
                    ))
                    ?;
                let rows = stmt
                    .query_map([limit as i64], |row| {
                        Ok(DocumentRecord {
                            id: row.get(0)?,
                            url: row.get(1)?,
                            title: row.get(2)?,
                            content: row.get(3)?,
                            seo: SeoMetadata {
                                description: row.get(4)?,
                                canonical_url: row.get(5)?,
                                og_title: row.get(6)?,
                                og_description: row.get(7)?,
                            },
                            quality: QualityMetrics {
                                word_count: row.get::<_, i64>(8)? as u32,
                                sentence_count: row.get::<_, i64>(9)? as u32,
                                paragraph_count: row.get::<_, i64>(10)? as u32,
                                avg_sentence_length: row.get::<_, f64>(11)? as f32,
                            },
                            created_at: parse_timestamp(&row.get::<_, String>(12)?),
                        })
                    })
                    ?;
                let mut documents = Vec::new();
                for row in rows {
                    documents.push(row?);
                }
                Ok(documents)
            })
            .await
            .map_err(SiteError::from)
    }

    async fn document_chunks(&self, document_id: &str) -> Result<Vec<ChunkRecord>, SiteError> {
        let document_id = document_id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT id, document_id, chunk_index, content, created_at \
                         FROM chunks WHERE document_id = ?1 ORDER BY chunk_index ASC",
                    )
                    ?;
                let rows = stmt
                    .query_map([&document_id], |row| {
                        Ok(ChunkRecord {
                            id: row.get(0)?,
                            document_id: row.get(1)?,
                            chunk_index: row.get::<_, i64>(2)? as usize,
                            content: row.get(3)?,
                            created_at: parse_timestamp(&row.get::<_, String>(4)?),
                        })
                    })
                    ?;
                let mut chunks = Vec::new();
                for row in rows {
                    chunks.push(row?);
                }
                Ok(chunks)
            })
            .await
            .map_err(SiteError::from)
    }

    async fn delete_document(&self, id: &str) -> Result<bool, SiteError> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                let tx = conn
                    .transaction()
                    ?;
                tx.execute(
                    "DELETE FROM chunk_embeddings WHERE id IN \
                     (SELECT id FROM chunks WHERE document_id = ?1)",
                    [&id],
                )
                ?;
                let deleted = tx
                    .execute("DELETE FROM documents WHERE id = ?1", [&id])
                    ?;
                tx.commit()?;
                Ok(deleted > 0)
            })
            .await
            .map_err(SiteError::from)
    }

    async fn existing_urls(&self, urls: &[String]) -> Result<HashSet<String>, SiteError> {
        let urls = urls.to_vec();
        self.conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare("SELECT 1 FROM documents WHERE url = ?1")
                    ?;
                let mut present = HashSet::new();
                for url in urls {
                    let exists = stmt
                        .exists([&url])
                        ?;
                    if exists {
                        present.insert(url);
                    }
                }
                Ok(present)
            })
            .await
            .map_err(SiteError::from)
    }

    async fn list_urls(&self) -> Result<Vec<(String, String)>, SiteError> {
        self.conn
            .call(|conn| {
                let mut stmt = conn
                    .prepare("SELECT id, url FROM documents")
                    ?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
                    ?;
                let mut pairs = Vec::new();
                for row in rows {
                    pairs.push(row?);
                }
                Ok(pairs)
            })
            .await
            .map_err(SiteError::from)
    }

    async fn search_similar(
        &self,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<SimilarChunk>, SiteError> {
        if query_embedding.len() != self.dimensions {
            return Err(SiteError::Storage(format!(
                "query embedding has {} dimensions, store expects {}",
                query_embedding.len(),
                self.dimensions
            )));
        }
        let embedding_json = serde_json::to_string(query_embedding)
            .map_err(|err| SiteError::Storage(err.to_string()))?;
        self.conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT c.id, c.document_id, c.content, \
                         vec_distance_cosine(e.embedding, vec_f32(?1)) AS distance \
                         FROM chunks c \
                         JOIN chunk_embeddings e ON c.id = e.id \
                         ORDER BY distance ASC \
                         LIMIT {limit}"
                    ))
                    ?;
                let rows = stmt
                    .query_map([&embedding_json], |row| {
                        let distance: f32 = row.get(3)?;
                        Ok(SimilarChunk {
                            chunk_id: row.get(0)?,
                            document_id: row.get(1)?,
                            content: row.get(2)?,
                            similarity: 1.0 - distance,
                        })
                    })
                    ?;
                let mut results = Vec::new();
                for row in rows {
                    results.push(row?);
                }
                Ok(results)
            })
            .await
            .map_err(SiteError::from)
    }

    async fn count_chunks(&self) -> Result<usize, SiteError> {
        self.conn
            .call(|conn| {
                let count: i64 = conn
                    .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
                    ?;
                Ok(count as usize)
            })
            .await
            .map_err(SiteError::from)
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
