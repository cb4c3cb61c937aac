//! Storage backends for documents, their metadata children, and chunk vectors.
//!
//! The [`Backend`] trait abstracts the persistence layer so the pipeline,
//! search service, and homepage resolver can run against any implementation —
//! the shipped SQLite store or an in-memory fake in tests.
//!
//! ```text
//!                  ┌──────────────────┐
//!                  │  Backend trait   │
//!                  │ (async CRUD +    │
//!                  │  vector search)  │
//!                  └────────┬─────────┘
//!                           │
//!                           ▼
//!                  ┌──────────────────┐
//!                  │     SQLite       │
//!                  │   sqlite-vec     │
//!                  └──────────────────┘
//! ```
//!
//! Ownership rules the backend enforces:
//! * at most one document per URL (replace, never merge);
//! * a document only exists together with at least one chunk;
//! * deleting a document removes every child row, including vectors.

pub mod sqlite;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scrape::ScrapedPage;
use crate::types::{
    HeadingRecord, ImageRecord, LinkRecord, MetaTagRecord, QualityMetrics, SeoMetadata, SiteError,
};

pub use sqlite::SqliteDocumentStore;

/// A chunk paired with its embedding, ready for persistence.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddedChunk {
    pub content: String,
    pub embedding: Vec<f32>,
}

/// Everything needed to (re)create one document and its children.
#[derive(Clone, Debug)]
pub struct NewDocument {
    pub url: String,
    pub title: String,
    pub content: String,
    pub seo: SeoMetadata,
    pub quality: QualityMetrics,
    pub meta_tags: Vec<MetaTagRecord>,
    pub headings: Vec<HeadingRecord>,
    pub links: Vec<LinkRecord>,
    pub images: Vec<ImageRecord>,
    pub chunks: Vec<EmbeddedChunk>,
}

impl NewDocument {
    /// Bundles a scraped page with its embedded chunks for storage.
    pub fn from_scraped(page: &ScrapedPage, chunks: Vec<EmbeddedChunk>) -> Self {
        Self {
            url: page.url.to_string(),
            title: page.title.clone(),
            content: page.content.clone(),
            seo: page.seo.clone(),
            quality: page.quality.clone(),
            meta_tags: page.meta_tags.clone(),
            headings: page.headings.clone(),
            links: page.links.clone(),
            images: page.images.clone(),
            chunks,
        }
    }
}

/// Identity returned after a successful replace.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub document_id: String,
    pub url: String,
    pub title: String,
    pub chunks_created: usize,
}

/// A persisted document row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub url: String,
    pub title: String,
    pub content: String,
    pub seo: SeoMetadata,
    pub quality: QualityMetrics,
    pub created_at: DateTime<Utc>,
}

/// A persisted chunk row (vector not materialized on reads).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// One similarity-search candidate.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimilarChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub content: String,
    pub similarity: f32,
}

/// Unified persistence interface for the pipeline and the retrieval layer.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Replaces any document stored under `doc.url` with `doc`, atomically.
    ///
    /// The previous document and all of its children disappear in the same
    /// transaction that inserts the new rows; concurrent callers storing the
    /// same URL serialize to last-writer-wins. A failed metadata child insert
    /// is logged and skipped; a failed chunk insert aborts the transaction so
    /// the previous state survives intact. An empty `doc.chunks` is rejected
    /// with [`SiteError::NoChunks`] — a document may never exist chunkless.
    async fn replace_document(&self, doc: NewDocument) -> Result<StoredDocument, SiteError>;

    async fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>, SiteError>;

    async fn get_document_by_url(&self, url: &str) -> Result<Option<DocumentRecord>, SiteError>;

    /// Newest-first listing.
    async fn list_documents(&self, limit: usize) -> Result<Vec<DocumentRecord>, SiteError>;

    /// Chunks of one document ordered by `chunk_index`.
    async fn document_chunks(&self, document_id: &str) -> Result<Vec<ChunkRecord>, SiteError>;

    /// Deletes a document and all its children. Returns whether a row existed.
    async fn delete_document(&self, id: &str) -> Result<bool, SiteError>;

    /// Bulk membership check used by the batch orchestrator's dedup step.
    async fn existing_urls(&self, urls: &[String]) -> Result<HashSet<String>, SiteError>;

    /// `(id, url)` pairs of every stored document, for URL-shaped lookups.
    async fn list_urls(&self) -> Result<Vec<(String, String)>, SiteError>;

    /// Nearest chunks by cosine similarity, most similar first.
    async fn search_similar(
        &self,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<SimilarChunk>, SiteError>;

    async fn count_chunks(&self) -> Result<usize, SiteError>;
}
