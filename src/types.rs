//! Crate-wide error type and the record types shared between the scraper and
//! the storage layer.

use serde::{Deserialize, Serialize};

/// Unified error type for the ingestion and retrieval pipeline.
#[derive(Debug, thiserror::Error)]
pub enum SiteError {
    /// An HTTP request failed (network error or non-success status).
    #[error("http request failed: {0}")]
    Http(String),

    /// The scraper could not produce a usable page record.
    #[error("scrape failed: {0}")]
    Scrape(String),

    /// The chunker was given input it cannot split.
    #[error("chunking failed: {0}")]
    Chunking(String),

    /// An embedding call failed.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// A storage operation failed.
    #[error("storage failure: {0}")]
    Storage(String),

    /// A document was malformed or empty before it reached storage.
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// Source discovery failed before any ingestion work started.
    #[error("source discovery failed: {0}")]
    Discovery(String),

    /// Every embedding call for a document failed, so nothing was persisted.
    #[error("no chunks could be embedded for {url}")]
    NoChunks { url: String },

    /// The operation was cancelled via its [`CancelToken`](crate::ingest::CancelToken).
    #[error("operation cancelled")]
    Cancelled,

    /// Filesystem error.
    #[error("io error: {0}")]
    Io(String),
}

impl From<reqwest::Error> for SiteError {
    fn from(err: reqwest::Error) -> Self {
        SiteError::Http(err.to_string())
    }
}

impl From<std::io::Error> for SiteError {
    fn from(err: std::io::Error) -> Self {
        SiteError::Io(err.to_string())
    }
}

impl From<tokio_rusqlite::Error> for SiteError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        SiteError::Storage(err.to_string())
    }
}

impl SiteError {
    /// Pipeline stage this error belongs to, used for per-URL failure reports.
    pub fn stage(&self) -> &'static str {
        match self {
            SiteError::Http(_) | SiteError::Scrape(_) => "scrape",
            SiteError::Chunking(_) | SiteError::InvalidDocument(_) => "chunk",
            SiteError::Embedding(_) | SiteError::NoChunks { .. } => "embed",
            SiteError::Storage(_) => "store",
            SiteError::Discovery(_) => "discovery",
            SiteError::Cancelled => "cancelled",
            SiteError::Io(_) => "io",
        }
    }
}

/// A `<meta>` tag captured from a page head.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetaTagRecord {
    pub name: String,
    pub content: String,
}

/// A heading (`h1`–`h6`) captured in document order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeadingRecord {
    pub level: u8,
    pub text: String,
}

/// An anchor captured from the page body, href resolved against the page URL.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinkRecord {
    pub href: String,
    pub text: String,
}

/// An image reference captured from the page body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub src: String,
    pub alt: String,
}

/// SEO-relevant metadata extracted from the page head.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SeoMetadata {
    pub description: Option<String>,
    pub canonical_url: Option<String>,
    pub og_title: Option<String>,
    pub og_description: Option<String>,
}

/// Simple content-quality metrics computed over the normalized body text.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub word_count: u32,
    pub sentence_count: u32,
    pub paragraph_count: u32,
    pub avg_sentence_length: f32,
}
