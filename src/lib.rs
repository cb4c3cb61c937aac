//! ```text
//! Source Discovery ──► ingest::BatchIngestor ──► Scraper (HTML → ScrapedPage)
//!                                   │
//!                                   ▼
//!                     chunking::TextChunker ──► overlapping chunk strings
//!                                   │
//!                                   ├─► embeddings::EmbeddingProvider (per chunk, best effort)
//!                                   ▼
//!                     ingest::DocumentIngestor ──► stores::sqlite::SqliteDocumentStore
//!                                                  (replace-not-merge, one transaction)
//!
//! Stored chunks + vectors ──► search::SearchService ──► ranked hits
//!                          └─► homepage::HomepageResolver (intent override)
//! ```
//!
//! The pipeline is assembled by injection: every component receives its
//! collaborators as `Arc` handles, so tests can swap in fakes for the scraper,
//! the embedding provider, or the whole storage backend.

pub mod chunking;
pub mod discovery;
pub mod embeddings;
pub mod homepage;
pub mod ingest;
pub mod scrape;
pub mod search;
pub mod stores;
pub mod types;

pub use chunking::{ChunkerConfig, TextChunker};
pub use discovery::{SourceDiscovery, StaticUrls};
pub use embeddings::{EmbeddingProvider, MockEmbeddingProvider};
pub use homepage::HomepageResolver;
pub use ingest::{
    BatchIngestor, BatchOptions, CancelToken, DocumentIngestor, IngestReport, Throttle, UrlOutcome,
};
pub use scrape::{HttpScraper, ScrapedPage, Scraper};
pub use search::{SearchHit, SearchOptions, SearchService};
pub use stores::{Backend, StoredDocument};
pub use types::SiteError;
