//! Per-document ingestion: chunk → embed (best effort) → transactional
//! replace.

use std::sync::Arc;

use tracing::{info, warn};

use crate::chunking::TextChunker;
use crate::embeddings::EmbeddingProvider;
use crate::ingest::Throttle;
use crate::scrape::ScrapedPage;
use crate::stores::{Backend, EmbeddedChunk, NewDocument, StoredDocument};
use crate::types::SiteError;

/// Drives one scraped page through chunking, embedding, and storage.
pub struct DocumentIngestor {
    backend: Arc<dyn Backend>,
    embeddings: Arc<dyn EmbeddingProvider>,
    chunker: TextChunker,
    embed_throttle: Option<Arc<Throttle>>,
}

impl DocumentIngestor {
    pub fn new(backend: Arc<dyn Backend>, embeddings: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            backend,
            embeddings,
            chunker: TextChunker::default(),
            embed_throttle: None,
        }
    }

    #[must_use]
    pub fn with_chunker(mut self, chunker: TextChunker) -> Self {
        self.chunker = chunker;
        self
    }

    /// Paces embedding-provider calls independently of scrape politeness.
    #[must_use]
    pub fn with_embed_throttle(mut self, throttle: Arc<Throttle>) -> Self {
        self.embed_throttle = Some(throttle);
        self
    }

    /// Chunks the page content and ingests it.
    pub async fn ingest(&self, page: &ScrapedPage) -> Result<StoredDocument, SiteError> {
        let chunks = self.chunker.chunk(&page.content);
        self.ingest_chunks(page, &chunks).await
    }

    /// Ingests a page with externally supplied chunk texts.
    ///
    /// Embedding is best-effort per chunk: a failed call skips that chunk and
    /// its siblings proceed. If every chunk fails, nothing is written and the
    /// call fails with [`SiteError::NoChunks`] — a document row never exists
    /// without at least one chunk.
    pub async fn ingest_chunks(
        &self,
        page: &ScrapedPage,
        chunks: &[String],
    ) -> Result<StoredDocument, SiteError> {
        if chunks.is_empty() {
            return Err(SiteError::InvalidDocument(format!(
                "no chunkable text content at {}",
                page.url
            )));
        }

        let mut embedded = Vec::with_capacity(chunks.len());
        let mut skipped = 0usize;
        for (index, content) in chunks.iter().enumerate() {
            if let Some(throttle) = &self.embed_throttle {
                throttle.wait().await;
            }
            match self.embeddings.embed(content).await {
                Ok(embedding) => embedded.push(EmbeddedChunk {
                    content: content.clone(),
                    embedding,
                }),
                Err(err) => {
                    skipped += 1;
                    warn!(url = %page.url, chunk = index, error = %err,
                        "embedding failed; skipping chunk");
                }
            }
        }

        if embedded.is_empty() {
            return Err(SiteError::NoChunks {
                url: page.url.to_string(),
            });
        }

        let stored = self
            .backend
            .replace_document(NewDocument::from_scraped(page, embedded))
            .await?;

        info!(
            url = %stored.url,
            chunks = stored.chunks_created,
            skipped,
            provider = self.embeddings.name(),
            "document ingested"
        );
        Ok(stored)
    }
}
