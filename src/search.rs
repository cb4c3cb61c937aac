//! Similarity search over stored chunks, with a precision override for
//! homepage-intent queries.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::embeddings::EmbeddingProvider;
use crate::homepage::HomepageResolver;
use crate::stores::Backend;
use crate::types::SiteError;

/// Queries that are really asking for the site root, not for content. Vector
/// ranking is unreliable for this class, so it is matched explicitly.
static HOMEPAGE_INTENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:home\s*page|main\s+page|landing\s+page)\b")
        .expect("homepage intent pattern")
});

/// Tuning knobs for [`SearchService`].
#[derive(Clone, Copy, Debug)]
pub struct SearchOptions {
    /// Minimum cosine similarity a chunk must exceed to be returned.
    pub threshold: f32,
    /// How many candidates to pull from the store per requested result, so
    /// threshold filtering and homepage dedup still leave `limit` hits.
    pub candidate_multiplier: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            candidate_multiplier: 3,
        }
    }
}

/// One ranked search result.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk_content: String,
    pub similarity: f32,
    pub document_id: String,
    pub chunk_id: String,
}

/// Retrieval front door for the chat/dashboard layer.
pub struct SearchService {
    backend: Arc<dyn Backend>,
    embeddings: Arc<dyn EmbeddingProvider>,
    homepage: Option<HomepageResolver>,
    options: SearchOptions,
}

impl SearchService {
    pub fn new(backend: Arc<dyn Backend>, embeddings: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            backend,
            embeddings,
            homepage: None,
            options: SearchOptions::default(),
        }
    }

    /// Enables the homepage-intent override for the given site.
    #[must_use]
    pub fn with_homepage_resolver(mut self, resolver: HomepageResolver) -> Self {
        self.homepage = Some(resolver);
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: SearchOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns chunks ranked by cosine similarity, best first, every hit
    /// strictly above the configured threshold, at most `limit` entries.
    ///
    /// A homepage-intent query pins the homepage document at rank #1 with
    /// similarity forced to 1.0 and drops its other chunks from the tail.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, SiteError> {
        let limit = limit.max(1);

        let query_embedding = self.embeddings.embed(query).await?;
        let candidates = self
            .backend
            .search_similar(&query_embedding, limit * self.options.candidate_multiplier.max(1))
            .await?;

        let mut hits: Vec<SearchHit> = candidates
            .into_iter()
            .filter(|c| c.similarity > self.options.threshold)
            .map(|c| SearchHit {
                chunk_content: c.content,
                similarity: c.similarity,
                document_id: c.document_id,
                chunk_id: c.chunk_id,
            })
            .collect();
        // The store returns candidates ordered already; re-sort defensively
        // since the contract is ours, not the backend's.
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        if is_homepage_intent(query) {
            if let Some(resolver) = &self.homepage {
                if let Some(homepage) = resolver.resolve(self.backend.as_ref()).await? {
                    let chunks = self.backend.document_chunks(&homepage.id).await?;
                    // The store guarantees every document owns ≥ 1 chunk.
                    if let Some(first) = chunks.first() {
                        info!(query = %query, url = %homepage.url,
                            "homepage-intent query; pinning homepage at rank 1");
                        hits.retain(|hit| hit.document_id != homepage.id);
                        hits.insert(
                            0,
                            SearchHit {
                                chunk_content: first.content.clone(),
                                similarity: 1.0,
                                document_id: homepage.id.clone(),
                                chunk_id: first.id.clone(),
                            },
                        );
                    }
                } else {
                    debug!(query = %query, "homepage intent detected but no homepage stored");
                }
            }
        }

        hits.truncate(limit);
        Ok(hits)
    }
}

/// Whether the query matches the fixed homepage-intent pattern.
pub fn is_homepage_intent(query: &str) -> bool {
    HOMEPAGE_INTENT.is_match(query)
}
