//! URL discovery collaborator.
//!
//! The pipeline consumes a flat, already language-filtered URL list; where
//! that list comes from (sitemap crawl, link graph, manual curation) is the
//! collaborator's business. A discovery failure fails the whole batch run
//! before any ingestion work starts.

use async_trait::async_trait;
use url::Url;

use crate::types::SiteError;

/// Produces the URL work list for a batch ingestion run.
#[async_trait]
pub trait SourceDiscovery: Send + Sync {
    async fn discover(&self) -> Result<Vec<Url>, SiteError>;
}

/// A fixed, pre-filtered URL list. Deduplicates while preserving order.
#[derive(Clone, Debug, Default)]
pub struct StaticUrls {
    urls: Vec<Url>,
}

impl StaticUrls {
    pub fn new(urls: impl IntoIterator<Item = Url>) -> Self {
        let mut seen = std::collections::HashSet::new();
        let urls = urls
            .into_iter()
            .filter(|url| seen.insert(url.as_str().to_string()))
            .collect();
        Self { urls }
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

#[async_trait]
impl SourceDiscovery for StaticUrls {
    async fn discover(&self) -> Result<Vec<Url>, SiteError> {
        Ok(self.urls.clone())
    }
}
