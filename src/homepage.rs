//! Ordered-fallback lookup of the site's root document.
//!
//! Vector ranking is unreliable for "show me the homepage"-class queries, so
//! the retrieval layer resolves the homepage deterministically instead. The
//! stages run strictly in order and the first hit wins:
//!
//! 1. exact canonical URL match;
//! 2. scheme/host variant literals (http/https, with/without `www`,
//!    with/without trailing slash);
//! 3. regex match of the bare domain root against every stored URL;
//! 4. the shortest stored URL containing the domain.

use regex::Regex;
use tracing::debug;
use url::Url;

use crate::stores::{Backend, DocumentRecord};
use crate::types::SiteError;

/// Resolves the homepage document for one configured site.
#[derive(Clone, Debug)]
pub struct HomepageResolver {
    canonical: Url,
}

impl HomepageResolver {
    pub fn new(canonical: Url) -> Self {
        Self { canonical }
    }

    pub fn canonical(&self) -> &Url {
        &self.canonical
    }

    fn host(&self) -> &str {
        self.canonical
            .host_str()
            .unwrap_or("")
            .trim_start_matches("www.")
    }

    /// Candidate literals for stage 2, canonical URL first.
    fn variant_urls(&self) -> Vec<String> {
        let host = self.host();
        if host.is_empty() {
            return vec![self.canonical.to_string()];
        }
        let mut variants = Vec::new();
        for scheme in ["https", "http"] {
            for www in ["", "www."] {
                for trailing in ["/", ""] {
                    variants.push(format!("{scheme}://{www}{host}{trailing}"));
                }
            }
        }
        variants
    }

    /// Walks the fallback chain; later stages are not attempted once one hits.
    pub async fn resolve(
        &self,
        backend: &dyn Backend,
    ) -> Result<Option<DocumentRecord>, SiteError> {
        // Stage 1: the canonical URL exactly as configured.
        if let Some(doc) = backend
            .get_document_by_url(self.canonical.as_str())
            .await?
        {
            debug!(url = %doc.url, "homepage resolved by canonical match");
            return Ok(Some(doc));
        }

        // Stage 2: the fixed variant list.
        for variant in self.variant_urls() {
            if let Some(doc) = backend.get_document_by_url(&variant).await? {
                debug!(url = %doc.url, "homepage resolved by variant match");
                return Ok(Some(doc));
            }
        }

        let host = self.host();
        if host.is_empty() {
            return Ok(None);
        }
        let urls = backend.list_urls().await?;

        // Stage 3: bare domain root, optional trailing slash.
        let root_pattern = Regex::new(&format!(
            "^https?://(www\\.)?{}/?$",
            regex::escape(host)
        ))
        .map_err(|err| SiteError::InvalidDocument(err.to_string()))?;
        for (id, url) in &urls {
            if root_pattern.is_match(url) {
                debug!(url = %url, "homepage resolved by domain-root pattern");
                return backend.get_document(id).await;
            }
        }

        // Stage 4: shortest URL containing the domain — the shortest path is
        // the most likely root. Ties break lexicographically for determinism.
        let shortest = urls
            .iter()
            .filter(|(_, url)| url.contains(host))
            .min_by_key(|(_, url)| (url.len(), url.clone()));
        if let Some((id, url)) = shortest {
            debug!(url = %url, "homepage resolved by shortest-url heuristic");
            return backend.get_document(id).await;
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(url: &str) -> HomepageResolver {
        HomepageResolver::new(Url::parse(url).unwrap())
    }

    #[test]
    fn variants_cover_scheme_www_and_slash() {
        let variants = resolver("https://example.com/").variant_urls();
        assert!(variants.contains(&"https://example.com/".to_string()));
        assert!(variants.contains(&"https://www.example.com".to_string()));
        assert!(variants.contains(&"http://example.com/".to_string()));
        assert!(variants.contains(&"http://www.example.com".to_string()));
        assert_eq!(variants.len(), 8);
    }

    #[test]
    fn host_strips_www_prefix() {
        assert_eq!(resolver("https://www.example.com/").host(), "example.com");
        assert_eq!(resolver("https://example.com/").host(), "example.com");
    }

    #[test]
    fn root_pattern_matches_only_domain_roots() {
        let r = resolver("https://example.com/");
        let pattern = Regex::new(&format!(
            "^https?://(www\\.)?{}/?$",
            regex::escape(r.host())
        ))
        .unwrap();
        assert!(pattern.is_match("https://example.com"));
        assert!(pattern.is_match("http://www.example.com/"));
        assert!(!pattern.is_match("https://example.com/about"));
        assert!(!pattern.is_match("https://notexample.com/"));
    }
}
