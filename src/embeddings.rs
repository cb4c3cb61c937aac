//! Embedding provider contract and implementations.
//!
//! The pipeline treats embedding generation as a collaborator that fails
//! independently per call: a failed chunk is skipped and logged while its
//! siblings proceed, so providers should surface errors per text rather than
//! batching failures together.

use async_trait::async_trait;

use crate::types::SiteError;

/// Text → fixed-length vector collaborator.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider label used in logs and telemetry.
    fn name(&self) -> &str;

    /// Dimensionality of every vector this provider returns. The store is
    /// opened with this value and rejects vectors of any other length.
    fn dimensions(&self) -> usize;

    /// Embeds one text. May fail per call; callers decide skip-vs-abort.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, SiteError>;

    /// Embeds a batch of texts. The default implementation embeds items one
    /// at a time and fails on the first error; providers with a native batch
    /// endpoint should override it.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SiteError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Deterministic hash-seeded provider for tests and offline runs.
///
/// Identical text always produces an identical unit-length vector, so exact
/// matches score cosine similarity 1.0 while unrelated texts land far apart.
#[derive(Clone, Debug)]
pub struct MockEmbeddingProvider {
    dimensions: usize,
    fail_marker: Option<String>,
}

impl MockEmbeddingProvider {
    pub fn new() -> Self {
        Self {
            dimensions: 16,
            fail_marker: None,
        }
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
            fail_marker: None,
        }
    }

    /// Makes `embed` fail for any text containing `marker`, to exercise the
    /// pipeline's skip-and-continue paths.
    #[must_use]
    pub fn failing_on(mut self, marker: impl Into<String>) -> Self {
        self.fail_marker = Some(marker.into());
        self
    }
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, SiteError> {
        if let Some(marker) = &self.fail_marker {
            if text.contains(marker.as_str()) {
                return Err(SiteError::Embedding(format!(
                    "mock provider refused text containing {marker:?}"
                )));
            }
        }
        Ok(pseudo_embedding(text, self.dimensions))
    }
}

/// Expands a hash of the text into a unit-length pseudo-embedding.
fn pseudo_embedding(text: &str, dimensions: usize) -> Vec<f32> {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    let seed = hasher.finish();

    let mut vec: Vec<f32> = (0..dimensions)
        .map(|i| {
            let bits = seed.rotate_left((i as u32).wrapping_mul(7) % 64) ^ ((i as u64) << 17);
            ((bits as i64 as f64) / i64::MAX as f64) as f32
        })
        .collect();

    let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in &mut vec {
            *v /= norm;
        }
    }
    vec
}

/// Adapter exposing any rig embedding model as an [`EmbeddingProvider`].
#[cfg(feature = "rig")]
pub struct RigEmbeddingProvider<M> {
    model: M,
    label: String,
}

#[cfg(feature = "rig")]
impl<M> RigEmbeddingProvider<M>
where
    M: rig::embeddings::EmbeddingModel,
{
    pub fn new(model: M, label: impl Into<String>) -> Self {
        Self {
            model,
            label: label.into(),
        }
    }
}

#[cfg(feature = "rig")]
#[async_trait]
impl<M> EmbeddingProvider for RigEmbeddingProvider<M>
where
    M: rig::embeddings::EmbeddingModel + Send + Sync,
{
    fn name(&self) -> &str {
        &self.label
    }

    fn dimensions(&self) -> usize {
        self.model.ndims()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, SiteError> {
        let embedding = self
            .model
            .embed_text(text)
            .await
            .map_err(|err| SiteError::Embedding(err.to_string()))?;
        Ok(embedding.vec.into_iter().map(|v| v as f32).collect())
    }
}
