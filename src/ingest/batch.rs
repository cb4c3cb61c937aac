//! Batch orchestration: many URLs through scrape → chunk → embed → store with
//! bounded concurrency, strict batch ordering, and per-URL failure isolation.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;

use crate::discovery::SourceDiscovery;
use crate::ingest::pipeline::DocumentIngestor;
use crate::ingest::{CancelToken, Throttle};
use crate::scrape::Scraper;
use crate::stores::{Backend, StoredDocument};
use crate::types::SiteError;

/// Tuning knobs for a batch run.
#[derive(Clone, Copy, Debug)]
pub struct BatchOptions {
    /// URLs processed concurrently within one batch.
    pub batch_size: usize,
    /// Hard cap on how many input URLs a run will consider.
    pub max_urls: usize,
    /// Skip URLs that already have a stored document.
    pub skip_existing: bool,
    /// Minimum pause between batches — politeness toward the scraped origin,
    /// independent of database or embedding throughput.
    pub batch_delay: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: 5,
            max_urls: 50,
            skip_existing: true,
            batch_delay: Duration::from_secs(1),
        }
    }
}

/// Terminal state of one URL within a run. No retries: a failed URL stays
/// failed for this run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum UrlOutcome {
    Stored {
        document_id: String,
        title: String,
        chunks_created: usize,
    },
    Failed {
        stage: String,
        error: String,
    },
    Skipped,
}

/// One entry of the per-URL result list, in input order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UrlReport {
    pub url: String,
    pub outcome: UrlOutcome,
}

/// Aggregate accounting for a finished run.
///
/// Invariants: `processed == successful + failed` and
/// `skipped + processed == total` (the truncated input count).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IngestReport {
    pub total: usize,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub results: Vec<UrlReport>,
    pub summary: String,
}

impl IngestReport {
    /// Percentage of the truncated input that stored successfully, rounded.
    pub fn success_rate(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        ((self.successful as f64 / self.total as f64) * 100.0).round() as u32
    }
}

/// Drives a URL list through the full pipeline.
pub struct BatchIngestor {
    scraper: Arc<dyn Scraper>,
    ingestor: Arc<DocumentIngestor>,
    backend: Arc<dyn Backend>,
    options: BatchOptions,
}

impl BatchIngestor {
    pub fn new(
        scraper: Arc<dyn Scraper>,
        ingestor: Arc<DocumentIngestor>,
        backend: Arc<dyn Backend>,
    ) -> Self {
        Self {
            scraper,
            ingestor,
            backend,
            options: BatchOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: BatchOptions) -> Self {
        self.options = options;
        self
    }

    /// Discovers the work list and runs it. A discovery failure fails the
    /// whole operation before any batch starts.
    pub async fn run_discovered(
        &self,
        discovery: &dyn SourceDiscovery,
        cancel: &CancelToken,
    ) -> Result<IngestReport, SiteError> {
        let urls = discovery.discover().await.map_err(|err| match err {
            SiteError::Discovery(_) => err,
            other => SiteError::Discovery(other.to_string()),
        })?;
        self.run(urls, cancel).await
    }

    /// Processes `urls` in fixed-size batches.
    ///
    /// Batches run strictly sequentially with an awaited origin delay between
    /// them (never after the last); within one batch every URL runs
    /// concurrently and results are joined back in input order. Any per-URL
    /// failure is recorded and never aborts the batch or later batches.
    pub async fn run(
        &self,
        mut urls: Vec<Url>,
        cancel: &CancelToken,
    ) -> Result<IngestReport, SiteError> {
        urls.truncate(self.options.max_urls);
        let total = urls.len();

        let mut reports: Vec<Option<UrlReport>> = (0..total).map(|_| None).collect();
        let mut work: Vec<(usize, Url)> = Vec::with_capacity(total);
        let mut skipped = 0usize;

        if self.options.skip_existing && !urls.is_empty() {
            let as_strings: Vec<String> = urls.iter().map(|u| u.to_string()).collect();
            let existing = self.backend.existing_urls(&as_strings).await?;
            for (index, url) in urls.into_iter().enumerate() {
                if existing.contains(url.as_str()) {
                    skipped += 1;
                    reports[index] = Some(UrlReport {
                        url: url.to_string(),
                        outcome: UrlOutcome::Skipped,
                    });
                } else {
                    work.push((index, url));
                }
            }
            if skipped > 0 {
                info!(skipped, "skipping already ingested urls");
            }
        } else {
            work = urls.into_iter().enumerate().collect();
        }

        let batch_size = self.options.batch_size.max(1);
        let batch_count = work.len().div_ceil(batch_size);
        let origin_throttle = Throttle::new(self.options.batch_delay);
        let mut successful = 0usize;
        let mut failed = 0usize;

        for (batch_index, batch) in work.chunks(batch_size).enumerate() {
            if cancel.is_cancelled() {
                return Err(SiteError::Cancelled);
            }
            if batch_index > 0 {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(SiteError::Cancelled),
                    _ = origin_throttle.wait() => {}
                }
            }

            info!(
                batch = batch_index + 1,
                batches = batch_count,
                urls = batch.len(),
                "processing batch"
            );

            let outcomes =
                join_all(batch.iter().map(|(_, url)| self.process_url(url, cancel))).await;
            for ((index, url), outcome) in batch.iter().zip(outcomes) {
                match &outcome {
                    UrlOutcome::Stored { .. } => successful += 1,
                    UrlOutcome::Failed { .. } => failed += 1,
                    UrlOutcome::Skipped => {}
                }
                reports[*index] = Some(UrlReport {
                    url: url.to_string(),
                    outcome,
                });
            }
        }

        if cancel.is_cancelled() {
            return Err(SiteError::Cancelled);
        }

        let processed = successful + failed;
        let mut report = IngestReport {
            total,
            processed,
            successful,
            failed,
            skipped,
            results: reports.into_iter().flatten().collect(),
            summary: String::new(),
        };
        report.summary = format!(
            "Processed {processed}/{total} URLs: {successful} successful, {failed} failed, \
             {skipped} skipped ({}% success rate)",
            report.success_rate()
        );
        info!(
            total,
            processed, successful, failed, skipped, "batch ingestion finished"
        );
        Ok(report)
    }

    /// One URL's unit of work; failures are caught here, never propagated.
    async fn process_url(&self, url: &Url, cancel: &CancelToken) -> UrlOutcome {
        let result: Result<StoredDocument, SiteError> = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SiteError::Cancelled),
            result = self.try_url(url) => result,
        };
        match result {
            Ok(stored) => UrlOutcome::Stored {
                document_id: stored.document_id,
                title: stored.title,
                chunks_created: stored.chunks_created,
            },
            Err(err) => {
                warn!(url = %url, stage = err.stage(), error = %err, "url ingestion failed");
                UrlOutcome::Failed {
                    stage: err.stage().to_string(),
                    error: err.to_string(),
                }
            }
        }
    }

    async fn try_url(&self, url: &Url) -> Result<StoredDocument, SiteError> {
        let page = self.scraper.scrape(url).await?;
        self.ingestor.ingest(&page).await
    }
}
