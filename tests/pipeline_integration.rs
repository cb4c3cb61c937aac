//! End-to-end pipeline tests against an in-memory SQLite store with mock
//! embeddings: ingestion invariants, replace semantics, similarity search,
//! and the homepage override.

use std::sync::Arc;

use url::Url;

use sitesmith::chunking::{ChunkerConfig, TextChunker};
use sitesmith::embeddings::MockEmbeddingProvider;
use sitesmith::homepage::HomepageResolver;
use sitesmith::ingest::DocumentIngestor;
use sitesmith::scrape::ScrapedPage;
use sitesmith::search::{SearchOptions, SearchService};
use sitesmith::stores::{Backend, SqliteDocumentStore};
use sitesmith::types::{QualityMetrics, SeoMetadata, SiteError};

const DIMENSIONS: usize = 16;

fn sample_page(url: &str, title: &str, content: &str) -> ScrapedPage {
    ScrapedPage {
        url: Url::parse(url).expect("test url"),
        title: title.to_string(),
        content: content.to_string(),
        seo: SeoMetadata {
            description: Some(format!("{title} description")),
            ..Default::default()
        },
        quality: QualityMetrics {
            word_count: content.split_whitespace().count() as u32,
            sentence_count: 1,
            paragraph_count: 1,
            avg_sentence_length: 10.0,
        },
        meta_tags: vec![],
        headings: vec![],
        links: vec![],
        images: vec![],
    }
}

async fn in_memory_store() -> Arc<SqliteDocumentStore> {
    Arc::new(
        SqliteDocumentStore::open_in_memory(DIMENSIONS)
            .await
            .expect("open in-memory store"),
    )
}

fn ingestor(store: Arc<SqliteDocumentStore>) -> DocumentIngestor {
    DocumentIngestor::new(store, Arc::new(MockEmbeddingProvider::with_dimensions(DIMENSIONS)))
}

#[tokio::test]
async fn ingest_and_read_back_roundtrip() {
    let store = in_memory_store().await;
    let page = sample_page(
        "https://example.com/guide",
        "Guide",
        "This guide explains the product in detail. It covers setup and usage thoroughly.",
    );

    let stored = ingestor(store.clone()).ingest(&page).await.unwrap();
    assert_eq!(stored.url, "https://example.com/guide");
    assert!(stored.chunks_created >= 1);

    let doc = store
        .get_document(&stored.document_id)
        .await
        .unwrap()
        .expect("document exists");
    assert_eq!(doc.title, "Guide");
    assert_eq!(doc.seo.description.as_deref(), Some("Guide description"));

    let chunks = store.document_chunks(&stored.document_id).await.unwrap();
    assert_eq!(chunks.len(), stored.chunks_created);
    assert!(chunks[0].content.contains("This guide explains"));

    let listed = store.list_documents(10).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, stored.document_id);
}

#[tokio::test]
async fn reingesting_a_url_replaces_never_merges() {
    let store = in_memory_store().await;
    let ing = ingestor(store.clone());
    let url = "https://example.com/";

    let first = ing
        .ingest(&sample_page(
            url,
            "Old Title",
            "Original body text describing the very first version of this page.",
        ))
        .await
        .unwrap();
    let second = ing
        .ingest(&sample_page(
            url,
            "New Title",
            "Completely rewritten body text for the second ingestion of the page.",
        ))
        .await
        .unwrap();
    assert_ne!(first.document_id, second.document_id);

    // Exactly one live document for the URL, reflecting only the second call.
    let doc = store
        .get_document_by_url(url)
        .await
        .unwrap()
        .expect("document exists");
    assert_eq!(doc.title, "New Title");
    let url_rows = store.list_urls().await.unwrap();
    assert_eq!(url_rows.len(), 1);

    // The old document and all of its chunks are gone.
    assert!(store.get_document(&first.document_id).await.unwrap().is_none());
    let chunks = store.document_chunks(&second.document_id).await.unwrap();
    assert!(!chunks.is_empty());
    for chunk in &chunks {
        assert!(!chunk.content.contains("Original body"));
    }
    assert!(
        store
            .document_chunks(&first.document_id)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn all_embeddings_failing_leaves_no_document() {
    let store = in_memory_store().await;
    let provider = MockEmbeddingProvider::with_dimensions(DIMENSIONS).failing_on("unembeddable");
    let ing = DocumentIngestor::new(store.clone(), Arc::new(provider));

    let err = ing
        .ingest(&sample_page(
            "https://example.com/poison",
            "Poison",
            "This unembeddable text cannot be vectorized. Still unembeddable in every sentence.",
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, SiteError::NoChunks { .. }));

    assert!(
        store
            .get_document_by_url("https://example.com/poison")
            .await
            .unwrap()
            .is_none()
    );
    assert_eq!(store.count_chunks().await.unwrap(), 0);
}

#[tokio::test]
async fn one_failing_chunk_does_not_block_its_siblings() {
    let store = in_memory_store().await;
    let provider = MockEmbeddingProvider::with_dimensions(DIMENSIONS).failing_on("unembeddable");
    let chunker = TextChunker::new(ChunkerConfig {
        max_length: 60,
        overlap: 0,
        min_chunk_length: 10,
    });
    let ing = DocumentIngestor::new(store.clone(), Arc::new(provider)).with_chunker(chunker);

    let stored = ing
        .ingest(&sample_page(
            "https://example.com/partial",
            "Partial",
            "The first sentence is perfectly fine to embed. \
             This second one is unembeddable by construction. \
             The third sentence embeds without any trouble at all.",
        ))
        .await
        .unwrap();

    let chunks = store.document_chunks(&stored.document_id).await.unwrap();
    assert_eq!(chunks.len(), stored.chunks_created);
    assert!(stored.chunks_created >= 1);
    for chunk in &chunks {
        assert!(!chunk.content.contains("unembeddable"));
    }
}

#[tokio::test]
async fn search_ranks_by_similarity_above_threshold() {
    let store = in_memory_store().await;
    let ing = ingestor(store.clone());
    let provider = Arc::new(MockEmbeddingProvider::with_dimensions(DIMENSIONS));

    let target_content =
        "Pricing for the enterprise plan starts at one hundred dollars per seat monthly.";
    ing.ingest(&sample_page(
        "https://example.com/pricing",
        "Pricing",
        target_content,
    ))
    .await
    .unwrap();
    ing.ingest(&sample_page(
        "https://example.com/about",
        "About",
        "Our company was founded a decade ago by three engineers in a garage somewhere.",
    ))
    .await
    .unwrap();
    ing.ingest(&sample_page(
        "https://example.com/blog",
        "Blog",
        "Assorted articles about engineering culture and distributed systems practice.",
    ))
    .await
    .unwrap();

    let search = SearchService::new(store.clone(), provider);
    let hits = search.search(target_content, 5).await.unwrap();

    assert!(!hits.is_empty());
    // An exact text match embeds identically, so it must rank first with
    // similarity ~1.0.
    assert_eq!(hits[0].chunk_content, target_content);
    assert!(hits[0].similarity > 0.99);
    for window in hits.windows(2) {
        assert!(window[0].similarity >= window[1].similarity);
    }
    for hit in &hits {
        assert!(hit.similarity > SearchOptions::default().threshold);
    }
}

#[tokio::test]
async fn homepage_intent_query_pins_homepage_first() {
    let store = in_memory_store().await;
    let ing = ingestor(store.clone());
    let provider = Arc::new(MockEmbeddingProvider::with_dimensions(DIMENSIONS));

    let homepage = ing
        .ingest(&sample_page(
            "https://example.com/",
            "Example Inc",
            "Welcome to Example Inc, the leading provider of examples worldwide since forever.",
        ))
        .await
        .unwrap();
    ing.ingest(&sample_page(
        "https://example.com/docs",
        "Docs",
        "Documentation hub covering every feature the product currently ships with.",
    ))
    .await
    .unwrap();

    let search = SearchService::new(store.clone(), provider).with_homepage_resolver(
        HomepageResolver::new(Url::parse("https://example.com/").unwrap()),
    );

    let hits = search.search("take me to the home page", 5).await.unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].document_id, homepage.document_id);
    assert_eq!(hits[0].similarity, 1.0);
    // The homepage document appears exactly once.
    let homepage_hits = hits
        .iter()
        .filter(|h| h.document_id == homepage.document_id)
        .count();
    assert_eq!(homepage_hits, 1);

    // A content query is not overridden.
    let hits = search
        .search(
            "Documentation hub covering every feature the product currently ships with.",
            5,
        )
        .await
        .unwrap();
    assert_ne!(hits[0].document_id, homepage.document_id);
}

#[tokio::test]
async fn homepage_resolver_walks_fallback_chain() {
    let store = in_memory_store().await;
    let ing = ingestor(store.clone());
    let resolver = HomepageResolver::new(Url::parse("https://example.com/").unwrap());

    // Nothing stored: every stage misses.
    assert!(resolver.resolve(store.as_ref()).await.unwrap().is_none());

    // Only deep pages stored: the shortest-url heuristic picks the shallower.
    ing.ingest(&sample_page(
        "https://example.com/about/team",
        "Team",
        "The team page lists everyone who works here and what they focus on daily.",
    ))
    .await
    .unwrap();
    ing.ingest(&sample_page(
        "https://example.com/about",
        "About",
        "General information about the company, its mission and its odd history.",
    ))
    .await
    .unwrap();
    let resolved = resolver.resolve(store.as_ref()).await.unwrap().unwrap();
    assert_eq!(resolved.url, "https://example.com/about");

    // A www-variant root beats the heuristic once stored.
    let variant = ing
        .ingest(&sample_page(
            "https://www.example.com/",
            "Example Home",
            "The actual homepage of the site, served from the www host variant.",
        ))
        .await
        .unwrap();
    let resolved = resolver.resolve(store.as_ref()).await.unwrap().unwrap();
    assert_eq!(resolved.id, variant.document_id);

    // The exact canonical match wins over everything else.
    let canonical = ing
        .ingest(&sample_page(
            "https://example.com/",
            "Example Home Canonical",
            "The canonical homepage of the site, stored under the bare domain root.",
        ))
        .await
        .unwrap();
    let resolved = resolver.resolve(store.as_ref()).await.unwrap().unwrap();
    assert_eq!(resolved.id, canonical.document_id);
}

#[tokio::test]
async fn deleting_a_document_cascades_to_children() {
    let store = in_memory_store().await;
    let stored = ingestor(store.clone())
        .ingest(&sample_page(
            "https://example.com/ephemeral",
            "Ephemeral",
            "Temporary content that exists only long enough to be deleted again.",
        ))
        .await
        .unwrap();

    assert!(store.count_chunks().await.unwrap() >= 1);
    assert!(store.delete_document(&stored.document_id).await.unwrap());
    assert_eq!(store.count_chunks().await.unwrap(), 0);
    assert!(store.get_document(&stored.document_id).await.unwrap().is_none());
    // Deleting again reports nothing deleted.
    assert!(!store.delete_document(&stored.document_id).await.unwrap());
}

#[tokio::test]
async fn store_rejects_mismatched_embedding_dimensions() {
    let store = in_memory_store().await;
    let provider = Arc::new(MockEmbeddingProvider::with_dimensions(DIMENSIONS / 2));
    let ing = DocumentIngestor::new(store.clone(), provider);

    let err = ing
        .ingest(&sample_page(
            "https://example.com/short-vectors",
            "Short",
            "Content whose embedding vectors come out with the wrong dimensionality.",
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, SiteError::Storage(_)));
    assert!(
        store
            .get_document_by_url("https://example.com/short-vectors")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn opening_a_legacy_database_adds_missing_columns() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("legacy.sqlite");

    // A database created before the SEO/quality columns existed.
    {
        let conn = tokio_rusqlite::Connection::open(&path).await.unwrap();
        conn.call(|conn| {
            conn.execute_batch(
                "CREATE TABLE documents (
                     id TEXT PRIMARY KEY,
                     url TEXT NOT NULL UNIQUE,
                     title TEXT NOT NULL,
                     content TEXT NOT NULL,
                     created_at TEXT NOT NULL
                 );",
            )
        })
        .await
        .unwrap();
    }

    let store = Arc::new(SqliteDocumentStore::open(&path, DIMENSIONS).await.unwrap());
    let stored = ingestor(store.clone())
        .ingest(&sample_page(
            "https://example.com/migrated",
            "Migrated",
            "Content stored through a schema that had to be upgraded on open first.",
        ))
        .await
        .unwrap();

    let doc = store
        .get_document(&stored.document_id)
        .await
        .unwrap()
        .expect("document exists");
    assert_eq!(doc.title, "Migrated");
    assert_eq!(
        doc.seo.description.as_deref(),
        Some("Migrated description")
    );
}
