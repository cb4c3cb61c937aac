//! Page scraping collaborator: HTML in, a structured, whitespace-normalized
//! record out.
//!
//! The rest of the pipeline only sees [`ScrapedPage`]; it never parses HTML
//! itself. [`HttpScraper`] is the production implementation; tests substitute
//! their own [`Scraper`].

use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use unicode_segmentation::UnicodeSegmentation;
use url::Url;

use crate::types::{
    HeadingRecord, ImageRecord, LinkRecord, MetaTagRecord, QualityMetrics, SeoMetadata, SiteError,
};

/// Structured result of scraping one URL.
#[derive(Clone, Debug)]
pub struct ScrapedPage {
    pub url: Url,
    pub title: String,
    /// Whitespace-normalized body text, ready for chunking.
    pub content: String,
    pub seo: SeoMetadata,
    pub quality: QualityMetrics,
    pub meta_tags: Vec<MetaTagRecord>,
    pub headings: Vec<HeadingRecord>,
    pub links: Vec<LinkRecord>,
    pub images: Vec<ImageRecord>,
}

/// URL → [`ScrapedPage`] collaborator.
#[async_trait]
pub trait Scraper: Send + Sync {
    async fn scrape(&self, url: &Url) -> Result<ScrapedPage, SiteError>;
}

/// Fetches pages over HTTP and extracts a [`ScrapedPage`] with css selectors.
#[derive(Clone)]
pub struct HttpScraper {
    client: Client,
}

impl HttpScraper {
    pub fn new() -> Result<Self, SiteError> {
        let client = Client::builder()
            .user_agent(concat!("sitesmith/", env!("CARGO_PKG_VERSION")))
            .use_rustls_tls()
            .build()?;
        Ok(Self { client })
    }

    /// Uses a caller-configured client (proxies, timeouts, custom TLS).
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Scraper for HttpScraper {
    async fn scrape(&self, url: &Url) -> Result<ScrapedPage, SiteError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await?
            .error_for_status()?;
        let body = response.text().await?;
        // Html is not Send; parsing happens fully before the next await point.
        let page = parse_page(url, &body)?;
        tracing::debug!(
            url = %url,
            words = page.quality.word_count,
            headings = page.headings.len(),
            "scraped page"
        );
        Ok(page)
    }
}

/// Extracts the structured record from raw HTML.
pub fn parse_page(url: &Url, body: &str) -> Result<ScrapedPage, SiteError> {
    let document = Html::parse_document(body);

    let title_sel = Selector::parse("title").expect("title selector");
    let h1_sel = Selector::parse("h1").expect("h1 selector");
    let meta_sel = Selector::parse("meta").expect("meta selector");
    let canonical_sel = Selector::parse(r#"link[rel="canonical"]"#).expect("canonical selector");
    let heading_sel = Selector::parse("h1, h2, h3, h4, h5, h6").expect("heading selector");
    let anchor_sel = Selector::parse("a[href]").expect("anchor selector");
    let img_sel = Selector::parse("img[src]").expect("img selector");
    let root_sel = RootSelectors::new();

    let title = document
        .select(&title_sel)
        .next()
        .map(|el| collapse_whitespace(&element_text(&el)))
        .filter(|t| !t.is_empty())
        .or_else(|| {
            document
                .select(&h1_sel)
                .next()
                .map(|el| collapse_whitespace(&element_text(&el)))
        })
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| url.host_str().unwrap_or("untitled").to_string());

    let mut meta_tags = Vec::new();
    let mut seo = SeoMetadata::default();
    for element in document.select(&meta_sel) {
        let name = element
            .value()
            .attr("name")
            .or_else(|| element.value().attr("property"));
        let content = element.value().attr("content");
        let (Some(name), Some(content)) = (name, content) else {
            continue;
        };
        let content = collapse_whitespace(content);
        if content.is_empty() {
            continue;
        }
        match name {
            "description" => seo.description = Some(content.clone()),
            "og:title" => seo.og_title = Some(content.clone()),
            "og:description" => seo.og_description = Some(content.clone()),
            _ => {}
        }
        meta_tags.push(MetaTagRecord {
            name: name.to_string(),
            content,
        });
    }
    seo.canonical_url = document
        .select(&canonical_sel)
        .next()
        .and_then(|el| el.value().attr("href"))
        .map(|href| href.trim().to_string())
        .filter(|href| !href.is_empty());

    let mut headings = Vec::new();
    for element in document.select(&heading_sel) {
        let text = collapse_whitespace(&element_text(&element));
        if text.is_empty() {
            continue;
        }
        let level = match element.value().name() {
            "h1" => 1,
            "h2" => 2,
            "h3" => 3,
            "h4" => 4,
            "h5" => 5,
            _ => 6,
        };
        headings.push(HeadingRecord { level, text });
    }

    let mut links = Vec::new();
    for element in document.select(&anchor_sel) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        if href.starts_with('#') {
            continue;
        }
        let Ok(resolved) = url.join(href) else {
            continue;
        };
        links.push(LinkRecord {
            href: resolved.to_string(),
            text: collapse_whitespace(&element_text(&element)),
        });
    }

    let mut images = Vec::new();
    for element in document.select(&img_sel) {
        let Some(src) = element.value().attr("src") else {
            continue;
        };
        let Ok(resolved) = url.join(src) else {
            continue;
        };
        images.push(ImageRecord {
            src: resolved.to_string(),
            alt: collapse_whitespace(element.value().attr("alt").unwrap_or_default()),
        });
    }

    let root = root_sel.pick_root(&document);
    let (content, paragraph_count) = collect_body_text(root);
    if content.is_empty() {
        return Err(SiteError::Scrape(format!("no text content at {url}")));
    }
    let quality = quality_metrics(&content, paragraph_count);

    Ok(ScrapedPage {
        url: url.clone(),
        title,
        content,
        seo,
        quality,
        meta_tags,
        headings,
        links,
        images,
    })
}

struct RootSelectors {
    article: Selector,
    main: Selector,
    body: Selector,
}

impl RootSelectors {
    fn new() -> Self {
        Self {
            article: Selector::parse("article").expect("article selector"),
            main: Selector::parse("main").expect("main selector"),
            body: Selector::parse("body").expect("body selector"),
        }
    }

    fn pick_root<'a>(&self, document: &'a Html) -> scraper::ElementRef<'a> {
        document
            .select(&self.article)
            .next()
            .or_else(|| document.select(&self.main).next())
            .or_else(|| document.select(&self.body).next())
            .unwrap_or_else(|| document.root_element())
    }
}

/// Walks the content root collecting text blocks, skipping non-content tags.
/// Returns the normalized body text and the number of paragraph-like blocks.
fn collect_body_text(root: scraper::ElementRef<'_>) -> (String, u32) {
    let mut body = String::new();
    let mut paragraphs = 0u32;
    for element in root.descendent_elements() {
        let tag = element.value().name();
        if matches!(
            tag,
            "script" | "style" | "template" | "noscript" | "svg" | "nav"
        ) {
            continue;
        }
        let is_paragraph = matches!(tag, "p" | "li" | "blockquote");
        let is_block = is_paragraph || matches!(tag, "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "pre");
        if !is_block {
            continue;
        }
        // Only count leaf-ish blocks; a li wrapping a p would otherwise
        // double both the text and the paragraph count.
        if has_block_descendant(element) {
            continue;
        }
        let text = collapse_whitespace(&element_text(&element));
        if text.is_empty() {
            continue;
        }
        if is_paragraph {
            paragraphs += 1;
        }
        if !body.is_empty() {
            body.push(' ');
        }
        body.push_str(&text);
    }
    (body, paragraphs)
}

fn has_block_descendant(element: scraper::ElementRef<'_>) -> bool {
    element.descendent_elements().any(|child| {
        child.id() != element.id()
            && matches!(child.value().name(), "p" | "li" | "blockquote" | "pre")
    })
}

fn element_text(element: &scraper::ElementRef<'_>) -> String {
    let mut raw = String::new();
    for piece in element.text() {
        raw.push_str(piece);
    }
    raw
}

fn collapse_whitespace(input: &str) -> String {
    let mut buf = String::with_capacity(input.len());
    let mut last_space = false;
    for ch in input.chars() {
        if ch.is_whitespace() {
            if !last_space && !buf.is_empty() {
                buf.push(' ');
            }
            last_space = true;
        } else {
            buf.push(ch);
            last_space = false;
        }
    }
    buf.trim_end().to_string()
}

fn quality_metrics(content: &str, paragraph_count: u32) -> QualityMetrics {
    let word_count = content.split_whitespace().count() as u32;
    let sentence_count = content
        .split_sentence_bounds()
        .filter(|s| s.chars().any(|c| c.is_alphanumeric()))
        .count() as u32;
    let avg_sentence_length = if sentence_count > 0 {
        word_count as f32 / sentence_count as f32
    } else {
        0.0
    };
    QualityMetrics {
        word_count,
        sentence_count,
        paragraph_count,
        avg_sentence_length,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    const SAMPLE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>  Sample   Page </title>
    <meta name="description" content="A page about things.">
    <meta property="og:title" content="Sample, socially">
    <link rel="canonical" href="https://example.com/sample">
</head>
<body>
    <nav><a href="/ignored">menu</a></nav>
    <article>
        <h1>Sample Page</h1>
        <p>First paragraph talks about things. It has two sentences.</p>
        <h2>Details</h2>
        <p>Second paragraph adds <b>detail</b>.</p>
        <ul><li>A point</li><li>Another point</li></ul>
        <script>var ignored = true;</script>
        <img src="/pic.png" alt="a picture">
        <a href="/more">read more</a>
    </article>
</body>
</html>"#;

    #[test]
    fn parses_structured_fields() {
        let url = Url::parse("https://example.com/sample").unwrap();
        let page = parse_page(&url, SAMPLE).unwrap();

        assert_eq!(page.title, "Sample Page");
        assert_eq!(page.seo.description.as_deref(), Some("A page about things."));
        assert_eq!(page.seo.og_title.as_deref(), Some("Sample, socially"));
        assert_eq!(
            page.seo.canonical_url.as_deref(),
            Some("https://example.com/sample")
        );
        assert!(page.content.contains("First paragraph talks about things."));
        assert!(!page.content.contains("var ignored"));
        assert_eq!(page.headings.len(), 2);
        assert_eq!(page.headings[0].level, 1);
        assert!(page.images.iter().any(|i| i.src.ends_with("/pic.png")));
        assert!(
            page.links
                .iter()
                .any(|l| l.href == "https://example.com/more")
        );
        assert!(page.quality.word_count > 10);
        assert_eq!(page.quality.paragraph_count, 4);
    }

    #[test]
    fn falls_back_to_h1_title_and_rejects_empty_pages() {
        let url = Url::parse("https://example.com/bare").unwrap();
        let html = "<html><body><h1>Only Heading</h1><p>Some body.</p></body></html>";
        let page = parse_page(&url, html).unwrap();
        assert_eq!(page.title, "Only Heading");

        let empty = "<html><body><script>nothing()</script></body></html>";
        assert!(matches!(
            parse_page(&url, empty),
            Err(SiteError::Scrape(_))
        ));
    }

    #[tokio::test]
    async fn http_scraper_fetches_and_parses() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/page");
                then.status(200)
                    .header("content-type", "text/html")
                    .body(SAMPLE);
            })
            .await;

        let scraper = HttpScraper::new().unwrap();
        let url = Url::parse(&server.url("/page")).unwrap();
        let page = scraper.scrape(&url).await.unwrap();

        mock.assert_async().await;
        assert_eq!(page.title, "Sample Page");
        assert!(page.quality.word_count > 0);
    }

    #[tokio::test]
    async fn http_scraper_surfaces_status_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/missing");
                then.status(404);
            })
            .await;

        let scraper = HttpScraper::new().unwrap();
        let url = Url::parse(&server.url("/missing")).unwrap();
        let err = scraper.scrape(&url).await.unwrap_err();
        assert_eq!(err.stage(), "scrape");
    }
}
