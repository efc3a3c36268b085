//! Rate-limited page fetcher.
//!
//! Fetches candidate URLs one at a time, waiting a fixed delay between
//! requests, and reduces each page to its visible text. Every per-URL failure
//! (malformed URL, network error, non-2xx status, page with no text) is logged
//! and skipped; the batch always completes.

use crate::models::ScrapedDocument;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use scraper::{ElementRef, Html, Node};
use std::error::Error;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

/// Elements whose content never counts as article text.
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "nav", "footer"];

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Whether `url` parses with both a scheme and a host.
pub fn validate_url(url: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => !parsed.scheme().is_empty() && parsed.host_str().is_some_and(|h| !h.is_empty()),
        Err(_) => false,
    }
}

/// Extract visible text from an HTML page.
///
/// Drops `script`, `style`, `nav` and `footer` subtrees, trims every text node,
/// collapses inner whitespace, and joins the non-empty pieces with newlines.
pub fn extract_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut pieces = Vec::new();
    collect_text(document.root_element(), &mut pieces);
    pieces.join("\n")
}

fn collect_text(element: ElementRef<'_>, pieces: &mut Vec<String>) {
    for child in element.children() {
        if let Some(child_element) = ElementRef::wrap(child) {
            if SKIPPED_ELEMENTS.contains(&child_element.value().name()) {
                continue;
            }
            collect_text(child_element, pieces);
        } else if let Node::Text(text) = child.value() {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                pieces.push(WHITESPACE.replace_all(trimmed, " ").into_owned());
            }
        }
    }
}

/// Sequential HTTP fetcher with a fixed inter-request delay.
#[derive(Debug, Clone)]
pub struct RateLimitedFetcher {
    client: Client,
}

impl RateLimitedFetcher {
    /// Build a fetcher sending `user_agent` on every request, each bounded by `timeout`.
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, Box<dyn Error>> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    /// Fetch `urls` in order, sleeping `delay` before every request but the first.
    ///
    /// # Arguments
    ///
    /// * `urls` - Candidates; invalid ones are skipped without a request or a delay
    /// * `delay` - Pause between consecutive requests
    ///
    /// # Returns
    ///
    /// The documents that yielded text, in input order. Failed requests,
    /// non-success statuses and empty pages are logged and left out.
    #[instrument(level = "info", skip_all, fields(count = urls.len(), ?delay))]
    pub async fn fetch(&self, urls: &[String], delay: Duration) -> Vec<ScrapedDocument> {
        let t0 = Instant::now();
        let mut documents = Vec::new();
        let mut attempted = 0usize;

        for url in urls {
            if !validate_url(url) {
                warn!(%url, "Invalid URL skipped");
                continue;
            }

            if attempted > 0 && !delay.is_zero() {
                sleep(delay).await;
            }
            attempted += 1;

            match self.fetch_page(url).await {
                Ok(Some(doc)) => {
                    debug!(%url, bytes = doc.text.len(), "Scraped page");
                    documents.push(doc);
                }
                Ok(None) => {
                    warn!(%url, "Page produced no text; skipping");
                }
                Err(e) => {
                    error!(%url, error = %e, "Error scraping page");
                }
            }
        }

        info!(
            requested = urls.len(),
            attempted,
            scraped = documents.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Fetched candidate URLs"
        );
        documents
    }

    async fn fetch_page(&self, url: &str) -> Result<Option<ScrapedDocument>, Box<dyn Error>> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let body = response.text().await?;
        let text = extract_text(&body);
        if text.is_empty() {
            return Ok(None);
        }
        Ok(Some(ScrapedDocument {
            source_url: url.to_string(),
            text,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{serve, Canned};

    const SPORTS_PAGE: &str = r#"
    <html>
        <head><title>Test Page</title><style>body { color: red; }</style></head>
        <body>
            <nav><a href="/">Home</a><a href="/nba">NBA</a></nav>
            <h1>Sports News</h1>
            <p>Test content   for
               sports news.</p>
            <script>var tracking = true;</script>
            <footer>Copyright</footer>
        </body>
    </html>
    "#;

    fn fetcher() -> RateLimitedFetcher {
        RateLimitedFetcher::new("test-agent/1.0", Duration::from_secs(10)).unwrap()
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://example.com"));
        assert!(validate_url("http://127.0.0.1:8080/a"));
        assert!(!validate_url("not_a_url"));
        assert!(!validate_url("example.com/sports"));
        assert!(!validate_url("mailto:someone@example.com"));
    }

    #[test]
    fn test_extract_text_strips_chrome() {
        let text = extract_text(SPORTS_PAGE);
        assert_eq!(text, "Test Page\nSports News\nTest content for sports news.");
        assert!(!text.contains("tracking"));
        assert!(!text.contains("Copyright"));
        assert!(!text.contains("Home"));
    }

    #[test]
    fn test_extract_text_empty_page() {
        assert_eq!(extract_text("<html><body><script>x()</script></body></html>"), "");
    }

    #[tokio::test]
    async fn test_fetch_valid_url() {
        let server = serve(vec![("/sports", Canned::html(SPORTS_PAGE))]).await;
        let docs = fetcher().fetch(&[server.url("/sports")], Duration::ZERO).await;
        assert_eq!(docs.len(), 1);
        assert!(docs[0].text.contains("Sports News"));
        assert_eq!(docs[0].source_url, server.url("/sports"));
    }

    #[tokio::test]
    async fn test_malformed_url_is_skipped_without_aborting_batch() {
        let server = serve(vec![
            ("/one", Canned::html("<p>first story</p>")),
            ("/three", Canned::html("<p>third story</p>")),
        ])
        .await;
        let urls = vec![
            server.url("/one"),
            "www.no-scheme.example/two".to_string(),
            server.url("/three"),
        ];
        let docs = fetcher().fetch(&urls, Duration::ZERO).await;
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].text, "first story");
        assert_eq!(docs[1].text, "third story");
        assert_eq!(server.recorded().len(), 2);
    }

    #[tokio::test]
    async fn test_error_status_and_empty_pages_are_skipped() {
        let server = serve(vec![
            ("/gone", Canned::status(500)),
            ("/blank", Canned::html("<html><body><nav>menu</nav></body></html>")),
            ("/good", Canned::html("<p>kept</p>")),
        ])
        .await;
        let urls = vec![
            server.url("/gone"),
            server.url("/missing"),
            server.url("/blank"),
            server.url("/good"),
        ];
        let docs = fetcher().fetch(&urls, Duration::ZERO).await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].text, "kept");
    }

    #[tokio::test]
    async fn test_sends_user_agent() {
        let server = serve(vec![("/ua", Canned::html("<p>x</p>"))]).await;
        fetcher().fetch(&[server.url("/ua")], Duration::ZERO).await;
        let recorded = server.recorded();
        assert_eq!(recorded[0].header("user-agent"), Some("test-agent/1.0"));
    }

    #[tokio::test]
    async fn test_rate_limiting_waits_between_requests() {
        let server = serve(vec![
            ("/1", Canned::html("<p>one</p>")),
            ("/2", Canned::html("<p>two</p>")),
            ("/3", Canned::html("<p>three</p>")),
        ])
        .await;
        let urls = vec![server.url("/1"), server.url("/2"), server.url("/3")];
        let start = Instant::now();
        let docs = fetcher().fetch(&urls, Duration::from_millis(150)).await;
        let elapsed = start.elapsed();
        assert_eq!(docs.len(), 3);
        assert!(elapsed >= Duration::from_millis(300), "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn test_empty_batch() {
        assert!(fetcher().fetch(&[], Duration::from_secs(5)).await.is_empty());
    }
}
