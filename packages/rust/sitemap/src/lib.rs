//! Product URL collection from sitemaps and URL list files.
//!
//! A sitemap URL may point at either a `<urlset>` or a `<sitemapindex>`. An
//! index is followed one level down: each child sitemap is fetched and its
//! page URLs collected in order. An optional substring filter keeps only the
//! URLs that look like product pages (e.g. `.html`).

mod parser;

use std::path::Path;
use std::time::Duration;

use nexus_shared::{NexusError, Result};
use reqwest::Client;
use tracing::{debug, info, instrument, warn};
use url::Url;

pub use parser::SitemapDocument;

/// Maximum number of redirects to follow when fetching a sitemap.
const MAX_REDIRECTS: usize = 5;

/// Default timeout in seconds for one sitemap request.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum sitemap size we accept (50 MB, the protocol's own limit).
const MAX_RESPONSE_SIZE: u64 = 50 * 1024 * 1024;

/// User-Agent string for sitemap requests.
const USER_AGENT: &str = concat!("NexusNavigationArchitect/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// SitemapParser
// ---------------------------------------------------------------------------

/// Fetches sitemaps over HTTP and extracts filtered page URLs.
#[derive(Debug, Clone)]
pub struct SitemapParser {
    client: Client,
}

impl SitemapParser {
    /// Create a parser with the default request timeout.
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(timeout)
            .build()
            .map_err(|e| NexusError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Collect page URLs from `sitemap_url`, recursing one level into a sitemap index.
    ///
    /// URLs keep document order. When `filter` is set, only URLs containing it
    /// as a substring are returned. `on_progress` receives human-readable status lines.
    #[instrument(skip_all, fields(sitemap_url = %sitemap_url, filter = filter.unwrap_or("")))]
    pub async fn collect(
        &self,
        sitemap_url: &str,
        filter: Option<&str>,
        on_progress: &(dyn Fn(&str) + Send + Sync),
    ) -> Result<Vec<String>> {
        let root = Url::parse(sitemap_url)
            .map_err(|e| NexusError::validation(format!("invalid sitemap URL '{sitemap_url}': {e}")))?;

        on_progress("Fetching sitemap...");
        let sitemaps = match self.fetch_document(root.as_str()).await? {
            SitemapDocument::Index(children) => children,
            SitemapDocument::UrlSet(urls) => {
                let kept = apply_filter(urls, filter);
                on_progress(&format!("Found {} product URLs", kept.len()));
                info!(urls = kept.len(), "single sitemap parsed");
                return Ok(kept);
            }
        };

        on_progress(&format!("Found {} sitemaps to process", sitemaps.len()));

        let mut urls = Vec::new();
        let total = sitemaps.len();
        for (i, child) in sitemaps.iter().enumerate() {
            on_progress(&format!("Processing sitemap {}/{total}", i + 1));
            match self.fetch_document(child).await? {
                SitemapDocument::UrlSet(found) => {
                    debug!(sitemap = %child, urls = found.len(), "child sitemap parsed");
                    urls.extend(apply_filter(found, filter));
                }
                SitemapDocument::Index(nested) => {
                    warn!(
                        sitemap = %child,
                        nested = nested.len(),
                        "nested sitemap index ignored (only one level is followed)"
                    );
                }
            }
        }

        on_progress(&format!("Found {} product URLs", urls.len()));
        info!(sitemaps = total, urls = urls.len(), "sitemap index parsed");
        Ok(urls)
    }

    /// Fetch and parse one sitemap document.
    async fn fetch_document(&self, url: &str) -> Result<SitemapDocument> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| NexusError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NexusError::Api {
                status: status.as_u16(),
                message: format!("{url}: sitemap request failed"),
            });
        }

        if let Some(len) = response.content_length() {
            if len > MAX_RESPONSE_SIZE {
                return Err(NexusError::validation(format!(
                    "{url}: sitemap too large ({len} bytes, max {MAX_RESPONSE_SIZE})"
                )));
            }
        }

        let body = response
            .text()
            .await
            .map_err(|e| NexusError::Network(format!("{url}: failed to read body: {e}")))?;

        parser::parse_sitemap(&body)
            .map_err(|e| NexusError::parse(format!("{url}: {e}")))
    }
}

/// Keep URLs that contain `filter`; an empty or absent filter keeps everything.
fn apply_filter(urls: Vec<String>, filter: Option<&str>) -> Vec<String> {
    match filter {
        Some(pattern) if !pattern.is_empty() => {
            urls.into_iter().filter(|u| u.contains(pattern)).collect()
        }
        _ => urls,
    }
}

/// Read a URL list file: one URL per line, surrounding whitespace and blank lines dropped.
pub fn load_url_file(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path).map_err(|e| NexusError::io(path, e))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect())
}
