//! Sitemap XML parser.
//!
//! Handles the two document kinds of the sitemaps.org protocol:
//! - `<sitemapindex>` whose `<sitemap><loc>` entries point at child sitemaps
//! - `<urlset>` whose `<url><loc>` entries are page URLs

use std::sync::LazyLock;

use nexus_shared::{NexusError, Result};
use regex::Regex;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Parsed representation of one sitemap document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SitemapDocument {
    /// A sitemap index listing child sitemap URLs.
    Index(Vec<String>),
    /// A URL set listing page URLs, in document order.
    UrlSet(Vec<String>),
}

// ---------------------------------------------------------------------------
// Regex patterns (compiled once)
// ---------------------------------------------------------------------------

/// Matches the opening tag of a sitemap index, with or without a namespace prefix.
static INDEX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(?:\w+:)?sitemapindex[\s>]").expect("index regex"));

/// Matches the opening tag of a URL set.
static URLSET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(?:\w+:)?urlset[\s>]").expect("urlset regex"));

/// Matches one `<sitemap>` or `<url>` block and captures its body.
static ENTRY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<(?:\w+:)?(?:sitemap|url)(?:\s[^>]*)?>(.*?)</(?:\w+:)?(?:sitemap|url)>")
        .expect("entry regex")
});

/// Captures the text of the first `<loc>` inside an entry. Extension tags such as
/// `<image:loc>` are deliberately not matched.
static LOC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<loc>\s*(?:<!\[CDATA\[)?(.*?)(?:\]\]>)?\s*</loc>").expect("loc regex")
});

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Parse a sitemap XML string.
pub(crate) fn parse_sitemap(xml: &str) -> Result<SitemapDocument> {
    let is_index = INDEX_RE.is_match(xml);
    if !is_index && !URLSET_RE.is_match(xml) {
        return Err(NexusError::parse(
            "document is neither a <sitemapindex> nor a <urlset>",
        ));
    }

    let locs: Vec<String> = ENTRY_RE
        .captures_iter(xml)
        .filter_map(|entry| {
            LOC_RE
                .captures(&entry[1])
                .map(|loc| unescape_xml(loc[1].trim()))
        })
        .filter(|loc| !loc.is_empty())
        .collect();

    Ok(if is_index {
        SitemapDocument::Index(locs)
    } else {
        SitemapDocument::UrlSet(locs)
    })
}

/// Decode the five predefined XML entities.
fn unescape_xml(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
