//! HTML listing fallback.
//!
//! When a source is a web page rather than a feed, the page is treated as a
//! listing of announcements: its outbound article links become entries, each
//! enriched with a date read from the linked page itself. A listing with no
//! recognizable article links still yields one entry for the page.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use scraper::{Html, Selector};

use super::entry::FeedEntry;
use super::fetcher::{FetchError, Fetched, Fetcher};
use crate::dates::{extract_published, visible_text};
use crate::util::{canonical_link, clean_text, resolve_url, same_host};

/// Knobs for listing extraction.
#[derive(Debug, Clone)]
pub struct ScrapeOptions {
    /// Lowercase substrings an article URL must contain (any of)
    pub article_hints: Vec<String>,
    /// Minimum anchor text length, in characters
    pub min_link_text_len: usize,
    pub max_links_per_page: usize,
    /// Fixed pause before every page fetch
    pub crawl_delay: Duration,
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        Self {
            article_hints: ["release", "notes", "whats-new", "what's-new", "new"]
                .into_iter()
                .map(String::from)
                .collect(),
            min_link_text_len: 5,
            max_links_per_page: 100,
            crawl_delay: Duration::ZERO,
        }
    }
}

/// What a listing page yields before enrichment.
#[derive(Debug, Clone, PartialEq)]
pub struct Listing {
    /// Canonical URL of the listing page
    pub url: String,
    /// Text of the page's `<title>`, if any
    pub title: Option<String>,
    pub published: DateTime<Utc>,
    /// `(absolute link, anchor text)` pairs, deduplicated, in document order
    pub links: Vec<(String, String)>,
}

/// Fetches `page_url` and scrapes it as a listing.
pub async fn scrape_page(
    fetcher: &Fetcher,
    page_url: &str,
    opts: &ScrapeOptions,
) -> Result<Vec<FeedEntry>, FetchError> {
    polite_delay(opts).await;
    let fetched = fetcher.get(page_url).await?;
    Ok(scrape_fetched(fetcher, page_url, &fetched, opts).await)
}

/// Scrapes an already fetched page as a listing, attributing entries to
/// `source`.
pub async fn scrape_fetched(
    fetcher: &Fetcher,
    source: &str,
    fetched: &Fetched,
    opts: &ScrapeOptions,
) -> Vec<FeedEntry> {
    let listing = read_listing(&fetched.url, &fetched.text(), opts);

    if listing.links.is_empty() {
        tracing::debug!(page = %source, "No article links found, using the page itself");
        let title = listing.title.as_deref().unwrap_or(&listing.url);
        return FeedEntry::new(title, &listing.url, listing.published, source)
            .into_iter()
            .collect();
    }

    tracing::debug!(page = %source, links = listing.links.len(), "Enriching listing links");

    let entries: Vec<Option<FeedEntry>> = stream::iter(listing.links)
        .map(|(link, anchor)| {
            let fetcher = fetcher.clone();
            async move { enrich_link(&fetcher, &link, &anchor, source, opts).await }
        })
        .buffered(fetcher.workers())
        .collect()
        .await;

    entries.into_iter().flatten().collect()
}

/// Extracts the title, date and article links of a listing page.
///
/// Links are kept when they stay on the page's host, carry at least
/// `min_link_text_len` characters of visible text and contain one of the
/// article hints. The page itself and the site root are never kept.
pub fn read_listing(page_url: &str, html: &str, opts: &ScrapeOptions) -> Listing {
    let doc = Html::parse_document(html);
    let url = canonical_link(page_url).unwrap_or_else(|| page_url.to_string());

    let title = Selector::parse("title")
        .ok()
        .and_then(|sel| doc.select(&sel).next().map(visible_text))
        .filter(|t| !t.is_empty());
    let published = extract_published(&doc);

    let mut links = Vec::new();
    let mut seen = HashSet::new();

    if let Ok(anchors) = Selector::parse("a[href]") {
        for a in doc.select(&anchors) {
            if links.len() >= opts.max_links_per_page {
                tracing::debug!(page = %url, cap = opts.max_links_per_page, "Link cap reached");
                break;
            }
            let Some(href) = a.value().attr("href") else {
                continue;
            };
            let Some(link) = resolve_url(href, &url) else {
                continue;
            };
            if link == url || !same_host(&link, &url) || is_site_root(&link) {
                continue;
            }
            let text = clean_text(&a.text().collect::<String>());
            if text.chars().count() < opts.min_link_text_len {
                continue;
            }
            let lower = link.to_lowercase();
            if !opts.article_hints.iter().any(|h| lower.contains(h.as_str())) {
                continue;
            }
            if seen.insert(link.clone()) {
                links.push((link, text));
            }
        }
    }

    Listing {
        url,
        title,
        published,
        links,
    }
}

/// Fetches one article and builds its entry. A failed fetch still yields an
/// entry titled by the anchor text and dated now.
async fn enrich_link(
    fetcher: &Fetcher,
    link: &str,
    anchor: &str,
    source: &str,
    opts: &ScrapeOptions,
) -> Option<FeedEntry> {
    polite_delay(opts).await;

    let (title, published) = match fetcher.get(link).await {
        Ok(fetched) => read_article(&fetched.text(), anchor),
        Err(e) => {
            tracing::debug!(url = %link, error = %e, "Article fetch failed, using anchor text");
            (anchor.to_string(), Utc::now())
        }
    };

    FeedEntry::new(&title, link, published, source)
}

/// Title (first `<h1>`, else the anchor text) and date of an article page.
fn read_article(html: &str, anchor: &str) -> (String, DateTime<Utc>) {
    let doc = Html::parse_document(html);
    let title = Selector::parse("h1")
        .ok()
        .and_then(|sel| doc.select(&sel).next().map(visible_text))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| anchor.to_string());
    (title, extract_published(&doc))
}

fn is_site_root(link: &str) -> bool {
    url::Url::parse(link)
        .map(|u| u.path() == "/" && u.query().is_none())
        .unwrap_or(false)
}

async fn polite_delay(opts: &ScrapeOptions) {
    if !opts.crawl_delay.is_zero() {
        tokio::time::sleep(opts.crawl_delay).await;
    }
}
