//! Sitemap resolution.
//!
//! Turns a root sitemap (or sitemap index) into a flat set of page URLs.
//! Nested indexes are resolved level by level, each level fetched with
//! bounded concurrency. Any single sitemap that fails to download or parse
//! contributes nothing; the rest of the tree still resolves.

use std::collections::{BTreeSet, HashSet};
use std::io::Read;

use flate2::read::GzDecoder;
use futures::stream::{self, StreamExt};
use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

use super::fetcher::{FetchError, Fetcher};

/// Guards against index cycles and pathological nesting.
const MAX_SITEMAP_DEPTH: usize = 5;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Error)]
pub enum SitemapError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("XML parse error: {0}")]
    Xml(String),
}

/// What a sitemap document turned out to contain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SitemapDocument {
    /// `<sitemapindex>`: locations of further sitemaps
    Index(Vec<String>),
    /// `<urlset>`: page locations
    UrlSet(Vec<String>),
    /// Neither root was recognized; every `<loc>` found anywhere
    Unrecognized(Vec<String>),
}

/// Resolves `root_url` into the set of page URLs it (transitively) lists.
///
/// Never fails: a broken root yields an empty set, and broken sub-sitemaps
/// are logged and skipped.
pub async fn resolve(fetcher: &Fetcher, root_url: &str) -> BTreeSet<String> {
    let mut pages = BTreeSet::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut frontier = vec![root_url.to_string()];
    let mut fetched = 0usize;

    for depth in 0..=MAX_SITEMAP_DEPTH {
        frontier.retain(|url| visited.insert(url.clone()));
        if frontier.is_empty() {
            break;
        }
        if depth == MAX_SITEMAP_DEPTH {
            tracing::warn!(
                remaining = frontier.len(),
                max_depth = MAX_SITEMAP_DEPTH,
                "Sitemap nesting too deep, ignoring remaining sub-sitemaps"
            );
            break;
        }

        fetched += frontier.len();
        let results: Vec<(String, Result<SitemapDocument, SitemapError>)> =
            stream::iter(std::mem::take(&mut frontier))
                .map(|url| {
                    let fetcher = fetcher.clone();
                    async move {
                        let result = fetch_sitemap(&fetcher, &url).await;
                        (url, result)
                    }
                })
                .buffer_unordered(fetcher.workers())
                .collect()
                .await;

        for (url, result) in results {
            match result {
                Ok(SitemapDocument::Index(children)) => {
                    tracing::debug!(sitemap = %url, children = children.len(), "Sitemap index");
                    frontier.extend(children);
                }
                Ok(SitemapDocument::UrlSet(locs)) => {
                    tracing::debug!(sitemap = %url, urls = locs.len(), "Sitemap urlset");
                    pages.extend(locs);
                }
                Ok(SitemapDocument::Unrecognized(locs)) => {
                    tracing::debug!(
                        sitemap = %url,
                        urls = locs.len(),
                        "Unrecognized sitemap root, collected every <loc>"
                    );
                    pages.extend(locs);
                }
                Err(e) => {
                    tracing::warn!(sitemap = %url, error = %e, "Sitemap failed, skipping");
                }
            }
        }
    }

    tracing::info!(
        root = %root_url,
        sitemaps = fetched,
        urls = pages.len(),
        "Sitemap resolved"
    );
    pages
}

async fn fetch_sitemap(fetcher: &Fetcher, url: &str) -> Result<SitemapDocument, SitemapError> {
    let fetched = fetcher.get(url).await?;
    let body = decode_body(url, fetched.body);
    parse_sitemap(&body)
}

/// Decompresses gzip sitemaps, detected by a `.gz` path or the gzip magic
/// bytes. Bodies that fail to decompress are returned unchanged, so the XML
/// parser gets a chance (and fails gracefully) on them.
pub fn decode_body(url: &str, body: Vec<u8>) -> Vec<u8> {
    let path_is_gz = url::Url::parse(url)
        .map(|u| u.path().to_ascii_lowercase().ends_with(".gz"))
        .unwrap_or_else(|_| url.to_ascii_lowercase().ends_with(".gz"));

    if !path_is_gz && !body.starts_with(&GZIP_MAGIC) {
        return body;
    }

    let mut decoded = Vec::new();
    match GzDecoder::new(&body[..]).read_to_end(&mut decoded) {
        Ok(_) => decoded,
        Err(e) => {
            tracing::debug!(sitemap = %url, error = %e, "Gzip decode failed, using raw body");
            body
        }
    }
}

/// Parses a sitemap document, comparing local tag names only so any
/// namespace prefix (or none) is accepted.
pub fn parse_sitemap(bytes: &[u8]) -> Result<SitemapDocument, SitemapError> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut root: Option<Vec<u8>> = None;
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut current_loc: Option<String> = None;

    let mut sitemap_locs = Vec::new();
    let mut url_locs = Vec::new();
    let mut all_locs = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.local_name().as_ref().to_vec();
                if root.is_none() {
                    root = Some(name.clone());
                }
                if name == b"loc" {
                    current_loc = Some(String::new());
                }
                stack.push(name);
            }
            Ok(Event::Empty(e)) => {
                if root.is_none() {
                    root = Some(e.local_name().as_ref().to_vec());
                }
            }
            Ok(Event::Text(e)) => {
                if let Some(loc) = current_loc.as_mut() {
                    let text = e.unescape().map_err(|e| SitemapError::Xml(e.to_string()))?;
                    loc.push_str(&text);
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(loc) = current_loc.as_mut() {
                    loc.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Ok(Event::End(e)) => {
                stack.pop();
                if e.local_name().as_ref() == b"loc" {
                    if let Some(loc) = current_loc.take() {
                        let loc = loc.trim().to_string();
                        if !loc.is_empty() {
                            match stack.last().map(Vec::as_slice) {
                                Some(b"sitemap") => sitemap_locs.push(loc.clone()),
                                Some(b"url") => url_locs.push(loc.clone()),
                                _ => {}
                            }
                            all_locs.push(loc);
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SitemapError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    let doc = match root.as_deref() {
        Some(b"sitemapindex") if !sitemap_locs.is_empty() || all_locs.is_empty() => {
            SitemapDocument::Index(sitemap_locs)
        }
        Some(b"urlset") if !url_locs.is_empty() || all_locs.is_empty() => {
            SitemapDocument::UrlSet(url_locs)
        }
        _ => SitemapDocument::Unrecognized(all_locs),
    };
    Ok(doc)
}
