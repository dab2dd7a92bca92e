use chrono::Utc;
use feed_rs::model::{Entry, Link};
use feed_rs::parser;
use thiserror::Error;

use super::entry::FeedEntry;
use crate::util::resolve_url;

#[derive(Debug, Error)]
pub enum ParseError {
    /// The document is neither RSS nor Atom, or is malformed XML
    #[error("not a valid RSS/Atom document: {0}")]
    Feed(#[from] parser::ParseFeedError),
}

/// Parses an RSS 2.0 or Atom document fetched from `source_url`.
///
/// The dialect is detected from the root element. Items without a title or a
/// link are dropped; items with a missing or unparsable date are kept and
/// stamped with the current time. Relative item links are resolved against
/// `source_url`.
pub fn parse_feed(source_url: &str, bytes: &[u8]) -> Result<Vec<FeedEntry>, ParseError> {
    let feed = parser::parse(bytes)?;

    let total = feed.entries.len();
    let entries: Vec<FeedEntry> = feed
        .entries
        .into_iter()
        .filter_map(|entry| convert_entry(source_url, entry))
        .collect();

    if entries.len() < total {
        tracing::debug!(
            source = %source_url,
            dropped = total - entries.len(),
            "Dropped feed items missing a title or link"
        );
    }

    Ok(entries)
}

fn convert_entry(source_url: &str, entry: Entry) -> Option<FeedEntry> {
    let title = entry.title.map(|t| t.content)?;
    let href = pick_link(&entry.links)?;
    let link = resolve_url(href, source_url)?;

    // RSS pubDate and Atom published both land in `published`
    let published = entry.published.or(entry.updated).unwrap_or_else(|| {
        tracing::debug!(link = %link, "Feed item has no usable date, using now");
        Utc::now()
    });

    let summary = entry
        .summary
        .map(|s| s.content)
        .or_else(|| entry.content.and_then(|c| c.body))
        .unwrap_or_default();
    let category = entry
        .categories
        .into_iter()
        .next()
        .map(|c| c.label.unwrap_or(c.term))
        .unwrap_or_default();

    Some(
        FeedEntry::new(&title, &link, published, source_url)?
            .with_summary(&summary)
            .with_category(&category),
    )
}

/// Prefers an `alternate` (or untyped) link over `self`/`enclosure` links.
fn pick_link(links: &[Link]) -> Option<&str> {
    links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| links.first())
        .map(|l| l.href.as_str())
        .filter(|href| !href.trim().is_empty())
}
