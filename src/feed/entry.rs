use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::util::{canonical_link, clean_text};

/// What a discovered URL is expected to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateRole {
    /// A page URL listed in a sitemap, not yet classified
    SitemapEntry,
    /// An HTML release-notes page to be scraped
    Page,
    /// An RSS/Atom feed document
    Feed,
}

/// A URL plus the role discovery assigned to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Candidate {
    pub url: String,
    pub role: CandidateRole,
}

impl Candidate {
    pub fn feed(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            role: CandidateRole::Feed,
        }
    }

    pub fn page(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            role: CandidateRole::Page,
        }
    }
}

/// A single normalized announcement.
///
/// `link` is the canonical identity of an entry: it is always absolute and
/// fragment-free. `published` is always set; see [`crate::dates::normalize`]
/// for how unknown dates are filled in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    pub published: DateTime<Utc>,
    /// The feed or page this entry was found on
    pub source: String,
    /// Item description, empty when the source had none
    pub summary: String,
    /// First item category, empty when the source had none
    pub category: String,
}

impl FeedEntry {
    /// Builds an entry, rejecting it when the title is blank or the link is
    /// not an absolute http(s) URL.
    pub fn new(
        title: &str,
        link: &str,
        published: DateTime<Utc>,
        source: &str,
    ) -> Option<Self> {
        let title = clean_text(title);
        if title.is_empty() {
            return None;
        }
        let link = canonical_link(link)?;

        Some(Self {
            title,
            link,
            published,
            source: source.to_string(),
            summary: String::new(),
            category: String::new(),
        })
    }

    pub fn with_summary(mut self, summary: &str) -> Self {
        self.summary = clean_text(summary);
        self
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = clean_text(category);
        self
    }
}
