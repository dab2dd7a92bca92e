//! Aggregates vendor release-note announcements into a single RSS feed.
//!
//! A run resolves the documentation site's sitemap, discovers feeds and
//! release-notes pages ([`feed::discovery`]), reads them into
//! [`feed::FeedEntry`] values, and merges those with [`aggregate::aggregate`]
//! before [`output::build_rss`] renders the result.

pub mod aggregate;
pub mod catalog;
pub mod config;
pub mod dates;
pub mod feed;
pub mod output;
pub mod pipeline;
pub mod util;
