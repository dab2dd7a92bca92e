//! Finding and reading release-note sources.
//!
//! - [`fetcher`] - shared, concurrency-capped HTTP access
//! - [`sitemap`] - sitemap index resolution (gzip aware)
//! - [`discovery`] - the template, HTML and sitemap-filter strategies
//! - [`parser`] - RSS/Atom documents into [`FeedEntry`] values
//! - [`scrape`] - HTML listing pages into [`FeedEntry`] values
//!
//! # Example
//!
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use relfeed::feed::{parse_feed, Fetcher};
//!
//! let fetcher = Fetcher::new(10)?;
//! let url = "https://help.zscaler.com/rss-feed/zia/release-upgrade-summary-2025/zscaler.net";
//! let fetched = fetcher.get(url).await?;
//! for entry in parse_feed(url, &fetched.body)? {
//!     println!("{} {}", entry.published, entry.title);
//! }
//! # Ok(())
//! # }
//! ```

pub mod discovery;
mod entry;
pub mod fetcher;
pub mod parser;
pub mod scrape;
pub mod sitemap;

pub use discovery::{discover, DiscoveryOptions, Strategy, UnknownStrategy};
pub use entry::{Candidate, CandidateRole, FeedEntry};
pub use fetcher::{FetchError, Fetched, Fetcher};
pub use parser::{parse_feed, ParseError};
pub use scrape::{scrape_fetched, scrape_page, ScrapeOptions};
pub use sitemap::{resolve as resolve_sitemap, SitemapError};
