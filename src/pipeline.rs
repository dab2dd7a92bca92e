//! One aggregation run, phase by phase.
//!
//! 1. Resolve the sitemap (only when a strategy needs it)
//! 2. Discover sources
//! 3. Read every source into entries
//! 4. Aggregate
//!
//! Each phase finishes its whole batch before the next one starts. Every
//! source yields a [`SourceOutcome`]; failures are tallied in the
//! [`RunReport`] and never abort the run.

use std::collections::BTreeSet;
use std::fmt;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use thiserror::Error;

use crate::aggregate::aggregate;
use crate::catalog::DiscoveryCache;
use crate::config::Config;
use crate::feed::{
    discover, parse_feed, resolve_sitemap, scrape_fetched, scrape_page, Candidate,
    CandidateRole, FeedEntry, FetchError, Fetcher, ParseError, ScrapeOptions,
};

/// Why a single source produced nothing.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// What one source produced.
#[derive(Debug)]
pub struct SourceOutcome {
    pub source: String,
    pub result: Result<Vec<FeedEntry>, SourceError>,
}

/// Counts reported at the end of every run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub sources_discovered: usize,
    pub sources_failed: usize,
    pub entries_parsed: usize,
    pub entries_in_window: usize,
    pub duplicates_removed: usize,
    pub entries_written: usize,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} sources discovered ({} failed), {} entries parsed, {} in window, \
             {} duplicates removed, {} entries written",
            self.sources_discovered,
            self.sources_failed,
            self.entries_parsed,
            self.entries_in_window,
            self.duplicates_removed,
            self.entries_written
        )
    }
}

/// Entries ready for the output feed plus the run's counts.
#[derive(Debug)]
pub struct RunOutput {
    pub entries: Vec<FeedEntry>,
    pub report: RunReport,
}

/// Runs discovery, parsing and aggregation with `config`.
///
/// Reads the discovery cache at `config.cache_path` and rewrites it when new
/// products were found. Never fails: the worst outcome is an empty result.
pub async fn run(config: &Config, fetcher: &Fetcher) -> RunOutput {
    let mut cache = DiscoveryCache::load_or_default(&config.cache_path);
    let catalog = cache.merge(&config.catalog());
    let cached_before = cache.products.len();

    // Phase 1: sitemap
    let sitemap_urls = if config.strategies.iter().any(|s| s.needs_sitemap()) {
        resolve_sitemap(fetcher, &config.sitemap_url).await
    } else {
        BTreeSet::new()
    };

    // Phase 2: discovery
    let candidates = discover(
        fetcher,
        &config.discovery_options(),
        &config.strategies,
        &catalog,
        &sitemap_urls,
        &mut cache,
    )
    .await;
    tracing::info!(sources = candidates.len(), "Discovery complete");

    if cache.products.len() != cached_before {
        if let Err(e) = cache.save(&config.cache_path) {
            tracing::warn!(
                path = %config.cache_path.display(),
                error = %e,
                "Failed to save discovery cache"
            );
        }
    }

    // Phase 3: read sources
    let outcomes = read_sources(fetcher, candidates, &config.scrape_options()).await;

    let mut report = RunReport {
        sources_discovered: outcomes.len(),
        ..RunReport::default()
    };
    let mut entries = Vec::new();
    for outcome in outcomes {
        match outcome.result {
            Ok(found) => {
                tracing::debug!(source = %outcome.source, entries = found.len(), "Source read");
                entries.extend(found);
            }
            Err(e) => {
                report.sources_failed += 1;
                log_failure(&outcome.source, &e);
            }
        }
    }
    report.entries_parsed = entries.len();

    // Phase 4: aggregate
    let aggregation = aggregate(entries, Some(config.backfill_days), Utc::now());
    report.entries_in_window = aggregation.in_window;
    report.duplicates_removed = aggregation.duplicates;
    report.entries_written = aggregation.entries.len();

    tracing::info!(
        sources = report.sources_discovered,
        failed = report.sources_failed,
        parsed = report.entries_parsed,
        in_window = report.entries_in_window,
        duplicates = report.duplicates_removed,
        written = report.entries_written,
        "Run complete"
    );

    RunOutput {
        entries: aggregation.entries,
        report,
    }
}

/// Reads every candidate with bounded concurrency. Outcomes come back in
/// candidate order regardless of completion order.
pub async fn read_sources(
    fetcher: &Fetcher,
    candidates: Vec<Candidate>,
    opts: &ScrapeOptions,
) -> Vec<SourceOutcome> {
    stream::iter(candidates)
        .map(|candidate| read_source(fetcher, candidate, opts))
        .buffered(fetcher.workers())
        .collect()
        .await
}

/// Reads one source: feeds are parsed (falling back to listing scraping when
/// the URL serves HTML), pages are scraped.
pub async fn read_source(
    fetcher: &Fetcher,
    candidate: Candidate,
    opts: &ScrapeOptions,
) -> SourceOutcome {
    let result = match candidate.role {
        CandidateRole::Feed => read_feed(fetcher, &candidate.url, opts).await,
        CandidateRole::Page | CandidateRole::SitemapEntry => scrape_page(fetcher, &candidate.url, opts)
            .await
            .map_err(SourceError::from),
    };
    SourceOutcome {
        source: candidate.url,
        result,
    }
}

async fn read_feed(
    fetcher: &Fetcher,
    url: &str,
    opts: &ScrapeOptions,
) -> Result<Vec<FeedEntry>, SourceError> {
    let fetched = fetcher.get(url).await?;
    match parse_feed(url, &fetched.body) {
        Ok(entries) => Ok(entries),
        // A declared feed type is trusted even when the body looks like markup
        Err(e) if !fetched.is_xml() && (fetched.is_html() || looks_like_html(&fetched.body)) => {
            tracing::debug!(url = %url, error = %e, "Not a feed, scraping as HTML listing");
            Ok(scrape_fetched(fetcher, url, &fetched, opts).await)
        }
        Err(e) => Err(e.into()),
    }
}

fn looks_like_html(body: &[u8]) -> bool {
    let head = String::from_utf8_lossy(&body[..body.len().min(1024)]).to_ascii_lowercase();
    head.contains("<html") || head.contains("<!doctype html")
}

fn log_failure(source: &str, error: &SourceError) {
    match error {
        // Constructed feed URLs for years without releases are expected to be missing
        SourceError::Fetch(FetchError::HttpStatus(404)) => {
            tracing::debug!(source = %source, error = %error, "Source not found");
        }
        _ => tracing::warn!(source = %source, error = %error, "Source failed"),
    }
}
