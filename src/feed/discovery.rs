//! Source discovery.
//!
//! Three strategies produce [`Candidate`]s, run in the configured order and
//! merged with first-seen order preserved:
//!
//! - [`Strategy::Template`] (primary): builds feed URLs from the product
//!   catalog and a small set of years.
//! - [`Strategy::HtmlAutodiscovery`]: scans seed pages for feed links and
//!   records previously unknown products in the discovery cache.
//! - [`Strategy::SitemapFilter`]: picks release-notes pages straight out of
//!   the sitemap, to be scraped as HTML listings.
//!
//! A failing request only removes its own candidate.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{Datelike, Utc};
use futures::stream::{self, StreamExt};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::entry::Candidate;
use super::fetcher::Fetcher;
use crate::catalog::{DiscoveryCache, ProductDescriptor};
use crate::util::{resolve_url, same_host};

/// Path segment that introduces a feed URL on the documentation site.
const FEED_PATH_SEGMENT: &str = "rss-feed";

/// The RSS directory page, always seeded into HTML discovery.
const RSS_DIRECTORY_PATH: &str = "/rss";

/// A named way of finding sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    Template,
    HtmlAutodiscovery,
    SitemapFilter,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Template => "template",
            Strategy::HtmlAutodiscovery => "html-autodiscovery",
            Strategy::SitemapFilter => "sitemap-filter",
        }
    }

    /// Whether this strategy reads the sitemap URL set.
    pub fn needs_sitemap(&self) -> bool {
        matches!(self, Strategy::HtmlAutodiscovery | Strategy::SitemapFilter)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown discovery strategy '{0}' (expected template, html-autodiscovery or sitemap-filter)")]
pub struct UnknownStrategy(pub String);

impl FromStr for Strategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "template" => Ok(Strategy::Template),
            "html-autodiscovery" | "html" => Ok(Strategy::HtmlAutodiscovery),
            "sitemap-filter" | "sitemap" => Ok(Strategy::SitemapFilter),
            _ => Err(UnknownStrategy(s.to_string())),
        }
    }
}

/// Settings shared by the discovery strategies.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub site_base_url: String,
    pub feed_url_template: String,
    pub year_offsets: Vec<i32>,
    pub validate_feeds: bool,
    pub page_hints: Vec<String>,
    pub page_excludes: Vec<String>,
    pub max_section_seeds: usize,
    pub crawl_delay: Duration,
}

/// Runs `strategies` in order and merges their candidates, dropping repeats.
///
/// `catalog` should already include cached products. Products found by HTML
/// discovery that are not in it are recorded in `cache`.
pub async fn discover(
    fetcher: &Fetcher,
    opts: &DiscoveryOptions,
    strategies: &[Strategy],
    catalog: &[ProductDescriptor],
    sitemap_urls: &BTreeSet<String>,
    cache: &mut DiscoveryCache,
) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for strategy in strategies {
        let found = match strategy {
            Strategy::Template => {
                let year = Utc::now().year();
                template_candidates(fetcher, opts, catalog, year).await
            }
            Strategy::HtmlAutodiscovery => {
                let found = html_candidates(fetcher, opts, sitemap_urls).await;
                record_new_products(&found, catalog, cache);
                found
            }
            Strategy::SitemapFilter => sitemap_filter_candidates(sitemap_urls, opts),
        };

        let before = candidates.len();
        for candidate in found {
            if seen.insert(candidate.url.clone()) {
                candidates.push(candidate);
            }
        }
        tracing::info!(
            strategy = %strategy,
            new = candidates.len() - before,
            total = candidates.len(),
            "Discovery strategy finished"
        );
    }

    candidates
}

// ============================================================================
// Template strategy
// ============================================================================

/// Fills the feed URL template for one product and year.
pub fn feed_url(template: &str, base: &str, product: &ProductDescriptor, year: i32) -> String {
    template
        .replace("{base}", base.trim_end_matches('/'))
        .replace("{slug}", &product.slug)
        .replace("{year}", &year.to_string())
        .replace("{domain}", &product.domain)
}

/// Constructs a feed candidate per product for every candidate year.
///
/// With validation enabled, the first product's URL is HEAD-checked for each
/// year; only a definite 404/410 drops the year, so an unreachable or
/// HEAD-hostile server never empties the run.
pub async fn template_candidates(
    fetcher: &Fetcher,
    opts: &DiscoveryOptions,
    catalog: &[ProductDescriptor],
    current_year: i32,
) -> Vec<Candidate> {
    let Some(representative) = catalog.first() else {
        tracing::warn!("Product catalog is empty, template strategy has nothing to build");
        return Vec::new();
    };

    let mut years: Vec<i32> = Vec::new();
    for offset in &opts.year_offsets {
        let year = current_year + offset;
        if !years.contains(&year) {
            years.push(year);
        }
    }

    if opts.validate_feeds {
        let checks: Vec<(i32, bool)> = stream::iter(years)
            .map(|year| {
                let url = feed_url(&opts.feed_url_template, &opts.site_base_url, representative, year);
                async move { (year, probably_exists(fetcher, &url).await) }
            })
            .buffered(fetcher.workers())
            .collect()
            .await;

        years = checks
            .into_iter()
            .filter_map(|(year, keep)| {
                if !keep {
                    tracing::info!(year, "No feeds published for year, skipping");
                }
                keep.then_some(year)
            })
            .collect();
    }

    years
        .iter()
        .flat_map(|year| {
            catalog.iter().map(move |product| {
                Candidate::feed(feed_url(
                    &opts.feed_url_template,
                    &opts.site_base_url,
                    product,
                    *year,
                ))
            })
        })
        .collect()
}

/// HEAD-checks `url`. Anything other than a definite "gone" counts as present.
async fn probably_exists(fetcher: &Fetcher, url: &str) -> bool {
    match fetcher.head(url).await {
        Ok(404) | Ok(410) => false,
        Ok(status) => {
            tracing::debug!(url = %url, status, "Existence check passed or inconclusive");
            true
        }
        Err(e) => {
            tracing::debug!(url = %url, error = %e, "Existence check failed, keeping URL");
            true
        }
    }
}

// ============================================================================
// HTML autodiscovery strategy
// ============================================================================

/// Seed pages for HTML discovery: the site root, the RSS directory page and
/// one root per top-level section seen in the sitemap.
pub fn seed_pages(base: &str, sitemap_urls: &BTreeSet<String>, max_sections: usize) -> Vec<String> {
    let base = base.trim_end_matches('/');
    let mut seeds = vec![format!("{base}/"), format!("{base}{RSS_DIRECTORY_PATH}")];

    let sections: BTreeSet<String> = sitemap_urls
        .iter()
        .filter(|u| same_host(u, base))
        .filter_map(|u| {
            let parsed = url::Url::parse(u).ok()?;
            let first = parsed.path_segments()?.find(|s| !s.is_empty())?.to_string();
            Some(first)
        })
        .collect();

    for section in sections.into_iter().take(max_sections) {
        let seed = format!("{base}/{section}");
        if !seeds.contains(&seed) {
            seeds.push(seed);
        }
    }
    seeds
}

/// Fetches every seed page and collects the feed links found on them.
pub async fn html_candidates(
    fetcher: &Fetcher,
    opts: &DiscoveryOptions,
    sitemap_urls: &BTreeSet<String>,
) -> Vec<Candidate> {
    let seeds = seed_pages(&opts.site_base_url, sitemap_urls, opts.max_section_seeds);
    tracing::debug!(seeds = seeds.len(), "Scanning seed pages for feed links");

    let per_page: Vec<Vec<String>> = stream::iter(seeds)
        .map(|seed| async move {
            if !opts.crawl_delay.is_zero() {
                tokio::time::sleep(opts.crawl_delay).await;
            }
            match fetcher.get(&seed).await {
                Ok(fetched) => find_feed_links(&fetched.text(), &fetched.url),
                Err(e) => {
                    tracing::debug!(url = %seed, error = %e, "Seed page unavailable");
                    Vec::new()
                }
            }
        })
        .buffered(fetcher.workers())
        .collect()
        .await;

    let mut seen = HashSet::new();
    let links: Vec<String> = per_page
        .into_iter()
        .flatten()
        .filter(|link| seen.insert(link.clone()))
        .collect();

    let links = if opts.validate_feeds {
        let checked: Vec<Option<String>> = stream::iter(links)
            .map(|link| async move {
                let keep = probably_exists(fetcher, &link).await;
                keep.then_some(link)
            })
            .buffered(fetcher.workers())
            .collect()
            .await;
        checked.into_iter().flatten().collect()
    } else {
        links
    };

    links.into_iter().map(Candidate::feed).collect()
}

/// Feed links in an HTML document: anchors or `<link>` tags whose path
/// follows the `/rss-feed/...` convention or whose `type` declares RSS/Atom.
pub fn find_feed_links(html: &str, base_url: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a[href], link[href]") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for el in doc.select(&selector) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let Some(link) = resolve_url(href, base_url) else {
            continue;
        };
        let declared_feed = el
            .value()
            .attr("type")
            .map(|t| {
                let t = t.to_ascii_lowercase();
                t.contains("rss+xml") || t.contains("atom+xml")
            })
            .unwrap_or(false);

        if (declared_feed || has_feed_path(&link)) && seen.insert(link.clone()) {
            links.push(link);
        }
    }

    links
}

fn has_feed_path(link: &str) -> bool {
    url::Url::parse(link)
        .map(|u| u.path().contains(&format!("/{FEED_PATH_SEGMENT}/")))
        .unwrap_or(false)
}

/// Extracts the product of a `/rss-feed/<slug>/<summary>/<domain>` URL.
pub fn product_from_feed_url(link: &str) -> Option<ProductDescriptor> {
    let parsed = url::Url::parse(link).ok()?;
    let segments: Vec<&str> = parsed.path_segments()?.filter(|s| !s.is_empty()).collect();
    let at = segments.iter().position(|s| *s == FEED_PATH_SEGMENT)?;

    match segments.get(at + 1..at + 4) {
        Some([slug, _summary, domain]) => Some(ProductDescriptor::new(*slug, *domain)),
        _ => None,
    }
}

fn record_new_products(
    found: &[Candidate],
    catalog: &[ProductDescriptor],
    cache: &mut DiscoveryCache,
) {
    for candidate in found {
        if let Some(product) = product_from_feed_url(&candidate.url) {
            if !catalog.contains(&product) {
                cache.record(product);
            }
        }
    }
}

// ============================================================================
// Sitemap-filter strategy
// ============================================================================

/// Sitemap URLs whose path contains a page hint and none of the excludes.
pub fn sitemap_filter_candidates(
    sitemap_urls: &BTreeSet<String>,
    opts: &DiscoveryOptions,
) -> Vec<Candidate> {
    sitemap_urls
        .iter()
        .filter(|u| {
            let Ok(parsed) = url::Url::parse(u) else {
                return false;
            };
            let path = parsed.path().to_lowercase();
            opts.page_hints.iter().any(|h| path.contains(&h.to_lowercase()))
                && !opts
                    .page_excludes
                    .iter()
                    .any(|x| path.contains(&x.to_lowercase()))
        })
        .map(|u| Candidate::page(u.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::CandidateRole;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEMPLATE: &str = "{base}/rss-feed/{slug}/release-upgrade-summary-{year}/{domain}";

    fn opts(base: &str) -> DiscoveryOptions {
        DiscoveryOptions {
            site_base_url: base.to_string(),
            feed_url_template: TEMPLATE.to_string(),
            year_offsets: vec![-1, 0, 1],
            validate_feeds: false,
            page_hints: vec!["release-notes".to_string(), "whats-new".to_string()],
            page_excludes: vec!["/tag/".to_string(), "/search".to_string()],
            max_section_seeds: 50,
            crawl_delay: Duration::ZERO,
        }
    }

    fn catalog() -> Vec<ProductDescriptor> {
        vec![
            ProductDescriptor::new("zia", "zscaler.net"),
            ProductDescriptor::new("zpa", "private.zscaler.com"),
        ]
    }

    fn urls(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_strategy_names_round_trip() {
        for s in [
            Strategy::Template,
            Strategy::HtmlAutodiscovery,
            Strategy::SitemapFilter,
        ] {
            assert_eq!(s.as_str().parse::<Strategy>().unwrap(), s);
        }
        assert!("crawl-everything".parse::<Strategy>().is_err());
    }

    #[test]
    fn test_feed_url_template() {
        assert_eq!(
            feed_url(
                TEMPLATE,
                "https://help.example.com/",
                &ProductDescriptor::new("zia", "zscaler.net"),
                2025
            ),
            "https://help.example.com/rss-feed/zia/release-upgrade-summary-2025/zscaler.net"
        );
    }

    #[tokio::test]
    async fn test_template_candidates_without_validation() {
        let fetcher = Fetcher::new(2).unwrap();
        let found =
            template_candidates(&fetcher, &opts("https://help.example.com"), &catalog(), 2025).await;

        assert_eq!(found.len(), 6);
        assert!(found.iter().all(|c| c.role == CandidateRole::Feed));
        assert_eq!(
            found[0].url,
            "https://help.example.com/rss-feed/zia/release-upgrade-summary-2024/zscaler.net"
        );
        assert_eq!(
            found[5].url,
            "https://help.example.com/rss-feed/zpa/release-upgrade-summary-2026/private.zscaler.com"
        );
    }

    #[tokio::test]
    async fn test_template_validation_drops_only_missing_years() {
        let mock_server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/rss-feed/zia/release-upgrade-summary-2024/zscaler.net"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/rss-feed/zia/release-upgrade-summary-2025/zscaler.net"))
            .respond_with(ResponseTemplate::new(405))
            .mount(&mock_server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/rss-feed/zia/release-upgrade-summary-2026/zscaler.net"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let mut options = opts(&mock_server.uri());
        options.validate_feeds = true;

        let fetcher = Fetcher::new(3).unwrap();
        let found = template_candidates(&fetcher, &options, &catalog(), 2025).await;

        // 2026 is gone, 2025 is inconclusive and kept
        let years: BTreeSet<&str> = found
            .iter()
            .filter_map(|c| c.url.split("summary-").nth(1))
            .filter_map(|rest| rest.split('/').next())
            .collect();
        assert_eq!(years, ["2024", "2025"].into_iter().collect());
        assert_eq!(found.len(), 4);
    }

    #[tokio::test]
    async fn test_template_validation_keeps_year_on_timeout() {
        let mock_server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/rss-feed/zia/release-upgrade-summary-2024/zscaler.net"))
            .respond_with(ResponseTemplate::new(404).set_delay(Duration::from_millis(500)))
            .mount(&mock_server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/rss-feed/zia/release-upgrade-summary-2025/zscaler.net"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/rss-feed/zia/release-upgrade-summary-2026/zscaler.net"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let mut options = opts(&mock_server.uri());
        options.validate_feeds = true;

        let fetcher =
            Fetcher::with_timeouts(3, Duration::from_secs(5), Duration::from_millis(50)).unwrap();
        let found = template_candidates(&fetcher, &options, &catalog(), 2025).await;

        // The slow 404 never arrives in time, so 2024 stays
        assert_eq!(found.len(), 4);
        assert!(found[0].url.contains("summary-2024"));
        assert!(found.iter().all(|c| !c.url.contains("summary-2026")));
    }

    #[tokio::test]
    async fn test_template_validation_keeps_years_when_site_unreachable() {
        let mut options = opts("http://127.0.0.1:1");
        options.validate_feeds = true;

        let fetcher =
            Fetcher::with_timeouts(3, Duration::from_secs(2), Duration::from_secs(2)).unwrap();
        let found = template_candidates(&fetcher, &options, &catalog(), 2025).await;

        assert_eq!(found.len(), 6);
    }

    #[tokio::test]
    async fn test_template_empty_catalog() {
        let fetcher = Fetcher::new(1).unwrap();
        let found = template_candidates(&fetcher, &opts("https://help.example.com"), &[], 2025).await;
        assert!(found.is_empty());
    }

    #[test]
    fn test_seed_pages_include_root_rss_and_sections() {
        let sitemap = urls(&[
            "https://help.example.com/zia/release-notes",
            "https://help.example.com/zia/other",
            "https://help.example.com/zpa/whats-new",
            "https://cdn.example.org/assets/x",
        ]);
        assert_eq!(
            seed_pages("https://help.example.com", &sitemap, 10),
            vec![
                "https://help.example.com/".to_string(),
                "https://help.example.com/rss".to_string(),
                "https://help.example.com/zia".to_string(),
                "https://help.example.com/zpa".to_string(),
            ]
        );
        assert_eq!(seed_pages("https://help.example.com", &sitemap, 1).len(), 3);
    }

    #[test]
    fn test_find_feed_links() {
        let html = r#"<html><head>
            <link rel="alternate" type="application/atom+xml" href="/blog/atom.xml">
            <link rel="stylesheet" href="/style.css">
        </head><body>
            <a href="/rss-feed/zia/release-upgrade-summary-2025/zscaler.net">ZIA feed</a>
            <a href="https://help.example.com/rss-feed/zia/release-upgrade-summary-2025/zscaler.net">dup</a>
            <a href="/zia/release-notes">Release notes</a>
        </body></html>"#;

        assert_eq!(
            find_feed_links(html, "https://help.example.com/rss"),
            vec![
                "https://help.example.com/blog/atom.xml".to_string(),
                "https://help.example.com/rss-feed/zia/release-upgrade-summary-2025/zscaler.net"
                    .to_string(),
            ]
        );
    }

    #[test]
    fn test_product_from_feed_url() {
        assert_eq!(
            product_from_feed_url(
                "https://help.example.com/rss-feed/zdx/release-upgrade-summary-2025/zdxcloud.net"
            ),
            Some(ProductDescriptor::new("zdx", "zdxcloud.net"))
        );
        assert_eq!(
            product_from_feed_url("https://help.example.com/rss-feed/zdx"),
            None
        );
        assert_eq!(product_from_feed_url("https://help.example.com/blog/atom.xml"), None);
    }

    #[test]
    fn test_sitemap_filter() {
        let sitemap = urls(&[
            "https://help.example.com/zia/release-notes",
            "https://help.example.com/zpa/Whats-New-2025",
            "https://help.example.com/tag/release-notes",
            "https://help.example.com/search?q=release-notes",
            "https://help.example.com/zia/admin-guide",
        ]);

        let found = sitemap_filter_candidates(&sitemap, &opts("https://help.example.com"));
        assert_eq!(
            found,
            vec![
                Candidate::page("https://help.example.com/zia/release-notes"),
                Candidate::page("https://help.example.com/zpa/Whats-New-2025"),
            ]
        );
    }

    #[tokio::test]
    async fn test_discover_merges_strategies_and_records_new_products() {
        let mock_server = MockServer::start().await;
        let base = mock_server.uri();

        Mock::given(method("GET"))
            .and(path("/rss"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<html><body>
                <a href="/rss-feed/zia/release-upgrade-summary-2025/zscaler.net">ZIA</a>
                <a href="/rss-feed/newprod/release-upgrade-summary-2025/newprod.example.net">New</a>
                </body></html>"#,
            ))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let mut options = opts(&base);
        options.year_offsets = vec![0];

        let fetcher = Fetcher::new(4).unwrap();
        let mut cache = DiscoveryCache::default();
        let year = Utc::now().year();
        let found = discover(
            &fetcher,
            &options,
            &[Strategy::Template, Strategy::HtmlAutodiscovery],
            &catalog(),
            &BTreeSet::new(),
            &mut cache,
        )
        .await;

        let zia = format!("{base}/rss-feed/zia/release-upgrade-summary-{year}/zscaler.net");
        assert_eq!(found[0].url, zia);
        assert!(found
            .iter()
            .any(|c| c.url.ends_with("/rss-feed/newprod/release-upgrade-summary-2025/newprod.example.net")));
        // Unique URLs only
        let unique: HashSet<&str> = found.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(unique.len(), found.len());

        assert_eq!(
            cache.products,
            vec![ProductDescriptor::new("newprod", "newprod.example.net")]
        );
    }
}
