//! Run configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! environment variables, then command-line flags (applied by the binary).
//! The config file is optional; a missing or empty file yields
//! `Config::default()`. Unknown keys are accepted but logged.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::catalog::{known_products, ProductDescriptor};
use crate::feed::{DiscoveryOptions, ScrapeOptions, Strategy};
use crate::output::ChannelInfo;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Struct
// ============================================================================

/// Everything a run needs to know.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Documentation site root, substituted for `{base}` in the feed template.
    pub site_base_url: String,

    /// Root sitemap (or sitemap index) of the site.
    pub sitemap_url: String,

    /// Feed URL pattern with `{base}`, `{slug}`, `{year}` and `{domain}` placeholders.
    pub feed_url_template: String,

    /// Years tried by the template strategy, relative to the current year.
    pub year_offsets: Vec<i32>,

    /// Discovery strategies, run in this order.
    pub strategies: Vec<Strategy>,

    /// Recency window in days.
    pub backfill_days: u32,

    /// Maximum concurrent requests.
    pub max_workers: usize,

    /// HEAD-check constructed and discovered feed URLs before fetching them.
    pub validate_feeds: bool,

    pub output_path: PathBuf,

    /// Discovered-products cache.
    pub cache_path: PathBuf,

    /// Replaces the built-in product catalog when present.
    pub products: Option<Vec<ProductDescriptor>>,

    /// Path substrings marking a sitemap URL as a release-notes page.
    pub page_hints: Vec<String>,

    /// Path substrings that disqualify a sitemap URL.
    pub page_excludes: Vec<String>,

    /// URL substrings marking a listing link as an article.
    pub article_hints: Vec<String>,

    pub min_link_text_len: usize,

    /// Upper bound on section pages seeded into HTML discovery.
    pub max_section_seeds: usize,

    pub max_links_per_page: usize,

    /// Pause before each HTML page fetch, in milliseconds.
    pub crawl_delay_ms: u64,

    pub feed_title: String,
    pub feed_description: String,
    pub feed_language: String,

    /// Public URL the output feed is served from, advertised as `atom:link rel="self"`.
    pub feed_self_url: Option<String>,

    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        let scrape = ScrapeOptions::default();
        Self {
            site_base_url: "https://help.zscaler.com".to_string(),
            sitemap_url: "https://help.zscaler.com/sitemap.xml".to_string(),
            feed_url_template: "{base}/rss-feed/{slug}/release-upgrade-summary-{year}/{domain}"
                .to_string(),
            year_offsets: vec![-1, 0, 1],
            strategies: vec![Strategy::Template, Strategy::HtmlAutodiscovery],
            backfill_days: 14,
            max_workers: 10,
            validate_feeds: false,
            output_path: PathBuf::from("public/rss.xml"),
            cache_path: PathBuf::from("discovered_products.json"),
            products: None,
            page_hints: vec!["release-notes".to_string(), "whats-new".to_string()],
            page_excludes: ["/tag/", "/tags/", "/search", "/author/"]
                .into_iter()
                .map(String::from)
                .collect(),
            article_hints: scrape.article_hints,
            min_link_text_len: scrape.min_link_text_len,
            max_section_seeds: 50,
            max_links_per_page: scrape.max_links_per_page,
            crawl_delay_ms: 0,
            feed_title: "Zscaler Releases (help.zscaler.com)".to_string(),
            feed_description: "Aggregated release notes and what's-new announcements".to_string(),
            feed_language: "en".to_string(),
            feed_self_url: None,
            log_level: "info".to_string(),
        }
    }
}

const KNOWN_KEYS: &[&str] = &[
    "site_base_url",
    "sitemap_url",
    "feed_url_template",
    "year_offsets",
    "strategies",
    "backfill_days",
    "max_workers",
    "validate_feeds",
    "output_path",
    "cache_path",
    "products",
    "page_hints",
    "page_excludes",
    "article_hints",
    "min_link_text_len",
    "max_section_seeds",
    "max_links_per_page",
    "crawl_delay_ms",
    "feed_title",
    "feed_description",
    "feed_language",
    "feed_self_url",
    "log_level",
];

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check file size before reading
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Applies overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Applies overrides from `lookup`. Values that fail to parse are logged
    /// and leave the current setting untouched.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("BACKFILL_DAYS") {
            set_parsed(&mut self.backfill_days, "BACKFILL_DAYS", &v);
        }
        if let Some(v) = get("MAX_WORKERS") {
            set_parsed(&mut self.max_workers, "MAX_WORKERS", &v);
        }
        if let Some(v) = get("VALIDATE_FEEDS") {
            match parse_flag(&v) {
                Some(flag) => self.validate_feeds = flag,
                None => tracing::warn!(var = "VALIDATE_FEEDS", value = %v, "Ignoring invalid value"),
            }
        }
        if let Some(v) = get("SITEMAP_URL") {
            self.sitemap_url = v;
        }
        if let Some(v) = get("SITE_BASE_URL") {
            self.site_base_url = v;
        }
        if let Some(v) = get("OUTPUT_PATH") {
            self.output_path = PathBuf::from(v);
        }
        if let Some(v) = get("CACHE_PATH") {
            self.cache_path = PathBuf::from(v);
        }
        if let Some(v) = get("DISCOVERY_STRATEGIES") {
            let parsed: Result<Vec<Strategy>, _> =
                v.split(',').map(|s| s.trim().parse::<Strategy>()).collect();
            match parsed {
                Ok(list) if !list.is_empty() => self.strategies = list,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(var = "DISCOVERY_STRATEGIES", value = %v, error = %e, "Ignoring invalid value")
                }
            }
        }
        if let Some(v) = get("LOG_LEVEL") {
            self.log_level = v;
        }
    }

    /// The product catalog in effect: configured products, else the built-in list.
    pub fn catalog(&self) -> Vec<ProductDescriptor> {
        self.products.clone().unwrap_or_else(known_products)
    }

    pub fn scrape_options(&self) -> ScrapeOptions {
        ScrapeOptions {
            article_hints: self.article_hints.iter().map(|h| h.to_lowercase()).collect(),
            min_link_text_len: self.min_link_text_len,
            max_links_per_page: self.max_links_per_page,
            crawl_delay: Duration::from_millis(self.crawl_delay_ms),
        }
    }

    pub fn discovery_options(&self) -> DiscoveryOptions {
        DiscoveryOptions {
            site_base_url: self.site_base_url.clone(),
            feed_url_template: self.feed_url_template.clone(),
            year_offsets: self.year_offsets.clone(),
            validate_feeds: self.validate_feeds,
            page_hints: self.page_hints.clone(),
            page_excludes: self.page_excludes.clone(),
            max_section_seeds: self.max_section_seeds,
            crawl_delay: Duration::from_millis(self.crawl_delay_ms),
        }
    }

    pub fn channel(&self) -> ChannelInfo {
        ChannelInfo {
            title: self.feed_title.clone(),
            link: self.site_base_url.clone(),
            description: self.feed_description.clone(),
            language: self.feed_language.clone(),
            self_url: self.feed_self_url.clone(),
        }
    }
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, var: &str, value: &str) {
    match value.parse::<T>() {
        Ok(parsed) => *slot = parsed,
        Err(_) => tracing::warn!(var = %var, value = %value, "Ignoring invalid value"),
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ============================================================================
// Tests
// ============================================================================
