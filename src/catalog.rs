//! Product catalog and the persisted discovery cache.
//!
//! The template strategy builds feed URLs from `(slug, domain)` pairs. The
//! built-in list covers the products known at release time; products found
//! later by HTML discovery are appended to a small JSON cache and merged back
//! in on the next run. The cache is never pruned.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::write_atomic;

/// Maximum cache file size accepted on load.
const MAX_CACHE_SIZE: u64 = 1024 * 1024; // 1MB

/// One product of the documentation site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductDescriptor {
    /// Path segment naming the product (`zia`)
    pub slug: String,
    /// Cloud or tenant domain the feed is keyed on (`zscaler.net`)
    pub domain: String,
}

impl ProductDescriptor {
    pub fn new(slug: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            domain: domain.into(),
        }
    }
}

const KNOWN_PRODUCTS: &[(&str, &str)] = &[
    ("zia", "zscaler.net"),
    ("zpa", "private.zscaler.com"),
    ("zdx", "zdxcloud.net"),
    ("zscaler-client-connector", "mobile.zscaler.net"),
    ("cloud-branch-connector", "connector.zscaler.net"),
    ("dspm", "app.zsdpc.net"),
    ("workflow-automation", "Zscaler-Automation"),
    ("business-insights", "zscaleranalytics.net"),
    ("zidentity", "zslogin.net"),
    ("risk360", "zscalerrisk.net"),
    ("deception", "illusionblack.com"),
    ("itdr", "illusionblack.com"),
    ("breach-predictor", "zscalerbp.net"),
    ("zero-trust-branch", "goairgap.com"),
    ("zscaler-cellular", "admin.ztsim.com"),
    ("aem", "app.avalor.io"),
    ("zsdk", "ZSDK"),
    ("unified", "console.zscaler.com"),
];

/// The built-in product list.
pub fn known_products() -> Vec<ProductDescriptor> {
    KNOWN_PRODUCTS
        .iter()
        .map(|(slug, domain)| ProductDescriptor::new(*slug, *domain))
        .collect()
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("cache file too large ({0} bytes)")]
    TooLarge(u64),
}

/// Products discovered on earlier runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryCache {
    #[serde(default)]
    pub products: Vec<ProductDescriptor>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl DiscoveryCache {
    /// Reads the cache at `path`. A missing file is an empty cache.
    pub fn load(path: &Path) -> Result<Self, CacheError> {
        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        if metadata.len() > MAX_CACHE_SIZE {
            return Err(CacheError::TooLarge(metadata.len()));
        }

        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(&content)?)
    }

    /// Like [`DiscoveryCache::load`], but a broken cache is logged and
    /// treated as empty.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(cache) => cache,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Ignoring unreadable discovery cache"
                );
                Self::default()
            }
        }
    }

    /// `base` followed by every cached product not already in it.
    pub fn merge(&self, base: &[ProductDescriptor]) -> Vec<ProductDescriptor> {
        let mut merged = base.to_vec();
        for product in &self.products {
            if !merged.contains(product) {
                merged.push(product.clone());
            }
        }
        merged
    }

    /// Appends `product` unless it is already cached. Returns whether the
    /// cache changed.
    pub fn record(&mut self, product: ProductDescriptor) -> bool {
        if self.products.contains(&product) {
            return false;
        }
        tracing::info!(slug = %product.slug, domain = %product.domain, "New product discovered");
        self.products.push(product);
        self.last_updated = Some(Utc::now());
        true
    }

    /// Rewrites the whole cache file atomically.
    pub fn save(&self, path: &Path) -> Result<(), CacheError> {
        let json = serde_json::to_string_pretty(self)?;
        write_atomic(path, json.as_bytes())?;
        Ok(())
    }
}
