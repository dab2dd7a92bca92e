//! Merging entries from every source into the final feed order.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};

use crate::feed::FeedEntry;

/// Result of [`aggregate`] with the counts the run report needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregation {
    /// Surviving entries, newest first
    pub entries: Vec<FeedEntry>,
    /// Entries handed in
    pub total: usize,
    /// Entries inside the recency window
    pub in_window: usize,
    /// Entries dropped as repeats of an earlier link
    pub duplicates: usize,
}

/// Filters, deduplicates and orders `entries`.
///
/// 1. Keeps entries published at or after `now - backfill_days`
///    (`None` disables the window).
/// 2. Keeps the first entry per link, in input order.
/// 3. Sorts newest first; equal timestamps keep their input order.
pub fn aggregate(
    entries: Vec<FeedEntry>,
    backfill_days: Option<u32>,
    now: DateTime<Utc>,
) -> Aggregation {
    let total = entries.len();

    let cutoff = backfill_days.map(|days| window_start(now, days));
    let windowed: Vec<FeedEntry> = match cutoff {
        Some(cutoff) => entries.into_iter().filter(|e| e.published >= cutoff).collect(),
        None => entries,
    };
    let in_window = windowed.len();

    let mut seen = HashSet::new();
    let mut unique: Vec<FeedEntry> = windowed
        .into_iter()
        .filter(|e| seen.insert(e.link.clone()))
        .collect();
    let duplicates = in_window - unique.len();

    // Vec::sort_by is stable
    unique.sort_by(|a, b| b.published.cmp(&a.published));

    tracing::debug!(total, in_window, duplicates, kept = unique.len(), "Aggregated entries");

    Aggregation {
        entries: unique,
        total,
        in_window,
        duplicates,
    }
}

/// Earliest accepted timestamp; a window reaching past chrono's range is unbounded.
fn window_start(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    Duration::try_days(i64::from(days))
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
