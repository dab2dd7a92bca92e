//! Best-effort date normalization.
//!
//! Release-note pages and feeds carry dates in every shape imaginable. This
//! module turns them into a single UTC timestamp. [`normalize`] is total: a
//! missing or unparsable date becomes "now", so an otherwise valid entry is
//! never excluded just because its date could not be read.
//!
//! For HTML documents, [`extract_published`] tries in order:
//!
//! 1. structured `<meta>` tags (`article:published_time` and friends)
//! 2. the first `<time>` element (`datetime` attribute, else its text)
//! 3. a free-text scan over elements mentioning "published", "updated", ...
//!
//! The first strategy that finds *something* wins, even if that something
//! then fails to parse. The free-text scan is a heuristic and will miss
//! dates written in shapes other than `D Month YYYY`, `Month D, YYYY` and
//! `YYYY-MM-DD`.

use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::util::clean_text;

/// Meta tags consulted first, in priority order: `(css selector, attribute)`.
const META_SELECTORS: &[(&str, &str)] = &[
    (r#"meta[property="article:published_time"]"#, "content"),
    (r#"meta[name="article:published_time"]"#, "content"),
    (r#"meta[property="og:updated_time"]"#, "content"),
    (r#"meta[name="date"]"#, "content"),
];

/// Lowercase keywords marking an element as likely to contain a date.
const DATE_KEYWORDS: &[&str] = &[
    "published",
    "updated",
    "release",
    "released",
    "date",
    "last updated",
];

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%z",
    "%Y-%m-%d %H:%M:%S%z",
    "%Y-%m-%d %H:%M:%S %z",
    "%Y-%m-%dT%H:%M%z",
];

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%d %B %Y",
    "%d %b %Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%Y/%m/%d",
    "%m/%d/%Y",
];

/// Elements whose text never counts as visible.
const INVISIBLE_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

/// Which extraction strategy located a date string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateSource {
    Meta,
    TimeElement,
    Heuristic,
}

fn date_shape_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d{1,2}\s+\w+\s+\d{4}|\w+\s+\d{1,2},\s*\d{4}|\d{4}-\d{2}-\d{2})").ok()
    })
    .as_ref()
}

/// Normalizes an optional date string into a UTC timestamp.
///
/// Never fails: `None`, empty input, or anything [`parse_date`] rejects
/// yields the current time in UTC.
pub fn normalize(text: Option<&str>) -> DateTime<Utc> {
    match text.and_then(parse_date) {
        Some(dt) => dt,
        None => {
            if let Some(raw) = text.filter(|t| !t.trim().is_empty()) {
                tracing::debug!(date = %raw, "Unparsable date, falling back to now");
            }
            Utc::now()
        }
    }
}

/// Parses a date string in any of the supported shapes.
///
/// Zoned timestamps are converted to UTC; timestamps without zone
/// information are taken to be UTC already, and bare dates are midnight UTC.
pub fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    let text = clean_text(text);
    if text.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(&text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(&text) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(&text, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in NAIVE_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&text, fmt) {
            return Some(dt.and_utc());
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(&text, fmt) {
            return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }

    // "Monday, March 3, 2025": drop a leading weekday and retry
    if let Some((head, rest)) = text.split_once(',') {
        if !head.is_empty() && head.chars().all(char::is_alphabetic) {
            return parse_date(rest);
        }
    }

    None
}

/// Determines the publication date of an HTML document.
///
/// Runs the strategies described in the module docs and normalizes the first
/// date string found; see [`normalize`] for the fallback.
pub fn extract_published(doc: &Html) -> DateTime<Utc> {
    let found = find_date_text(doc);
    normalize(found.as_ref().map(|(_, text)| text.as_str()))
}

/// Locates the raw date string of an HTML document without parsing it.
pub fn find_date_text(doc: &Html) -> Option<(DateSource, String)> {
    for (css, attr) in META_SELECTORS {
        let Ok(selector) = Selector::parse(css) else {
            continue;
        };
        let value = doc
            .select(&selector)
            .next()
            .and_then(|el| el.value().attr(attr))
            .filter(|v| !v.trim().is_empty());
        if let Some(value) = value {
            return Some((DateSource::Meta, value.to_string()));
        }
    }

    if let Ok(selector) = Selector::parse("time") {
        if let Some(time_el) = doc.select(&selector).next() {
            if let Some(dt) = time_el.value().attr("datetime").filter(|v| !v.trim().is_empty()) {
                return Some((DateSource::TimeElement, dt.to_string()));
            }
            let text = visible_text(time_el);
            if !text.is_empty() {
                return Some((DateSource::TimeElement, text));
            }
        }
    }

    scan_for_date_text(doc).map(|text| (DateSource::Heuristic, text))
}

/// Free-text fallback: walks every element in document order and returns the
/// first date-shaped substring inside an element that mentions a keyword.
fn scan_for_date_text(doc: &Html) -> Option<String> {
    let selector = Selector::parse("*").ok()?;
    let re = date_shape_regex()?;

    for el in doc.select(&selector) {
        if INVISIBLE_ELEMENTS.contains(&el.value().name()) {
            continue;
        }
        let text = visible_text(el);
        let lower = text.to_lowercase();
        if !DATE_KEYWORDS.iter().any(|k| lower.contains(k)) {
            continue;
        }
        if let Some(m) = re.find(&text) {
            return Some(m.as_str().to_string());
        }
    }

    None
}

/// Text content of an element, skipping script/style subtrees, whitespace
/// collapsed.
pub(crate) fn visible_text(el: ElementRef<'_>) -> String {
    let mut out = String::new();

    for node in el.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|a| INVISIBLE_ELEMENTS.contains(&a.value().name()));
        if hidden {
            continue;
        }
        out.push_str(text);
        out.push(' ');
    }

    clean_text(&out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Duration, TimeZone, Timelike};

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn assert_is_now(dt: DateTime<Utc>, before: DateTime<Utc>) {
        let after = Utc::now();
        assert!(dt >= before && dt <= after, "{dt} not within [{before}, {after}]");
    }

    // --- normalize / parse_date ---

    #[test]
    fn test_normalize_none_is_now() {
        let before = Utc::now();
        assert_is_now(normalize(None), before);
    }

    #[test]
    fn test_normalize_garbage_is_now() {
        let before = Utc::now();
        assert_is_now(normalize(Some("not a date")), before);
        assert_is_now(normalize(Some("")), before);
        assert_is_now(normalize(Some("2024-13-45")), before);
    }

    #[test]
    fn test_parse_rfc2822() {
        assert_eq!(
            parse_date("Mon, 16 Dec 2024 10:00:00 +0000"),
            Some(utc(2024, 12, 16, 10, 0))
        );
        assert_eq!(
            parse_date("Fri, 13 Dec 2024 14:30:00 GMT"),
            Some(utc(2024, 12, 13, 14, 30))
        );
    }

    #[test]
    fn test_parse_rfc3339() {
        assert_eq!(
            parse_date("2024-12-16T10:00:00Z"),
            Some(utc(2024, 12, 16, 10, 0))
        );
    }

    #[test]
    fn test_offsets_are_converted_to_utc() {
        assert_eq!(
            parse_date("2024-12-16T10:00:00+02:00"),
            Some(utc(2024, 12, 16, 8, 0))
        );
        assert_eq!(
            parse_date("Mon, 16 Dec 2024 01:00:00 -0500"),
            Some(utc(2024, 12, 16, 6, 0))
        );
    }

    #[test]
    fn test_naive_timestamps_assumed_utc() {
        assert_eq!(
            parse_date("2024-12-16T10:00:00"),
            Some(utc(2024, 12, 16, 10, 0))
        );
        assert_eq!(
            parse_date("2024-12-16 10:00:00"),
            Some(utc(2024, 12, 16, 10, 0))
        );
    }

    #[test]
    fn test_parse_heuristic_shapes() {
        let expected = Some(utc(2024, 12, 16, 0, 0));
        assert_eq!(parse_date("16 December 2024"), expected);
        assert_eq!(parse_date("16 Dec 2024"), expected);
        assert_eq!(parse_date("December 16, 2024"), expected);
        assert_eq!(parse_date("Dec 16, 2024"), expected);
        assert_eq!(parse_date("2024-12-16"), expected);
    }

    #[test]
    fn test_parse_single_digit_day_and_extra_whitespace() {
        assert_eq!(parse_date("March  5,  2025"), Some(utc(2025, 3, 5, 0, 0)));
        assert_eq!(parse_date(" 5 March 2025\n"), Some(utc(2025, 3, 5, 0, 0)));
    }

    #[test]
    fn test_parse_leading_weekday() {
        assert_eq!(
            parse_date("Monday, March 3, 2025"),
            Some(utc(2025, 3, 3, 0, 0))
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_date("not a date"), None);
        assert_eq!(parse_date("Release 42"), None);
        assert_eq!(parse_date(""), None);
    }

    // --- HTML extraction ---

    #[test]
    fn test_meta_published_time_wins() {
        let doc = Html::parse_document(
            r#"<html><head>
                <meta property="article:published_time" content="2025-01-10T08:00:00Z">
            </head><body>
                <time datetime="2024-01-01">Jan 1</time>
                <p>Last updated 2 February 2023</p>
            </body></html>"#,
        );
        assert_eq!(
            find_date_text(&doc),
            Some((DateSource::Meta, "2025-01-10T08:00:00Z".to_string()))
        );
        assert_eq!(extract_published(&doc), utc(2025, 1, 10, 8, 0));
    }

    #[test]
    fn test_meta_name_date() {
        let doc = Html::parse_document(
            r#"<html><head><meta name="date" content="2025-02-03"></head><body></body></html>"#,
        );
        assert_eq!(extract_published(&doc), utc(2025, 2, 3, 0, 0));
    }

    #[test]
    fn test_time_datetime_attribute() {
        let doc = Html::parse_document(
            r#"<html><body><time datetime="2025-03-04T12:00:00+01:00">4 March</time></body></html>"#,
        );
        assert_eq!(find_date_text(&doc).map(|(s, _)| s), Some(DateSource::TimeElement));
        assert_eq!(extract_published(&doc), utc(2025, 3, 4, 11, 0));
    }

    #[test]
    fn test_time_text_when_no_attribute() {
        let doc = Html::parse_document(
            r#"<html><body><time> March 4, 2025 </time></body></html>"#,
        );
        assert_eq!(extract_published(&doc), utc(2025, 3, 4, 0, 0));
    }

    #[test]
    fn test_heuristic_keyword_scan() {
        let doc = Html::parse_document(
            r#"<html><body>
                <h1>ZIA Release Notes</h1>
                <div class="meta">Published on 7 April 2025 by the docs team</div>
            </body></html>"#,
        );
        let (source, text) = find_date_text(&doc).unwrap();
        assert_eq!(source, DateSource::Heuristic);
        assert_eq!(text, "7 April 2025");
        assert_eq!(extract_published(&doc), utc(2025, 4, 7, 0, 0));
    }

    #[test]
    fn test_heuristic_uses_document_order() {
        // The outermost keyword-bearing element contains both dates; its text
        // is scanned first, so the earlier date in the document wins.
        let doc = Html::parse_document(
            r#"<html><body>
                <p>Updated 2025-05-01</p>
                <p>Released 2024-01-01</p>
            </body></html>"#,
        );
        assert_eq!(extract_published(&doc), utc(2025, 5, 1, 0, 0));
    }

    #[test]
    fn test_heuristic_ignores_script_text() {
        let doc = Html::parse_document(
            r#"<html><head><script>var date = "2020-01-01";</script></head>
               <body><p>Nothing to see 2021-01-01</p></body></html>"#,
        );
        // No visible keyword, so the heuristic finds nothing
        assert_eq!(find_date_text(&doc), None);
    }

    #[test]
    fn test_no_date_falls_back_to_now() {
        let doc = Html::parse_document("<html><body><p>Hello</p></body></html>");
        let before = Utc::now();
        assert_is_now(extract_published(&doc), before);
    }

    #[test]
    fn test_unparsable_match_falls_back_to_now() {
        // Meta wins the strategy race but holds garbage; no further strategies run
        let doc = Html::parse_document(
            r#"<html><head><meta name="date" content="sometime soon"></head>
               <body><time datetime="2025-01-01">x</time></body></html>"#,
        );
        let before = Utc::now();
        assert_is_now(extract_published(&doc), before);
    }

    #[test]
    fn test_extracted_dates_are_utc_midnight_for_bare_dates() {
        let dt = parse_date("2025-06-30").unwrap();
        assert_eq!((dt.year(), dt.month(), dt.day()), (2025, 6, 30));
        assert_eq!(dt.hour(), 0);
        assert!(Utc::now() - dt > Duration::zero());
    }
}
