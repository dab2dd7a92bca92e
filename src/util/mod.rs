//! Utility functions for common operations.
//!
//! This module provides reusable utilities for:
//!
//! - **URL handling**: resolving scraped hrefs and canonicalizing entry links
//! - **Text processing**: cleaning scraped titles before they reach the feed XML
//! - **Files**: atomic replacement of the output feed and the discovery cache
//!
//! # Examples
//!
//! ```
//! use relfeed::util::{canonical_link, clean_text, resolve_url};
//!
//! let link = resolve_url("/zia/release-notes", "https://help.example.com/zia").unwrap();
//! assert_eq!(link, "https://help.example.com/zia/release-notes");
//!
//! assert_eq!(
//!     canonical_link("https://help.example.com/a#section").as_deref(),
//!     Some("https://help.example.com/a")
//! );
//!
//! assert_eq!(clean_text("  What's\n new   in ZIA "), "What's new in ZIA");
//! ```

mod atomic;
mod links;
mod text;

pub use self::atomic::write_atomic;
pub use self::text::clean_text;
pub use self::links::{canonical_link, resolve_url, same_host};
