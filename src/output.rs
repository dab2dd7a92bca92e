//! RSS 2.0 serialization of the aggregated entries.

use std::io::{Cursor, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::feed::FeedEntry;
use crate::util::write_atomic;

const ATOM_NS: &str = "http://www.w3.org/2005/Atom";
const GENERATOR: &str = concat!("relfeed ", env!("CARGO_PKG_VERSION"));

/// Channel-level metadata of the output feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub title: String,
    /// Site the feed describes
    pub link: String,
    pub description: String,
    pub language: String,
    /// Public URL of the feed document itself, for `atom:link rel="self"`
    pub self_url: Option<String>,
}

/// Renders `entries` (already in output order) as an RSS 2.0 document.
pub fn build_rss(
    channel: &ChannelInfo,
    entries: &[FeedEntry],
    built_at: DateTime<Utc>,
) -> Result<String> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .context("Failed to write XML declaration")?;

    let mut rss = BytesStart::new("rss");
    rss.push_attribute(("version", "2.0"));
    rss.push_attribute(("xmlns:atom", ATOM_NS));
    writer
        .write_event(Event::Start(rss))
        .context("Failed to write rss element")?;
    writer
        .write_event(Event::Start(BytesStart::new("channel")))
        .context("Failed to write channel element")?;

    text_element(&mut writer, "title", &channel.title)?;
    text_element(&mut writer, "link", &channel.link)?;
    text_element(&mut writer, "description", &channel.description)?;
    text_element(&mut writer, "language", &channel.language)?;
    text_element(&mut writer, "lastBuildDate", &built_at.to_rfc2822())?;
    text_element(&mut writer, "generator", GENERATOR)?;

    if let Some(self_url) = &channel.self_url {
        let mut atom_link = BytesStart::new("atom:link");
        atom_link.push_attribute(("href", self_url.as_str()));
        atom_link.push_attribute(("rel", "self"));
        atom_link.push_attribute(("type", "application/rss+xml"));
        writer
            .write_event(Event::Empty(atom_link))
            .context("Failed to write atom:link element")?;
    }

    for entry in entries {
        write_item(&mut writer, entry)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("channel")))
        .context("Failed to write channel end")?;
    writer
        .write_event(Event::End(BytesEnd::new("rss")))
        .context("Failed to write rss end")?;

    let result = writer.into_inner().into_inner();
    String::from_utf8(result).context("Generated RSS contains invalid UTF-8")
}

fn write_item<W: Write>(writer: &mut Writer<W>, entry: &FeedEntry) -> Result<()> {
    writer
        .write_event(Event::Start(BytesStart::new("item")))
        .context("Failed to write item element")?;

    text_element(writer, "title", &entry.title)?;
    text_element(writer, "link", &entry.link)?;

    let mut guid = BytesStart::new("guid");
    guid.push_attribute(("isPermaLink", "true"));
    writer
        .write_event(Event::Start(guid))
        .context("Failed to write guid element")?;
    writer
        .write_event(Event::Text(BytesText::new(&entry.link)))
        .context("Failed to write guid text")?;
    writer
        .write_event(Event::End(BytesEnd::new("guid")))
        .context("Failed to write guid end")?;

    text_element(writer, "pubDate", &entry.published.to_rfc2822())?;
    text_element(writer, "description", &item_description(entry))?;
    if !entry.category.is_empty() {
        text_element(writer, "category", &entry.category)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("item")))
        .context("Failed to write item end")?;
    Ok(())
}

/// The item's own summary, else a line pointing at where it was found.
fn item_description(entry: &FeedEntry) -> String {
    if entry.summary.is_empty() {
        format!("{} - Source: {}", entry.title, entry.source)
    } else {
        entry.summary.clone()
    }
}

fn text_element<W: Write>(writer: &mut Writer<W>, name: &str, text: &str) -> Result<()> {
    writer
        .create_element(name)
        .write_text_content(BytesText::new(text))
        .with_context(|| format!("Failed to write {name} element"))?;
    Ok(())
}

/// Writes the feed document to `path`, creating parent directories and
/// replacing any previous file atomically.
pub fn write_feed(path: &Path, xml: &str) -> Result<()> {
    write_atomic(path, xml.as_bytes())
        .with_context(|| format!("Failed to write feed to '{}'", path.display()))
}
