use url::Url;

/// Parses `raw` as an absolute http(s) URL and returns its canonical form.
///
/// The canonical form is what [`url::Url`] serializes (lowercased scheme and
/// host, normalized path) with the fragment removed, since `#anchors` point
/// into the same document. Returns `None` for relative URLs, other schemes,
/// or URLs without a host.
pub fn canonical_link(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw.trim()).ok()?;

    match url.scheme() {
        "http" | "https" => {}
        _ => return None,
    }
    url.host_str()?;

    url.set_fragment(None);
    Some(url.into())
}

/// Resolves a potentially relative href against the page it was found on.
///
/// Handles absolute URLs, protocol-relative URLs (`//cdn.example.com/x`),
/// root-relative and path-relative hrefs. Non-navigational hrefs
/// (`mailto:`, `javascript:`, bare fragments) yield `None`.
pub fn resolve_url(href: &str, base_url: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    // Already absolute
    if href.starts_with("http://") || href.starts_with("https://") {
        return canonical_link(href);
    }

    // SEC-014: Protocol-relative, go through the URL parser to normalize it
    if href.starts_with("//") {
        return canonical_link(&format!("https:{href}"));
    }

    let base = Url::parse(base_url).ok()?;
    let resolved = base.join(href).ok()?;
    canonical_link(resolved.as_str())
}

/// Returns the lowercased host of an absolute URL.
fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}

/// True when both URLs parse and share the same host (port ignored).
pub fn same_host(a: &str, b: &str) -> bool {
    match (host_of(a), host_of(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}
