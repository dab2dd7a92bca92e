/// Cleans scraped or feed-supplied text for use as an entry title or summary.
///
/// Drops characters that are not allowed in XML 1.0 documents (C0 controls
/// other than tab/newline/CR, DEL, and the `U+FFFE`/`U+FFFF` noncharacters),
/// then collapses every run of whitespace into a single space and trims.
pub fn clean_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_space = false;

    for c in s.chars() {
        if is_xml_illegal(c) {
            continue;
        }
        if c.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(c);
    }

    out
}

fn is_xml_illegal(c: char) -> bool {
    matches!(c, '\u{0}'..='\u{8}' | '\u{b}' | '\u{c}' | '\u{e}'..='\u{1f}' | '\u{7f}')
        || c == '\u{fffe}'
        || c == '\u{ffff}'
}
