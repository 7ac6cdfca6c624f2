//! Link discovery in fetched HTML.
//!
//! A small attribute scanner rather than a full HTML parser: finds every
//! `href=` value (quoted or bare), resolves it against the page URL, and
//! keeps http(s) targets with the fragment stripped.

use reqwest::Url;

/// Extract absolute http(s) links from `html`, resolved against `base`.
///
/// Duplicates within one page are removed; order of first appearance is kept.
pub fn extract_links(base: &Url, html: &str) -> Vec<Url> {
    let mut links: Vec<Url> = Vec::new();
    let lower = html.to_ascii_lowercase();
    let mut cursor = 0;

    while let Some(found) = lower[cursor..].find("href") {
        let mut pos = cursor + found + "href".len();
        cursor = pos;

        pos = skip_whitespace(&lower, pos);
        if !lower[pos..].starts_with('=') {
            continue;
        }
        pos = skip_whitespace(&lower, pos + 1);

        let Some(raw) = attribute_value(html, pos) else {
            continue;
        };
        cursor = pos + raw.len();

        if let Some(link) = resolve(base, raw.trim()) {
            if !links.contains(&link) {
                links.push(link);
            }
        }
    }

    links
}

fn skip_whitespace(s: &str, mut pos: usize) -> usize {
    while s[pos..].starts_with(|c: char| c.is_ascii_whitespace()) {
        pos += 1;
    }
    pos
}

/// Raw attribute value starting at `pos`, without quotes.
fn attribute_value(html: &str, pos: usize) -> Option<&str> {
    let rest = &html[pos..];
    match rest.chars().next()? {
        quote @ ('"' | '\'') => {
            let end = rest[1..].find(quote)?;
            Some(&rest[1..1 + end])
        }
        _ => {
            let end = rest
                .find(|c: char| c.is_ascii_whitespace() || c == '>')
                .unwrap_or(rest.len());
            Some(&rest[..end])
        }
    }
}

fn resolve(base: &Url, raw: &str) -> Option<Url> {
    if raw.is_empty() || raw.starts_with('#') {
        return None;
    }
    let mut url = base.join(raw).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}

/// Whether two URLs share a host.
pub fn same_host(a: &Url, b: &Url) -> bool {
    match (a.host_str(), b.host_str()) {
        (Some(x), Some(y)) => x.eq_ignore_ascii_case(y),
        _ => false,
    }
}
