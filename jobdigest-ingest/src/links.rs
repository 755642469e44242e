//! Link Extractor.
//!
//! Finds listing URLs in an email body, whether the body is HTML (anchor
//! `href`s) or plain text (bare `http(s)://` URLs), and normalizes them so the
//! same listing reached through differently-tracked links collapses to one URL.
//!
//! The raw source is scanned rather than a decoded DOM: HTML entity decoding
//! would turn `&region=` into `®ion=` in plain-text URLs. Only `&amp;` is
//! decoded. Candidates are ordered by byte offset, so output order matches
//! first appearance in the source text.

use std::collections::HashSet;
use std::ops::Range;
use std::sync::OnceLock;

use jobdigest_core::models::ListingLink;
use regex::Regex;
use url::Url;

const URL_PATTERN: &str = r#"(?i)\bhttps?://[^\s<>"'`{}|\\^\[\]]+"#;
const ANCHOR_PATTERN: &str = r"(?is)<a\s[^>]*>";
const HREF_PATTERN: &str = r#"(?is)\shref\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#;
/// Regions whose text is never shown: scripts, styles and comments.
const HIDDEN_PATTERN: &str = r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>|<!--.*?-->";
/// Start or end tags. `<https://x.io>` in plain text has no tag name and is not matched.
const TAG_PATTERN: &str = r"<(?:/?[a-zA-Z][a-zA-Z0-9-]*(?:\s[^>]*)?/?|![^>]*)>";

/// Query parameters that only carry tracking state.
const TRACKING_PARAMS: &[&str] = &[
    "ref",
    "refid",
    "referrer",
    "trackingid",
    "utm",
    "gclid",
    "fbclid",
    "mc_cid",
    "mc_eid",
];
const TRACKING_PREFIXES: &[&str] = &["utm_", "trk"];

fn compiled(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

fn url_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&RE, URL_PATTERN)
}

fn anchor_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&RE, ANCHOR_PATTERN)
}

fn href_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&RE, HREF_PATTERN)
}

fn hidden_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&RE, HIDDEN_PATTERN)
}

fn tag_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&RE, TAG_PATTERN)
}

#[derive(Debug, Clone, Default)]
pub struct LinkExtractor {
    /// Lowercase substrings; a link is kept when it contains any of them. Empty keeps all.
    keywords: Vec<String>,
}

impl LinkExtractor {
    pub fn new(keywords: &[String]) -> Self {
        Self {
            keywords: keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    /// Distinct normalized links in `body`, in first-seen order.
    ///
    /// `discovery_index` is the position within this message; `merge_links`
    /// reassigns it across a whole cycle.
    pub fn extract(&self, message_id: &str, body: &str) -> Vec<ListingLink> {
        let mut seen = HashSet::new();
        let mut links = Vec::new();

        for candidate in candidate_urls(body) {
            let Some(url) = normalize_url(&candidate) else {
                continue;
            };
            if !self.is_wanted(&url) || !seen.insert(url.clone()) {
                continue;
            }
            links.push(ListingLink {
                url,
                source_message_id: message_id.to_string(),
                discovery_index: links.len(),
            });
        }

        tracing::trace!(message_id = %message_id, count = links.len(), "Extracted links");
        links
    }

    fn is_wanted(&self, url: &str) -> bool {
        if self.keywords.is_empty() {
            return true;
        }
        let lower = url.to_lowercase();
        self.keywords.iter().any(|k| lower.contains(k.as_str()))
    }
}

/// Raw URL candidates in source order: anchor hrefs and bare URLs outside markup.
fn candidate_urls(body: &str) -> Vec<String> {
    let hidden = ranges(hidden_regex(), body);
    let tags = ranges(tag_regex(), body);
    let mut found: Vec<(usize, String)> = Vec::new();

    if let (Some(anchors), Some(href)) = (anchor_regex(), href_regex()) {
        for tag in anchors.find_iter(body) {
            if covers(&hidden, tag.start()) {
                continue;
            }
            let value = href
                .captures(tag.as_str())
                .and_then(|c| c.get(1).or_else(|| c.get(2)).or_else(|| c.get(3)));
            if let Some(value) = value {
                found.push((tag.start(), decode_amp(value.as_str().trim())));
            }
        }
    }

    if let Some(re) = url_regex() {
        for m in re.find_iter(body) {
            if covers(&hidden, m.start()) || covers(&tags, m.start()) {
                continue;
            }
            let decoded = decode_amp(m.as_str());
            found.push((m.start(), trim_trailing_punctuation(&decoded).to_string()));
        }
    }

    found.sort_by_key(|(offset, _)| *offset);
    found.into_iter().map(|(_, url)| url).collect()
}

fn ranges(re: Option<&Regex>, body: &str) -> Vec<Range<usize>> {
    re.map(|re| re.find_iter(body).map(|m| m.range()).collect())
        .unwrap_or_default()
}

fn covers(ranges: &[Range<usize>], offset: usize) -> bool {
    ranges.iter().any(|r| r.contains(&offset))
}

/// The one entity that routinely appears inside URLs in HTML source.
fn decode_amp(raw: &str) -> String {
    raw.replace("&amp;", "&")
        .replace("&#38;", "&")
        .replace("&#x26;", "&")
}

/// Sentence punctuation directly after a bare URL is almost never part of it.
fn trim_trailing_punctuation(url: &str) -> &str {
    let mut trimmed = url.trim_end_matches(['.', ',', ';', ':', '!', '?', '\'', '"']);
    // Drop an unbalanced closing paren, e.g. "(see https://x.io/a)".
    while trimmed.ends_with(')') && trimmed.matches('(').count() < trimmed.matches(')').count() {
        trimmed = &trimmed[..trimmed.len() - 1];
    }
    trimmed
}

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    TRACKING_PARAMS.contains(&key.as_str()) || TRACKING_PREFIXES.iter().any(|p| key.starts_with(p))
}

/// Canonical form of a listing URL, or `None` for anything that is not an absolute http(s) URL.
///
/// Scheme and host are lowercased, default ports and fragments dropped,
/// tracking parameters removed (remaining ones keep their order) and a trailing
/// slash removed from non-root paths.
pub fn normalize_url(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.host_str().filter(|h| !h.is_empty())?;

    url.set_fragment(None);

    if let Some(query) = url.query() {
        let kept: Vec<&str> = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .filter(|pair| {
                let key = pair.split('=').next().unwrap_or(pair);
                !is_tracking_param(key)
            })
            .collect();
        let kept = kept.join("&");
        url.set_query(if kept.is_empty() { None } else { Some(&kept) });
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    Some(url.to_string())
}

/// Cycle-wide dedup across messages. The first occurrence wins and
/// `discovery_index` becomes its position in the merged sequence.
pub fn merge_links<I>(per_message: I) -> Vec<ListingLink>
where
    I: IntoIterator<Item = Vec<ListingLink>>,
{
    let mut seen = HashSet::new();
    let mut merged = Vec::new();

    for link in per_message.into_iter().flatten() {
        if !seen.insert(link.url.clone()) {
            continue;
        }
        merged.push(ListingLink {
            discovery_index: merged.len(),
            ..link
        });
    }

    merged
}
