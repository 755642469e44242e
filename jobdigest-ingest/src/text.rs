use scraper::{Html, Node, Selector};

/// Elements whose text is never listing content.
const SKIPPED: &[&str] = &["script", "style", "noscript", "template", "svg", "head"];

/// Readable text of a listing page: the `<title>` first, then every visible
/// text run (headings, paragraphs, list items, table cells) one per line with
/// whitespace collapsed. Plain-text input comes back with whitespace collapsed.
pub fn listing_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut lines: Vec<String> = Vec::new();

    if let Some(title) = title_of(&document) {
        lines.push(title);
    }

    for node in document.root_element().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .map(|e| SKIPPED.contains(&e.name()))
                .unwrap_or(false)
        });
        if hidden {
            continue;
        }

        let collapsed = collapse_whitespace(text);
        if !collapsed.is_empty() {
            lines.push(collapsed);
        }
    }

    lines.join("\n")
}

/// The page `<title>`, if it has one.
pub fn page_title(html: &str) -> Option<String> {
    title_of(&Html::parse_document(html))
}

fn title_of(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty())
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
