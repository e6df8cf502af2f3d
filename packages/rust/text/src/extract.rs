//! Readable text from raw HTML.

use scraper::{Html, Node};
use tracing::debug;

/// Elements whose text content never reaches a reader.
const HIDDEN_ELEMENTS: [&str; 3] = ["script", "style", "noscript"];

/// Extract the visible text of an HTML document.
///
/// Each text node is trimmed, empty ones are dropped, and the rest are joined
/// with `\n` in document order.
pub fn visible_text(html: &str) -> String {
    let doc = Html::parse_document(html);

    let lines: Vec<&str> = doc
        .tree
        .root()
        .descendants()
        .filter(|node| {
            !node.ancestors().any(|a| {
                a.value()
                    .as_element()
                    .is_some_and(|el| HIDDEN_ELEMENTS.contains(&el.name()))
            })
        })
        .filter_map(|node| match node.value() {
            Node::Text(text) => Some(text.trim()),
            _ => None,
        })
        .filter(|line| !line.is_empty())
        .collect();

    debug!(nodes = lines.len(), "extracted visible text");
    lines.join("\n")
}
