//! Same-site subpage discovery.

use std::collections::HashSet;

use scraper::{Html, Selector};
use url::Url;

/// Collect the subpages of `website` linked from `html`.
///
/// Every `a[href]` is resolved against `website`; a link is kept only when
/// its resolved form starts with the `website` string itself. That is a
/// prefix heuristic, not an origin comparison: `https://x.org/blog` keeps
/// `https://x.org/blog/post` but drops `https://x.org/about`. Fragments are
/// removed and duplicates dropped, keeping first-seen order.
pub fn same_site_links(html: &str, website: &str) -> Vec<String> {
    let website = website.trim();
    let Ok(base) = Url::parse(website) else {
        return Vec::new();
    };

    let doc = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for href in extract_hrefs(&doc) {
        let Ok(mut resolved) = base.join(href) else {
            continue;
        };
        resolved.set_fragment(None);

        let resolved = resolved.to_string();
        if resolved.starts_with(website) && seen.insert(resolved.clone()) {
            links.push(resolved);
        }
    }

    links
}

/// Raw `href` values worth resolving.
fn extract_hrefs(doc: &Html) -> Vec<&str> {
    let link_sel = Selector::parse("a[href]").unwrap();
    doc.select(&link_sel)
        .filter_map(|el| el.value().attr("href"))
        .map(str::trim)
        // Skip anchors, javascript:, mailto:
        .filter(|href| {
            !(href.is_empty()
                || href.starts_with('#')
                || href.starts_with("javascript:")
                || href.starts_with("mailto:"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_same_site_links() {
        let html = r#"<html><body>
            <a href="/about">About</a>
            <a href="https://x.org/team">Team</a>
            <a href="https://other.com/x">Elsewhere</a>
        </body></html>"#;

        let links = same_site_links(html, "https://x.org/");
        assert_eq!(links, vec!["https://x.org/about", "https://x.org/team"]);
    }

    #[test]
    fn deduplicates_and_strips_fragments() {
        let html = r##"<a href="/about">A</a><a href="/about#staff">B</a>
            <a href="https://x.org/about">C</a><a href="#top">Top</a>
            <a href="mailto:hi@x.org">Mail</a><a>No href</a>"##;

        let links = same_site_links(html, "https://x.org");
        assert_eq!(links, vec!["https://x.org/about"]);
    }

    #[test]
    fn prefix_heuristic_uses_original_string() {
        let html = r#"<a href="post-1">Post</a><a href="/about">About</a>"#;

        let links = same_site_links(html, "https://x.org/blog/");
        assert_eq!(links, vec!["https://x.org/blog/post-1"]);
    }

    #[test]
    fn unparsable_website_yields_nothing() {
        let html = r#"<a href="/about">About</a>"#;
        assert!(same_site_links(html, "x.org").is_empty());
    }
}
