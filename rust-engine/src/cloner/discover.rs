//! Asset reference discovery.
//!
//! A read-only pass over the fetched document that collects the raw
//! reference attributes of stylesheets, scripts and images. Resolution
//! against the page's base URL happens later, at fetch time.

use std::collections::HashSet;

use scraper::{Html, Selector};
use tracing::debug;

/// What kind of reference an attribute held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Stylesheet,
    Script,
    Image,
}

/// A raw reference attribute value found in the document.
#[derive(Debug, Clone)]
pub struct AssetRef {
    pub kind: AssetKind,
    /// Attribute value exactly as written in the source
    pub raw: String,
}

/// Collect stylesheet, script and image references (deduplicated by raw
/// value). Inline references such as data URIs and fragment/javascript
/// pseudo-URLs are not assets and are skipped.
pub fn discover_assets(html: &str) -> Vec<AssetRef> {
    let document = Html::parse_document(html);

    let selectors = [
        (AssetKind::Stylesheet, r#"link[rel="stylesheet"][href]"#, "href"),
        (AssetKind::Script, "script[src]", "src"),
        (AssetKind::Image, "img[src]", "src"),
    ];

    let mut seen = HashSet::new();
    let mut refs = Vec::new();

    for (kind, selector, attr) in selectors {
        let selector = Selector::parse(selector).expect("Invalid selector");
        for element in document.select(&selector) {
            let Some(raw) = element.value().attr(attr) else { continue };
            if raw.is_empty() || !is_fetchable(raw) {
                continue;
            }
            if seen.insert(raw.to_string()) {
                refs.push(AssetRef {
                    kind,
                    raw: raw.to_string(),
                });
            }
        }
    }

    debug!(count = refs.len(), "assets_discovered");
    refs
}

fn is_fetchable(raw: &str) -> bool {
    !(raw.starts_with("data:")
        || raw.starts_with('#')
        || raw.starts_with("javascript:")
        || raw.starts_with("mailto:"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovers_all_reference_kinds() {
        let html = r#"
            <html><head>
                <link rel="stylesheet" href="/css/main.css">
                <link rel="icon" href="/favicon.ico">
                <script src="https://cdn.example.com/app.js"></script>
                <script>inline();</script>
            </head><body>
                <img src="logo.png">
            </body></html>
        "#;

        let refs = discover_assets(html);
        assert_eq!(refs.len(), 3);
        assert!(refs
            .iter()
            .any(|r| r.kind == AssetKind::Stylesheet && r.raw == "/css/main.css"));
        assert!(refs
            .iter()
            .any(|r| r.kind == AssetKind::Script && r.raw == "https://cdn.example.com/app.js"));
        assert!(refs
            .iter()
            .any(|r| r.kind == AssetKind::Image && r.raw == "logo.png"));
    }

    #[test]
    fn test_deduplicates_repeated_references() {
        let html = r#"
            <img src="logo.png">
            <img src="logo.png">
            <img src="other.png">
        "#;

        let refs = discover_assets(html);
        assert_eq!(refs.len(), 2);
    }

    #[test]
    fn test_skips_inline_pseudo_urls() {
        let html = r#"
            <img src="data:image/png;base64,iVBORw0KGgo=">
            <script src="javascript:void(0)"></script>
            <img src="real.png">
        "#;

        let refs = discover_assets(html);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].raw, "real.png");
    }
}
