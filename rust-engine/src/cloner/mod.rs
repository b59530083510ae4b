//! Site cloning pipeline.
//!
//! Produces a visually faithful, self-contained, instrumented copy of a
//! target page: fetch, discover assets, localize them under
//! content-addressed names, rewrite references and forms, apply evasion
//! transforms, serialize. Only the initial fetch is fatal; everything
//! else degrades per asset or per transform.

pub mod assets;
pub mod discover;
pub mod rewrite;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::Client;
use tracing::{info, warn};
use url::Url;

use crate::error::{Error, Result};

pub use assets::{Asset, AssetIndex, MimeClass};
pub use discover::{AssetKind, AssetRef};
pub use rewrite::RewriteOutcome;

/// Path every cloned form posts to.
const CAPTURE_PATH: &str = "/capture";

/// Evasion transforms, each independently toggleable. Both are
/// best-effort and never break form submission.
#[derive(Debug, Clone)]
pub struct EvasionOptions {
    /// Rewrite declaration keywords in inline scripts to shift the
    /// page's static signature
    pub obfuscate_scripts: bool,

    /// Replace element id attributes with random values to break
    /// selector-based fingerprinting
    pub randomize_ids: bool,
}

impl Default for EvasionOptions {
    fn default() -> Self {
        Self {
            obfuscate_scripts: true,
            randomize_ids: true,
        }
    }
}

/// What a clone invocation produced.
#[derive(Debug)]
pub struct CloneReport {
    /// Final page URL after redirects
    pub page_url: Url,
    pub output_dir: PathBuf,
    pub assets: Vec<Asset>,
    /// References left remote after per-asset failures
    pub skipped: Vec<String>,
    pub forms_rewritten: usize,
}

pub struct SiteCloner {
    client: Client,
    timeout: Duration,
    index: AssetIndex,
}

impl SiteCloner {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            index: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Clone one page into `output_dir`.
    ///
    /// The clone directory is create-once: `index.html` plus an `assets/`
    /// folder, never mutated in place afterwards.
    pub async fn clone_page(
        &self,
        url: &str,
        output_dir: &Path,
        campaign: Option<&str>,
        evasion: &EvasionOptions,
    ) -> Result<CloneReport> {
        let url = normalize_url(url)?;

        let assets_dir = output_dir.join("assets");
        tokio::fs::create_dir_all(&assets_dir).await?;

        // Fetching the root document is the only fatal step.
        let response = self
            .client
            .get(url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::Fetch {
                url: url.to_string(),
                reason: e.to_string(),
            })?
            .error_for_status()
            .map_err(|e| Error::Fetch {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let page_url = response.url().clone();
        let html = response.text().await.map_err(|e| Error::Fetch {
            url: page_url.to_string(),
            reason: e.to_string(),
        })?;

        let refs = discover::discover_assets(&html);
        let (localized, skipped) = assets::localize_assets(
            &self.client,
            &page_url,
            &refs,
            &assets_dir,
            &self.index,
            self.timeout,
        )
        .await;

        for raw in &skipped {
            warn!(reference = %raw, "asset_kept_remote");
        }

        let replacements: HashMap<String, String> = localized
            .iter()
            .map(|(raw, asset)| (raw.clone(), asset.local_path.clone()))
            .collect();

        let (document, outcome) =
            rewrite::rewrite_document(&html, &replacements, campaign, CAPTURE_PATH, evasion);

        tokio::fs::write(output_dir.join("index.html"), document).await?;

        info!(
            url = %page_url,
            output = %output_dir.display(),
            assets_localized = localized.len(),
            assets_skipped = skipped.len(),
            forms_rewritten = outcome.forms_rewritten,
            refs_rewritten = outcome.refs_rewritten,
            "page_cloned"
        );

        Ok(CloneReport {
            page_url,
            output_dir: output_dir.to_path_buf(),
            assets: localized.into_iter().map(|(_, asset)| asset).collect(),
            skipped,
            forms_rewritten: outcome.forms_rewritten,
        })
    }
}

/// Normalize a user-supplied URL, defaulting the scheme to https.
fn normalize_url(raw: &str) -> Result<Url> {
    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };
    Url::parse(&candidate).map_err(|e| Error::Fetch {
        url: raw.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header;
    use axum::response::Html as AxumHtml;
    use axum::{routing::get, Router};
    use scraper::{Html, Selector};

    const PAGE: &str = r#"<html><head>
            <link rel="stylesheet" href="/style.css">
        </head><body>
            <img src="/logo.png">
            <img src="/logo2.png">
            <img src="/missing.png">
            <form action="/login" method="GET"><input name="username"></form>
            <form action="/reset"><input name="email"></form>
        </body></html>"#;

    async fn spawn_site() -> std::net::SocketAddr {
        let app = Router::new()
            .route("/", get(|| async { AxumHtml(PAGE) }))
            .route(
                "/style.css",
                get(|| async { ([(header::CONTENT_TYPE, "text/css")], "body{margin:0}") }),
            )
            .route(
                "/logo.png",
                get(|| async { ([(header::CONTENT_TYPE, "image/png")], &b"PNGDATA"[..]) }),
            )
            .route(
                "/logo2.png",
                get(|| async { ([(header::CONTENT_TYPE, "image/png")], &b"PNGDATA"[..]) }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_clone_page_end_to_end() {
        let addr = spawn_site().await;
        let out = tempfile::tempdir().unwrap();
        let cloner = SiteCloner::new(reqwest::Client::new(), Duration::from_secs(5));

        let report = cloner
            .clone_page(
                &format!("http://{addr}/"),
                out.path(),
                Some("demo"),
                &EvasionOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(report.forms_rewritten, 2);
        assert_eq!(report.assets.len(), 3);
        // The unreachable image stays a remote reference.
        assert_eq!(report.skipped, vec!["/missing.png".to_string()]);

        // logo.png and logo2.png carry identical content: content-addressed
        // dedup stores one file, so assets/ holds one css + one png.
        let stored = std::fs::read_dir(out.path().join("assets")).unwrap().count();
        assert_eq!(stored, 2);

        let document = std::fs::read_to_string(out.path().join("index.html")).unwrap();
        assert!(document.contains("/missing.png"));

        let doc = Html::parse_document(&document);
        let forms = Selector::parse("form").unwrap();
        for form in doc.select(&forms) {
            assert_eq!(form.value().attr("action"), Some("/capture"));
            assert_eq!(form.value().attr("method"), Some("POST"));
        }
        let campaign_field =
            Selector::parse(r#"input[name="campaign"][value="demo"]"#).unwrap();
        assert_eq!(doc.select(&campaign_field).count(), 2);
        let honeypot = Selector::parse(r#"input[name="honeypot"]"#).unwrap();
        assert_eq!(doc.select(&honeypot).count(), 2);
    }

    #[tokio::test]
    async fn test_clone_unreachable_root_is_fatal() {
        let out = tempfile::tempdir().unwrap();
        let cloner = SiteCloner::new(reqwest::Client::new(), Duration::from_secs(1));
        let err = cloner
            .clone_page(
                "http://127.0.0.1:1/",
                out.path(),
                None,
                &EvasionOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Fetch { .. }));
    }

    #[test]
    fn test_normalize_url_adds_scheme() {
        let url = normalize_url("example.com/login").unwrap();
        assert_eq!(url.as_str(), "https://example.com/login");
    }

    #[test]
    fn test_normalize_url_keeps_scheme() {
        let url = normalize_url("http://example.com").unwrap();
        assert_eq!(url.scheme(), "http");
    }

    #[test]
    fn test_normalize_url_rejects_garbage() {
        assert!(matches!(
            normalize_url("http://"),
            Err(Error::Fetch { .. })
        ));
    }
}
