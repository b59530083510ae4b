//! Content-addressed asset localization.
//!
//! Every fetched asset is stored under a filename derived from the sha256
//! of its content, so identical content resolves to one stored file no
//! matter how many references or cloning runs point at it. The dedup
//! index is shared across invocations; the first writer wins and later
//! writers detect the existing entry and skip.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use url::Url;

use crate::cloner::discover::AssetRef;

/// Coarse classification by declared content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MimeClass {
    Css,
    Js,
    Image,
    Binary,
}

impl MimeClass {
    /// Classify a declared content type, falling back to binary when the
    /// type is unknown.
    pub fn classify(content_type: Option<&str>) -> Self {
        let Some(ct) = content_type else {
            return MimeClass::Binary;
        };
        if ct.starts_with("text/css") {
            MimeClass::Css
        } else if ct.contains("javascript") || ct.contains("ecmascript") {
            MimeClass::Js
        } else if ct.starts_with("image/") {
            MimeClass::Image
        } else {
            MimeClass::Binary
        }
    }
}

/// File extension for a declared content type.
pub fn extension_for(content_type: Option<&str>) -> &'static str {
    match content_type {
        Some("text/css") => "css",
        Some("application/javascript") | Some("text/javascript")
        | Some("application/x-javascript") => "js",
        Some("image/png") => "png",
        Some("image/jpeg") => "jpg",
        Some("image/gif") => "gif",
        Some("image/svg+xml") => "svg",
        Some("image/webp") => "webp",
        Some("image/x-icon") | Some("image/vnd.microsoft.icon") => "ico",
        _ => "bin",
    }
}

/// A localized asset.
#[derive(Debug, Clone)]
pub struct Asset {
    pub source_url: Url,
    pub content_hash: String,
    /// Path relative to the clone directory, e.g. `assets/<hash>.<ext>`
    pub local_path: String,
    pub mime_class: MimeClass,
}

/// Shared content-hash → filename index.
pub type AssetIndex = Arc<Mutex<HashMap<String, String>>>;

/// Fetch and store every discovered reference concurrently.
///
/// Returns the (raw reference → asset) pairs that were localized plus the
/// raw references left untouched. Per-asset failures are warnings, never
/// fatal: the original reference stays in the document.
pub async fn localize_assets(
    client: &Client,
    base: &Url,
    refs: &[AssetRef],
    assets_dir: &Path,
    index: &AssetIndex,
    timeout: Duration,
) -> (Vec<(String, Asset)>, Vec<String>) {
    let futures: Vec<_> = refs
        .iter()
        .map(|r| localize_one(client, base, r, assets_dir, index, timeout))
        .collect();

    let mut localized = Vec::new();
    let mut skipped = Vec::new();
    for result in futures::future::join_all(futures).await {
        match result {
            Ok(pair) => localized.push(pair),
            Err(raw) => skipped.push(raw),
        }
    }

    (localized, skipped)
}

/// Fetch one reference; on any failure the raw value is handed back so
/// the caller can leave the reference remote.
async fn localize_one(
    client: &Client,
    base: &Url,
    asset_ref: &AssetRef,
    assets_dir: &Path,
    index: &AssetIndex,
    timeout: Duration,
) -> Result<(String, Asset), String> {
    let raw = asset_ref.raw.clone();

    let url = match base.join(&raw) {
        Ok(url) => url,
        Err(e) => {
            warn!(reference = %raw, error = %e, "asset_url_unresolvable");
            return Err(raw);
        }
    };
    if url.scheme() != "http" && url.scheme() != "https" {
        debug!(url = %url, "asset_scheme_skipped");
        return Err(raw);
    }

    let response = match client.get(url.clone()).timeout(timeout).send().await {
        Ok(response) => response,
        Err(e) => {
            warn!(url = %url, error = %e, "asset_fetch_failed");
            return Err(raw);
        }
    };
    if !response.status().is_success() {
        warn!(url = %url, status = response.status().as_u16(), "asset_fetch_bad_status");
        return Err(raw);
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(';').next().unwrap_or(s).trim().to_ascii_lowercase());

    let bytes = match response.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(url = %url, error = %e, "asset_body_read_failed");
            return Err(raw);
        }
    };

    let content_hash = hex::encode(Sha256::digest(&bytes));
    let mime_class = MimeClass::classify(content_type.as_deref());
    let extension = extension_for(content_type.as_deref());

    // First writer claims the hash; later writers reuse its filename.
    let filename = {
        let mut index = index.lock().expect("asset index poisoned");
        match index.get(&content_hash) {
            Some(existing) => {
                debug!(url = %url, hash = %content_hash, "asset_dedup_hit");
                existing.clone()
            }
            None => {
                let filename = format!("{}.{extension}", &content_hash[..16]);
                index.insert(content_hash.clone(), filename.clone());
                filename
            }
        }
    };

    let path = assets_dir.join(&filename);
    if !path.exists() {
        if let Err(e) = tokio::fs::write(&path, &bytes).await {
            warn!(url = %url, path = %path.display(), error = %e, "asset_write_failed");
            return Err(raw);
        }
    }

    debug!(
        url = %url,
        file = %filename,
        bytes = bytes.len(),
        mime_class = ?mime_class,
        "asset_localized"
    );

    Ok((
        raw,
        Asset {
            source_url: url,
            content_hash,
            local_path: format!("assets/{filename}"),
            mime_class,
        },
    ))
}
