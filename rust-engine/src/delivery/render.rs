//! Message rendering: variable substitution, tracking instrumentation and
//! attachment embedding.
//!
//! Rendering happens synchronously at submit time so failures are
//! reported to the caller immediately and never enter the delivery queue.

use std::collections::HashSet;
use std::path::PathBuf;

use hmac::{Hmac, Mac};
use rand::prelude::*;
use scraper::{Html, Selector};
use sha2::Sha256;
use tracing::debug;

use crate::campaign::Target;
use crate::delivery::{Attachment, OutboundEmail};
use crate::error::{Error, Result};

/// Subject patterns rotated for campaign mail; `{campaign}` is replaced
/// with the campaign name.
const SUBJECT_PATTERNS: &[&str] = &[
    "Important: Your {campaign} account requires attention",
    "Action required: {campaign} security update",
    "Urgent: Verify your {campaign} credentials",
];

/// Renders (template, target, campaign) triples into dispatchable
/// messages wired to the tracker.
#[derive(Clone)]
pub struct Renderer {
    tracker_base_url: String,
    tracking_key: Vec<u8>,
    default_subject: String,
}

impl Renderer {
    pub fn new(tracker_base_url: &str, tracking_key: &[u8], default_subject: &str) -> Self {
        Self {
            tracker_base_url: tracker_base_url.trim_end_matches('/').to_string(),
            tracking_key: tracking_key.to_vec(),
            default_subject: default_subject.to_string(),
        }
    }

    /// Render a message. Returns the message plus the pixel token to
    /// register with the tracking state.
    pub fn render(
        &self,
        template_html: &str,
        target: &Target,
        campaign: &str,
        attachment_paths: &[PathBuf],
    ) -> Result<(OutboundEmail, String)> {
        if target.email.trim().is_empty() {
            return Err(Error::Render("target has an empty address".to_string()));
        }

        let html = substitute_variables(template_html, target);
        if let Some(placeholder) = first_unresolved_placeholder(&html) {
            return Err(Error::Render(format!(
                "unresolved placeholder '{{{{{placeholder}}}}}'"
            )));
        }

        let html = rewrite_links(&html, &self.tracker_base_url, campaign);
        let token = pixel_token(&self.tracking_key, &target.email);
        let html = inject_tracking_pixel(&html, &self.tracker_base_url, &token);

        let mut attachments = Vec::with_capacity(attachment_paths.len());
        for path in attachment_paths {
            let content = std::fs::read(path).map_err(|e| {
                Error::Render(format!("attachment {}: {e}", path.display()))
            })?;
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "attachment.bin".to_string());
            attachments.push(Attachment { filename, content });
        }

        let subject = self.select_subject(target, campaign);

        debug!(
            campaign = campaign,
            recipient = %target.email,
            html_length = html.len(),
            attachments = attachments.len(),
            "message_rendered"
        );

        Ok((
            OutboundEmail {
                campaign: campaign.to_string(),
                recipient: target.email.clone(),
                spoofed_sender: target.spoofed_sender.clone(),
                subject,
                html,
                attachments,
            },
            token,
        ))
    }

    /// Pick a subject: a per-target override wins, otherwise rotate
    /// through the campaign patterns and the configured default.
    fn select_subject(&self, target: &Target, campaign: &str) -> String {
        if let Some(subject) = target.variables.get("subject") {
            return subject.clone();
        }

        let mut candidates: Vec<String> = SUBJECT_PATTERNS
            .iter()
            .map(|p| p.replace("{campaign}", campaign))
            .collect();
        candidates.push(self.default_subject.clone());

        let mut rng = thread_rng();
        candidates.choose(&mut rng).expect("non-empty subject pool").clone()
    }
}

/// Replace `{{key}}` placeholders with the target's address and
/// variables.
pub fn substitute_variables(template: &str, target: &Target) -> String {
    let mut html = template.replace("{{email}}", &target.email);
    for (key, value) in &target.variables {
        html = html.replace(&format!("{{{{{key}}}}}"), value);
    }
    html
}

/// First `{{name}}` placeholder left after substitution, if any.
fn first_unresolved_placeholder(html: &str) -> Option<&str> {
    let start = html.find("{{")?;
    let rest = &html[start + 2..];
    let end = rest.find("}}")?;
    Some(rest[..end].trim())
}

/// Stable keyed token identifying a recipient in tracking URLs.
pub fn pixel_token(key: &[u8], recipient: &str) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(recipient.as_bytes());
    let digest = hex::encode(mac.finalize().into_bytes());
    digest[..32].to_string()
}

/// Append the 1x1 tracking pixel, preferably just before `</body>`.
pub fn inject_tracking_pixel(html: &str, base_url: &str, token: &str) -> String {
    let pixel = format!(
        "<img src=\"{base_url}/pixel/{token}\" width=\"1\" height=\"1\" style=\"display:none\">"
    );
    if html.contains("</body>") {
        html.replacen("</body>", &format!("{pixel}</body>"), 1)
    } else {
        format!("{html}{pixel}")
    }
}

/// Route every absolute link through the tracker's click endpoint so that
/// clicks produce `click` events before redirecting to the original URL.
pub fn rewrite_links(html: &str, base_url: &str, campaign: &str) -> String {
    let links = extract_links(html);
    let mut rewritten = html.to_string();

    for link in links {
        if link.starts_with(base_url) {
            continue;
        }
        let encoded: String = url::form_urlencoded::byte_serialize(link.as_bytes()).collect();
        let tracked = format!("{base_url}/track/{campaign}?url={encoded}");
        rewritten = rewritten.replace(
            &format!("href=\"{link}\""),
            &format!("href=\"{tracked}\""),
        );
        rewritten = rewritten.replace(
            &format!("href='{link}'"),
            &format!("href='{tracked}'"),
        );
    }

    rewritten
}

/// Extract all absolute link URLs from HTML (deduplicated).
fn extract_links(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").expect("Invalid selector");

    let mut seen = HashSet::new();
    let mut urls = Vec::new();

    for a in document.select(&selector) {
        if let Some(href) = a.value().attr("href") {
            if (href.starts_with("http://") || href.starts_with("https://"))
                && seen.insert(href.to_string())
            {
                urls.push(href.to_string());
            }
        }
    }

    urls
}
