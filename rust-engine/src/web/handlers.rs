//! Capture and tracking endpoint handlers.
//!
//! These handlers are designed to be fast - they verify and record the
//! submission, forward one event to the aggregator, and return. All stat
//! mutation happens in the aggregator.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use axum::extract::{Form, Path as UrlPath, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind, EventSender};
use crate::tracking::TrackingState;

/// 1x1 transparent PNG served for every pixel hit.
const TRANSPARENT_PIXEL: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48,
    0x44, 0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x02, 0x00, 0x00,
    0x00, 0x90, 0x77, 0x53, 0xde, 0x00, 0x00, 0x00, 0x0c, 0x49, 0x44, 0x41, 0x54, 0x08,
    0xd7, 0x63, 0xf8, 0x0f, 0x04, 0x00, 0x09, 0xfb, 0x03, 0xfd, 0x00, 0x00, 0x00, 0x00,
    0x49, 0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
];

/// Interstitial shown after a capture.
const CAPTURE_SUCCESS_PAGE: &str = r#"<html>
    <body>
        <h2>Verification Successful</h2>
        <p>Thank you for verifying your account.</p>
        <p>You will be redirected shortly...</p>
        <script>
            setTimeout(() => window.location.href = "https://example.com", 3000);
        </script>
    </body>
</html>"#;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub events: EventSender,
    pub tracking: TrackingState,
    pub captured_dir: PathBuf,
}

impl AppState {
    pub fn new(events: EventSender, tracking: TrackingState, captured_dir: PathBuf) -> Self {
        Self {
            events,
            tracking,
            captured_dir,
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Credential Capture
// =============================================================================

/// Generic status response for capture/event endpoints.
#[derive(Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign: Option<String>,
}

/// Form submission receiver.
///
/// Appends the raw submission to the per-campaign, per-day capture log
/// and emits one `credential` event. Submissions that filled the
/// honeypot field are recorded as bot traffic and produce no event.
pub async fn capture(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(fields): Form<HashMap<String, String>>,
) -> Response {
    let campaign = fields
        .get("campaign")
        .cloned()
        .unwrap_or_else(|| "unknown".to_string());
    let bot = fields
        .get("honeypot")
        .map(|v| !v.is_empty())
        .unwrap_or(false);
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    info!(
        campaign = %campaign,
        field_count = fields.len(),
        bot = bot,
        "capture_received"
    );

    let entry = serde_json::json!({
        "timestamp": Utc::now().to_rfc3339(),
        "campaign": campaign,
        "user_agent": user_agent,
        "bot": bot,
        "fields": fields,
    });

    if let Err(e) = append_capture(&state.captured_dir, &campaign, entry).await {
        error!(campaign = %campaign, error = %e, "capture_log_failed");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(WebhookResponse {
                status: "error",
                campaign: None,
            }),
        )
            .into_response();
    }

    if bot {
        debug!(campaign = %campaign, "capture_flagged_bot");
    } else {
        state.events.emit(Event::new(campaign.as_str(), EventKind::Credential));
    }

    Html(CAPTURE_SUCCESS_PAGE).into_response()
}

/// Append an entry to the campaign's capture log for today, creating the
/// file when absent.
async fn append_capture(
    dir: &Path,
    campaign: &str,
    entry: serde_json::Value,
) -> crate::error::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let file = dir.join(format!(
        "{}_{}.json",
        sanitize_component(campaign),
        Utc::now().format("%Y%m%d")
    ));

    let mut entries: Vec<serde_json::Value> = match tokio::fs::read(&file).await {
        Ok(raw) => serde_json::from_slice(&raw).unwrap_or_else(|e| {
            warn!(file = %file.display(), error = %e, "capture_log_unreadable_resetting");
            Vec::new()
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(e.into()),
    };

    entries.push(entry);
    let body = serde_json::to_vec_pretty(&entries)?;
    tokio::fs::write(&file, body).await?;
    Ok(file)
}

/// Keep capture log names filesystem-safe regardless of what the form
/// claimed as its campaign.
fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

// =============================================================================
// Click and Open Tracking
// =============================================================================

/// Click tracking endpoint.
///
/// Emits a `click` event, then redirects to the original URL carried in
/// the `url` query parameter when it is a plain web URL.
pub async fn track_click(
    State(state): State<AppState>,
    UrlPath(campaign): UrlPath<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    info!(campaign = %campaign, "click_tracked");
    state.events.emit(Event::new(campaign.as_str(), EventKind::Click));

    if let Some(target) = params.get("url") {
        if target.starts_with("http://") || target.starts_with("https://") {
            return Redirect::to(target).into_response();
        }
        warn!(campaign = %campaign, url = %target, "click_redirect_rejected");
    }

    Json(WebhookResponse {
        status: "success",
        campaign: Some(campaign),
    })
    .into_response()
}

/// Pixel/open receiver.
///
/// Maps the token back to a recipient registered at submit time; the
/// first hit marks the recipient opened. The pixel is returned whether
/// or not the token was recognized.
pub async fn pixel(
    State(state): State<AppState>,
    UrlPath(token): UrlPath<String>,
) -> impl IntoResponse {
    match state.tracking.mark_opened(&token) {
        Some((record, true)) => {
            info!(
                campaign = %record.campaign,
                recipient = %record.recipient,
                "email_opened"
            );
        }
        Some((record, false)) => {
            debug!(recipient = %record.recipient, "email_open_repeat");
        }
        None => {
            debug!(token = %token, "pixel_token_unknown");
        }
    }

    ([(header::CONTENT_TYPE, "image/png")], TRANSPARENT_PIXEL)
}

// =============================================================================
// Event Webhook
// =============================================================================

/// External event submission, e.g. BEC reply/transfer signals from a
/// mailbox monitor.
#[derive(Debug, Deserialize)]
pub struct EventSubmission {
    pub campaign: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

/// Forward an externally observed event to the aggregator.
pub async fn event_webhook(
    State(state): State<AppState>,
    Json(submission): Json<EventSubmission>,
) -> Response {
    if submission.campaign.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(WebhookResponse {
                status: "invalid_campaign",
                campaign: None,
            }),
        )
            .into_response();
    }

    info!(
        campaign = %submission.campaign,
        kind = ?submission.kind,
        "event_webhook_received"
    );

    let mut event = Event::new(submission.campaign.as_str(), submission.kind);
    if let Some(payload) = submission.payload {
        event = event.with_payload(payload);
    }
    state.events.emit(event);

    Json(WebhookResponse {
        status: "enqueued",
        campaign: Some(submission.campaign),
    })
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("demo"), "demo");
        assert_eq!(sanitize_component("../etc/passwd"), "___etc_passwd");
        assert_eq!(sanitize_component(""), "unknown");
        assert_eq!(sanitize_component("q3-review_2"), "q3-review_2");
    }

    #[tokio::test]
    async fn test_append_capture_creates_then_appends() {
        let dir = tempfile::tempdir().unwrap();

        let first = append_capture(
            dir.path(),
            "demo",
            serde_json::json!({"fields": {"username": "a"}}),
        )
        .await
        .unwrap();
        append_capture(
            dir.path(),
            "demo",
            serde_json::json!({"fields": {"username": "b"}}),
        )
        .await
        .unwrap();

        let raw = tokio::fs::read(&first).await.unwrap();
        let entries: Vec<serde_json::Value> = serde_json::from_slice(&raw).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1]["fields"]["username"], "b");
    }

    #[tokio::test]
    async fn test_append_capture_separate_campaign_files() {
        let dir = tempfile::tempdir().unwrap();

        let a = append_capture(dir.path(), "alpha", serde_json::json!({}))
            .await
            .unwrap();
        let b = append_capture(dir.path(), "beta", serde_json::json!({}))
            .await
            .unwrap();
        assert_ne!(a, b);
    }
}
