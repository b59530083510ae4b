//! Run operation: feed a campaign's targets into the delivery pool.
//!
//! Pure glue over the store and pool contracts. Stats are not touched
//! here; the `email_sent` counters come back through the aggregator as
//! workers dispatch.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{info, warn};

use crate::campaign::store::CampaignStore;
use crate::campaign::{CampaignStatus, Target};
use crate::delivery::pool::DeliveryPool;
use crate::error::{Error, Result};

/// Submit every target for dispatch. Returns how many messages the pool
/// accepted; per-target render rejections are logged and skipped.
pub async fn run_campaign(
    store: &CampaignStore,
    pool: &DeliveryPool,
    name: &str,
    targets: &[Target],
    template_override: Option<&str>,
    attachments: &[PathBuf],
) -> Result<usize> {
    let campaign = store.get(name).await?;
    let template_name = template_override
        .map(str::to_string)
        .unwrap_or(campaign.settings.template);
    let template_html = load_template(store, name, &template_name).await?;

    store
        .update(name, |c| {
            c.status = CampaignStatus::Running;
            c.started = Some(Utc::now());
            for target in targets {
                if !c.targets.iter().any(|t| t.email == target.email) {
                    c.targets.push(target.clone());
                }
            }
        })
        .await?;

    let mut accepted = 0;
    for target in targets {
        match pool.submit(&template_html, target, name, attachments).await {
            Ok(()) => accepted += 1,
            Err(e) => {
                warn!(
                    campaign = name,
                    recipient = %target.email,
                    error = %e,
                    "target_submit_rejected"
                );
            }
        }
    }

    info!(
        campaign = name,
        template = %template_name,
        targets = targets.len(),
        accepted = accepted,
        "campaign_started"
    );

    Ok(accepted)
}

/// Resolve a template: the campaign's own templates directory first, then
/// the shared one.
async fn load_template(store: &CampaignStore, campaign: &str, template: &str) -> Result<String> {
    let candidates = [
        store.templates_dir(campaign).join(format!("{template}.html")),
        Path::new("templates").join(format!("{template}.html")),
    ];

    for path in &candidates {
        match tokio::fs::read_to_string(path).await {
            Ok(html) => return Ok(html),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Err(Error::TemplateNotFound(template.to_string()))
}
