//! Phantom CLI - campaign management and site cloning.
//!
//! Commands operate purely through the campaign store, delivery pool and
//! cloner contracts; stats always flow through the aggregator.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use phantom::campaign::runner::run_campaign;
use phantom::cloner::{EvasionOptions, SiteCloner};
use phantom::delivery::render::Renderer;
use phantom::{
    Aggregator, CampaignStatus, CampaignStore, CampaignType, DeliveryPool, EmailConfig,
    EngineConfig, PoolOptions, Settings, SmtpTransport, Target, TrackingState, Transport,
};

#[derive(Parser)]
#[command(name = "phantom", version, about = "Social-engineering simulation toolkit")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage campaigns
    Campaign {
        #[command(subcommand)]
        action: CampaignAction,
    },

    /// Clone a landing page wired to the capture endpoint
    Clone {
        /// Page to clone; scheme defaults to https
        #[arg(long)]
        url: String,

        /// Output directory; defaults to a dated directory under the
        /// campaign's clones folder
        #[arg(long)]
        output: Option<PathBuf>,

        /// Campaign the clone belongs to
        #[arg(long)]
        campaign: Option<String>,

        /// Leave inline scripts untouched
        #[arg(long)]
        no_obfuscate_scripts: bool,

        /// Leave element ids untouched
        #[arg(long)]
        no_randomize_ids: bool,
    },
}

#[derive(Subcommand)]
enum CampaignAction {
    /// Create a new campaign
    Create {
        #[arg(long)]
        name: String,

        /// Campaign type (phishing, bec, vishing, smishing, ...)
        #[arg(long = "type")]
        campaign_type: CampaignType,

        #[arg(long, default_value = "default")]
        template: String,

        #[arg(long, default_value = "en")]
        language: String,

        /// Schedule datetime (ISO format)
        #[arg(long)]
        schedule: Option<String>,
    },

    /// List all campaigns
    List,

    /// Run an existing campaign against a target list
    Run {
        #[arg(long)]
        name: String,

        /// JSON file with the target list
        #[arg(long)]
        targets: PathBuf,

        /// Template override
        #[arg(long)]
        template: Option<String>,

        /// Files attached to every message
        #[arg(long = "attachment")]
        attachments: Vec<PathBuf>,
    },

    /// Delete a campaign (administrative; removes the directory)
    Delete {
        #[arg(long)]
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::from_env();
    let store = Arc::new(CampaignStore::new(config.campaigns_dir.clone()).await?);

    match cli.command {
        Command::Campaign { action } => match action {
            CampaignAction::Create {
                name,
                campaign_type,
                template,
                language,
                schedule,
            } => {
                let settings = Settings {
                    template,
                    language,
                    schedule,
                };
                let campaign = store.create(&name, campaign_type, settings).await?;
                println!("created campaign '{}' ({})", campaign.name, campaign.campaign_type);
            }

            CampaignAction::List => {
                let campaigns = store.list().await?;
                if campaigns.is_empty() {
                    println!("no campaigns");
                }
                for c in campaigns {
                    println!(
                        "{:<24} {:<12} {:?}  sent={} clicks={} creds={} rate={:.2}",
                        c.name,
                        c.campaign_type.to_string(),
                        c.status,
                        c.stats.emails_sent,
                        c.stats.clicks,
                        c.stats.credentials_captured,
                        c.stats.success_rate
                    );
                }
            }

            CampaignAction::Run {
                name,
                targets,
                template,
                attachments,
            } => {
                let accepted =
                    run(&config, &store, &name, &targets, template.as_deref(), &attachments)
                        .await?;
                println!("campaign '{name}' finished: {accepted} messages accepted");
            }

            CampaignAction::Delete { name } => {
                let dir = store.campaign_dir(&name);
                if !dir.is_dir() {
                    bail!("campaign '{name}' not found");
                }
                tokio::fs::remove_dir_all(&dir)
                    .await
                    .with_context(|| format!("failed to delete campaign '{name}'"))?;
                println!("deleted campaign '{name}'");
            }
        },

        Command::Clone {
            url,
            output,
            campaign,
            no_obfuscate_scripts,
            no_randomize_ids,
        } => {
            if let Some(name) = campaign.as_deref() {
                store
                    .get(name)
                    .await
                    .with_context(|| format!("campaign '{name}' not found"))?;
            }

            let output = match (output, campaign.as_deref()) {
                (Some(output), _) => output,
                (None, Some(name)) => store
                    .clones_dir(name)
                    .join(format!("clone-{}", chrono::Utc::now().format("%Y%m%d%H%M%S"))),
                (None, None) => bail!("either --output or --campaign is required"),
            };

            let client = reqwest::Client::builder()
                .pool_max_idle_per_host(100)
                .build()
                .context("Failed to create HTTP client")?;
            let cloner =
                SiteCloner::new(client, Duration::from_millis(config.request_timeout_ms));
            let evasion = EvasionOptions {
                obfuscate_scripts: !no_obfuscate_scripts,
                randomize_ids: !no_randomize_ids,
            };

            let report = cloner
                .clone_page(&url, &output, campaign.as_deref(), &evasion)
                .await?;
            println!(
                "cloned {} -> {} ({} assets localized, {} kept remote, {} forms rewritten)",
                report.page_url,
                report.output_dir.display(),
                report.assets.len(),
                report.skipped.len(),
                report.forms_rewritten
            );
        }
    }

    Ok(())
}

/// Wire up aggregator + pool, run the campaign, then drain both so no
/// accepted message or event is lost.
async fn run(
    config: &EngineConfig,
    store: &Arc<CampaignStore>,
    name: &str,
    targets_file: &PathBuf,
    template: Option<&str>,
    attachments: &[PathBuf],
) -> Result<usize> {
    let raw = tokio::fs::read(targets_file)
        .await
        .with_context(|| format!("failed to read targets file {}", targets_file.display()))?;
    let targets: Vec<Target> =
        serde_json::from_slice(&raw).context("targets file is not a JSON target list")?;
    if targets.is_empty() {
        bail!("targets file contains no targets");
    }

    let email_config = EmailConfig::load(&config.email_config_path);
    let transport = SmtpTransport::from_config(email_config.as_ref())
        .context("email configuration missing or unusable; delivery is disabled")?;
    let default_subject = email_config
        .map(|c| c.subject)
        .unwrap_or_else(|| "Important Notification".to_string());

    let aggregator = Aggregator::start(Arc::clone(store));
    let pool = DeliveryPool::start(
        Arc::new(transport) as Arc<dyn Transport>,
        aggregator.sender(),
        TrackingState::new(),
        Renderer::new(
            &config.tracker_base_url,
            config.tracking_key.as_bytes(),
            &default_subject,
        ),
        PoolOptions {
            workers: config.pool_workers,
            queue_capacity: config.queue_capacity,
            max_attempts: config.max_attempts,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
        },
    );

    let outcome = run_campaign(store, &pool, name, &targets, template, attachments).await;

    // Drain queued sends and outstanding events before reporting.
    pool.shutdown().await;
    aggregator.shutdown().await;

    let accepted = outcome?;
    let status = if accepted > 0 {
        CampaignStatus::Completed
    } else {
        CampaignStatus::Failed
    };
    store.update(name, |c| c.status = status).await?;

    Ok(accepted)
}
