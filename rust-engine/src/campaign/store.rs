//! Durable campaign store.
//!
//! One directory per campaign under the base directory, with the record in
//! `config.json` plus `clones/`, `templates/`, `logs/` and `reports/`
//! subdirectories. The store is the single source of truth for campaign
//! state; updates run under a per-campaign mutex so read-modify-write
//! cycles from the aggregator and run operations never interleave.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::campaign::{Campaign, CampaignType, Settings};
use crate::error::{Error, Result};

/// Subdirectories created alongside each campaign record.
const CAMPAIGN_SUBDIRS: &[&str] = &["clones", "templates", "logs", "reports"];

pub struct CampaignStore {
    base_dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CampaignStore {
    /// Open (and create if needed) a store rooted at `base_dir`.
    pub async fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).await?;
        Ok(Self {
            base_dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Directory holding a campaign's record and artifacts.
    pub fn campaign_dir(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }

    /// Directory for a campaign's clone artifacts.
    pub fn clones_dir(&self, name: &str) -> PathBuf {
        self.campaign_dir(name).join("clones")
    }

    /// Directory for a campaign's message templates.
    pub fn templates_dir(&self, name: &str) -> PathBuf {
        self.campaign_dir(name).join("templates")
    }

    /// Create a new campaign.
    ///
    /// Directory creation is the uniqueness gate; any later failure rolls
    /// the partial directory back, so either the full structure exists or
    /// none of it does.
    pub async fn create(
        &self,
        name: &str,
        campaign_type: CampaignType,
        settings: Settings,
    ) -> Result<Campaign> {
        let dir = self.campaign_dir(name);

        if let Err(e) = fs::create_dir(&dir).await {
            return Err(match e.kind() {
                ErrorKind::AlreadyExists => Error::DuplicateCampaign(name.to_string()),
                _ => e.into(),
            });
        }

        let campaign = Campaign::new(name, campaign_type, settings);
        if let Err(e) = self.populate(&dir, &campaign).await {
            // Roll back so no partial structure is left behind.
            let _ = fs::remove_dir_all(&dir).await;
            return Err(e);
        }

        info!(campaign = name, campaign_type = %campaign_type, "campaign_created");
        Ok(campaign)
    }

    async fn populate(&self, dir: &Path, campaign: &Campaign) -> Result<()> {
        for sub in CAMPAIGN_SUBDIRS {
            fs::create_dir(dir.join(sub)).await?;
        }
        self.write_record(dir, campaign).await
    }

    /// Retrieve a campaign by name.
    pub async fn get(&self, name: &str) -> Result<Campaign> {
        let path = self.campaign_dir(name).join("config.json");
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::CampaignNotFound(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Apply a mutation under the campaign's exclusive lock and persist
    /// the result.
    pub async fn update<F>(&self, name: &str, mutate: F) -> Result<Campaign>
    where
        F: FnOnce(&mut Campaign),
    {
        let lock = self.lock_for(name).await;
        let _guard = lock.lock().await;

        let mut campaign = self.get(name).await?;
        mutate(&mut campaign);
        self.write_record(&self.campaign_dir(name), &campaign).await?;
        Ok(campaign)
    }

    /// List all campaigns, skipping unreadable entries.
    pub async fn list(&self) -> Result<Vec<Campaign>> {
        let mut campaigns = Vec::new();
        let mut entries = fs::read_dir(&self.base_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match self.get(&name).await {
                Ok(campaign) => campaigns.push(campaign),
                Err(e) => {
                    warn!(campaign = %name, error = %e, "campaign_record_unreadable");
                }
            }
        }

        campaigns.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(campaigns)
    }

    /// Write the record through a temp file so readers never observe a
    /// half-written config.
    async fn write_record(&self, dir: &Path, campaign: &Campaign) -> Result<()> {
        let body = serde_json::to_vec_pretty(campaign)?;
        let tmp = dir.join("config.json.tmp");
        fs::write(&tmp, &body).await?;
        fs::rename(&tmp, dir.join("config.json")).await?;
        Ok(())
    }

    async fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(name.to_string()).or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_store() -> (tempfile::TempDir, CampaignStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CampaignStore::new(dir.path().join("campaigns")).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (_dir, store) = open_store().await;
        let created = store
            .create("demo", CampaignType::Phishing, Settings::default())
            .await
            .unwrap();
        assert_eq!(created.name, "demo");

        let loaded = store.get("demo").await.unwrap();
        assert_eq!(loaded.campaign_type, CampaignType::Phishing);
        assert_eq!(loaded.stats.emails_sent, 0);

        for sub in CAMPAIGN_SUBDIRS {
            assert!(store.campaign_dir("demo").join(sub).is_dir());
        }
    }

    #[tokio::test]
    async fn test_duplicate_create_leaves_existing_untouched() {
        let (_dir, store) = open_store().await;
        store
            .create("demo", CampaignType::Phishing, Settings::default())
            .await
            .unwrap();
        store
            .update("demo", |c| c.stats.emails_sent = 7)
            .await
            .unwrap();

        let err = store
            .create("demo", CampaignType::Bec, Settings::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateCampaign(_)));

        let loaded = store.get("demo").await.unwrap();
        assert_eq!(loaded.campaign_type, CampaignType::Phishing);
        assert_eq!(loaded.stats.emails_sent, 7);
    }

    #[tokio::test]
    async fn test_get_missing_campaign() {
        let (_dir, store) = open_store().await;
        let err = store.get("ghost").await.unwrap_err();
        assert!(matches!(err, Error::CampaignNotFound(_)));
    }

    #[tokio::test]
    async fn test_update_missing_campaign() {
        let (_dir, store) = open_store().await;
        let err = store.update("ghost", |_| {}).await.unwrap_err();
        assert!(matches!(err, Error::CampaignNotFound(_)));
    }

    #[tokio::test]
    async fn test_concurrent_updates_do_not_interleave() {
        let (_dir, store) = open_store().await;
        let store = Arc::new(store);
        store
            .create("demo", CampaignType::Phishing, Settings::default())
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .update("demo", |c| c.stats.clicks += 1)
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let loaded = store.get("demo").await.unwrap();
        assert_eq!(loaded.stats.clicks, 20);
    }

    #[tokio::test]
    async fn test_list_skips_unreadable_entries() {
        let (_dir, store) = open_store().await;
        store
            .create("alpha", CampaignType::Phishing, Settings::default())
            .await
            .unwrap();
        store
            .create("beta", CampaignType::Bec, Settings::default())
            .await
            .unwrap();

        // A stray directory without a record is skipped, not fatal.
        fs::create_dir(store.campaign_dir("stray")).await.unwrap();

        let listed = store.list().await.unwrap();
        let names: Vec<_> = listed.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
    }
}
