//! Campaign data model.
//!
//! A campaign is a named unit of orchestrated outbound activity with its
//! own targets, stats and lifecycle status. Stats are only ever mutated by
//! the event aggregator; producers never touch them directly.

pub mod runner;
pub mod store;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::EventKind;

/// Kind of outbound activity a campaign simulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignType {
    Phishing,
    Vishing,
    Smishing,
    Usb,
    Qr,
    SocialMedia,
    Bec,
    Multistage,
    Wifi,
    Document,
    Osint,
    Metadata,
}

impl FromStr for CampaignType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "phishing" => Ok(CampaignType::Phishing),
            "vishing" => Ok(CampaignType::Vishing),
            "smishing" => Ok(CampaignType::Smishing),
            "usb" => Ok(CampaignType::Usb),
            "qr" => Ok(CampaignType::Qr),
            "social_media" => Ok(CampaignType::SocialMedia),
            "bec" => Ok(CampaignType::Bec),
            "multistage" => Ok(CampaignType::Multistage),
            "wifi" => Ok(CampaignType::Wifi),
            "document" => Ok(CampaignType::Document),
            "osint" => Ok(CampaignType::Osint),
            "metadata" => Ok(CampaignType::Metadata),
            other => Err(format!("unknown campaign type '{other}'")),
        }
    }
}

impl fmt::Display for CampaignType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CampaignType::Phishing => "PHISHING",
            CampaignType::Vishing => "VISHING",
            CampaignType::Smishing => "SMISHING",
            CampaignType::Usb => "USB",
            CampaignType::Qr => "QR",
            CampaignType::SocialMedia => "SOCIAL_MEDIA",
            CampaignType::Bec => "BEC",
            CampaignType::Multistage => "MULTISTAGE",
            CampaignType::Wifi => "WIFI",
            CampaignType::Document => "DOCUMENT",
            CampaignType::Osint => "OSINT",
            CampaignType::Metadata => "METADATA",
        };
        f.write_str(name)
    }
}

/// Campaign lifecycle: draft → running → completed | failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Draft,
    Running,
    Completed,
    Failed,
}

/// Per-campaign counters, plus the derived success rate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stats {
    pub emails_sent: u64,
    pub clicks: u64,
    pub credentials_captured: u64,
    pub bec_replies: u64,
    pub bec_transfers: u64,
    /// Derived; recomputed after every counter change, never stored
    /// independently of its inputs.
    pub success_rate: f64,
    pub last_activity: Option<DateTime<Utc>>,
}

impl Stats {
    /// Increment the counter matching an event kind.
    pub fn record(&mut self, kind: EventKind) {
        match kind {
            EventKind::EmailSent => self.emails_sent += 1,
            EventKind::Click => self.clicks += 1,
            EventKind::Credential => self.credentials_captured += 1,
            EventKind::BecReply => self.bec_replies += 1,
            EventKind::BecTransfer => self.bec_transfers += 1,
        }
    }

    /// Recompute the success rate for the given campaign type.
    ///
    /// BEC campaigns measure transfers over replies; every other type
    /// measures captured credentials over sent emails. A zero total yields
    /// a rate of 0.0.
    pub fn recompute(&mut self, campaign_type: CampaignType) {
        let (successes, total) = match campaign_type {
            CampaignType::Bec => (self.bec_transfers, self.bec_replies),
            _ => (self.credentials_captured, self.emails_sent),
        };
        self.success_rate = if total > 0 {
            successes as f64 / total as f64
        } else {
            0.0
        };
    }
}

/// A recipient plus per-recipient template variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    /// Email address (or phone/handle for non-email campaign types)
    pub email: String,

    /// Template substitution variables for `{{key}}` placeholders
    #[serde(default)]
    pub variables: HashMap<String, String>,

    /// From-header override used by BEC campaigns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spoofed_sender: Option<String>,
}

impl Target {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            variables: HashMap::new(),
            spoofed_sender: None,
        }
    }
}

/// Campaign-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Template identifier resolved against the campaign's templates
    /// directory at run time
    pub template: String,

    pub language: String,

    /// Optional ISO 8601 schedule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            template: "default".to_string(),
            language: "en".to_string(),
            schedule: None,
        }
    }
}

/// Durable per-campaign record: identity, lifecycle, targets and stats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub name: String,

    #[serde(rename = "type")]
    pub campaign_type: CampaignType,

    pub created: DateTime<Utc>,

    pub status: CampaignStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,

    #[serde(default)]
    pub targets: Vec<Target>,

    #[serde(default)]
    pub stats: Stats,

    #[serde(default)]
    pub settings: Settings,
}

impl Campaign {
    pub fn new(name: impl Into<String>, campaign_type: CampaignType, settings: Settings) -> Self {
        Self {
            name: name.into(),
            campaign_type,
            created: Utc::now(),
            status: CampaignStatus::Draft,
            started: None,
            targets: Vec::new(),
            stats: Stats::default(),
            settings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_rate_zero_total() {
        let mut stats = Stats::default();
        stats.recompute(CampaignType::Phishing);
        assert_eq!(stats.success_rate, 0.0);
    }

    #[test]
    fn test_success_rate_phishing() {
        let mut stats = Stats::default();
        for _ in 0..4 {
            stats.record(EventKind::EmailSent);
        }
        stats.record(EventKind::Credential);
        stats.recompute(CampaignType::Phishing);
        assert_eq!(stats.success_rate, 0.25);
    }

    #[test]
    fn test_success_rate_bec_uses_replies() {
        // 5 sends, 2 replies, 1 transfer: the BEC rate is 1/2, not 1/5.
        let mut stats = Stats::default();
        for _ in 0..5 {
            stats.record(EventKind::EmailSent);
        }
        for _ in 0..2 {
            stats.record(EventKind::BecReply);
        }
        stats.record(EventKind::BecTransfer);
        stats.recompute(CampaignType::Bec);
        assert_eq!(stats.success_rate, 0.5);
    }

    #[test]
    fn test_campaign_type_from_str() {
        assert_eq!(
            "phishing".parse::<CampaignType>().unwrap(),
            CampaignType::Phishing
        );
        assert_eq!("BEC".parse::<CampaignType>().unwrap(), CampaignType::Bec);
        assert!("carrier-pigeon".parse::<CampaignType>().is_err());
    }

    #[test]
    fn test_campaign_serialization() {
        let campaign = Campaign::new("demo", CampaignType::Bec, Settings::default());
        let json = serde_json::to_string(&campaign).unwrap();
        assert!(json.contains("\"type\":\"BEC\""));
        assert!(json.contains("\"status\":\"draft\""));

        let parsed: Campaign = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.name, "demo");
        assert_eq!(parsed.campaign_type, CampaignType::Bec);
        assert_eq!(parsed.settings.template, "default");
    }
}
