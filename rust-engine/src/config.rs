//! Configuration module.
//!
//! Email/SMTP settings come from a JSON file loaded once at startup;
//! engine tuning comes from environment variables. A missing or malformed
//! email config disables the components that depend on it instead of
//! aborting the process.

use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{error, warn};

/// SMTP and sender settings, loaded from a JSON config file.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    /// SMTP relay hostname
    pub smtp_server: String,

    /// SMTP relay port
    pub smtp_port: u16,

    /// SMTP authentication username
    pub username: String,

    /// SMTP authentication password
    pub password: String,

    /// Display name used in the From header
    #[serde(default = "default_sender_name")]
    pub sender_name: String,

    /// Address used in the From header
    #[serde(default = "default_sender_email")]
    pub sender_email: String,

    /// Default subject when no campaign-specific subject applies
    #[serde(default = "default_subject")]
    pub subject: String,
}

fn default_sender_name() -> String {
    "IT Support".to_string()
}

fn default_sender_email() -> String {
    "no-reply@example.com".to_string()
}

fn default_subject() -> String {
    "Important Notification".to_string()
}

impl EmailConfig {
    /// Load the email configuration from a JSON file.
    ///
    /// Returns `None` when the file is missing or malformed; dependent
    /// components report themselves unavailable in that case.
    pub fn load(path: &Path) -> Option<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                error!(path = %path.display(), error = %e, "email_config_read_failed");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(config) => Some(config),
            Err(e) => {
                error!(path = %path.display(), error = %e, "email_config_parse_failed");
                None
            }
        }
    }
}

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding one subdirectory per campaign
    pub campaigns_dir: PathBuf,

    /// Directory holding per-campaign, per-day capture logs
    pub captured_dir: PathBuf,

    /// Path to the email config JSON file
    pub email_config_path: PathBuf,

    /// Port for the capture/tracking server to listen on
    pub port: u16,

    /// Externally reachable base URL of the capture/tracking server,
    /// injected into rendered messages
    pub tracker_base_url: String,

    /// Key for recipient pixel tokens
    pub tracking_key: String,

    /// Number of delivery workers
    pub pool_workers: usize,

    /// Capacity of the delivery queue
    pub queue_capacity: usize,

    /// Dispatch attempts per message before dropping it
    pub max_attempts: u32,

    /// Base delay before the first retry, doubling each attempt
    pub backoff_base_ms: u64,

    /// HTTP request timeout for the cloner in milliseconds
    pub request_timeout_ms: u64,
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        EngineConfig {
            campaigns_dir: env::var("PHANTOM_CAMPAIGNS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("campaigns")),

            captured_dir: env::var("PHANTOM_CAPTURED_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("captured")),

            email_config_path: env::var("PHANTOM_EMAIL_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("config/email_config.json")),

            port: parse_env("PHANTOM_PORT", 5000),

            tracker_base_url: env::var("PHANTOM_TRACKER_URL")
                .unwrap_or_else(|_| "http://localhost:5000".to_string()),

            tracking_key: env::var("PHANTOM_TRACKING_KEY")
                .unwrap_or_else(|_| "phantom-tracking".to_string()),

            pool_workers: parse_env("PHANTOM_POOL_WORKERS", 5),

            queue_capacity: parse_env("PHANTOM_QUEUE_CAPACITY", 64),

            max_attempts: parse_env("PHANTOM_MAX_ATTEMPTS", 3),

            backoff_base_ms: parse_env("PHANTOM_BACKOFF_BASE_MS", 500),

            request_timeout_ms: parse_env("PHANTOM_REQUEST_TIMEOUT_MS", 8000),
        }
    }
}

/// Parse an environment variable, falling back to a default on absence or
/// malformed input.
fn parse_env<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(env_var = name, value = %raw, "Invalid value, using default");
                default
            }
        },
        Err(_) => default,
    }
}
