//! Error taxonomy for the engine.
//!
//! Every component translates its internal faults into one of these kinds
//! at its public boundary; binaries add context with `anyhow`.

use thiserror::Error;

/// Engine-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Referenced campaign does not exist.
    #[error("campaign '{0}' not found")]
    CampaignNotFound(String),

    /// Campaign name collision on create.
    #[error("campaign '{0}' already exists")]
    DuplicateCampaign(String),

    /// Referenced template file does not exist.
    #[error("template '{0}' not found")]
    TemplateNotFound(String),

    /// Message could not be rendered; rejected at submit time.
    #[error("render failed: {0}")]
    Render(String),

    /// Outbound dispatch failed; subject to the pool's retry policy.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Remote resource could not be fetched.
    #[error("fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// A dependent component is disabled because its configuration is
    /// missing or malformed.
    #[error("{component} is not configured")]
    ConfigUnavailable { component: &'static str },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
