//! Phantom - async orchestration engine for simulated social-engineering
//! campaigns.
//!
//! This library provides shared modules for the two Phantom binaries:
//! - `phantom`: CLI for managing campaigns and cloning landing pages
//! - `phantom-server`: capture/tracking web server
//!
//! ## Architecture
//!
//! ```text
//! Delivery Pool ──┐
//! Capture/Track ──┼─ events ─→ Aggregator ─→ Campaign Store
//! Site Cloner  ───┴─ clone artifacts ─→ Delivery Pool link targets
//! ```
//!
//! The aggregator is the single writer of campaign stats; the delivery
//! pool and the web handlers only produce events.

pub mod campaign;
pub mod cloner;
pub mod config;
pub mod delivery;
pub mod error;
pub mod events;
pub mod tracking;
pub mod web;

// Re-export commonly used types
pub use campaign::store::CampaignStore;
pub use campaign::{Campaign, CampaignStatus, CampaignType, Settings, Stats, Target};
pub use config::{EmailConfig, EngineConfig};
pub use delivery::pool::{DeliveryPool, PoolOptions};
pub use delivery::transport::{SmtpTransport, Transport};
pub use error::{Error, Result};
pub use events::aggregator::Aggregator;
pub use events::{Event, EventKind, EventSender};
pub use tracking::TrackingState;
pub use web::AppState;
