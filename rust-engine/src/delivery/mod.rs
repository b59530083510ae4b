//! Outbound message delivery.
//!
//! `render` turns a (template, target, campaign) triple into a fully
//! instrumented message at submit time; `pool` dispatches accepted
//! messages through a bounded worker set with retry/backoff; `transport`
//! is the seam to the actual network send.

pub mod pool;
pub mod render;
pub mod transport;

pub use pool::{DeliveryPool, PoolOptions};
pub use render::Renderer;
pub use transport::{SmtpTransport, Transport};

/// A file embedded into a message at submit time.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub content: Vec<u8>,
}

/// A fully rendered message, ready for dispatch.
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub campaign: String,
    pub recipient: String,
    /// From-header override for BEC sends
    pub spoofed_sender: Option<String>,
    pub subject: String,
    pub html: String,
    pub attachments: Vec<Attachment>,
}
