//! Outbound transport seam.
//!
//! The pool only knows the `Transport` trait; the SMTP implementation
//! translates every lettre fault into a generic transport error so the
//! retry logic never sees provider-specific types.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment as MimeAttachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::EmailConfig;
use crate::delivery::OutboundEmail;
use crate::error::{Error, Result};

/// Performs the network handshake and send for one rendered message.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<()>;
}

/// SMTP transport over a TLS relay.
pub struct SmtpTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
}

impl SmtpTransport {
    /// Build the transport from the loaded email config.
    ///
    /// A missing config, or one with an unusable relay or sender address,
    /// makes the transport unavailable rather than panicking; callers
    /// decide whether that disables the run.
    pub fn from_config(config: Option<&EmailConfig>) -> Result<Self> {
        let config = config.ok_or(Error::ConfigUnavailable {
            component: "smtp transport",
        })?;

        let credentials =
            Credentials::new(config.username.clone(), config.password.clone());
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_server)
            .map_err(|_| Error::ConfigUnavailable {
                component: "smtp transport",
            })?
            .port(config.smtp_port)
            .credentials(credentials)
            .build();

        let address = config.sender_email.parse().map_err(|_| Error::ConfigUnavailable {
            component: "smtp transport",
        })?;
        let sender = Mailbox::new(Some(config.sender_name.clone()), address);

        Ok(Self { mailer, sender })
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send(&self, email: &OutboundEmail) -> Result<()> {
        let from = match &email.spoofed_sender {
            Some(spoofed) => spoofed
                .parse::<Mailbox>()
                .map_err(|e| Error::Transport(format!("bad spoofed sender: {e}")))?,
            None => self.sender.clone(),
        };
        let to = email
            .recipient
            .parse::<Mailbox>()
            .map_err(|e| Error::Transport(format!("bad recipient: {e}")))?;

        let builder = Message::builder()
            .from(from)
            .to(to)
            .subject(email.subject.clone());

        let message = if email.attachments.is_empty() {
            builder.singlepart(SinglePart::html(email.html.clone()))
        } else {
            let mut mixed = MultiPart::mixed().singlepart(SinglePart::html(email.html.clone()));
            for attachment in &email.attachments {
                mixed = mixed.singlepart(
                    MimeAttachment::new(attachment.filename.clone()).body(
                        attachment.content.clone(),
                        ContentType::parse("application/octet-stream")
                            .expect("static mime type"),
                    ),
                );
            }
            builder.multipart(mixed)
        }
        .map_err(|e| Error::Transport(format!("message build: {e}")))?;

        self.mailer
            .send(message)
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(())
    }
}
