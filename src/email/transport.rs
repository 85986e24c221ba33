//! Mail transport abstraction and the SMTP implementation.
//!
//! The [`MailTransport`] trait is the seam between message composition
//! and the wire: production uses [`SmtpMailTransport`] over lettre's
//! async SMTP client, tests substitute a recording implementation.

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;

use crate::config::SmtpConfig;

/// A composed email ready for submission.
#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

/// Errors surfaced by a mail transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid message: {0}")]
    Message(String),

    #[error("smtp error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// Submits composed emails to the outside world.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn deliver(&self, email: &OutgoingEmail) -> Result<(), TransportError>;
}

/// SMTP mail transport with STARTTLS and basic credentials.
pub struct SmtpMailTransport {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailTransport {
    pub fn new(config: &SmtpConfig) -> Result<Self, TransportError> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();

        Ok(Self { transport })
    }
}

#[async_trait]
impl MailTransport for SmtpMailTransport {
    async fn deliver(&self, email: &OutgoingEmail) -> Result<(), TransportError> {
        let from: Mailbox = email
            .from
            .parse()
            .map_err(|e| TransportError::Message(format!("sender '{}': {}", email.from, e)))?;
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e| TransportError::Message(format!("recipient '{}': {}", email.to, e)))?;

        let builder = Message::builder()
            .from(from)
            .to(to)
            .subject(email.subject.clone());

        let message = if email.text_body.is_empty() {
            builder.singlepart(SinglePart::html(email.html_body.clone()))
        } else {
            builder.multipart(MultiPart::alternative_plain_html(
                email.text_body.clone(),
                email.html_body.clone(),
            ))
        }
        .map_err(|e| TransportError::Message(e.to_string()))?;

        self.transport.send(message).await?;
        Ok(())
    }
}
