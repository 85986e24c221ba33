//! Email composition and delivery.
//!
//! Renders inline template strings (subject and body stored on the
//! template record, as opposed to the file-backed engine) and submits
//! messages over the configured mail transport with an explicit send
//! deadline.

use std::sync::Arc;
use std::time::Duration;

use handlebars::Handlebars;
use serde_json::Value;
use thiserror::Error;
use tokio::time::timeout;

use crate::config::SmtpConfig;
use crate::metrics::{EMAILS_FAILED_TOTAL, EMAILS_SENT_TOTAL};
use crate::notification::EmailTemplate;

use super::transport::{MailTransport, OutgoingEmail, SmtpMailTransport, TransportError};

/// Email service errors.
#[derive(Debug, Error)]
pub enum EmailError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("failed to parse template: {0}")]
    Template(String),

    #[error("failed to render template: {0}")]
    Render(String),

    #[error("data mismatch: no data for recipient at index {0}")]
    DataMismatch(usize),

    #[error("failed to send email to {recipient}: {source}")]
    Delivery {
        recipient: String,
        source: TransportError,
    },

    #[error("email send to {0} timed out")]
    Timeout(String),
}

/// Result type for email operations
pub type EmailResult<T> = Result<T, EmailError>;

/// Composes and sends email, single or batch.
pub struct EmailService {
    transport: Arc<dyn MailTransport>,
    sender: String,
    send_timeout: Duration,
    renderer: Handlebars<'static>,
}

impl EmailService {
    /// Create a service backed by the configured SMTP relay.
    pub fn new(config: &SmtpConfig) -> Result<Self, TransportError> {
        let transport = Arc::new(SmtpMailTransport::new(config)?);
        Ok(Self::with_transport(
            transport,
            config.sender_address().to_string(),
            Duration::from_secs(config.send_timeout_seconds),
        ))
    }

    /// Create a service over an arbitrary transport.
    pub fn with_transport(
        transport: Arc<dyn MailTransport>,
        sender: String,
        send_timeout: Duration,
    ) -> Self {
        let mut renderer = Handlebars::new();
        renderer.set_strict_mode(true);
        Self {
            transport,
            sender,
            send_timeout,
            renderer,
        }
    }

    /// Render an inline template string against the provided data.
    pub fn render_template(&self, template: &str, data: &Value) -> EmailResult<String> {
        // Compile first so syntax errors are distinguishable from
        // missing-field errors during execution
        handlebars::Template::compile(template)
            .map_err(|e| EmailError::Template(e.to_string()))?;

        self.renderer
            .render_template(template, data)
            .map_err(|e| EmailError::Render(e.to_string()))
    }

    /// Send a single email.
    ///
    /// The transport call runs under the configured deadline; an expired
    /// deadline is reported as [`EmailError::Timeout`] so callers can
    /// treat it as retryable.
    pub async fn send_email(
        &self,
        recipient: &str,
        subject: &str,
        text_body: &str,
        html_body: &str,
    ) -> EmailResult<()> {
        if recipient.is_empty() || subject.is_empty() {
            return Err(EmailError::InvalidInput(
                "recipient and subject cannot be empty".to_string(),
            ));
        }

        let email = OutgoingEmail {
            from: self.sender.clone(),
            to: recipient.to_string(),
            subject: subject.to_string(),
            text_body: text_body.to_string(),
            html_body: html_body.to_string(),
        };

        match timeout(self.send_timeout, self.transport.deliver(&email)).await {
            Ok(Ok(())) => {
                EMAILS_SENT_TOTAL.inc();
                tracing::debug!(recipient = %recipient, subject = %subject, "Email sent");
                Ok(())
            }
            Ok(Err(source)) => {
                EMAILS_FAILED_TOTAL.inc();
                Err(EmailError::Delivery {
                    recipient: recipient.to_string(),
                    source,
                })
            }
            Err(_) => {
                EMAILS_FAILED_TOTAL.inc();
                Err(EmailError::Timeout(recipient.to_string()))
            }
        }
    }

    /// Send one templated email per recipient, pairing recipients with
    /// `data_list` positionally.
    ///
    /// Failures are isolated per recipient; the returned vector holds one
    /// result per recipient in submission order. Sends run strictly
    /// sequentially, so result ordering matches wire ordering.
    pub async fn send_batch(
        &self,
        recipients: &[String],
        template: &EmailTemplate,
        data_list: &[Value],
    ) -> Vec<EmailResult<()>> {
        let mut results = Vec::with_capacity(recipients.len());

        for (index, recipient) in recipients.iter().enumerate() {
            let Some(data) = data_list.get(index) else {
                results.push(Err(EmailError::DataMismatch(index)));
                continue;
            };

            let outcome = async {
                let subject = self.render_template(&template.subject, data)?;
                let body = self.render_template(&template.body_html, data)?;
                self.send_email(recipient, &subject, "", &body).await
            }
            .await;

            if let Err(e) = &outcome {
                tracing::warn!(recipient = %recipient, error = %e, "Batch email send failed");
            }
            results.push(outcome);
        }

        results
    }
}
