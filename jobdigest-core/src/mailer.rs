//! Email Sender capability and its SMTP adapter.

use async_trait::async_trait;
use lettre::message::{Mailbox, Message, MultiPart};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};
use thiserror::Error;

use crate::config::DeliveryConfig;
use crate::models::RenderedReport;

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Delivery failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, report: &RenderedReport)
        -> Result<(), DeliveryError>;
}

pub struct SmtpEmailSender {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpEmailSender {
    /// Relay transport for `delivery.smtp_host`; credentials come from the configured env vars
    /// and are omitted when unset (local relays).
    pub fn from_config(config: &DeliveryConfig) -> Result<Self, DeliveryError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
            .map_err(|e| DeliveryError::Failed(format!("invalid smtp_host: {}", e)))?;

        match (
            std::env::var(&config.smtp_user_env),
            std::env::var(&config.smtp_pass_env),
        ) {
            (Ok(user), Ok(pass)) => {
                builder = builder.credentials(Credentials::new(user, pass));
            }
            _ => {
                tracing::warn!(
                    user_env = %config.smtp_user_env,
                    "SMTP credentials not set, connecting without authentication"
                );
            }
        }

        let from = parse_mailbox(&config.sender)?;

        Ok(Self {
            mailer: builder.build(),
            from,
        })
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, DeliveryError> {
    address
        .parse()
        .map_err(|e| DeliveryError::Failed(format!("invalid address {}: {}", address, e)))
}

/// Multipart/alternative message with the plain-text and HTML renderings.
pub fn build_message(
    from: Mailbox,
    to: &str,
    subject: &str,
    report: &RenderedReport,
) -> Result<Message, DeliveryError> {
    Message::builder()
        .from(from)
        .to(parse_mailbox(to)?)
        .subject(subject)
        .multipart(MultiPart::alternative_plain_html(
            report.text.clone(),
            report.html.clone(),
        ))
        .map_err(|e| DeliveryError::Failed(format!("build email: {}", e)))
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        report: &RenderedReport,
    ) -> Result<(), DeliveryError> {
        let message = build_message(self.from.clone(), to, subject, report)?;
        self.mailer
            .send(message)
            .await
            .map_err(|e| DeliveryError::Failed(e.to_string()))?;
        Ok(())
    }
}
