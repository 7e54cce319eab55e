//! Report delivery

use crate::config::MailConfig;
use crate::error::{Error, Result};
use crate::report::Report;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

/// Hands a finished report to the outside world.
pub trait Notifier {
    /// Deliver one report.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Delivery`] if the report could not be sent.
    fn deliver(
        &self,
        report: &Report,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Sends the report as a single plain-text mail to all recipients.
#[derive(Debug, Clone)]
pub struct SmtpNotifier {
    config: MailConfig,
}

impl SmtpNotifier {
    #[must_use]
    pub const fn new(config: MailConfig) -> Self {
        Self { config }
    }

    /// Build the outbound message without sending it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Delivery`] for malformed addresses.
    pub fn message(&self, report: &Report) -> Result<Message> {
        let from: Mailbox = self
            .config
            .from_address
            .parse()
            .map_err(|e| {
                Error::Delivery(format!("Invalid from address: {e}"))
            })?;

        let mut builder =
            Message::builder().from(from).subject(&report.subject);
        for recipient in &self.config.recipients {
            let to: Mailbox = recipient.parse().map_err(|e| {
                Error::Delivery(format!("Invalid recipient {recipient}: {e}"))
            })?;
            builder = builder.to(to);
        }

        builder
            .header(ContentType::TEXT_PLAIN)
            .body(report.body.clone())
            .map_err(|e| Error::Delivery(format!("Failed to build email: {e}")))
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let relay = &self.config.smtp_server;
        let mut transport =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(relay)
                .map_err(|e| {
                    Error::Delivery(format!(
                        "Failed to create SMTP transport: {e}"
                    ))
                })?
                .port(self.config.smtp_port);

        if let (Some(username), Some(password)) =
            (&self.config.smtp_username, &self.config.smtp_password)
        {
            let credentials =
                Credentials::new(username.clone(), password.clone());
            transport = transport.credentials(credentials);
        }
        Ok(transport.build())
    }
}

impl Notifier for SmtpNotifier {
    async fn deliver(&self, report: &Report) -> Result<()> {
        let message = self.message(report)?;
        self.transport()?
            .send(message)
            .await
            .map_err(|e| Error::Delivery(format!("SMTP send failed: {e}")))?;

        info!(
            "Warning email sent to {} recipient(s): {}",
            self.config.recipients.len(),
            report.subject
        );
        Ok(())
    }
}
